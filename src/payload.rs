/*
 * payload.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of matrix_olm_core.
 *
 * matrix_olm_core is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This file is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this file.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Typed shapes for decrypted Olm event plaintext. Parsing into these structs
//! *is* the schema check named in the inbound pipeline: a payload missing a
//! required field fails to deserialize and is dropped before it reaches any
//! trust decision.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ALGORITHM_OLM: &str = "m.olm.v1.curve25519-aes-sha2";
pub const ALGORITHM_MEGOLM: &str = "m.megolm.v1.aes-sha2";
pub const EVENT_ROOM_KEY: &str = "m.room_key";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysBlock {
    pub ed25519: String,
}

/// The plaintext of a decrypted `m.olm.v1.curve25519-aes-sha2` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OlmEventPayload {
    #[serde(rename = "type")]
    pub event_type: String,
    pub sender: String,
    pub sender_device: String,
    pub recipient: String,
    pub recipient_keys: KeysBlock,
    pub keys: KeysBlock,
    pub content: Value,
}

impl OlmEventPayload {
    /// Parse and schema-validate a decrypted plaintext buffer. Any missing or
    /// mistyped required field is a schema failure, not a crash.
    pub fn parse(plaintext: &[u8]) -> Option<Self> {
        serde_json::from_slice(plaintext).ok()
    }
}

/// Content of an `m.room_key` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomKeyContent {
    pub algorithm: String,
    pub room_id: String,
    pub session_id: String,
    pub session_key: String,
}

impl RoomKeyContent {
    pub fn parse(content: &Value) -> Option<Self> {
        let parsed: Self = serde_json::from_value(content.clone()).ok()?;
        if parsed.algorithm != ALGORITHM_MEGOLM {
            return None;
        }
        Some(parsed)
    }
}

/// An olm event that decrypted and schema-validated but whose sender's
/// device is not yet known; queued for replay once device keys arrive.
#[derive(Debug, Clone)]
pub struct QueuedOlmEvent {
    pub sender: String,
    pub sender_curve25519: String,
    pub payload: OlmEventPayload,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_well_formed_payload() {
        let v = json!({
            "type": "m.room_key",
            "sender": "@alice:x",
            "sender_device": "D1",
            "recipient": "@bob:x",
            "recipient_keys": {"ed25519": "BOBED"},
            "keys": {"ed25519": "ALICEED"},
            "content": {
                "algorithm": "m.megolm.v1.aes-sha2",
                "room_id": "!r:x",
                "session_id": "S1",
                "session_key": "KEY"
            }
        });
        let bytes = serde_json::to_vec(&v).unwrap();
        let payload = OlmEventPayload::parse(&bytes).unwrap();
        assert_eq!(payload.event_type, EVENT_ROOM_KEY);
        let content = RoomKeyContent::parse(&payload.content).unwrap();
        assert_eq!(content.room_id, "!r:x");
    }

    #[test]
    fn missing_required_field_fails_to_parse() {
        let v = json!({"type": "m.room_key", "sender": "@alice:x"});
        let bytes = serde_json::to_vec(&v).unwrap();
        assert!(OlmEventPayload::parse(&bytes).is_none());
    }

    #[test]
    fn wrong_algorithm_is_rejected() {
        let content = json!({
            "algorithm": "m.olm.v1.curve25519-aes-sha2",
            "room_id": "!r:x",
            "session_id": "S1",
            "session_key": "KEY"
        });
        assert!(RoomKeyContent::parse(&content).is_none());
    }
}
