/*
 * group.rs
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

//! Group (Megolm) session tables: inbound sessions keyed by (room, session id),
//! one outbound session per room, and the set of outbound sessions already
//! distributed to other devices.

use std::collections::{HashMap, HashSet};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use vodozemac::megolm::{GroupSession, InboundGroupSession, MegolmMessage, SessionConfig, SessionKey};

use crate::error::{OlmError, OlmResult};

pub struct InboundGroupSessionEntry {
    pub sender_curve25519: String,
    pub sender_ed25519: String,
    session: InboundGroupSession,
}

impl InboundGroupSessionEntry {
    pub fn session_id(&self) -> String {
        self.session.session_id()
    }

    pub fn pickle(&self) -> String {
        serde_json::to_string(&self.session.pickle()).expect("group session pickle is always serializable")
    }
}

pub struct OutboundGroupSessionEntry {
    session: GroupSession,
}

impl OutboundGroupSessionEntry {
    pub fn session_id(&self) -> String {
        self.session.session_id()
    }

    pub fn session_key(&self) -> String {
        self.session.session_key().to_base64()
    }

    pub fn message_index(&self) -> u32 {
        self.session.message_index()
    }

    pub fn encrypt(&mut self, plaintext: &str) -> String {
        STANDARD.encode(self.session.encrypt(plaintext).to_bytes())
    }
}

/// Inbound table keyed by (room_id, session_id), one outbound session per
/// room, and the set of outbound session ids already shared with peers.
#[derive(Default)]
pub struct GroupSessionTables {
    inbound: HashMap<(String, String), InboundGroupSessionEntry>,
    outbound: HashMap<String, OutboundGroupSessionEntry>,
    shared: HashSet<String>,
}

impl GroupSessionTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install an inbound group session for `room_id`, derived from
    /// `session_key_b64`, after checking that `session_id` (as claimed by the
    /// `m.room_key` event) matches the id actually derived from the key
    /// material. A mismatch is a fatal construction error: the session is
    /// not stored. First write wins otherwise: if a session already exists
    /// for this `(room_id, session_id)` pair it is kept, and the new one is
    /// dropped — this prevents a hostile re-share from resetting the ratchet.
    /// Returns `Ok(false)` when nothing changed, `Ok(true)` when inserted.
    pub fn install_inbound(
        &mut self,
        room_id: &str,
        session_id: &str,
        sender_curve25519: &str,
        sender_ed25519: &str,
        session_key_b64: &str,
    ) -> OlmResult<bool> {
        let session_key = SessionKey::from_base64(session_key_b64)
            .map_err(|e| OlmError::encryption(format!("invalid megolm session key: {}", e)))?;
        let session = InboundGroupSession::new(&session_key, SessionConfig::version_1());
        let derived_id = session.session_id();
        if derived_id != session_id {
            return Err(OlmError::encryption(format!(
                "claimed session_id {} does not match derived id {}",
                session_id, derived_id
            )));
        }
        let key = (room_id.to_string(), derived_id);
        if self.inbound.contains_key(&key) {
            return Ok(false);
        }
        self.inbound.insert(
            key,
            InboundGroupSessionEntry {
                sender_curve25519: sender_curve25519.to_string(),
                sender_ed25519: sender_ed25519.to_string(),
                session,
            },
        );
        Ok(true)
    }

    /// Install a pre-built inbound session straight from a persisted pickle,
    /// bypassing the session-key derivation path used for freshly-received
    /// room keys. Used only by the durable state loader.
    pub fn install_inbound_pickle(
        &mut self,
        room_id: &str,
        sender_curve25519: &str,
        sender_ed25519: &str,
        pickle_json: &str,
    ) -> OlmResult<()> {
        let pickle = serde_json::from_str(pickle_json).map_err(|e| OlmError::store(format!("corrupt group session pickle: {}", e)))?;
        let session = InboundGroupSession::from_pickle(pickle);
        let session_id = session.session_id();
        self.inbound.insert(
            (room_id.to_string(), session_id),
            InboundGroupSessionEntry {
                sender_curve25519: sender_curve25519.to_string(),
                sender_ed25519: sender_ed25519.to_string(),
                session,
            },
        );
        Ok(())
    }

    pub fn has_inbound(&self, room_id: &str, session_id: &str) -> bool {
        self.inbound.contains_key(&(room_id.to_string(), session_id.to_string()))
    }

    pub fn inbound_iter(&self) -> impl Iterator<Item = (&(String, String), &InboundGroupSessionEntry)> {
        self.inbound.iter()
    }

    /// The pickle for a single installed inbound session, for persistence.
    pub fn inbound_pickle(&self, room_id: &str, session_id: &str) -> Option<String> {
        self.inbound.get(&(room_id.to_string(), session_id.to_string())).map(|e| e.pickle())
    }

    /// Decrypt `ciphertext_b64` against the inbound session for
    /// `(room_id, session_id)`. Returns `Ok(None)` both when no such session
    /// exists and when the cryptographic library rejects the ciphertext —
    /// both are "could not decrypt", not a hard error.
    pub fn decrypt(&mut self, room_id: &str, session_id: &str, ciphertext_b64: &str) -> OlmResult<Option<Vec<u8>>> {
        let entry = match self.inbound.get_mut(&(room_id.to_string(), session_id.to_string())) {
            Some(e) => e,
            None => return Ok(None),
        };
        let bytes = STANDARD
            .decode(ciphertext_b64)
            .map_err(|e| OlmError::encryption(format!("invalid base64 megolm ciphertext: {}", e)))?;
        let message = match MegolmMessage::from_bytes(&bytes) {
            Ok(m) => m,
            Err(_) => return Ok(None),
        };
        match entry.session.decrypt(&message) {
            Ok(decrypted) => Ok(Some(decrypted.plaintext)),
            Err(_) => Ok(None),
        }
    }

    /// Ensure an outbound session exists for `room_id`, creating one (and a
    /// matching local inbound copy so the sender can decrypt its own
    /// history) if necessary. Returns whether a new session was created.
    pub fn ensure_outbound(&mut self, room_id: &str, self_curve25519: &str, self_ed25519: &str) -> bool {
        if self.outbound.contains_key(room_id) {
            return false;
        }
        let session = GroupSession::new(SessionConfig::version_1());
        let session_id = session.session_id();
        let session_key = session.session_key().to_base64();
        self.outbound.insert(room_id.to_string(), OutboundGroupSessionEntry { session });

        let inbound_key = SessionKey::from_base64(&session_key).expect("just-generated session key is valid");
        let inbound = InboundGroupSession::new(&inbound_key, SessionConfig::version_1());
        self.inbound.insert(
            (room_id.to_string(), session_id),
            InboundGroupSessionEntry {
                sender_curve25519: self_curve25519.to_string(),
                sender_ed25519: self_ed25519.to_string(),
                session: inbound,
            },
        );
        true
    }

    pub fn outbound(&mut self, room_id: &str) -> Option<&mut OutboundGroupSessionEntry> {
        self.outbound.get_mut(room_id)
    }

    pub fn is_shared(&self, session_id: &str) -> bool {
        self.shared.contains(session_id)
    }

    pub fn mark_shared(&mut self, session_id: impl Into<String>) {
        self.shared.insert(session_id.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_outbound_creates_matching_local_inbound_copy() {
        let mut tables = GroupSessionTables::new();
        assert!(tables.ensure_outbound("!room:x", "selfcurve", "selfed"));
        assert!(!tables.ensure_outbound("!room:x", "selfcurve", "selfed"));

        let session_id = tables.outbound("!room:x").unwrap().session_id();
        assert!(tables.has_inbound("!room:x", &session_id));
    }

    #[test]
    fn outbound_round_trips_through_local_inbound() {
        let mut tables = GroupSessionTables::new();
        tables.ensure_outbound("!room:x", "selfcurve", "selfed");
        let session_id = tables.outbound("!room:x").unwrap().session_id();
        let ciphertext = tables.outbound("!room:x").unwrap().encrypt("hello room");
        let plaintext = tables.decrypt("!room:x", &session_id, &ciphertext).unwrap().unwrap();
        assert_eq!(plaintext, b"hello room");
    }

    #[test]
    fn install_inbound_is_first_write_wins() {
        let mut tables = GroupSessionTables::new();
        tables.ensure_outbound("!room:x", "a", "b");
        let key = tables.outbound("!room:x").unwrap().session_key();
        let session_id = tables.outbound("!room:x").unwrap().session_id();

        let mut fresh = GroupSessionTables::new();
        assert!(fresh.install_inbound("!other:x", &session_id, "peer_curve", "peer_ed", &key).unwrap());
        assert!(!fresh
            .install_inbound("!other:x", &session_id, "someone_else_curve", "someone_else_ed", &key)
            .unwrap());
        let (_, entry) = fresh.inbound_iter().find(|(k, _)| k.1 == session_id).unwrap();
        assert_eq!(entry.sender_curve25519, "peer_curve");
    }

    #[test]
    fn install_inbound_rejects_session_id_mismatch() {
        let mut tables = GroupSessionTables::new();
        tables.ensure_outbound("!room:x", "a", "b");
        let key = tables.outbound("!room:x").unwrap().session_key();

        let mut fresh = GroupSessionTables::new();
        let err = fresh.install_inbound("!other:x", "not-the-real-id", "peer_curve", "peer_ed", &key).unwrap_err();
        assert!(matches!(err, OlmError::Encryption(_)));
        assert!(!fresh.has_inbound("!other:x", "not-the-real-id"));
    }

    #[test]
    fn shared_sessions_are_tracked_once() {
        let mut tables = GroupSessionTables::new();
        tables.ensure_outbound("!room:x", "a", "b");
        let id = tables.outbound("!room:x").unwrap().session_id();
        assert!(!tables.is_shared(&id));
        tables.mark_shared(id.clone());
        assert!(tables.is_shared(&id));
    }
}
