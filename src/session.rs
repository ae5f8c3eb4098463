/*
 * session.rs
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

//! Pairwise (Olm) sessions and the store that keeps one ordered list per peer.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use vodozemac::olm::{Message, OlmMessage, PreKeyMessage, Session};

use crate::error::{OlmError, OlmResult};

/// Wire-format message type: 0 for a pre-key (handshake) message, 1 for a
/// normal ratchet message.
pub const MESSAGE_TYPE_PREKEY: u8 = 0;
pub const MESSAGE_TYPE_NORMAL: u8 = 1;

/// A pairwise session together with the identity of the device it belongs to.
pub struct OlmSession {
    pub user_id: String,
    pub device_id: String,
    pub peer_curve25519: String,
    session: Session,
}

impl OlmSession {
    pub fn new(user_id: impl Into<String>, device_id: impl Into<String>, peer_curve25519: impl Into<String>, session: Session) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            peer_curve25519: peer_curve25519.into(),
            session,
        }
    }

    pub fn session_id(&self) -> String {
        self.session.session_id()
    }

    /// Whether a pre-key message was produced by the same handshake that
    /// created this session. Normal messages never match.
    pub fn matches(&self, message: &OlmMessage) -> bool {
        match message {
            OlmMessage::PreKey(pk) => self.session.session_keys() == pk.session_keys(),
            OlmMessage::Normal(_) => false,
        }
    }

    pub fn encrypt(&mut self, plaintext: &str) -> (u8, String) {
        match self.session.encrypt(plaintext) {
            OlmMessage::PreKey(pk) => (MESSAGE_TYPE_PREKEY, STANDARD.encode(pk.to_bytes())),
            OlmMessage::Normal(n) => (MESSAGE_TYPE_NORMAL, STANDARD.encode(n.to_bytes())),
        }
    }

    /// Decrypt a wire-encoded `(message_type, base64 body)` pair against this
    /// session. Returns an error for malformed input or a failed ratchet step;
    /// callers decide whether that failure is fatal (`matches` was true) or
    /// simply means "try the next session".
    pub fn decrypt(&mut self, message_type: u8, body_b64: &str) -> OlmResult<Vec<u8>> {
        let message = decode_olm_message(message_type, body_b64)?;
        self.session
            .decrypt(&message)
            .map_err(|e| OlmError::encryption(format!("session decrypt failed: {}", e)))
    }

    pub fn pickle(&self) -> String {
        serde_json::to_string(&self.session.pickle()).expect("session pickle is always serializable")
    }

    pub fn from_pickle(
        user_id: impl Into<String>,
        device_id: impl Into<String>,
        peer_curve25519: impl Into<String>,
        pickle_json: &str,
    ) -> OlmResult<Self> {
        let pickle = serde_json::from_str(pickle_json).map_err(|e| OlmError::store(format!("corrupt session pickle: {}", e)))?;
        Ok(Self::new(user_id, device_id, peer_curve25519, Session::from_pickle(pickle)))
    }
}

impl PartialEq for OlmSession {
    fn eq(&self, other: &Self) -> bool {
        self.user_id == other.user_id
            && self.device_id == other.device_id
            && self.peer_curve25519 == other.peer_curve25519
            && self.session_id() == other.session_id()
    }
}

pub fn decode_olm_message(message_type: u8, body_b64: &str) -> OlmResult<OlmMessage> {
    let bytes = STANDARD
        .decode(body_b64)
        .map_err(|e| OlmError::encryption(format!("invalid base64 ciphertext: {}", e)))?;
    match message_type {
        MESSAGE_TYPE_PREKEY => {
            let pk = PreKeyMessage::from_bytes(&bytes).map_err(|e| OlmError::encryption(format!("malformed pre-key message: {}", e)))?;
            Ok(OlmMessage::PreKey(pk))
        }
        MESSAGE_TYPE_NORMAL => {
            let m = Message::from_bytes(&bytes).map_err(|e| OlmError::encryption(format!("malformed message: {}", e)))?;
            Ok(OlmMessage::Normal(m))
        }
        other => Err(OlmError::encryption(format!("unknown olm message type {}", other))),
    }
}

/// Sessions grouped by peer Curve25519 identity key, each list kept sorted by
/// session id ascending so `get` always returns the same "canonical" session.
#[derive(Default)]
pub struct SessionStore {
    by_peer: HashMap<String, Vec<OlmSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session, rejecting exact duplicates. Returns whether it was
    /// newly inserted.
    pub fn add(&mut self, session: OlmSession) -> bool {
        let list = self.by_peer.entry(session.peer_curve25519.clone()).or_default();
        if list.iter().any(|s| *s == session) {
            return false;
        }
        list.push(session);
        list.sort_by(|a, b| a.session_id().cmp(&b.session_id()));
        true
    }

    /// The canonical (lowest session id) session for a peer, if any.
    pub fn get(&mut self, peer_curve25519: &str) -> Option<&mut OlmSession> {
        self.by_peer.get_mut(peer_curve25519).and_then(|v| v.first_mut())
    }

    pub fn has_session(&self, peer_curve25519: &str) -> bool {
        self.by_peer.get(peer_curve25519).map(|v| !v.is_empty()).unwrap_or(false)
    }

    /// All sessions for a peer, in session-id order.
    pub fn sessions_for(&self, peer_curve25519: &str) -> &[OlmSession] {
        self.by_peer.get(peer_curve25519).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn sessions_for_mut(&mut self, peer_curve25519: &str) -> &mut [OlmSession] {
        self.by_peer.get_mut(peer_curve25519).map(|v| v.as_mut_slice()).unwrap_or(&mut [])
    }

    pub fn iter(&self) -> impl Iterator<Item = &OlmSession> {
        self.by_peer.values().flatten()
    }
}
