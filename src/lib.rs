/*
 * lib.rs
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

//! Session-management core for an end-to-end encrypted messaging client:
//! pairwise (Olm) sessions, group (Megolm) sessions, device trust via
//! fingerprint pinning (TOFU), and durable persistence of all of the above.
//!
//! The engine ([`Olm`]) is single-threaded and non-suspending: it owns the
//! account, every session table, both trust stores, and the database
//! connection, and every method runs to completion without yielding. Callers
//! that need concurrent access must serialize it themselves — see
//! `engine.rs` for the full contract. Low-level cryptography (the Olm and
//! Megolm ratchets) is delegated entirely to `vodozemac`; this crate never
//! touches raw key material beyond base64 strings and opaque pickles.

pub mod canonical;
pub mod device;
pub mod engine;
pub mod error;
pub mod group;
pub mod keystore;
pub mod payload;
pub mod session;
pub mod state_store;

pub use device::{Device, DeviceStore};
pub use engine::Olm;
pub use error::{OlmError, OlmResult};
pub use keystore::{IdentityKey, KeyStore};
pub use payload::{OlmEventPayload, QueuedOlmEvent, RoomKeyContent};
pub use session::{OlmSession, SessionStore};
pub use state_store::StateStore;
