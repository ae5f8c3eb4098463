/*
 * error.rs
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

//! Errors raised by the trust store, session pipelines, and durable state layer.

use std::fmt;

/// All fallible outcomes of the crypto core.
#[derive(Debug)]
pub enum OlmError {
    /// A fingerprint pinning rule was violated, or an operation required a trusted
    /// device that is not trusted.
    Trust(String),
    /// A session that matched an inbound pre-key message failed to decrypt, or no
    /// identity key could be found to start an outbound session.
    Encryption(String),
    /// A decrypted payload was internally inconsistent (sender, recipient, or key
    /// mismatch).
    Verification(String),
    /// Durable persistence failed (file I/O or the embedded database).
    Store(String),
}

impl OlmError {
    pub fn trust(msg: impl Into<String>) -> Self {
        Self::Trust(msg.into())
    }

    pub fn encryption(msg: impl Into<String>) -> Self {
        Self::Encryption(msg.into())
    }

    pub fn verification(msg: impl Into<String>) -> Self {
        Self::Verification(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }
}

impl fmt::Display for OlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OlmError::Trust(m) => write!(f, "trust error: {}", m),
            OlmError::Encryption(m) => write!(f, "encryption error: {}", m),
            OlmError::Verification(m) => write!(f, "verification error: {}", m),
            OlmError::Store(m) => write!(f, "store error: {}", m),
        }
    }
}

impl std::error::Error for OlmError {}

impl From<std::io::Error> for OlmError {
    fn from(e: std::io::Error) -> Self {
        OlmError::Store(e.to_string())
    }
}

impl From<rusqlite::Error> for OlmError {
    fn from(e: rusqlite::Error) -> Self {
        OlmError::Store(e.to_string())
    }
}

pub type OlmResult<T> = Result<T, OlmError>;
