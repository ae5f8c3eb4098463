/*
 * keystore.rs
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

//! Line-oriented, file-backed set of pinned device fingerprints (TOFU).
//!
//! One record per line: `<user_id> <device_id> <kind> <key>`. Blank lines and
//! lines starting with `#` are ignored. Only `matrix-ed25519` records are
//! materialized; other kinds are skipped on load for forward compatibility.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{OlmError, OlmResult};

pub const KIND_ED25519: &str = "matrix-ed25519";

/// A single pinned fingerprint: (user, device, kind, base64 key).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityKey {
    pub user_id: String,
    pub device_id: String,
    pub kind: String,
    pub key: String,
}

impl IdentityKey {
    pub fn ed25519(user_id: impl Into<String>, device_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            kind: KIND_ED25519.to_string(),
            key: key.into(),
        }
    }

    fn to_line(&self) -> String {
        format!("{} {} {} {}\n", self.user_id, self.device_id, self.kind, self.key)
    }

    fn from_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let mut parts = line.splitn(4, ' ');
        let user_id = parts.next()?.to_string();
        let device_id = parts.next()?.to_string();
        let kind = parts.next()?.to_string();
        let key = parts.next()?.to_string();
        if kind != KIND_ED25519 {
            return None;
        }
        Some(Self { user_id, device_id, kind, key })
    }
}

/// A persisted set of pinned fingerprints.
pub struct KeyStore {
    path: PathBuf,
    keys: Vec<IdentityKey>,
}

impl KeyStore {
    /// Open (and load, if present) a fingerprint store at `path`. A missing file
    /// is not an error; it yields an empty store.
    pub fn open(path: impl AsRef<Path>) -> OlmResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut store = Self { path, keys: Vec::new() };
        store.load()?;
        Ok(store)
    }

    pub fn load(&mut self) -> OlmResult<()> {
        self.keys.clear();
        let contents = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for line in contents.lines() {
            if let Some(key) = IdentityKey::from_line(line) {
                self.keys.push(key);
            }
        }
        Ok(())
    }

    fn persist(&self) -> OlmResult<()> {
        let mut out = String::new();
        for key in &self.keys {
            out.push_str(&key.to_line());
        }
        fs::write(&self.path, out)?;
        Ok(())
    }

    /// Return the pinned record for (user_id, device_id), if any.
    pub fn get(&self, user_id: &str, device_id: &str) -> Option<&IdentityKey> {
        self.keys.iter().find(|k| k.user_id == user_id && k.device_id == device_id)
    }

    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.keys.iter().any(|k| k == key)
    }

    /// Pin `key`. Returns `Ok(false)` without touching the file if a
    /// byte-identical record already exists. Returns `Err(OlmError::Trust)` if a
    /// different key is already pinned for the same (user, device, kind) —
    /// TOFU never silently overwrites.
    pub fn add(&mut self, key: IdentityKey) -> OlmResult<bool> {
        if let Some(existing) = self
            .keys
            .iter()
            .find(|k| k.user_id == key.user_id && k.device_id == key.device_id && k.kind == key.kind)
        {
            if existing.key == key.key {
                return Ok(false);
            }
            return Err(OlmError::trust(format!(
                "fingerprint mismatch for {}/{}: pinned {}, received {}",
                key.user_id, key.device_id, existing.key, key.key
            )));
        }
        self.keys.push(key);
        self.persist()?;
        Ok(true)
    }

    pub fn remove(&mut self, key: &IdentityKey) -> OlmResult<bool> {
        let before = self.keys.len();
        self.keys.retain(|k| k != key);
        let removed = self.keys.len() != before;
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IdentityKey> {
        self.keys.iter()
    }
}
