/*
 * device.rs
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

//! In-memory device directory, backed by a [`KeyStore`] for fingerprint pinning.

use crate::error::{OlmError, OlmResult};
use crate::keystore::{IdentityKey, KeyStore};

/// A known device: its keys, at minimum an `ed25519` fingerprint and a
/// `curve25519` identity key. Equality is defined solely over the `ed25519`
/// fingerprint — a device with the same (user, device) but a changed
/// fingerprint is a different device for trust purposes.
#[derive(Debug, Clone)]
pub struct Device {
    pub user_id: String,
    pub device_id: String,
    pub ed25519: String,
    pub curve25519: String,
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.user_id == other.user_id && self.device_id == other.device_id && self.ed25519 == other.ed25519
    }
}
impl Eq for Device {}

impl Device {
    pub fn new(
        user_id: impl Into<String>,
        device_id: impl Into<String>,
        ed25519: impl Into<String>,
        curve25519: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            ed25519: ed25519.into(),
            curve25519: curve25519.into(),
        }
    }

    pub fn fingerprint(&self) -> IdentityKey {
        IdentityKey::ed25519(self.user_id.clone(), self.device_id.clone(), self.ed25519.clone())
    }
}

/// The set of devices this client currently knows about, with a backing
/// [`KeyStore`] enforcing fingerprint pinning for every device added.
pub struct DeviceStore {
    devices: Vec<Device>,
    known: KeyStore,
}

impl DeviceStore {
    pub fn new(known: KeyStore) -> Self {
        Self { devices: Vec::new(), known }
    }

    /// Add a device. Returns `Ok(false)` if an identical device (by fingerprint
    /// equality) is already present. Propagates `OlmError::Trust` if the
    /// device's fingerprint conflicts with a previously pinned one.
    pub fn add(&mut self, device: Device) -> OlmResult<bool> {
        if self.devices.iter().any(|d| *d == device) {
            return Ok(false);
        }
        self.known.add(device.fingerprint())?;
        self.devices.push(device);
        Ok(true)
    }

    pub fn user_devices(&self, user_id: &str) -> impl Iterator<Item = &Device> {
        self.devices.iter().filter(move |d| d.user_id == user_id)
    }

    pub fn get(&self, user_id: &str, device_id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.user_id == user_id && d.device_id == device_id)
    }

    /// Locate a device by its Curve25519 identity key, used when an inbound
    /// handshake arrives bearing only that key.
    pub fn find_by_curve25519(&self, user_id: &str, curve25519: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.user_id == user_id && d.curve25519 == curve25519)
    }

    /// Check whether `key` (an observed fingerprint for some user/device) is
    /// consistent with the device we know for that (user, device). Returns an
    /// error if no such device is known at all — distinct from a mismatch,
    /// since callers (see the inbound pipeline) treat "unknown device" as
    /// "queue for later" rather than "reject".
    pub fn verify_key(&self, key: &IdentityKey) -> OlmResult<bool> {
        match self.get(&key.user_id, &key.device_id) {
            Some(device) => Ok(device.ed25519 == key.key),
            None => Err(OlmError::trust(format!(
                "no known device {}/{}",
                key.user_id, key.device_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_keystore(name: &str) -> KeyStore {
        let mut p = std::env::temp_dir();
        p.push(format!("matrix_olm_core_test_device_{}_{}", std::process::id(), name));
        let _ = std::fs::remove_file(&p);
        KeyStore::open(p).unwrap()
    }

    #[test]
    fn add_pins_fingerprint_and_rejects_changes() {
        let mut store = DeviceStore::new(temp_keystore("pin"));
        assert!(store.add(Device::new("@alice:x", "D1", "ED1", "CU1")).unwrap());
        // same device again: no-op
        assert!(!store.add(Device::new("@alice:x", "D1", "ED1", "CU1")).unwrap());
        // changed fingerprint for same (user, device): rejected
        let err = store.add(Device::new("@alice:x", "D1", "ED2", "CU1")).unwrap_err();
        assert!(matches!(err, OlmError::Trust(_)));
    }

    #[test]
    fn verify_key_distinguishes_missing_from_mismatch() {
        let mut store = DeviceStore::new(temp_keystore("verify"));
        store.add(Device::new("@bob:x", "D2", "ED9", "CU9")).unwrap();

        let matching = IdentityKey::ed25519("@bob:x", "D2", "ED9");
        assert!(store.verify_key(&matching).unwrap());

        let mismatched = IdentityKey::ed25519("@bob:x", "D2", "OTHER");
        assert!(!store.verify_key(&mismatched).unwrap());

        let unknown = IdentityKey::ed25519("@bob:x", "NOPE", "ED9");
        assert!(store.verify_key(&unknown).is_err());
    }
}
