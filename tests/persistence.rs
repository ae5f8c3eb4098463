/*
 * persistence.rs
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

//! End-to-end scenario: two devices handshake, distribute a room key, send a
//! group message, and survive a restart of both engines.
//!
//! Run with `cargo test --test persistence -- --nocapture`.

use matrix_olm_core::{Device, Olm};

fn claim_and_connect(alice: &mut Olm, bob: &mut Olm) {
    bob.generate_one_time_keys(1).unwrap();
    let otk = bob.one_time_keys().values().next().unwrap().clone();
    bob.mark_keys_as_published().unwrap();

    alice.add_device(Device::new(bob.user_id.clone(), bob.device_id.clone(), bob.ed25519(), bob.curve25519())).unwrap();
    bob.add_device(Device::new(alice.user_id.clone(), alice.device_id.clone(), alice.ed25519(), alice.curve25519())).unwrap();
    alice.verify_device(&Device::new(bob.user_id.clone(), bob.device_id.clone(), bob.ed25519(), bob.curve25519())).unwrap();
    bob.verify_device(&Device::new(alice.user_id.clone(), alice.device_id.clone(), alice.ed25519(), alice.curve25519())).unwrap();

    alice.create_session(&bob.user_id, &bob.device_id, &otk).unwrap();
}

#[test]
fn room_message_survives_restart_of_both_engines() {
    let dir = tempfile::tempdir().unwrap();
    let alice_dir = dir.path().join("alice");
    let bob_dir = dir.path().join("bob");

    let room_id = "!scenario:example.org";
    let session_id;
    let room_ciphertext;

    {
        let mut alice = Olm::open("@alice:example.org", "ALICEDEV", &alice_dir).unwrap();
        let mut bob = Olm::open("@bob:example.org", "BOBDEV", &bob_dir).unwrap();
        claim_and_connect(&mut alice, &mut bob);

        let users = vec![bob.user_id.clone()];
        let (room_payload, to_device) = alice
            .group_encrypt(room_id, serde_json::json!({"msgtype": "m.text", "body": "hello bob"}), &users)
            .unwrap();
        let to_device = to_device.expect("first group_encrypt in a room always shares the session");

        session_id = room_payload["session_id"].as_str().unwrap().to_string();
        room_ciphertext = room_payload["ciphertext"].as_str().unwrap().to_string();

        let envelope = &to_device["messages"][&bob.user_id][&bob.device_id];
        let msg_type = envelope["ciphertext"][alice.curve25519()]["type"].as_u64().unwrap() as u8;
        let body = envelope["ciphertext"][alice.curve25519()]["body"].as_str().unwrap();
        bob.decrypt(&alice.user_id, &alice.curve25519(), msg_type, body).unwrap();

        assert!(bob.has_inbound_group_session(room_id, &session_id));
        let plaintext = bob.group_decrypt(room_id, &session_id, &room_ciphertext).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&plaintext).unwrap();
        assert_eq!(value["body"], "hello bob");

        // A second message on the already-shared session must not re-share.
        let (_, to_device_again) = alice.group_encrypt(room_id, serde_json::json!({"body": "again"}), &users).unwrap();
        assert!(to_device_again.is_none());
    }

    // Restart both engines from disk; Bob must still be able to decrypt a
    // message encrypted under the session installed before the restart.
    {
        let mut bob = Olm::open("@bob:example.org", "BOBDEV", &bob_dir).unwrap();
        assert!(bob.has_inbound_group_session(room_id, &session_id));
        let plaintext = bob.group_decrypt(room_id, &session_id, &room_ciphertext).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&plaintext).unwrap();
        assert_eq!(value["body"], "hello bob");
    }
}

#[test]
fn fingerprint_pin_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("alice");

    {
        let mut alice = Olm::open("@alice:example.org", "ALICEDEV", &path).unwrap();
        alice.add_device(Device::new("@carol:example.org", "C1", "PINNED_ED25519", "PINNED_CURVE25519")).unwrap();
    }

    let mut alice = Olm::open("@alice:example.org", "ALICEDEV", &path).unwrap();
    let err = alice
        .add_device(Device::new("@carol:example.org", "C1", "DIFFERENT_ED25519", "PINNED_CURVE25519"))
        .unwrap_err();
    assert!(matches!(err, matrix_olm_core::OlmError::Trust(_)));
}
