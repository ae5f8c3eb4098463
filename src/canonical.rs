/*
 * canonical.rs
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

//! Canonical JSON encoding, used wherever plaintext must be serialized the same
//! way on every device: UTF-8 preserved, keys sorted, no insignificant whitespace.
//!
//! `serde_json::Value::Object` is backed by a `BTreeMap` (we do not enable the
//! `preserve_order` feature anywhere in this workspace), so keys come out sorted
//! for free; the default compact formatter already uses `,`/`:` separators with
//! no surrounding space.

use serde_json::Value;

/// Encode a JSON value canonically for signing or encryption.
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(value).expect("Value serialization is infallible")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_and_uses_compact_separators() {
        let v = json!({"b": 1, "a": "x", "c": [1, 2]});
        assert_eq!(canonical_json(&v), r#"{"a":"x","b":1,"c":[1,2]}"#);
    }

    #[test]
    fn preserves_non_ascii() {
        let v = json!({"name": "Über"});
        assert_eq!(canonical_json(&v), r#"{"name":"Über"}"#);
    }
}
