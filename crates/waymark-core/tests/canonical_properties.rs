// waymark-core/tests/canonical_properties.rs
// ============================================================================
// Module: Canonical JSON Property Tests
// Description: Fixpoint and determinism properties of the canonical codec.
// ============================================================================
//! ## Overview
//! Property-tests the canonical codec: canonicalization is a fixpoint under
//! parse, deterministic across runs, and content hashing follows the bytes.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use proptest::prelude::*;
use serde_json::Value;
use serde_json::json;
use waymark_core::ContentDigest;
use waymark_core::canonical_json_bytes;

/// Strategy producing arbitrary JSON values of bounded depth.
fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-zA-Z0-9 _\\-]{0,24}".prop_map(Value::String),
    ];
    leaf.prop_recursive(4, 32, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-zA-Z0-9_]{1,12}", inner, 0..6)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

proptest! {
    /// Canonical bytes are a fixpoint under parse-then-canonicalize.
    #[test]
    fn prop_canonical_fixpoint(value in arb_json()) {
        let first = canonical_json_bytes(&value).unwrap();
        let reparsed: Value = serde_json::from_slice(&first).unwrap();
        let second = canonical_json_bytes(&reparsed).unwrap();
        prop_assert_eq!(first, second);
    }

    /// Canonicalization is deterministic across invocations.
    #[test]
    fn prop_canonical_deterministic(value in arb_json()) {
        let first = canonical_json_bytes(&value).unwrap();
        let second = canonical_json_bytes(&value).unwrap();
        prop_assert_eq!(first, second);
    }

    /// Hashes agree exactly when canonical bytes agree.
    #[test]
    fn prop_digest_follows_bytes(a in arb_json(), b in arb_json()) {
        let bytes_a = canonical_json_bytes(&a).unwrap();
        let bytes_b = canonical_json_bytes(&b).unwrap();
        let digest_a = ContentDigest::of_bytes(&bytes_a);
        let digest_b = ContentDigest::of_bytes(&bytes_b);
        prop_assert_eq!(bytes_a == bytes_b, digest_a == digest_b);
    }
}

/// Known canonical vectors stay bit-exact.
#[test]
fn test_known_canonical_vectors() {
    let value = json!({"b": [2, 1], "a": {"y": null, "x": true}, "c": "text"});
    let bytes = canonical_json_bytes(&value).unwrap();
    assert_eq!(bytes, br#"{"a":{"x":true,"y":null},"b":[2,1],"c":"text"}"#.to_vec());
}
