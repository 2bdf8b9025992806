// waymark-core/tests/identifiers.rs
// ============================================================================
// Module: Identifier Tests
// Description: Minting shapes, derivation chains, and delimiter safety.
// ============================================================================
//! ## Overview
//! Validates identifier minting and the deterministic attempt-derivation
//! chain used by retries and forks.

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

use waymark_core::AttemptId;
use waymark_core::NodeId;
use waymark_core::SessionId;
use waymark_core::is_delimiter_safe;

/// Minted session ids carry the prefix and a 26-character base32 body.
#[test]
fn test_minted_session_shape() {
    let session_id = SessionId::minted(&[0x5a; 16]);
    assert!(session_id.as_str().starts_with("sess_"));
    assert_eq!(session_id.as_str().len(), "sess_".len() + 26);
    assert!(session_id.validate().is_ok());
    assert!(is_delimiter_safe(session_id.as_str()));
}

/// The attempt derivation chain is deterministic and delimiter-safe.
#[test]
fn test_attempt_chain_deterministic() {
    let root = AttemptId::minted(&[7; 16]);
    let first_a = root.derive_next();
    let first_b = root.derive_next();
    assert_eq!(first_a, first_b);
    assert_ne!(first_a, root);

    let mut chain = vec![root.clone()];
    let mut cursor = root;
    for _ in 0..8 {
        cursor = cursor.derive_next();
        assert!(cursor.validate().is_ok());
        assert!(!chain.contains(&cursor));
        chain.push(cursor.clone());
    }
}

/// Checkpoint node derivation is a pure function of its inputs.
#[test]
fn test_checkpoint_node_derivation() {
    let source = NodeId::minted(&[1; 16]);
    let attempt = AttemptId::minted(&[2; 16]);
    let a = NodeId::derived_checkpoint(&source, &attempt);
    let b = NodeId::derived_checkpoint(&source, &attempt);
    assert_eq!(a, b);
    assert!(a.validate().is_ok());

    let other = NodeId::derived_checkpoint(&source, &attempt.derive_next());
    assert_ne!(a, other);
}

/// Uppercase, empty, and wrong-prefix identifiers fail validation.
#[test]
fn test_validation_rejects_malformed() {
    assert!(SessionId::new("sess_OK").validate().is_err());
    assert!(SessionId::new("sess_").validate().is_err());
    assert!(SessionId::new("run_abc").validate().is_err());
    assert!(SessionId::new("").validate().is_err());
    assert!(SessionId::new("sess_abc123").validate().is_ok());
}
