// waymark-core/tests/tokens.rs
// ============================================================================
// Module: Capability Token Tests
// Description: Binding, tamper rejection, and kind separation.
// ============================================================================
//! ## Overview
//! Validates that capability tokens bind their full payload, reject any
//! tampering, and keep the three token kinds mutually unusable.

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
use waymark_core::ContentDigest;
use waymark_core::NodeId;
use waymark_core::RunId;
use waymark_core::SessionId;
use waymark_core::TokenError;
use waymark_core::TokenKey;
use waymark_core::TokenKind;
use waymark_core::TokenPayload;
use waymark_core::WorkflowHash;
use waymark_core::mint_token;
use waymark_core::verify_token;

/// Builds a payload with every field populated.
fn payload(kind: TokenKind) -> TokenPayload {
    TokenPayload {
        token_kind: kind,
        session_id: SessionId::minted(&[1; 16]),
        run_id: RunId::minted(&[2; 16]),
        node_id: NodeId::minted(&[3; 16]),
        attempt_id: AttemptId::minted(&[4; 16]),
        workflow_hash_ref: match kind {
            TokenKind::State => {
                Some(WorkflowHash::from_digest(ContentDigest::of_bytes(b"workflow")))
            }
            TokenKind::Ack | TokenKind::Checkpoint => None,
        },
    }
}

/// A state token round-trips its full payload, including the workflow hash.
#[test]
fn test_state_token_binds_workflow_hash() {
    let key = TokenKey::from_bytes([11; 32]);
    let minted = mint_token(&key, &payload(TokenKind::State)).unwrap();
    assert!(minted.starts_with("st1"));

    let verified = verify_token(&key, &minted, TokenKind::State).unwrap();
    assert_eq!(verified, payload(TokenKind::State));
    assert!(verified.workflow_hash_ref.is_some());
}

/// Every payload character is covered by the MAC.
#[test]
fn test_any_payload_flip_rejected() {
    let key = TokenKey::from_bytes([11; 32]);
    let minted = mint_token(&key, &payload(TokenKind::Ack)).unwrap();
    let body_start = "ack1".len();

    for position in body_start..minted.len() {
        let mut tampered: Vec<u8> = minted.clone().into_bytes();
        tampered[position] = if tampered[position] == b'a' { b'b' } else { b'a' };
        let tampered = String::from_utf8(tampered).unwrap();
        if tampered == minted {
            continue;
        }
        assert!(
            verify_token(&key, &tampered, TokenKind::Ack).is_err(),
            "flip at {position} was accepted"
        );
    }
}

/// Each kind's token is unusable as any other kind.
#[test]
fn test_kinds_are_mutually_unusable() {
    let key = TokenKey::from_bytes([11; 32]);
    for kind in [TokenKind::State, TokenKind::Ack, TokenKind::Checkpoint] {
        let minted = mint_token(&key, &payload(kind)).unwrap();
        for expected in [TokenKind::State, TokenKind::Ack, TokenKind::Checkpoint] {
            let result = verify_token(&key, &minted, expected);
            if expected == kind {
                assert!(result.is_ok());
            } else {
                assert_eq!(result, Err(TokenError::KindMismatch));
            }
        }
    }
}

/// Tokens with a foreign or truncated body are malformed, never panics.
#[test]
fn test_malformed_inputs() {
    let key = TokenKey::from_bytes([11; 32]);
    for text in ["", "st1", "ack1abc", "zzz1aaaa", "ack1ABCDEF"] {
        assert!(verify_token(&key, text, TokenKind::Ack).is_err(), "accepted {text:?}");
    }
}
