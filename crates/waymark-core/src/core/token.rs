// waymark-core/src/core/token.rs
// ============================================================================
// Module: Waymark Capability Tokens
// Description: HMAC-bound tokens authenticating intent to act on a node.
// Purpose: Make the ack token the only input that can cause a durable write.
// Dependencies: hmac, sha2, subtle, serde, crate::core::{canonical, encoding, hashing, identifiers}
// ============================================================================

//! ## Overview
//! Capability tokens are short strings binding `(kind, session, run, node,
//! attempt)`, plus the pinned workflow hash for state tokens, under an
//! HMAC-SHA-256 over the payload's canonical bytes. Tokens are never
//! persisted: the signing key lives only in process memory and every load
//! re-mints fresh tokens. Verification is fail-closed and constant-time.

// ============================================================================
// SECTION: Imports
// ============================================================================

use hmac::Hmac;
use hmac::Mac;
use serde::Deserialize;
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::core::canonical::canonical_json_bytes;
use crate::core::encoding::base32_lower_nopad_decode;
use crate::core::encoding::base32_lower_nopad_encode;
use crate::core::hashing::WorkflowHash;
use crate::core::identifiers::AttemptId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::SessionId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Byte length of the token signing key.
pub const TOKEN_KEY_BYTES: usize = 32;
/// Base32 text length of a 32-byte MAC.
const MAC_TEXT_LEN: usize = 52;
/// Upper bound on accepted token text length.
const MAX_TOKEN_TEXT_LEN: usize = 4096;

/// Versioned prefix for state tokens.
const STATE_TOKEN_PREFIX: &str = "st1";
/// Versioned prefix for ack tokens.
const ACK_TOKEN_PREFIX: &str = "ack1";
/// Versioned prefix for checkpoint tokens.
const CHECKPOINT_TOKEN_PREFIX: &str = "chk1";

/// HMAC-SHA-256 instantiation used for token MACs.
type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// SECTION: Token Kind
// ============================================================================

/// Closed set of capability token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Read-anchor token naming a node's observed state.
    State,
    /// Append capability for one advance from a node.
    Ack,
    /// Capability to create a checkpoint off a node.
    Checkpoint,
}

impl TokenKind {
    /// Returns the versioned text prefix for the kind.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::State => STATE_TOKEN_PREFIX,
            Self::Ack => ACK_TOKEN_PREFIX,
            Self::Checkpoint => CHECKPOINT_TOKEN_PREFIX,
        }
    }
}

// ============================================================================
// SECTION: Token Payload
// ============================================================================

/// Signed payload bound by a capability token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    /// Token kind (also encoded in the prefix).
    pub token_kind: TokenKind,
    /// Session the capability applies to.
    pub session_id: SessionId,
    /// Run the capability applies to.
    pub run_id: RunId,
    /// Node the capability applies to.
    pub node_id: NodeId,
    /// Attempt the capability applies to.
    pub attempt_id: AttemptId,
    /// Pinned workflow hash; present on state tokens only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_hash_ref: Option<WorkflowHash>,
}

// ============================================================================
// SECTION: Signing Key
// ============================================================================

/// In-memory token signing key; never persisted.
#[derive(Clone)]
pub struct TokenKey {
    /// Raw key bytes.
    bytes: [u8; TOKEN_KEY_BYTES],
}

impl TokenKey {
    /// Wraps raw key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; TOKEN_KEY_BYTES]) -> Self {
        Self {
            bytes,
        }
    }
}

impl std::fmt::Debug for TokenKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenKey(redacted)")
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Closed set of token codec errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// Token text is structurally invalid.
    #[error("token malformed")]
    Malformed,
    /// Token kind does not match the expected kind.
    #[error("token kind mismatch")]
    KindMismatch,
    /// Token MAC does not verify.
    #[error("token signature invalid")]
    SignatureInvalid,
}

// ============================================================================
// SECTION: Minting
// ============================================================================

/// Mints a token string for a payload.
///
/// # Errors
///
/// Returns [`TokenError::Malformed`] when the payload cannot be
/// canonicalized.
pub fn mint_token(key: &TokenKey, payload: &TokenPayload) -> Result<String, TokenError> {
    let payload_bytes = canonical_json_bytes(payload).map_err(|_| TokenError::Malformed)?;
    let mac = compute_mac(key, &payload_bytes)?;
    Ok(format!(
        "{}{}{}",
        payload.token_kind.prefix(),
        base32_lower_nopad_encode(&payload_bytes),
        base32_lower_nopad_encode(&mac)
    ))
}

// ============================================================================
// SECTION: Verification
// ============================================================================

/// Verifies a token string and returns its payload.
///
/// # Errors
///
/// Returns [`TokenError::Malformed`] on structural problems,
/// [`TokenError::SignatureInvalid`] when the MAC does not verify, and
/// [`TokenError::KindMismatch`] when the kind disagrees with the prefix or
/// the caller's expectation.
pub fn verify_token(
    key: &TokenKey,
    text: &str,
    expected: TokenKind,
) -> Result<TokenPayload, TokenError> {
    if text.len() > MAX_TOKEN_TEXT_LEN || !text.is_ascii() {
        return Err(TokenError::Malformed);
    }
    let (prefix_kind, body) = strip_prefix(text)?;
    if body.len() <= MAC_TEXT_LEN {
        return Err(TokenError::Malformed);
    }
    let (payload_text, mac_text) = body.split_at(body.len() - MAC_TEXT_LEN);

    let payload_bytes =
        base32_lower_nopad_decode(payload_text).map_err(|_| TokenError::Malformed)?;
    let presented_mac = base32_lower_nopad_decode(mac_text).map_err(|_| TokenError::Malformed)?;
    let computed_mac = compute_mac(key, &payload_bytes)?;
    let matches: bool = computed_mac.ct_eq(presented_mac.as_slice()).into();
    if !matches {
        return Err(TokenError::SignatureInvalid);
    }

    let payload: TokenPayload =
        serde_json::from_slice(&payload_bytes).map_err(|_| TokenError::Malformed)?;
    if payload.token_kind != prefix_kind || payload.token_kind != expected {
        return Err(TokenError::KindMismatch);
    }
    payload.session_id.validate().map_err(|_| TokenError::Malformed)?;
    payload.run_id.validate().map_err(|_| TokenError::Malformed)?;
    payload.node_id.validate().map_err(|_| TokenError::Malformed)?;
    payload.attempt_id.validate().map_err(|_| TokenError::Malformed)?;
    Ok(payload)
}

/// Splits a token into its kind (by prefix) and body.
fn strip_prefix(text: &str) -> Result<(TokenKind, &str), TokenError> {
    // `ack1`/`chk1` are checked before `st1` so prefixes never shadow.
    for kind in [TokenKind::Ack, TokenKind::Checkpoint, TokenKind::State] {
        if let Some(body) = text.strip_prefix(kind.prefix()) {
            return Ok((kind, body));
        }
    }
    Err(TokenError::Malformed)
}

/// Computes the HMAC-SHA-256 over payload bytes.
fn compute_mac(key: &TokenKey, payload_bytes: &[u8]) -> Result<[u8; 32], TokenError> {
    let mut mac =
        HmacSha256::new_from_slice(&key.bytes).map_err(|_| TokenError::SignatureInvalid)?;
    mac.update(payload_bytes);
    let digest = mac.finalize().into_bytes();
    let mut out = [0_u8; 32];
    out.copy_from_slice(&digest);
    Ok(out)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use crate::core::identifiers::AttemptId;
    use crate::core::identifiers::NodeId;
    use crate::core::identifiers::RunId;
    use crate::core::identifiers::SessionId;

    use super::TokenError;
    use super::TokenKey;
    use super::TokenKind;
    use super::TokenPayload;
    use super::mint_token;
    use super::verify_token;

    /// Builds a deterministic test key.
    fn key() -> TokenKey {
        TokenKey::from_bytes([7_u8; 32])
    }

    /// Builds an ack payload for tests.
    fn payload(kind: TokenKind) -> TokenPayload {
        TokenPayload {
            token_kind: kind,
            session_id: SessionId::new("sess_abc234"),
            run_id: RunId::new("run_abc234"),
            node_id: NodeId::new("node_abc234"),
            attempt_id: AttemptId::new("attempt_abc234"),
            workflow_hash_ref: None,
        }
    }

    /// Tests mint then verify round-trips.
    #[test]
    fn test_round_trip() {
        let token = mint_token(&key(), &payload(TokenKind::Ack)).unwrap();
        assert!(token.starts_with("ack1"));
        let verified = verify_token(&key(), &token, TokenKind::Ack).unwrap();
        assert_eq!(verified, payload(TokenKind::Ack));
    }

    /// Tests a flipped character fails closed.
    #[test]
    fn test_tamper_detected() {
        let token = mint_token(&key(), &payload(TokenKind::Ack)).unwrap();
        let mut tampered: Vec<char> = token.chars().collect();
        let last = tampered.len() - 1;
        tampered[last] = if tampered[last] == 'a' { 'b' } else { 'a' };
        let tampered: String = tampered.into_iter().collect();
        let result = verify_token(&key(), &tampered, TokenKind::Ack);
        assert!(matches!(
            result,
            Err(TokenError::SignatureInvalid | TokenError::Malformed)
        ));
    }

    /// Tests kind confusion is rejected even with a valid MAC.
    #[test]
    fn test_kind_mismatch_rejected() {
        let token = mint_token(&key(), &payload(TokenKind::Ack)).unwrap();
        assert_eq!(
            verify_token(&key(), &token, TokenKind::Checkpoint),
            Err(TokenError::KindMismatch)
        );
    }

    /// Tests a wrong key invalidates the signature.
    #[test]
    fn test_wrong_key_rejected() {
        let token = mint_token(&key(), &payload(TokenKind::Ack)).unwrap();
        let other = TokenKey::from_bytes([9_u8; 32]);
        assert_eq!(
            verify_token(&other, &token, TokenKind::Ack),
            Err(TokenError::SignatureInvalid)
        );
    }

    /// Tests garbage text is malformed.
    #[test]
    fn test_garbage_malformed() {
        assert_eq!(verify_token(&key(), "nonsense", TokenKind::Ack), Err(TokenError::Malformed));
        assert_eq!(verify_token(&key(), "ack1", TokenKind::Ack), Err(TokenError::Malformed));
    }
}
