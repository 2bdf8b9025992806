// waymark-core/src/core/hashing.rs
// ============================================================================
// Module: Waymark Content Hashing
// Description: SHA-256 content digests with the textual `sha256:<hex>` form.
// Purpose: Provide deterministic identities for snapshots, workflows, and segments.
// Dependencies: serde, sha2, crate::core::canonical
// ============================================================================

//! ## Overview
//! All content addressing in Waymark uses SHA-256 over canonical JSON bytes
//! (or raw segment bytes) with the textual form `sha256:<64 lowercase hex>`.
//! Digests serialize as that textual form so the on-disk formats stay
//! self-describing. Snapshot references and workflow hashes are branded
//! digest strings to keep the two address spaces from mixing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde::de::Error as DeError;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

use crate::core::canonical::CanonicalJsonError;
use crate::core::canonical::canonical_json_bytes;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Textual prefix for SHA-256 digests.
const SHA256_PREFIX: &str = "sha256:";
/// Hex length of a SHA-256 digest.
const SHA256_HEX_LEN: usize = 64;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when parsing or computing content digests.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DigestError {
    /// Text does not match `sha256:<64 lowercase hex>`.
    #[error("malformed sha256 digest text")]
    Malformed,
    /// Canonicalization failed while hashing a structured value.
    #[error("failed to canonicalize value for hashing: {0}")]
    Canonicalization(#[from] CanonicalJsonError),
}

// ============================================================================
// SECTION: Content Digest
// ============================================================================

/// SHA-256 content digest with a stable `sha256:<hex>` textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentDigest {
    /// Lowercase hex-encoded digest bytes.
    hex: String,
}

impl ContentDigest {
    /// Computes the digest of raw bytes.
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self {
            hex: hex_encode(&hasher.finalize()),
        }
    }

    /// Computes the digest of a value's canonical JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::Canonicalization`] when serialization fails.
    pub fn of_canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<Self, DigestError> {
        Ok(Self::of_bytes(&canonical_json_bytes(value)?))
    }

    /// Parses a digest from its `sha256:<hex>` textual form.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::Malformed`] when the text is not a digest.
    pub fn parse(text: &str) -> Result<Self, DigestError> {
        let hex = text.strip_prefix(SHA256_PREFIX).ok_or(DigestError::Malformed)?;
        if hex.len() != SHA256_HEX_LEN
            || !hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(DigestError::Malformed);
        }
        Ok(Self {
            hex: hex.to_string(),
        })
    }

    /// Returns the lowercase hex payload without the prefix.
    #[must_use]
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SHA256_PREFIX}{}", self.hex)
    }
}

impl Serialize for ContentDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ContentDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(DeError::custom)
    }
}

// ============================================================================
// SECTION: Branded Digest References
// ============================================================================

/// Identity of a compiled workflow, a digest over its canonical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowHash(ContentDigest);

impl WorkflowHash {
    /// Brands a content digest as a workflow hash.
    #[must_use]
    pub const fn from_digest(digest: ContentDigest) -> Self {
        Self(digest)
    }

    /// Parses a workflow hash from digest text.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::Malformed`] when the text is not a digest.
    pub fn parse(text: &str) -> Result<Self, DigestError> {
        Ok(Self(ContentDigest::parse(text)?))
    }

    /// Returns the underlying content digest.
    #[must_use]
    pub const fn digest(&self) -> &ContentDigest {
        &self.0
    }
}

impl fmt::Display for WorkflowHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of an execution-snapshot file, a digest over its canonical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotRef(ContentDigest);

impl SnapshotRef {
    /// Brands a content digest as a snapshot reference.
    #[must_use]
    pub const fn from_digest(digest: ContentDigest) -> Self {
        Self(digest)
    }

    /// Parses a snapshot reference from digest text.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::Malformed`] when the text is not a digest.
    pub fn parse(text: &str) -> Result<Self, DigestError> {
        Ok(Self(ContentDigest::parse(text)?))
    }

    /// Returns the underlying content digest.
    #[must_use]
    pub const fn digest(&self) -> &ContentDigest {
        &self.0
    }
}

impl fmt::Display for SnapshotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::ContentDigest;

    /// Tests the textual form round-trips through parse.
    #[test]
    fn test_digest_text_round_trip() {
        let digest = ContentDigest::of_bytes(b"waymark");
        let parsed = ContentDigest::parse(&digest.to_string()).unwrap();
        assert_eq!(digest, parsed);
    }

    /// Tests canonical hashing is order-insensitive for object keys.
    #[test]
    fn test_canonical_hash_is_stable() {
        let a = ContentDigest::of_canonical_json(&json!({"b": 1, "a": 2})).unwrap();
        let b = ContentDigest::of_canonical_json(&json!({"a": 2, "b": 1})).unwrap();
        assert_eq!(a, b);
    }

    /// Tests uppercase hex is rejected.
    #[test]
    fn test_uppercase_hex_rejected() {
        let text = format!("sha256:{}", "A".repeat(64));
        assert!(ContentDigest::parse(&text).is_err());
    }
}
