// waymark-core/src/core/canonical.rs
// ============================================================================
// Module: Waymark Canonical JSON Codec
// Description: RFC 8785 (JCS) canonical serialization helpers.
// Purpose: Provide the deterministic byte substrate for hashing and JSONL.
// Dependencies: serde, serde_jcs, serde_json
// ============================================================================

//! ## Overview
//! Every byte Waymark hashes, signs, or attests flows through this codec:
//! event segments, snapshots, pinned workflows, capability token payloads,
//! bundle integrity entries, and dedupe recipes with structured fields.
//! Canonicalization follows RFC 8785 (object keys sorted by UTF-16 code
//! units, no whitespace, shortest round-trip numbers) so the same value
//! produces byte-identical output on every host.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when canonicalizing a value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CanonicalJsonError {
    /// A number in the value is NaN or infinite.
    #[error("canonical json rejects non-finite numbers")]
    NonFiniteNumber,
    /// The value cannot be represented as JSON.
    #[error("canonical json unsupported value: {0}")]
    UnsupportedValue(String),
}

// ============================================================================
// SECTION: Canonical Bytes
// ============================================================================

/// Returns canonical JSON bytes for a serializable value using RFC 8785.
///
/// # Errors
///
/// Returns [`CanonicalJsonError`] when the value contains non-finite numbers
/// or cannot be represented as JSON.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(
    value: &T,
) -> Result<Vec<u8>, CanonicalJsonError> {
    serde_jcs::to_vec(value).map_err(classify_error)
}

/// Returns canonical JSON text for a serializable value.
///
/// # Errors
///
/// Returns [`CanonicalJsonError`] when canonicalization fails.
pub fn canonical_json_string<T: Serialize + ?Sized>(
    value: &T,
) -> Result<String, CanonicalJsonError> {
    serde_jcs::to_string(value).map_err(classify_error)
}

/// Returns one canonical JSONL line (canonical bytes plus a trailing newline).
///
/// # Errors
///
/// Returns [`CanonicalJsonError`] when canonicalization fails.
pub fn canonical_jsonl_line<T: Serialize + ?Sized>(
    value: &T,
) -> Result<Vec<u8>, CanonicalJsonError> {
    let mut bytes = canonical_json_bytes(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Returns the canonical UTF-8 byte length of a value.
///
/// # Errors
///
/// Returns [`CanonicalJsonError`] when canonicalization fails.
pub fn canonical_byte_len<T: Serialize + ?Sized>(value: &T) -> Result<usize, CanonicalJsonError> {
    Ok(canonical_json_bytes(value)?.len())
}

// ============================================================================
// SECTION: Error Classification
// ============================================================================

/// Maps a serializer failure onto the closed canonical-json error set.
fn classify_error(err: serde_json::Error) -> CanonicalJsonError {
    let message = err.to_string();
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("nan") || lowered.contains("infinit") || lowered.contains("finite") {
        CanonicalJsonError::NonFiniteNumber
    } else {
        CanonicalJsonError::UnsupportedValue(message)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::canonical_json_bytes;
    use super::canonical_jsonl_line;

    /// Tests key order is canonical regardless of construction order.
    #[test]
    fn test_keys_sorted() {
        let a = canonical_json_bytes(&json!({"b": 1, "a": 2}));
        let b = canonical_json_bytes(&json!({"a": 2, "b": 1}));
        assert_eq!(a, b);
        assert_eq!(a, Ok(br#"{"a":2,"b":1}"#.to_vec()));
    }

    /// Tests canonicalization is a fixpoint over parse.
    #[test]
    fn test_canonical_fixpoint() {
        let value = json!({"z": [1, 2.5, "x"], "a": {"nested": true, "0": null}});
        let first = canonical_json_bytes(&value).unwrap();
        let reparsed: serde_json::Value = serde_json::from_slice(&first).unwrap();
        let second = canonical_json_bytes(&reparsed).unwrap();
        assert_eq!(first, second);
    }

    /// Tests JSONL lines end with exactly one newline.
    #[test]
    fn test_jsonl_line_newline_terminated() {
        let line = canonical_jsonl_line(&json!({"k": "v"})).unwrap();
        assert!(line.ends_with(b"\n"));
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);
    }
}
