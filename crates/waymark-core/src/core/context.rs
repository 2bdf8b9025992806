// waymark-core/src/core/context.rs
// ============================================================================
// Module: Waymark Context Merge
// Description: Shallow context merge with tombstones and byte budgets.
// Purpose: Narrow incoming context objects into a bounded merged context.
// Dependencies: serde_json, crate::core::canonical
// ============================================================================

//! ## Overview
//! Session context is a flat JSON object carried across steps. Incoming
//! context merges shallowly over the stored context; a `null` value is a
//! tombstone that deletes the key. Keys that collide with prototype
//! machinery in dynamic runtimes are rejected outright, and the merged
//! object is bounded by its canonical byte size.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::core::canonical::CanonicalJsonError;
use crate::core::canonical::canonical_byte_len;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum canonical UTF-8 bytes of the merged context object.
pub const MAX_CONTEXT_BYTES: usize = 262_144;

/// Keys rejected to keep contexts portable across dynamic runtimes.
pub const RESERVED_CONTEXT_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while merging context.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    /// A reserved key was supplied.
    #[error("reserved context key rejected: {key}")]
    ReservedKeyRejected {
        /// Rejected key.
        key: String,
    },
    /// The merged context exceeds its canonical byte budget.
    #[error("merged context exceeds {MAX_CONTEXT_BYTES} canonical bytes ({actual_bytes})")]
    BudgetExceeded {
        /// Actual canonical byte size.
        actual_bytes: usize,
    },
    /// The merged context could not be canonicalized.
    #[error("context canonicalization failed: {0}")]
    Canonicalization(#[from] CanonicalJsonError),
}

// ============================================================================
// SECTION: Narrowing
// ============================================================================

/// Returns the incoming context as an object when it is one.
///
/// Non-object values (including `null`) are treated as "no context supplied";
/// only JSON objects participate in merging.
#[must_use]
pub fn narrow_context_object(incoming: Option<&Value>) -> Option<&Map<String, Value>> {
    match incoming {
        Some(Value::Object(map)) => Some(map),
        _ => None,
    }
}

// ============================================================================
// SECTION: Merge
// ============================================================================

/// Shallow-merges an incoming context object over the stored context.
///
/// `null` values are tombstones: the key is removed from the result. The
/// incoming object itself keeps its tombstones so `context_set` events
/// preserve deletions.
///
/// # Errors
///
/// Returns [`ContextError`] on reserved keys or budget violations.
pub fn merge_context(
    stored: &Map<String, Value>,
    incoming: Option<&Map<String, Value>>,
) -> Result<Map<String, Value>, ContextError> {
    if let Some(incoming) = incoming {
        for key in incoming.keys() {
            if RESERVED_CONTEXT_KEYS.contains(&key.as_str()) {
                return Err(ContextError::ReservedKeyRejected {
                    key: key.clone(),
                });
            }
        }
    }

    let mut merged = stored.clone();
    if let Some(incoming) = incoming {
        for (key, value) in incoming {
            if value.is_null() {
                merged.remove(key);
            } else {
                merged.insert(key.clone(), value.clone());
            }
        }
    }

    let actual_bytes = canonical_byte_len(&merged)?;
    if actual_bytes > MAX_CONTEXT_BYTES {
        return Err(ContextError::BudgetExceeded {
            actual_bytes,
        });
    }
    Ok(merged)
}

/// Returns true when a context value counts as present and truthy.
#[must_use]
pub fn context_value_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(_)) => true,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::Map;
    use serde_json::Value;
    use serde_json::json;

    use super::ContextError;
    use super::context_value_truthy;
    use super::merge_context;
    use super::narrow_context_object;

    /// Builds a map from a JSON object literal.
    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Tests null values delete stored keys.
    #[test]
    fn test_tombstone_deletes() {
        let stored = object(json!({"a": 1, "b": 2}));
        let incoming = object(json!({"b": null, "c": 3}));
        let merged = merge_context(&stored, Some(&incoming)).unwrap();
        assert_eq!(Value::Object(merged), json!({"a": 1, "c": 3}));
    }

    /// Tests reserved keys are rejected.
    #[test]
    fn test_reserved_key_rejected() {
        let stored = Map::new();
        let incoming = object(json!({"__proto__": {"x": 1}}));
        assert_eq!(
            merge_context(&stored, Some(&incoming)),
            Err(ContextError::ReservedKeyRejected {
                key: "__proto__".to_string(),
            })
        );
    }

    /// Tests the canonical byte budget is enforced.
    #[test]
    fn test_budget_enforced() {
        let stored = Map::new();
        let incoming = object(json!({"blob": "x".repeat(super::MAX_CONTEXT_BYTES)}));
        assert!(matches!(
            merge_context(&stored, Some(&incoming)),
            Err(ContextError::BudgetExceeded { .. })
        ));
    }

    /// Tests non-object context narrows to none.
    #[test]
    fn test_non_object_context_ignored() {
        assert!(narrow_context_object(Some(&json!("text"))).is_none());
        assert!(narrow_context_object(Some(&json!(null))).is_none());
        assert!(narrow_context_object(Some(&json!({"k": 1}))).is_some());
    }

    /// Tests truthiness rules.
    #[test]
    fn test_truthiness() {
        assert!(!context_value_truthy(None));
        assert!(!context_value_truthy(Some(&json!(null))));
        assert!(!context_value_truthy(Some(&json!(""))));
        assert!(!context_value_truthy(Some(&json!(0))));
        assert!(context_value_truthy(Some(&json!("done"))));
        assert!(context_value_truthy(Some(&json!({}))));
    }
}
