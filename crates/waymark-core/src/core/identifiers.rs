// waymark-core/src/core/identifiers.rs
// ============================================================================
// Module: Waymark Identifiers
// Description: Canonical opaque identifiers for sessions, runs, nodes, and events.
// Purpose: Provide strongly typed, serializable ids with stable string forms.
// Dependencies: serde, sha2, crate::core::encoding
// ============================================================================

//! ## Overview
//! This module defines the canonical string-based identifiers used throughout
//! Waymark. Identifiers are opaque, delimiter-safe (`[a-z0-9_-]+`), and
//! serialize as plain strings. Binary-representable ids mint as
//! `<prefix>_<base32>` over sixteen random bytes; attempt ids additionally
//! derive deterministic successors by hashing their parent's textual form.
//! Validation is enforced at store and token boundaries rather than on every
//! construction.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

use crate::core::encoding::base32_lower_nopad_encode;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Number of random bytes behind a minted identifier body.
pub const ID_BODY_BYTES: usize = 16;

/// Prefix for session identifiers.
const SESSION_ID_PREFIX: &str = "sess";
/// Prefix for run identifiers.
const RUN_ID_PREFIX: &str = "run";
/// Prefix for node identifiers.
const NODE_ID_PREFIX: &str = "node";
/// Prefix for attempt identifiers.
const ATTEMPT_ID_PREFIX: &str = "attempt";
/// Prefix for event identifiers.
const EVENT_ID_PREFIX: &str = "evt";
/// Prefix for gap identifiers.
const GAP_ID_PREFIX: &str = "gap";
/// Prefix for decision trace identifiers.
const TRACE_ID_PREFIX: &str = "trace";
/// Prefix for bundle identifiers.
const BUNDLE_ID_PREFIX: &str = "bundle";
/// Domain separator for derived checkpoint node identifiers.
const CHECKPOINT_NODE_DOMAIN: &str = "checkpoint";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when validating identifier text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    /// Identifier contains characters outside `[a-z0-9_-]` or is empty.
    #[error("identifier is not delimiter-safe")]
    NotDelimiterSafe,
    /// Identifier does not carry the expected kind prefix.
    #[error("identifier missing expected prefix {expected}")]
    WrongPrefix {
        /// Prefix the identifier was expected to carry.
        expected: &'static str,
    },
}

// ============================================================================
// SECTION: Validation Helpers
// ============================================================================

/// Returns true when the value is non-empty and matches `[a-z0-9_-]+`.
#[must_use]
pub fn is_delimiter_safe(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
}

/// Validates delimiter safety and a required `<prefix>_` lead-in.
fn validate_prefixed(value: &str, prefix: &'static str) -> Result<(), IdentifierError> {
    if !is_delimiter_safe(value) {
        return Err(IdentifierError::NotDelimiterSafe);
    }
    let lead = format!("{prefix}_");
    if !value.starts_with(&lead) || value.len() == lead.len() {
        return Err(IdentifierError::WrongPrefix {
            expected: prefix,
        });
    }
    Ok(())
}

/// Builds a `<prefix>_<base32>` identifier body from sixteen bytes.
fn minted_text(prefix: &str, bytes: &[u8; ID_BODY_BYTES]) -> String {
    format!("{prefix}_{}", base32_lower_nopad_encode(bytes))
}

/// Derives sixteen identifier-body bytes from a domain-separated digest.
fn derived_body(parts: &[&str]) -> [u8; ID_BODY_BYTES] {
    let mut hasher = Sha256::new();
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            hasher.update(b":");
        }
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    let mut body = [0_u8; ID_BODY_BYTES];
    body.copy_from_slice(&digest[..ID_BODY_BYTES]);
    body
}

// ============================================================================
// SECTION: Session Identifier
// ============================================================================

/// Session identifier (`sess_…`), the unit of locking and export.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a session identifier from an existing string form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a session identifier from sixteen entropy bytes.
    #[must_use]
    pub fn minted(bytes: &[u8; ID_BODY_BYTES]) -> Self {
        Self(minted_text(SESSION_ID_PREFIX, bytes))
    }

    /// Validates the identifier shape.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the value is malformed.
    pub fn validate(&self) -> Result<(), IdentifierError> {
        validate_prefixed(&self.0, SESSION_ID_PREFIX)
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Run Identifier
// ============================================================================

/// Run identifier (`run_…`), one per workflow invocation inside a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Creates a run identifier from an existing string form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a run identifier from sixteen entropy bytes.
    #[must_use]
    pub fn minted(bytes: &[u8; ID_BODY_BYTES]) -> Self {
        Self(minted_text(RUN_ID_PREFIX, bytes))
    }

    /// Validates the identifier shape.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the value is malformed.
    pub fn validate(&self) -> Result<(), IdentifierError> {
        validate_prefixed(&self.0, RUN_ID_PREFIX)
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Node Identifier
// ============================================================================

/// Node identifier (`node_…`), one per node in the per-run DAG.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node identifier from an existing string form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a node identifier from sixteen entropy bytes.
    #[must_use]
    pub fn minted(bytes: &[u8; ID_BODY_BYTES]) -> Self {
        Self(minted_text(NODE_ID_PREFIX, bytes))
    }

    /// Derives the deterministic checkpoint node for a source node and attempt.
    #[must_use]
    pub fn derived_checkpoint(source: &Self, attempt: &AttemptId) -> Self {
        let body = derived_body(&[CHECKPOINT_NODE_DOMAIN, source.as_str(), attempt.as_str()]);
        Self(minted_text(NODE_ID_PREFIX, &body))
    }

    /// Validates the identifier shape.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the value is malformed.
    pub fn validate(&self) -> Result<(), IdentifierError> {
        validate_prefixed(&self.0, NODE_ID_PREFIX)
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Attempt Identifier
// ============================================================================

/// Attempt identifier (`attempt_…`), derived deterministically per retry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(String);

impl AttemptId {
    /// Creates an attempt identifier from an existing string form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a root attempt identifier from sixteen entropy bytes.
    #[must_use]
    pub fn minted(bytes: &[u8; ID_BODY_BYTES]) -> Self {
        Self(minted_text(ATTEMPT_ID_PREFIX, bytes))
    }

    /// Derives the deterministic successor attempt from this attempt.
    #[must_use]
    pub fn derive_next(&self) -> Self {
        let body = derived_body(&[ATTEMPT_ID_PREFIX, self.as_str()]);
        Self(minted_text(ATTEMPT_ID_PREFIX, &body))
    }

    /// Validates the identifier shape.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the value is malformed.
    pub fn validate(&self) -> Result<(), IdentifierError> {
        validate_prefixed(&self.0, ATTEMPT_ID_PREFIX)
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for AttemptId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Event Identifier
// ============================================================================

/// Event identifier (`evt_…`), unique per domain event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Creates an event identifier from an existing string form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints an event identifier from sixteen entropy bytes.
    #[must_use]
    pub fn minted(bytes: &[u8; ID_BODY_BYTES]) -> Self {
        Self(minted_text(EVENT_ID_PREFIX, bytes))
    }

    /// Validates the identifier shape.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the value is malformed.
    pub fn validate(&self) -> Result<(), IdentifierError> {
        validate_prefixed(&self.0, EVENT_ID_PREFIX)
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for EventId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Gap Identifier
// ============================================================================

/// Gap identifier (`gap_…`) for recorded autonomy gaps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GapId(String);

impl GapId {
    /// Creates a gap identifier from an existing string form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a gap identifier from sixteen entropy bytes.
    #[must_use]
    pub fn minted(bytes: &[u8; ID_BODY_BYTES]) -> Self {
        Self(minted_text(GAP_ID_PREFIX, bytes))
    }

    /// Validates the identifier shape.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the value is malformed.
    pub fn validate(&self) -> Result<(), IdentifierError> {
        validate_prefixed(&self.0, GAP_ID_PREFIX)
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Trace Identifier
// ============================================================================

/// Decision trace identifier (`trace_…`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    /// Creates a trace identifier from an existing string form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a trace identifier from sixteen entropy bytes.
    #[must_use]
    pub fn minted(bytes: &[u8; ID_BODY_BYTES]) -> Self {
        Self(minted_text(TRACE_ID_PREFIX, bytes))
    }

    /// Validates the identifier shape.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the value is malformed.
    pub fn validate(&self) -> Result<(), IdentifierError> {
        validate_prefixed(&self.0, TRACE_ID_PREFIX)
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Bundle Identifier
// ============================================================================

/// Export bundle identifier (`bundle_…`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleId(String);

impl BundleId {
    /// Creates a bundle identifier from an existing string form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a bundle identifier from sixteen entropy bytes.
    #[must_use]
    pub fn minted(bytes: &[u8; ID_BODY_BYTES]) -> Self {
        Self(minted_text(BUNDLE_ID_PREFIX, bytes))
    }

    /// Validates the identifier shape.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the value is malformed.
    pub fn validate(&self) -> Result<(), IdentifierError> {
        validate_prefixed(&self.0, BUNDLE_ID_PREFIX)
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Output Identifier
// ============================================================================

/// Output identifier (`out_…`) for node outputs, deterministic per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputId(String);

impl OutputId {
    /// Creates an output identifier from an existing string form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Builds the recap output identifier for an attempt.
    #[must_use]
    pub fn recap(attempt: &AttemptId) -> Self {
        Self(format!("out_recap_{attempt}"))
    }

    /// Builds the artifact output identifier at a normalized position.
    #[must_use]
    pub fn artifact(attempt: &AttemptId, position: usize) -> Self {
        Self(format!("out_art_{attempt}_{position}"))
    }

    /// Validates the identifier shape.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the value is malformed.
    pub fn validate(&self) -> Result<(), IdentifierError> {
        validate_prefixed(&self.0, "out")
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Workflow / Step / Loop Identifiers
// ============================================================================

/// Workflow identifier, free-form but delimiter-safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(String);

impl WorkflowId {
    /// Creates a workflow identifier from an existing string form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Validates the identifier shape.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the value is malformed.
    pub fn validate(&self) -> Result<(), IdentifierError> {
        if is_delimiter_safe(&self.0) {
            Ok(())
        } else {
            Err(IdentifierError::NotDelimiterSafe)
        }
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for WorkflowId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Step identifier within a workflow, free-form but delimiter-safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    /// Creates a step identifier from an existing string form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Validates the identifier shape.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the value is malformed.
    pub fn validate(&self) -> Result<(), IdentifierError> {
        if is_delimiter_safe(&self.0) {
            Ok(())
        } else {
            Err(IdentifierError::NotDelimiterSafe)
        }
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for StepId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Loop identifier within a workflow, free-form but delimiter-safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoopId(String);

impl LoopId {
    /// Creates a loop identifier from an existing string form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Validates the identifier shape.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the value is malformed.
    pub fn validate(&self) -> Result<(), IdentifierError> {
        if is_delimiter_safe(&self.0) {
            Ok(())
        } else {
            Err(IdentifierError::NotDelimiterSafe)
        }
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for LoopId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Observation identifier, free-form but delimiter-safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObservationId(String);

impl ObservationId {
    /// Creates an observation identifier from an existing string form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Validates the identifier shape.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the value is malformed.
    pub fn validate(&self) -> Result<(), IdentifierError> {
        if is_delimiter_safe(&self.0) {
            Ok(())
        } else {
            Err(IdentifierError::NotDelimiterSafe)
        }
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
