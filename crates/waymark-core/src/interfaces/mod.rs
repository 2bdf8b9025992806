// waymark-core/src/interfaces/mod.rs
// ============================================================================
// Module: Waymark Interfaces
// Description: Backend-agnostic ports for storage, time, entropy, and validation.
// Purpose: Define the contract surfaces the Waymark engine consumes.
// Dependencies: serde, crate::core
// ============================================================================

//! ## Overview
//! Interfaces define how the engine integrates with the outside world without
//! embedding backend details. Every port is result-returning and fail-closed:
//! a missing file, a bad digest, or a timed-out validation surfaces as a
//! typed error, never a panic. Implementations must be deterministic given
//! their inputs and their on-disk state.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::core::AppendPlan;
use crate::core::DomainEvent;
use crate::core::ExecutionSnapshot;
use crate::core::ID_BODY_BYTES;
use crate::core::ManifestRecord;
use crate::core::SessionId;
use crate::core::SnapshotRef;
use crate::core::ValidationCriteria;
use crate::core::ValidationResult;
use crate::core::WorkflowHash;
use crate::core::WorkflowId;
use crate::core::WorkflowSpec;

// ============================================================================
// SECTION: Clock, Entropy, Flags
// ============================================================================

/// Wall-clock source in milliseconds since the Unix epoch.
pub trait Clock {
    /// Returns the current time in milliseconds.
    fn now_millis(&self) -> u64;
}

/// Cryptographic entropy source.
pub trait Entropy {
    /// Returns `n` random bytes.
    fn random_bytes(&self, n: usize) -> Vec<u8>;

    /// Returns the sixteen bytes backing one minted identifier.
    fn id_body(&self) -> [u8; ID_BODY_BYTES] {
        let bytes = self.random_bytes(ID_BODY_BYTES);
        let mut body = [0_u8; ID_BODY_BYTES];
        for (slot, value) in body.iter_mut().zip(bytes) {
            *slot = value;
        }
        body
    }
}

/// Feature flag provider.
pub trait FeatureFlags {
    /// Returns true when the named flag is enabled.
    fn is_enabled(&self, name: &str) -> bool;
}

// ============================================================================
// SECTION: Filesystem Port
// ============================================================================

/// Filesystem errors, result-returning by contract.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FsError {
    /// The path does not exist.
    #[error("path not found: {path}")]
    NotFound {
        /// Missing path.
        path: String,
    },
    /// Any other I/O failure.
    #[error("io error at {path}: {message}")]
    Io {
        /// Path the operation targeted.
        path: String,
        /// Failure description.
        message: String,
    },
}

/// Open file handle supporting durable writes.
pub trait FileWriter {
    /// Writes all bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] when the write fails.
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), FsError>;

    /// Flushes file contents to stable storage.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] when the sync fails.
    fn fsync(&mut self) -> Result<(), FsError>;
}

/// Directory entry with its modification time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntryInfo {
    /// Entry file name.
    pub name: String,
    /// Modification time in milliseconds since the epoch.
    pub modified_ms: u64,
}

/// Filesystem operations the durable stores are built from.
pub trait Filesystem {
    /// Creates the directory and all missing parents.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] when creation fails.
    fn mkdirp(&self, path: &Path) -> Result<(), FsError>;

    /// Opens a file for writing, truncating existing content.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] when the file cannot be opened.
    fn open_write_truncate(&self, path: &Path) -> Result<Box<dyn FileWriter>, FsError>;

    /// Opens a file for appending, creating it when absent.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] when the file cannot be opened.
    fn open_append(&self, path: &Path) -> Result<Box<dyn FileWriter>, FsError>;

    /// Atomically renames a file.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] when the rename fails.
    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError>;

    /// Flushes directory metadata to stable storage.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] when the sync fails.
    fn fsync_dir(&self, path: &Path) -> Result<(), FsError>;

    /// Reads a file fully as bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::NotFound`] for missing files and [`FsError::Io`]
    /// otherwise.
    fn read_file_bytes(&self, path: &Path) -> Result<Vec<u8>, FsError>;

    /// Reads a file fully as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] when the read fails or the content is not UTF-8.
    fn read_file_utf8(&self, path: &Path) -> Result<String, FsError>;

    /// Lists a directory with modification times.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] when the directory cannot be read.
    fn readdir_with_mtime(&self, path: &Path) -> Result<Vec<DirEntryInfo>, FsError>;

    /// Returns true when the path exists.
    fn exists(&self, path: &Path) -> bool;
}

// ============================================================================
// SECTION: Session Event Store
// ============================================================================

/// Where corruption was found relative to the committed log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptionLocation {
    /// The first manifest record or first segment is bad; nothing salvages.
    Head,
    /// A later record or segment is bad; the validated prefix salvages.
    Tail,
}

/// Closed set of corruption reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptionReason {
    /// An attested segment file is missing.
    MissingAttestedSegment,
    /// Segment bytes do not match their attested digest.
    DigestMismatch,
    /// Event or manifest indices are not contiguous.
    NonContiguousIndices,
    /// A record carries an unknown schema version.
    UnknownSchemaVersion,
    /// A record fails schema validation (including pin coverage).
    SchemaValidationFailed,
}

/// Closed set of session store errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionStoreError {
    /// Underlying storage failed.
    #[error("session store io error: {message}")]
    Io {
        /// Failure description.
        message: String,
    },
    /// A caller or plan invariant was violated.
    #[error("session store invariant violation: {detail}")]
    InvariantViolation {
        /// Invariant description.
        detail: String,
    },
    /// The stored log failed an integrity check.
    #[error("session store corruption detected ({location:?}/{reason:?}): {detail}")]
    CorruptionDetected {
        /// Where the corruption sits.
        location: CorruptionLocation,
        /// Closed corruption reason.
        reason: CorruptionReason,
        /// Human-readable description.
        detail: String,
    },
}

/// Fully validated committed truth of a session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionTruth {
    /// Events in index order.
    pub events: Vec<DomainEvent>,
    /// Manifest records in index order.
    pub manifest: Vec<ManifestRecord>,
}

impl SessionTruth {
    /// Returns the session id named inside the events, when any exist.
    #[must_use]
    pub fn session_id(&self) -> Option<&SessionId> {
        self.events.first().map(|event| &event.session_id)
    }

    /// Returns the index the next appended event must land at.
    #[must_use]
    pub fn expected_next_event_index(&self) -> u64 {
        self.events.len() as u64
    }

    /// Returns the set of dedupe keys present in the log.
    #[must_use]
    pub fn dedupe_keys(&self) -> std::collections::BTreeSet<String> {
        self.events.iter().map(|event| event.dedupe_key.clone()).collect()
    }
}

/// Why a validated-prefix load stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailReason {
    /// Closed corruption reason.
    pub reason: CorruptionReason,
    /// Human-readable description.
    pub detail: String,
}

/// Longest strictly valid prefix of a session log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPrefix {
    /// Validated prefix truth.
    pub truth: SessionTruth,
    /// True when the prefix is the whole log.
    pub is_complete: bool,
    /// Why the load stopped, when incomplete.
    pub tail_reason: Option<TailReason>,
}

/// Result of an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Fresh events were committed.
    Appended {
        /// Index of the first committed event.
        first_event_index: u64,
        /// Index of the last committed event.
        last_event_index: u64,
    },
    /// Every dedupe key already existed; nothing was written.
    IdempotentReplay,
}

/// Append-only, attested session event log store.
pub trait SessionEventStore {
    /// Loads the full committed truth, failing on any integrity violation.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError`] on I/O failures or corruption.
    fn load_strict(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<SessionTruth>, SessionStoreError>;

    /// Loads the longest strictly validated prefix.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError`] on I/O failures or head corruption.
    fn load_validated_prefix(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<ValidatedPrefix>, SessionStoreError>;

    /// Atomically appends a validated plan under a held lease.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError`] on invariant violations, corruption, or
    /// I/O failures; a failed append leaves the committed prefix unchanged.
    fn append(
        &self,
        lease: &SessionLease,
        plan: &AppendPlan,
    ) -> Result<AppendOutcome, SessionStoreError>;

    /// Reconstructs a session byte-exactly from bundle parts.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError`] when the target session already exists
    /// or reconstruction fails integrity checks.
    fn import_raw(
        &self,
        session_id: &SessionId,
        events: &[DomainEvent],
        manifest: &[ManifestRecord],
    ) -> Result<(), SessionStoreError>;
}

// ============================================================================
// SECTION: Snapshot Store
// ============================================================================

/// Closed set of snapshot store errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotStoreError {
    /// Underlying storage failed.
    #[error("snapshot store io error: {message}")]
    Io {
        /// Failure description.
        message: String,
    },
    /// Stored content could not be decoded.
    #[error("snapshot store corruption detected: {detail}")]
    CorruptionDetected {
        /// Corruption description.
        detail: String,
    },
    /// Stored content does not hash to its address.
    #[error("snapshot store digest mismatch: expected {expected}, actual {actual}")]
    DigestMismatch {
        /// Address the content was stored under.
        expected: String,
        /// Digest the content actually hashes to.
        actual: String,
    },
}

/// Content-addressed store for snapshots and pinned workflows.
pub trait SnapshotStore {
    /// Stores a snapshot; storing identical content twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotStoreError`] when the write fails.
    fn put_snapshot(
        &self,
        snapshot: &ExecutionSnapshot,
    ) -> Result<SnapshotRef, SnapshotStoreError>;

    /// Loads and re-verifies a snapshot by reference.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotStoreError`] on missing content, corruption, or
    /// digest mismatch.
    fn get_snapshot(
        &self,
        reference: &SnapshotRef,
    ) -> Result<ExecutionSnapshot, SnapshotStoreError>;

    /// Pins a workflow; pinning identical content twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotStoreError`] when the write fails.
    fn put_workflow(&self, workflow: &WorkflowSpec) -> Result<WorkflowHash, SnapshotStoreError>;

    /// Loads and re-verifies a pinned workflow by hash.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotStoreError`] on missing content, corruption, or
    /// digest mismatch.
    fn get_workflow(&self, hash: &WorkflowHash) -> Result<WorkflowSpec, SnapshotStoreError>;
}

// ============================================================================
// SECTION: Session Gate
// ============================================================================

/// Errors raised while acquiring the per-session lock.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    /// The gate is unusable (for example a poisoned lock).
    #[error("session gate unavailable: {detail}")]
    Unavailable {
        /// Failure description.
        detail: String,
    },
}

/// RAII hold on a per-session lock; dropping releases it.
pub trait LeaseHold {}

/// Witness that the per-session lock is held.
///
/// Stores assert [`SessionLease::is_held`] before any write, so use after
/// release surfaces as an invariant violation rather than a silent race.
pub struct SessionLease {
    /// Session the lease covers.
    session_id: SessionId,
    /// Whether the lease is still held.
    held: bool,
    /// Underlying lock hold, kept alive until release or drop.
    _hold: Option<Box<dyn LeaseHold>>,
}

impl SessionLease {
    /// Wraps a lock hold in a witness.
    #[must_use]
    pub fn new(session_id: SessionId, hold: Box<dyn LeaseHold>) -> Self {
        Self {
            session_id,
            held: true,
            _hold: Some(hold),
        }
    }

    /// Returns the session the lease covers.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Returns true while the lease is held.
    #[must_use]
    pub const fn is_held(&self) -> bool {
        self.held
    }

    /// Releases the lease explicitly.
    pub fn release(&mut self) {
        self.held = false;
        self._hold = None;
    }
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("session_id", &self.session_id)
            .field("held", &self.held)
            .finish_non_exhaustive()
    }
}

/// Process-wide per-session lock provider.
pub trait SessionGate {
    /// Acquires the lock for a session, waiting for the current holder.
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] when the gate is unusable.
    fn acquire(&self, session_id: &SessionId) -> Result<SessionLease, GateError>;
}

// ============================================================================
// SECTION: Workflow Provider
// ============================================================================

/// Workflow provider errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowProviderError {
    /// Provider reported an error.
    #[error("workflow provider error: {0}")]
    Provider(String),
}

/// Source of workflow specifications by identifier.
pub trait WorkflowProvider {
    /// Fetches a workflow by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowProviderError`] when the provider fails; a missing
    /// workflow is `Ok(None)`.
    fn fetch_by_id(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<WorkflowSpec>, WorkflowProviderError>;
}

// ============================================================================
// SECTION: Validation Engine
// ============================================================================

/// Soft deadline for one validation engine invocation.
pub const VALIDATION_ENGINE_TIMEOUT: Duration = Duration::from_secs(30);

/// Validation engine errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationEngineError {
    /// The engine exceeded [`VALIDATION_ENGINE_TIMEOUT`].
    #[error("validation engine timed out")]
    Timeout,
    /// The engine failed outright.
    #[error("validation engine error: {0}")]
    Engine(String),
}

/// Engine evaluating submitted notes against step criteria.
pub trait ValidationEngine {
    /// Validates notes against criteria with the session context visible.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationEngineError`] on timeout or engine failure.
    fn validate(
        &self,
        notes_markdown: &str,
        criteria: &ValidationCriteria,
        context: &Map<String, Value>,
    ) -> Result<ValidationResult, ValidationEngineError>;
}
