// waymark-store/src/session_log.rs
// ============================================================================
// Module: File Session Log Store
// Description: Crash-safe segmented JSONL event log with an attestation manifest.
// Purpose: Persist session events durably with validated-prefix recovery.
// Dependencies: serde_json, waymark-core
// ============================================================================

//! ## Overview
//! Each session lives in its own directory: immutable event segments under
//! `events/`, the attestation manifest `manifest.jsonl`, and an advisory
//! `lock` file. Segments become truth only once a `segment_closed` record
//! lands in the manifest, so a crash mid-append leaves at worst an
//! unattested file that later loads ignore. Loading re-validates every
//! attested byte: digests, schema versions, index contiguity, dedupe
//! uniqueness, and snapshot-pin coverage.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;

use waymark_core::AppendOutcome;
use waymark_core::AppendPlan;
use waymark_core::ContentDigest;
use waymark_core::CorruptionLocation;
use waymark_core::CorruptionReason;
use waymark_core::DedupeDisposition;
use waymark_core::DomainEvent;
use waymark_core::EVENT_SCHEMA_VERSION;
use waymark_core::EventPayload;
use waymark_core::Filesystem;
use waymark_core::FsError;
use waymark_core::MANIFEST_SCHEMA_VERSION;
use waymark_core::ManifestEntry;
use waymark_core::ManifestRecord;
use waymark_core::SessionEventStore;
use waymark_core::SessionId;
use waymark_core::SessionLease;
use waymark_core::SessionStoreError;
use waymark_core::SessionTruth;
use waymark_core::TailReason;
use waymark_core::ValidatedPrefix;
use waymark_core::canonical_jsonl_line;
use waymark_core::runtime::admit_plan;
use waymark_core::runtime::assert_lease;
use waymark_core::runtime::attestation_records;
use waymark_core::runtime::encode_segment;
use waymark_core::runtime::verify_import_parts;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Directory holding session directories under the data root.
const SESSIONS_DIR: &str = "sessions";
/// Directory holding event segments inside a session directory.
const EVENTS_DIR: &str = "events";
/// Manifest file name inside a session directory.
const MANIFEST_FILE: &str = "manifest.jsonl";
/// Advisory lock file name inside a session directory.
const LOCK_FILE: &str = "lock";
/// Prefix for in-flight segment files, invisible to loads.
const TMP_PREFIX: &str = ".tmp-";

// ============================================================================
// SECTION: Store
// ============================================================================

/// Durable session event store over a filesystem port.
#[derive(Debug, Clone)]
pub struct FileSessionStore<F> {
    /// Data directory root.
    root: PathBuf,
    /// Filesystem port.
    fs: F,
}

impl<F: Filesystem> FileSessionStore<F> {
    /// Creates a store rooted at the data directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, fs: F) -> Self {
        Self {
            root: root.into(),
            fs,
        }
    }

    /// Returns the directory of one session.
    fn session_dir(&self, session_id: &SessionId) -> PathBuf {
        self.root.join(SESSIONS_DIR).join(session_id.as_str())
    }

    /// Returns the manifest path of one session.
    fn manifest_path(&self, session_id: &SessionId) -> PathBuf {
        self.session_dir(session_id).join(MANIFEST_FILE)
    }

    /// Writes a segment durably via write-tmp, fsync, rename, fsync-dir.
    fn write_segment_durable(
        &self,
        session_dir: &Path,
        rel_path: &str,
        bytes: &[u8],
    ) -> Result<(), SessionStoreError> {
        let final_path = session_dir.join(rel_path);
        let file_name = final_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| SessionStoreError::InvariantViolation {
                detail: format!("segment path {rel_path} has no file name"),
            })?;
        let events_dir = session_dir.join(EVENTS_DIR);
        let tmp_path = events_dir.join(format!("{TMP_PREFIX}{file_name}"));

        let mut writer = self.fs.open_write_truncate(&tmp_path).map_err(io_error)?;
        writer.write_all(bytes).map_err(io_error)?;
        writer.fsync().map_err(io_error)?;
        drop(writer);
        self.fs.rename(&tmp_path, &final_path).map_err(io_error)?;
        self.fs.fsync_dir(&events_dir).map_err(io_error)?;
        Ok(())
    }

    /// Appends manifest records with one fsync per attestation group.
    fn append_manifest_records(
        &self,
        session_id: &SessionId,
        records: &[ManifestRecord],
    ) -> Result<(), SessionStoreError> {
        let path = self.manifest_path(session_id);
        let mut writer = self.fs.open_append(&path).map_err(io_error)?;

        // The segment attestation commits first, on its own fsync.
        let (segment_records, pin_records): (Vec<_>, Vec<_>) = records
            .iter()
            .partition(|record| matches!(record.entry, ManifestEntry::SegmentClosed { .. }));
        for record in &segment_records {
            let line = canonical_jsonl_line(record).map_err(|err| {
                SessionStoreError::InvariantViolation {
                    detail: format!("manifest canonicalization failed: {err}"),
                }
            })?;
            writer.write_all(&line).map_err(io_error)?;
        }
        writer.fsync().map_err(io_error)?;

        if !pin_records.is_empty() {
            for record in &pin_records {
                let line = canonical_jsonl_line(record).map_err(|err| {
                    SessionStoreError::InvariantViolation {
                        detail: format!("manifest canonicalization failed: {err}"),
                    }
                })?;
                writer.write_all(&line).map_err(io_error)?;
            }
            writer.fsync().map_err(io_error)?;
        }
        Ok(())
    }

    /// Creates the session directory scaffold for a fresh session.
    fn create_session_scaffold(&self, session_id: &SessionId) -> Result<(), SessionStoreError> {
        let session_dir = self.session_dir(session_id);
        self.fs.mkdirp(&session_dir.join(EVENTS_DIR)).map_err(io_error)?;
        let lock_path = session_dir.join(LOCK_FILE);
        if !self.fs.exists(&lock_path) {
            let mut writer = self.fs.open_write_truncate(&lock_path).map_err(io_error)?;
            writer.write_all(b"").map_err(io_error)?;
            writer.fsync().map_err(io_error)?;
        }
        Ok(())
    }

    /// Loads and validates as far as possible, tracking consistency points.
    fn load_prefix_inner(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<ValidatedPrefix>, SessionStoreError> {
        let manifest_path = self.manifest_path(session_id);
        let manifest_text = match self.fs.read_file_utf8(&manifest_path) {
            Ok(text) => text,
            Err(FsError::NotFound {
                ..
            }) => return Ok(None),
            Err(err) => return Err(io_error(err)),
        };

        let mut loader = PrefixLoader::new(self, session_id);
        for (line_number, line) in manifest_text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            if let Err(failure) = loader.consume_manifest_line(line_number, line) {
                return loader.finish_with_failure(failure);
            }
        }
        loader.finish_complete()
    }
}

/// Maps a filesystem failure onto the session store error set.
fn io_error(err: FsError) -> SessionStoreError {
    SessionStoreError::Io {
        message: err.to_string(),
    }
}

// ============================================================================
// SECTION: Prefix Loader
// ============================================================================

/// One validation failure with its closed reason.
struct LoadFailure {
    /// Closed corruption reason.
    reason: CorruptionReason,
    /// Human-readable description.
    detail: String,
}

/// Incremental loader that tracks the last fully consistent prefix.
struct PrefixLoader<'a, F> {
    /// Owning store.
    store: &'a FileSessionStore<F>,
    /// Session being loaded.
    session_id: &'a SessionId,
    /// Accepted events so far.
    events: Vec<DomainEvent>,
    /// Accepted manifest records so far.
    manifest: Vec<ManifestRecord>,
    /// Dedupe keys seen so far.
    dedupe_keys: BTreeSet<String>,
    /// Node-created events whose snapshot pin has not yet been seen.
    unpinned: BTreeSet<u64>,
    /// Last (events, manifest) lengths at which all invariants held.
    checkpoint: (usize, usize),
}

impl<'a, F: Filesystem> PrefixLoader<'a, F> {
    /// Creates an empty loader.
    fn new(store: &'a FileSessionStore<F>, session_id: &'a SessionId) -> Self {
        Self {
            store,
            session_id,
            events: Vec::new(),
            manifest: Vec::new(),
            dedupe_keys: BTreeSet::new(),
            unpinned: BTreeSet::new(),
            checkpoint: (0, 0),
        }
    }

    /// Consumes one manifest line, validating the record and its segment.
    fn consume_manifest_line(
        &mut self,
        line_number: usize,
        line: &str,
    ) -> Result<(), LoadFailure> {
        let record: ManifestRecord =
            serde_json::from_str(line).map_err(|err| LoadFailure {
                reason: CorruptionReason::SchemaValidationFailed,
                detail: format!("manifest line {line_number} does not parse: {err}"),
            })?;
        if record.v != MANIFEST_SCHEMA_VERSION {
            return Err(LoadFailure {
                reason: CorruptionReason::UnknownSchemaVersion,
                detail: format!("manifest line {line_number} carries version {}", record.v),
            });
        }
        record.validate().map_err(|err| LoadFailure {
            reason: CorruptionReason::SchemaValidationFailed,
            detail: format!("manifest line {line_number}: {err}"),
        })?;
        if record.manifest_index != self.manifest.len() as u64 {
            return Err(LoadFailure {
                reason: CorruptionReason::NonContiguousIndices,
                detail: format!(
                    "manifest line {line_number} has index {} (expected {})",
                    record.manifest_index,
                    self.manifest.len()
                ),
            });
        }

        match &record.entry {
            ManifestEntry::SegmentClosed {
                first_event_index,
                last_event_index,
                segment_rel_path,
                sha256,
                bytes,
            } => {
                self.consume_segment(
                    *first_event_index,
                    *last_event_index,
                    segment_rel_path,
                    sha256,
                    *bytes,
                )?;
            }
            ManifestEntry::SnapshotPinned {
                event_index,
                snapshot_ref,
                created_by_event_id,
            } => {
                let matched = self.events.iter().any(|event| {
                    event.event_index == *event_index
                        && event.event_id == *created_by_event_id
                        && event.introduced_snapshot_ref() == Some(snapshot_ref)
                });
                if !matched {
                    return Err(LoadFailure {
                        reason: CorruptionReason::SchemaValidationFailed,
                        detail: format!(
                            "snapshot pin at manifest line {line_number} matches no event"
                        ),
                    });
                }
                self.unpinned.remove(event_index);
            }
        }

        self.manifest.push(record);
        if self.unpinned.is_empty() {
            self.checkpoint = (self.events.len(), self.manifest.len());
        }
        Ok(())
    }

    /// Validates and ingests one attested segment.
    fn consume_segment(
        &mut self,
        first_event_index: u64,
        last_event_index: u64,
        segment_rel_path: &str,
        sha256: &ContentDigest,
        byte_count: u64,
    ) -> Result<(), LoadFailure> {
        if first_event_index != self.events.len() as u64 {
            return Err(LoadFailure {
                reason: CorruptionReason::NonContiguousIndices,
                detail: format!(
                    "segment {segment_rel_path} starts at {first_event_index} (expected {})",
                    self.events.len()
                ),
            });
        }

        let path = self.store.session_dir(self.session_id).join(segment_rel_path);
        let bytes = self.store.fs.read_file_bytes(&path).map_err(|err| match err {
            FsError::NotFound {
                ..
            } => LoadFailure {
                reason: CorruptionReason::MissingAttestedSegment,
                detail: format!("attested segment {segment_rel_path} is missing"),
            },
            other => LoadFailure {
                reason: CorruptionReason::MissingAttestedSegment,
                detail: format!("attested segment {segment_rel_path} is unreadable: {other}"),
            },
        })?;
        if bytes.len() as u64 != byte_count || ContentDigest::of_bytes(&bytes) != *sha256 {
            return Err(LoadFailure {
                reason: CorruptionReason::DigestMismatch,
                detail: format!("segment {segment_rel_path} does not match its attestation"),
            });
        }

        let text = std::str::from_utf8(&bytes).map_err(|_| LoadFailure {
            reason: CorruptionReason::SchemaValidationFailed,
            detail: format!("segment {segment_rel_path} is not UTF-8"),
        })?;
        let mut expected_index = first_event_index;
        for line in text.lines() {
            let event: DomainEvent = serde_json::from_str(line).map_err(|err| LoadFailure {
                reason: CorruptionReason::SchemaValidationFailed,
                detail: format!("segment {segment_rel_path} carries a bad event: {err}"),
            })?;
            if event.v != EVENT_SCHEMA_VERSION {
                return Err(LoadFailure {
                    reason: CorruptionReason::UnknownSchemaVersion,
                    detail: format!(
                        "segment {segment_rel_path} carries event version {}",
                        event.v
                    ),
                });
            }
            event.validate().map_err(|err| LoadFailure {
                reason: CorruptionReason::SchemaValidationFailed,
                detail: format!("segment {segment_rel_path}: {err}"),
            })?;
            if event.event_index != expected_index {
                return Err(LoadFailure {
                    reason: CorruptionReason::NonContiguousIndices,
                    detail: format!(
                        "segment {segment_rel_path} has index {} (expected {expected_index})",
                        event.event_index
                    ),
                });
            }
            if let Some(first) = self.events.first() {
                if first.session_id != event.session_id {
                    return Err(LoadFailure {
                        reason: CorruptionReason::SchemaValidationFailed,
                        detail: format!(
                            "segment {segment_rel_path} names a foreign session at index {}",
                            event.event_index
                        ),
                    });
                }
            }
            if !self.dedupe_keys.insert(event.dedupe_key.clone()) {
                return Err(LoadFailure {
                    reason: CorruptionReason::SchemaValidationFailed,
                    detail: format!(
                        "segment {segment_rel_path} repeats dedupe key {}",
                        event.dedupe_key
                    ),
                });
            }
            if matches!(event.payload, EventPayload::NodeCreated { .. }) {
                self.unpinned.insert(event.event_index);
            }
            self.events.push(event);
            expected_index += 1;
        }
        if expected_index != last_event_index + 1 {
            return Err(LoadFailure {
                reason: CorruptionReason::NonContiguousIndices,
                detail: format!(
                    "segment {segment_rel_path} ends at {} (attested {last_event_index})",
                    expected_index.saturating_sub(1)
                ),
            });
        }
        Ok(())
    }

    /// Finishes a load in which every record validated.
    fn finish_complete(self) -> Result<Option<ValidatedPrefix>, SessionStoreError> {
        if !self.unpinned.is_empty() {
            let failure = LoadFailure {
                reason: CorruptionReason::SchemaValidationFailed,
                detail: "trailing node_created events lack snapshot pins".to_string(),
            };
            return self.finish_with_failure_owned(failure);
        }
        Ok(Some(ValidatedPrefix {
            truth: SessionTruth {
                events: self.events,
                manifest: self.manifest,
            },
            is_complete: true,
            tail_reason: None,
        }))
    }

    /// Finishes a load after a validation failure.
    fn finish_with_failure(
        &mut self,
        failure: LoadFailure,
    ) -> Result<Option<ValidatedPrefix>, SessionStoreError> {
        let events = std::mem::take(&mut self.events);
        let manifest = std::mem::take(&mut self.manifest);
        Self::resolve_failure(self.checkpoint, events, manifest, failure)
    }

    /// Owned variant of [`Self::finish_with_failure`].
    fn finish_with_failure_owned(
        self,
        failure: LoadFailure,
    ) -> Result<Option<ValidatedPrefix>, SessionStoreError> {
        Self::resolve_failure(self.checkpoint, self.events, self.manifest, failure)
    }

    /// Truncates to the last consistent checkpoint or reports head corruption.
    fn resolve_failure(
        checkpoint: (usize, usize),
        mut events: Vec<DomainEvent>,
        mut manifest: Vec<ManifestRecord>,
        failure: LoadFailure,
    ) -> Result<Option<ValidatedPrefix>, SessionStoreError> {
        let (event_len, manifest_len) = checkpoint;
        if manifest_len == 0 {
            return Err(SessionStoreError::CorruptionDetected {
                location: CorruptionLocation::Head,
                reason: failure.reason,
                detail: failure.detail,
            });
        }
        events.truncate(event_len);
        manifest.truncate(manifest_len);
        Ok(Some(ValidatedPrefix {
            truth: SessionTruth {
                events,
                manifest,
            },
            is_complete: false,
            tail_reason: Some(TailReason {
                reason: failure.reason,
                detail: failure.detail,
            }),
        }))
    }
}

// ============================================================================
// SECTION: Store Trait Implementation
// ============================================================================

impl<F: Filesystem> SessionEventStore for FileSessionStore<F> {
    fn load_strict(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<SessionTruth>, SessionStoreError> {
        match self.load_prefix_inner(session_id)? {
            None => Ok(None),
            Some(prefix) if prefix.is_complete => Ok(Some(prefix.truth)),
            Some(prefix) => {
                let (reason, detail) = prefix.tail_reason.map_or(
                    (CorruptionReason::SchemaValidationFailed, "unknown tail failure".to_string()),
                    |tail| (tail.reason, tail.detail),
                );
                Err(SessionStoreError::CorruptionDetected {
                    location: CorruptionLocation::Tail,
                    reason,
                    detail,
                })
            }
        }
    }

    fn load_validated_prefix(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<ValidatedPrefix>, SessionStoreError> {
        self.load_prefix_inner(session_id)
    }

    fn append(
        &self,
        lease: &SessionLease,
        plan: &AppendPlan,
    ) -> Result<AppendOutcome, SessionStoreError> {
        assert_lease(lease, lease.session_id())?;

        // A corrupt tail refuses writes until the tail is repaired.
        let truth = self.load_strict(lease.session_id())?.unwrap_or_default();
        if truth.events.is_empty() {
            self.create_session_scaffold(lease.session_id())?;
        }
        if admit_plan(&truth, plan)? == DedupeDisposition::FullReplay {
            return Ok(AppendOutcome::IdempotentReplay);
        }

        let records = attestation_records(plan, truth.manifest.len() as u64)?;
        let bytes = encode_segment(&plan.events)?;
        let rel_path = segment_rel_path_of(&records)?;
        let session_dir = self.session_dir(lease.session_id());
        self.write_segment_durable(&session_dir, &rel_path, &bytes)?;
        self.append_manifest_records(lease.session_id(), &records)?;

        let first_event_index = plan.expected_first_event_index;
        let last_event_index = first_event_index + plan.events.len() as u64 - 1;
        Ok(AppendOutcome::Appended {
            first_event_index,
            last_event_index,
        })
    }

    fn import_raw(
        &self,
        session_id: &SessionId,
        events: &[DomainEvent],
        manifest: &[ManifestRecord],
    ) -> Result<(), SessionStoreError> {
        verify_import_parts(events, manifest)?;
        let session_dir = self.session_dir(session_id);
        if self.fs.exists(&session_dir) {
            return Err(SessionStoreError::InvariantViolation {
                detail: format!("session {session_id} already exists"),
            });
        }
        self.create_session_scaffold(session_id)?;

        for record in manifest {
            if let ManifestEntry::SegmentClosed {
                first_event_index,
                last_event_index,
                segment_rel_path,
                ..
            } = &record.entry
            {
                let start = usize::try_from(*first_event_index).unwrap_or(usize::MAX);
                let end = usize::try_from(*last_event_index + 1).unwrap_or(usize::MAX);
                let covered =
                    events.get(start..end).ok_or_else(|| SessionStoreError::InvariantViolation {
                        detail: format!("segment {segment_rel_path} exceeds the event log"),
                    })?;
                let bytes = encode_segment(covered)?;
                self.write_segment_durable(&session_dir, segment_rel_path, &bytes)?;
            }
        }

        let manifest_path = self.manifest_path(session_id);
        let mut writer = self.fs.open_write_truncate(&manifest_path).map_err(io_error)?;
        for record in manifest {
            let line = canonical_jsonl_line(record).map_err(|err| {
                SessionStoreError::InvariantViolation {
                    detail: format!("manifest canonicalization failed: {err}"),
                }
            })?;
            writer.write_all(&line).map_err(io_error)?;
        }
        writer.fsync().map_err(io_error)?;
        self.fs.fsync_dir(&session_dir).map_err(io_error)?;
        Ok(())
    }
}

/// Extracts the segment path from freshly built attestation records.
fn segment_rel_path_of(records: &[ManifestRecord]) -> Result<String, SessionStoreError> {
    records
        .iter()
        .find_map(|record| match &record.entry {
            ManifestEntry::SegmentClosed {
                segment_rel_path,
                ..
            } => Some(segment_rel_path.clone()),
            ManifestEntry::SnapshotPinned {
                ..
            } => None,
        })
        .ok_or_else(|| SessionStoreError::InvariantViolation {
            detail: "attestation records carry no segment".to_string(),
        })
}
