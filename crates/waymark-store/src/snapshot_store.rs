// waymark-store/src/snapshot_store.rs
// ============================================================================
// Module: File Snapshot Store
// Description: Content-addressed storage for snapshots and pinned workflows.
// Purpose: Persist immutable CAS documents keyed by their canonical digest.
// Dependencies: serde_json, waymark-core
// ============================================================================

//! ## Overview
//! Snapshots and pinned workflows are stored as canonical JSON files named
//! by their content digest: `snapshots/sha256_<hex>.json` and
//! `pinnedWorkflows/sha256_<hex>.json`. Writing identical content twice is a
//! no-op, which also makes the store safe under concurrent writers: the
//! same bytes land at the same name. Reads re-hash the stored bytes and
//! fail closed on any mismatch.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;

use serde::Serialize;
use serde::de::DeserializeOwned;
use waymark_core::ContentDigest;
use waymark_core::ExecutionSnapshot;
use waymark_core::Filesystem;
use waymark_core::SnapshotRef;
use waymark_core::SnapshotStore;
use waymark_core::SnapshotStoreError;
use waymark_core::WorkflowHash;
use waymark_core::WorkflowSpec;
use waymark_core::canonical_json_bytes;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Directory for execution snapshots under the data root.
const SNAPSHOTS_DIR: &str = "snapshots";
/// Directory for pinned workflows under the data root.
const PINNED_WORKFLOWS_DIR: &str = "pinnedWorkflows";
/// Prefix for in-flight files, invisible to reads.
const TMP_PREFIX: &str = ".tmp-";

// ============================================================================
// SECTION: Store
// ============================================================================

/// Durable content-addressed store over a filesystem port.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore<F> {
    /// Data directory root.
    root: PathBuf,
    /// Filesystem port.
    fs: F,
}

impl<F: Filesystem> FileSnapshotStore<F> {
    /// Creates a store rooted at the data directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, fs: F) -> Self {
        Self {
            root: root.into(),
            fs,
        }
    }

    /// Returns the file name for a digest.
    fn file_name(digest: &ContentDigest) -> String {
        format!("sha256_{}.json", digest.hex())
    }

    /// Writes one CAS document durably; identical content is a no-op.
    fn put_document<T: Serialize>(
        &self,
        dir_name: &str,
        value: &T,
    ) -> Result<ContentDigest, SnapshotStoreError> {
        let bytes = canonical_json_bytes(value).map_err(|err| SnapshotStoreError::Io {
            message: format!("canonicalization failed: {err}"),
        })?;
        let digest = ContentDigest::of_bytes(&bytes);

        let dir = self.root.join(dir_name);
        let final_path = dir.join(Self::file_name(&digest));
        if self.fs.exists(&final_path) {
            return Ok(digest);
        }

        self.fs.mkdirp(&dir).map_err(io_error)?;
        let tmp_path = dir.join(format!("{TMP_PREFIX}{}", Self::file_name(&digest)));
        let mut writer = self.fs.open_write_truncate(&tmp_path).map_err(io_error)?;
        writer.write_all(&bytes).map_err(io_error)?;
        writer.fsync().map_err(io_error)?;
        drop(writer);
        self.fs.rename(&tmp_path, &final_path).map_err(io_error)?;
        self.fs.fsync_dir(&dir).map_err(io_error)?;
        Ok(digest)
    }

    /// Reads one CAS document, re-verifying its digest.
    fn get_document<T: DeserializeOwned>(
        &self,
        dir_name: &str,
        digest: &ContentDigest,
    ) -> Result<T, SnapshotStoreError> {
        let path = self.root.join(dir_name).join(Self::file_name(digest));
        let bytes = self.fs.read_file_bytes(&path).map_err(|err| match err {
            waymark_core::FsError::NotFound {
                path,
            } => SnapshotStoreError::CorruptionDetected {
                detail: format!("missing content at {path}"),
            },
            other => io_error(other),
        })?;

        let actual = ContentDigest::of_bytes(&bytes);
        if actual != *digest {
            return Err(SnapshotStoreError::DigestMismatch {
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }
        serde_json::from_slice(&bytes).map_err(|err| SnapshotStoreError::CorruptionDetected {
            detail: format!("stored content does not parse: {err}"),
        })
    }

    /// Returns the directory path used for snapshots.
    #[must_use]
    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join(SNAPSHOTS_DIR)
    }

    /// Returns the directory path used for pinned workflows.
    #[must_use]
    pub fn pinned_workflows_dir(&self) -> PathBuf {
        self.root.join(PINNED_WORKFLOWS_DIR)
    }

    /// Returns the on-disk path of a stored snapshot.
    #[must_use]
    pub fn snapshot_path(&self, reference: &SnapshotRef) -> PathBuf {
        self.snapshots_dir().join(Self::file_name(reference.digest()))
    }
}

/// Maps a filesystem failure onto the snapshot store error set.
fn io_error(err: waymark_core::FsError) -> SnapshotStoreError {
    SnapshotStoreError::Io {
        message: err.to_string(),
    }
}

// ============================================================================
// SECTION: Store Trait Implementation
// ============================================================================

impl<F: Filesystem> SnapshotStore for FileSnapshotStore<F> {
    fn put_snapshot(
        &self,
        snapshot: &ExecutionSnapshot,
    ) -> Result<SnapshotRef, SnapshotStoreError> {
        Ok(SnapshotRef::from_digest(self.put_document(SNAPSHOTS_DIR, snapshot)?))
    }

    fn get_snapshot(
        &self,
        reference: &SnapshotRef,
    ) -> Result<ExecutionSnapshot, SnapshotStoreError> {
        self.get_document(SNAPSHOTS_DIR, reference.digest())
    }

    fn put_workflow(&self, workflow: &WorkflowSpec) -> Result<WorkflowHash, SnapshotStoreError> {
        Ok(WorkflowHash::from_digest(self.put_document(PINNED_WORKFLOWS_DIR, workflow)?))
    }

    fn get_workflow(&self, hash: &WorkflowHash) -> Result<WorkflowSpec, SnapshotStoreError> {
        self.get_document(PINNED_WORKFLOWS_DIR, hash.digest())
    }
}
