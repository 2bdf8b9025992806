// waymark-core/src/core/bundle.rs
// ============================================================================
// Module: Waymark Session Bundles
// Description: Self-describing export bundles with a SHA-256 integrity manifest.
// Purpose: Build and validate portable session exports without touching disk.
// Dependencies: serde, time, crate::core::{canonical, event, hashing, manifest, snapshot, workflow}
// ============================================================================

//! ## Overview
//! A bundle is one canonical JSON document carrying a session's events,
//! attestation manifest, snapshots, and pinned workflows, plus an integrity
//! manifest hashing each part over canonical bytes. Building and validating
//! are pure; the engine wires them to stores. Import validation runs in a
//! fixed order (schema, integrity, ordering, references) and fails closed
//! on the first violation. Capability tokens never travel in bundles.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::canonical::canonical_json_bytes;
use crate::core::event::DomainEvent;
use crate::core::event::EventPayload;
use crate::core::hashing::ContentDigest;
use crate::core::hashing::SnapshotRef;
use crate::core::hashing::WorkflowHash;
use crate::core::identifiers::BundleId;
use crate::core::identifiers::SessionId;
use crate::core::manifest::ManifestEntry;
use crate::core::manifest::ManifestRecord;
use crate::core::snapshot::ExecutionSnapshot;
use crate::core::workflow::WorkflowSpec;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Bundle schema version produced and accepted.
pub const BUNDLE_SCHEMA_VERSION: u32 = 1;
/// Integrity manifest kind discriminator.
pub const BUNDLE_INTEGRITY_KIND: &str = "sha256_manifest_v1";
/// Integrity path for the event log part.
const EVENTS_PATH: &str = "session/events";
/// Integrity path for the manifest part.
const MANIFEST_PATH: &str = "session/manifest";
/// Integrity path prefix for snapshot parts.
const SNAPSHOTS_PATH_PREFIX: &str = "session/snapshots/";
/// Integrity path prefix for pinned workflow parts.
const PINNED_WORKFLOWS_PATH_PREFIX: &str = "session/pinnedWorkflows/";

// ============================================================================
// SECTION: Bundle Document
// ============================================================================

/// Producer metadata stamped into a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleProducer {
    /// Application version that produced the bundle.
    pub app_version: String,
    /// Hash of the configuration in effect, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_config_hash: Option<ContentDigest>,
}

/// One integrity entry covering a bundle part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityEntry {
    /// Bundle-relative part path.
    pub path: String,
    /// Digest over the part's canonical bytes.
    pub sha256: ContentDigest,
    /// Canonical byte length of the part.
    pub bytes: u64,
}

/// Integrity manifest over every bundle part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleIntegrity {
    /// Manifest kind; always [`BUNDLE_INTEGRITY_KIND`].
    pub kind: String,
    /// Entries sorted by path.
    pub entries: Vec<IntegrityEntry>,
}

/// Session content carried by a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleSession {
    /// Exported session identifier.
    pub session_id: SessionId,
    /// Full event log in index order.
    pub events: Vec<DomainEvent>,
    /// Full attestation manifest in index order.
    pub manifest: Vec<ManifestRecord>,
    /// Snapshots keyed by reference.
    pub snapshots: BTreeMap<SnapshotRef, ExecutionSnapshot>,
    /// Pinned workflows keyed by hash.
    pub pinned_workflows: BTreeMap<WorkflowHash, WorkflowSpec>,
}

/// Self-describing session export bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportBundle {
    /// Bundle schema version; always [`BUNDLE_SCHEMA_VERSION`].
    pub bundle_schema_version: u32,
    /// Bundle identifier.
    pub bundle_id: BundleId,
    /// Export time as RFC 3339 text.
    pub exported_at: String,
    /// Producer metadata.
    pub producer: BundleProducer,
    /// Integrity manifest over the session parts.
    pub integrity: BundleIntegrity,
    /// Session content.
    pub session: BundleSession,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while building a bundle.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BundleBuildError {
    /// A bundle part could not be canonicalized.
    #[error("bundle part canonicalization failed: {detail}")]
    Canonicalization {
        /// Failure description.
        detail: String,
    },
    /// The export timestamp could not be formatted.
    #[error("bundle timestamp formatting failed")]
    TimestampInvalid,
}

/// Closed set of import validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BundleImportError {
    /// The bundle document violates the schema.
    #[error("bundle format invalid: {detail}")]
    InvalidFormat {
        /// Violation description.
        detail: String,
    },
    /// The bundle schema version is not supported.
    #[error("bundle schema version {version} unsupported")]
    UnsupportedVersion {
        /// Rejected version.
        version: u32,
    },
    /// An integrity entry is missing, extra, or does not match.
    #[error("bundle integrity failed: {detail}")]
    IntegrityFailed {
        /// Failure description.
        detail: String,
    },
    /// A snapshot referenced by events is absent from the bundle.
    #[error("bundle missing snapshot {snapshot_ref}")]
    MissingSnapshot {
        /// Missing snapshot reference.
        snapshot_ref: SnapshotRef,
    },
    /// A workflow referenced by events is absent from the bundle.
    #[error("bundle missing pinned workflow {workflow_hash}")]
    MissingPinnedWorkflow {
        /// Missing workflow hash.
        workflow_hash: WorkflowHash,
    },
    /// Event indices are not contiguous from zero.
    #[error("bundle event order invalid at position {position}")]
    EventOrderInvalid {
        /// Offending position.
        position: usize,
    },
    /// Manifest indices or segment coverage are not contiguous.
    #[error("bundle manifest order invalid at position {position}")]
    ManifestOrderInvalid {
        /// Offending position.
        position: usize,
    },
}

// ============================================================================
// SECTION: Builder
// ============================================================================

/// Inputs assembled by the engine for a bundle export.
#[derive(Debug, Clone)]
pub struct BundleExportInputs {
    /// Bundle identifier to stamp.
    pub bundle_id: BundleId,
    /// Export time in milliseconds since the epoch.
    pub exported_at_ms: u64,
    /// Producer metadata.
    pub producer: BundleProducer,
    /// Session content to export.
    pub session: BundleSession,
}

/// Builds a self-describing export bundle with its integrity manifest.
///
/// # Errors
///
/// Returns [`BundleBuildError`] when a part cannot be canonicalized or the
/// timestamp cannot be formatted.
pub fn build_export_bundle(inputs: BundleExportInputs) -> Result<ExportBundle, BundleBuildError> {
    let mut entries = Vec::new();
    entries.push(integrity_entry(EVENTS_PATH.to_string(), &inputs.session.events)?);
    entries.push(integrity_entry(MANIFEST_PATH.to_string(), &inputs.session.manifest)?);
    for (snapshot_ref, snapshot) in &inputs.session.snapshots {
        entries
            .push(integrity_entry(format!("{SNAPSHOTS_PATH_PREFIX}{snapshot_ref}"), snapshot)?);
    }
    for (workflow_hash, workflow) in &inputs.session.pinned_workflows {
        entries.push(integrity_entry(
            format!("{PINNED_WORKFLOWS_PATH_PREFIX}{workflow_hash}"),
            workflow,
        )?);
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(ExportBundle {
        bundle_schema_version: BUNDLE_SCHEMA_VERSION,
        bundle_id: inputs.bundle_id,
        exported_at: format_rfc3339_ms(inputs.exported_at_ms)?,
        producer: inputs.producer,
        integrity: BundleIntegrity {
            kind: BUNDLE_INTEGRITY_KIND.to_string(),
            entries,
        },
        session: inputs.session,
    })
}

/// Hashes one bundle part into an integrity entry.
fn integrity_entry<T: Serialize>(
    path: String,
    value: &T,
) -> Result<IntegrityEntry, BundleBuildError> {
    let bytes = canonical_json_bytes(value).map_err(|err| BundleBuildError::Canonicalization {
        detail: err.to_string(),
    })?;
    Ok(IntegrityEntry {
        path,
        sha256: ContentDigest::of_bytes(&bytes),
        bytes: bytes.len() as u64,
    })
}

/// Formats epoch milliseconds as RFC 3339 text.
fn format_rfc3339_ms(millis: u64) -> Result<String, BundleBuildError> {
    let nanos = i128::from(millis) * 1_000_000;
    let moment = OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .map_err(|_| BundleBuildError::TimestampInvalid)?;
    moment.format(&Rfc3339).map_err(|_| BundleBuildError::TimestampInvalid)
}

// ============================================================================
// SECTION: Import Validation
// ============================================================================

/// Validates a bundle for import: schema, integrity, ordering, references.
///
/// # Errors
///
/// Returns the first [`BundleImportError`] encountered, in the fixed
/// validation order.
pub fn validate_import_bundle(bundle: &ExportBundle) -> Result<(), BundleImportError> {
    validate_schema(bundle)?;
    validate_integrity(bundle)?;
    validate_ordering(bundle)?;
    validate_references(bundle)
}

/// Stage 1: schema shape.
fn validate_schema(bundle: &ExportBundle) -> Result<(), BundleImportError> {
    if bundle.bundle_schema_version != BUNDLE_SCHEMA_VERSION {
        return Err(BundleImportError::UnsupportedVersion {
            version: bundle.bundle_schema_version,
        });
    }
    if bundle.integrity.kind != BUNDLE_INTEGRITY_KIND {
        return Err(BundleImportError::InvalidFormat {
            detail: format!("unknown integrity kind {}", bundle.integrity.kind),
        });
    }
    bundle.bundle_id.validate().map_err(|_| BundleImportError::InvalidFormat {
        detail: "malformed bundle id".to_string(),
    })?;
    bundle.session.session_id.validate().map_err(|_| BundleImportError::InvalidFormat {
        detail: "malformed session id".to_string(),
    })?;
    for event in &bundle.session.events {
        event.validate().map_err(|err| BundleImportError::InvalidFormat {
            detail: format!("event {}: {err}", event.event_index),
        })?;
        if event.session_id != bundle.session.session_id {
            return Err(BundleImportError::InvalidFormat {
                detail: format!("event {} names a foreign session", event.event_index),
            });
        }
    }
    for record in &bundle.session.manifest {
        record.validate().map_err(|err| BundleImportError::InvalidFormat {
            detail: format!("manifest {}: {err}", record.manifest_index),
        })?;
    }
    Ok(())
}

/// Stage 2: integrity entries cover every part and match recomputed digests.
fn validate_integrity(bundle: &ExportBundle) -> Result<(), BundleImportError> {
    let mut expected: BTreeMap<String, IntegrityEntry> = BTreeMap::new();
    let mut insert = |entry: IntegrityEntry| {
        expected.insert(entry.path.clone(), entry);
    };
    insert(recomputed_entry(EVENTS_PATH.to_string(), &bundle.session.events)?);
    insert(recomputed_entry(MANIFEST_PATH.to_string(), &bundle.session.manifest)?);
    for (snapshot_ref, snapshot) in &bundle.session.snapshots {
        insert(recomputed_entry(format!("{SNAPSHOTS_PATH_PREFIX}{snapshot_ref}"), snapshot)?);
    }
    for (workflow_hash, workflow) in &bundle.session.pinned_workflows {
        insert(recomputed_entry(
            format!("{PINNED_WORKFLOWS_PATH_PREFIX}{workflow_hash}"),
            workflow,
        )?);
    }

    let presented: BTreeMap<&str, &IntegrityEntry> =
        bundle.integrity.entries.iter().map(|entry| (entry.path.as_str(), entry)).collect();
    if presented.len() != bundle.integrity.entries.len() {
        return Err(BundleImportError::IntegrityFailed {
            detail: "duplicate integrity paths".to_string(),
        });
    }
    if presented.len() != expected.len() {
        return Err(BundleImportError::IntegrityFailed {
            detail: "integrity entry count mismatch".to_string(),
        });
    }
    for (path, computed) in &expected {
        let Some(entry) = presented.get(path.as_str()) else {
            return Err(BundleImportError::IntegrityFailed {
                detail: format!("missing integrity entry for {path}"),
            });
        };
        if entry.sha256 != computed.sha256 || entry.bytes != computed.bytes {
            return Err(BundleImportError::IntegrityFailed {
                detail: format!("integrity mismatch for {path}"),
            });
        }
    }
    Ok(())
}

/// Stage 3: event and manifest ordering.
fn validate_ordering(bundle: &ExportBundle) -> Result<(), BundleImportError> {
    for (position, event) in bundle.session.events.iter().enumerate() {
        if event.event_index != position as u64 {
            return Err(BundleImportError::EventOrderInvalid {
                position,
            });
        }
    }
    let mut next_event_index: u64 = 0;
    for (position, record) in bundle.session.manifest.iter().enumerate() {
        if record.manifest_index != position as u64 {
            return Err(BundleImportError::ManifestOrderInvalid {
                position,
            });
        }
        if let ManifestEntry::SegmentClosed {
            first_event_index,
            last_event_index,
            ..
        } = &record.entry
        {
            if *first_event_index != next_event_index {
                return Err(BundleImportError::ManifestOrderInvalid {
                    position,
                });
            }
            next_event_index = last_event_index + 1;
        }
    }
    if next_event_index != bundle.session.events.len() as u64 {
        return Err(BundleImportError::ManifestOrderInvalid {
            position: bundle.session.manifest.len(),
        });
    }
    Ok(())
}

/// Stage 4: snapshot, workflow, and pin references resolve.
fn validate_references(bundle: &ExportBundle) -> Result<(), BundleImportError> {
    let mut pinned_refs: BTreeSet<(u64, &SnapshotRef)> = BTreeSet::new();
    for record in &bundle.session.manifest {
        if let ManifestEntry::SnapshotPinned {
            event_index,
            snapshot_ref,
            ..
        } = &record.entry
        {
            pinned_refs.insert((*event_index, snapshot_ref));
        }
    }

    for event in &bundle.session.events {
        match &event.payload {
            EventPayload::NodeCreated {
                snapshot_ref,
                ..
            } => {
                if !bundle.session.snapshots.contains_key(snapshot_ref) {
                    return Err(BundleImportError::MissingSnapshot {
                        snapshot_ref: snapshot_ref.clone(),
                    });
                }
                if !pinned_refs.contains(&(event.event_index, snapshot_ref)) {
                    return Err(BundleImportError::ManifestOrderInvalid {
                        position: usize::try_from(event.event_index).unwrap_or(usize::MAX),
                    });
                }
            }
            EventPayload::RunStarted {
                workflow_hash,
                ..
            } => {
                if !bundle.session.pinned_workflows.contains_key(workflow_hash) {
                    return Err(BundleImportError::MissingPinnedWorkflow {
                        workflow_hash: workflow_hash.clone(),
                    });
                }
            }
            _ => {}
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Serialization Helper
// ============================================================================

/// Recomputes the integrity entry for a part during import validation.
fn recomputed_entry<T: Serialize>(
    path: String,
    value: &T,
) -> Result<IntegrityEntry, BundleImportError> {
    let bytes = canonical_json_bytes(value).map_err(|err| BundleImportError::IntegrityFailed {
        detail: format!("canonicalization failed for {path}: {err}"),
    })?;
    Ok(IntegrityEntry {
        path,
        sha256: ContentDigest::of_bytes(&bytes),
        bytes: bytes.len() as u64,
    })
}
