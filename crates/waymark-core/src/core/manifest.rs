// waymark-core/src/core/manifest.rs
// ============================================================================
// Module: Waymark Attestation Manifest
// Description: Manifest records that make on-disk artifacts count as truth.
// Purpose: Attest closed event segments and pinned snapshots.
// Dependencies: serde, crate::core::{hashing, identifiers}
// ============================================================================

//! ## Overview
//! The manifest is the single source of truth for which event segments and
//! snapshots are committed. A segment file that exists on disk but has no
//! `segment_closed` record is invisible; a snapshot referenced by an event
//! without a `snapshot_pinned` record is an integrity failure. Manifest
//! records carry their own contiguous index so torn tails are detectable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::hashing::ContentDigest;
use crate::core::hashing::SnapshotRef;
use crate::core::identifiers::EventId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Schema version accepted for manifest records.
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

// ============================================================================
// SECTION: Manifest Entries
// ============================================================================

/// Kind-specific payload of a manifest record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ManifestEntry {
    /// An event segment was closed and attested.
    SegmentClosed {
        /// Index of the first event in the segment.
        first_event_index: u64,
        /// Index of the last event in the segment.
        last_event_index: u64,
        /// Segment path relative to the session directory.
        segment_rel_path: String,
        /// Digest over the segment's exact bytes.
        sha256: ContentDigest,
        /// Segment length in bytes.
        bytes: u64,
    },
    /// A snapshot reference was pinned by an event.
    SnapshotPinned {
        /// Index of the event that introduced the reference.
        event_index: u64,
        /// Pinned snapshot reference.
        snapshot_ref: SnapshotRef,
        /// Event that introduced the reference.
        created_by_event_id: EventId,
    },
}

impl ManifestEntry {
    /// Returns the stable kind label for the entry.
    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self {
            Self::SegmentClosed { .. } => "segment_closed",
            Self::SnapshotPinned { .. } => "snapshot_pinned",
        }
    }
}

// ============================================================================
// SECTION: Manifest Record
// ============================================================================

/// One attestation record in the manifest log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    /// Schema version; always [`MANIFEST_SCHEMA_VERSION`].
    pub v: u32,
    /// Contiguous manifest index starting at 0.
    pub manifest_index: u64,
    /// Attestation payload.
    #[serde(flatten)]
    pub entry: ManifestEntry,
}

impl ManifestRecord {
    /// Validates the record's schema version and segment bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] when the record is malformed.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.v != MANIFEST_SCHEMA_VERSION {
            return Err(ManifestError::UnsupportedVersion {
                version: self.v,
            });
        }
        if let ManifestEntry::SegmentClosed {
            first_event_index,
            last_event_index,
            segment_rel_path,
            ..
        } = &self.entry
        {
            if last_event_index < first_event_index {
                return Err(ManifestError::InvalidSegmentBounds {
                    first: *first_event_index,
                    last: *last_event_index,
                });
            }
            if segment_rel_path.is_empty() {
                return Err(ManifestError::EmptySegmentPath);
            }
        }
        Ok(())
    }
}

/// Errors raised when validating a manifest record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    /// Schema version is not supported.
    #[error("unsupported manifest schema version {version}")]
    UnsupportedVersion {
        /// Rejected version.
        version: u32,
    },
    /// Segment bounds are inverted.
    #[error("segment bounds inverted: first {first}, last {last}")]
    InvalidSegmentBounds {
        /// First event index.
        first: u64,
        /// Last event index.
        last: u64,
    },
    /// Segment path is empty.
    #[error("segment path is empty")]
    EmptySegmentPath,
}
