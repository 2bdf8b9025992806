// waymark-core/src/runtime/store.rs
// ============================================================================
// Module: Waymark In-Memory Stores and Session Gate
// Description: Deterministic store implementations without external deps.
// Purpose: Back tests, examples, and the in-process per-session lock.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! The in-memory session store implements the same append semantics as the
//! durable file store (dedupe disposition, plan validation, segment
//! attestation) over process memory, which keeps the engine testable
//! without touching disk. The in-process session gate provides the
//! process-wide per-session lock used by every store implementation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;

use crate::core::AppendPlan;
use crate::core::ContentDigest;
use crate::core::DedupeDisposition;
use crate::core::DomainEvent;
use crate::core::EVENT_SCHEMA_VERSION;
use crate::core::ExecutionSnapshot;
use crate::core::MANIFEST_SCHEMA_VERSION;
use crate::core::ManifestEntry;
use crate::core::ManifestRecord;
use crate::core::SessionId;
use crate::core::SnapshotRef;
use crate::core::WorkflowHash;
use crate::core::WorkflowSpec;
use crate::core::canonical_jsonl_line;
use crate::interfaces::AppendOutcome;
use crate::interfaces::GateError;
use crate::interfaces::LeaseHold;
use crate::interfaces::SessionEventStore;
use crate::interfaces::SessionGate;
use crate::interfaces::SessionLease;
use crate::interfaces::SessionStoreError;
use crate::interfaces::SessionTruth;
use crate::interfaces::SnapshotStore;
use crate::interfaces::SnapshotStoreError;
use crate::interfaces::ValidatedPrefix;

// ============================================================================
// SECTION: Segment Encoding Helpers
// ============================================================================

/// Returns the relative segment path for an index range.
#[must_use]
pub fn segment_rel_path(first_event_index: u64, last_event_index: u64) -> String {
    format!("events/{first_event_index:08}-{last_event_index:08}.jsonl")
}

/// Encodes events as one canonical JSONL segment.
///
/// # Errors
///
/// Returns [`SessionStoreError::InvariantViolation`] when an event cannot be
/// canonicalized.
pub fn encode_segment(events: &[DomainEvent]) -> Result<Vec<u8>, SessionStoreError> {
    let mut bytes = Vec::new();
    for event in events {
        let line =
            canonical_jsonl_line(event).map_err(|err| SessionStoreError::InvariantViolation {
                detail: format!("event canonicalization failed: {err}"),
            })?;
        bytes.extend_from_slice(&line);
    }
    Ok(bytes)
}

/// Builds the manifest records attesting one appended plan.
///
/// # Errors
///
/// Returns [`SessionStoreError`] when segment encoding fails.
pub fn attestation_records(
    plan: &AppendPlan,
    next_manifest_index: u64,
) -> Result<Vec<ManifestRecord>, SessionStoreError> {
    let Some(first) = plan.events.first() else {
        return Err(SessionStoreError::InvariantViolation {
            detail: "cannot attest an empty plan".to_string(),
        });
    };
    let Some(last) = plan.events.last() else {
        return Err(SessionStoreError::InvariantViolation {
            detail: "cannot attest an empty plan".to_string(),
        });
    };
    let bytes = encode_segment(&plan.events)?;

    let mut records = vec![ManifestRecord {
        v: MANIFEST_SCHEMA_VERSION,
        manifest_index: next_manifest_index,
        entry: ManifestEntry::SegmentClosed {
            first_event_index: first.event_index,
            last_event_index: last.event_index,
            segment_rel_path: segment_rel_path(first.event_index, last.event_index),
            sha256: ContentDigest::of_bytes(&bytes),
            bytes: bytes.len() as u64,
        },
    }];
    for (offset, pin) in plan.sorted_pins().into_iter().enumerate() {
        records.push(ManifestRecord {
            v: MANIFEST_SCHEMA_VERSION,
            manifest_index: next_manifest_index + 1 + offset as u64,
            entry: ManifestEntry::SnapshotPinned {
                event_index: pin.event_index,
                snapshot_ref: pin.snapshot_ref,
                created_by_event_id: pin.created_by_event_id,
            },
        });
    }
    Ok(records)
}

/// Checks a plan against existing truth and classifies its dedupe keys.
///
/// # Errors
///
/// Returns [`SessionStoreError::InvariantViolation`] on partial replays or
/// plan validation failures.
pub fn admit_plan(
    truth: &SessionTruth,
    plan: &AppendPlan,
) -> Result<DedupeDisposition, SessionStoreError> {
    let disposition = plan.dedupe_disposition(&truth.dedupe_keys());
    match disposition {
        DedupeDisposition::FullReplay => return Ok(disposition),
        DedupeDisposition::Partial => {
            return Err(SessionStoreError::InvariantViolation {
                detail: "partial_dedupe_collision".to_string(),
            });
        }
        DedupeDisposition::AllNew => {}
    }

    if let Some(existing) = truth.session_id() {
        if *existing != plan.session_id {
            return Err(SessionStoreError::InvariantViolation {
                detail: "plan names a foreign session".to_string(),
            });
        }
    }
    if plan.expected_first_event_index != truth.expected_next_event_index() {
        return Err(SessionStoreError::InvariantViolation {
            detail: format!(
                "plan expects index {} but the log is at {}",
                plan.expected_first_event_index,
                truth.expected_next_event_index()
            ),
        });
    }
    plan.validate().map_err(|detail| SessionStoreError::InvariantViolation {
        detail,
    })?;
    Ok(disposition)
}

/// Asserts the lease witness still holds the lock for the target session.
///
/// # Errors
///
/// Returns [`SessionStoreError::InvariantViolation`] on a released or
/// mismatched lease.
pub fn assert_lease(lease: &SessionLease, session_id: &SessionId) -> Result<(), SessionStoreError> {
    if !lease.is_held() {
        return Err(SessionStoreError::InvariantViolation {
            detail: "session lease used after release".to_string(),
        });
    }
    if lease.session_id() != session_id {
        return Err(SessionStoreError::InvariantViolation {
            detail: "session lease covers a different session".to_string(),
        });
    }
    Ok(())
}

/// Validates imported events and manifest for raw reconstruction.
///
/// # Errors
///
/// Returns [`SessionStoreError::InvariantViolation`] when indices are not
/// contiguous, schemas are wrong, or segment attestations do not match the
/// events they cover.
pub fn verify_import_parts(
    events: &[DomainEvent],
    manifest: &[ManifestRecord],
) -> Result<(), SessionStoreError> {
    for (position, event) in events.iter().enumerate() {
        if event.v != EVENT_SCHEMA_VERSION || event.event_index != position as u64 {
            return Err(SessionStoreError::InvariantViolation {
                detail: format!("imported event {position} is malformed"),
            });
        }
    }
    let mut next_event_index: u64 = 0;
    for (position, record) in manifest.iter().enumerate() {
        if record.v != MANIFEST_SCHEMA_VERSION || record.manifest_index != position as u64 {
            return Err(SessionStoreError::InvariantViolation {
                detail: format!("imported manifest record {position} is malformed"),
            });
        }
        if let ManifestEntry::SegmentClosed {
            first_event_index,
            last_event_index,
            sha256,
            bytes,
            ..
        } = &record.entry
        {
            if *first_event_index != next_event_index || *last_event_index < *first_event_index {
                return Err(SessionStoreError::InvariantViolation {
                    detail: format!("imported segment at record {position} is out of order"),
                });
            }
            let start = usize::try_from(*first_event_index).unwrap_or(usize::MAX);
            let end = usize::try_from(*last_event_index + 1).unwrap_or(usize::MAX);
            let Some(covered) = events.get(start..end) else {
                return Err(SessionStoreError::InvariantViolation {
                    detail: format!("imported segment at record {position} exceeds the event log"),
                });
            };
            let encoded = encode_segment(covered)?;
            if ContentDigest::of_bytes(&encoded) != *sha256 || encoded.len() as u64 != *bytes {
                return Err(SessionStoreError::InvariantViolation {
                    detail: format!("imported segment at record {position} fails attestation"),
                });
            }
            next_event_index = last_event_index + 1;
        }
    }
    if next_event_index != events.len() as u64 {
        return Err(SessionStoreError::InvariantViolation {
            detail: "imported manifest does not cover the event log".to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// SECTION: In-Memory Session Store
// ============================================================================

/// Stored state of one in-memory session.
#[derive(Debug, Clone, Default)]
struct StoredSession {
    /// Events in index order.
    events: Vec<DomainEvent>,
    /// Manifest records in index order.
    manifest: Vec<ManifestRecord>,
}

/// In-memory session event store for tests and examples.
#[derive(Debug, Default, Clone)]
pub struct InMemorySessionStore {
    /// Sessions keyed by storage id, protected by a mutex.
    sessions: Arc<Mutex<BTreeMap<String, StoredSession>>>,
}

impl InMemorySessionStore {
    /// Creates a new in-memory session store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Locks the session map.
    fn guard(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, StoredSession>>, SessionStoreError> {
        self.sessions.lock().map_err(|_| SessionStoreError::Io {
            message: "session store mutex poisoned".to_string(),
        })
    }
}

impl SessionEventStore for InMemorySessionStore {
    fn load_strict(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<SessionTruth>, SessionStoreError> {
        let guard = self.guard()?;
        Ok(guard.get(session_id.as_str()).map(|stored| SessionTruth {
            events: stored.events.clone(),
            manifest: stored.manifest.clone(),
        }))
    }

    fn load_validated_prefix(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<ValidatedPrefix>, SessionStoreError> {
        Ok(self.load_strict(session_id)?.map(|truth| ValidatedPrefix {
            truth,
            is_complete: true,
            tail_reason: None,
        }))
    }

    fn append(
        &self,
        lease: &SessionLease,
        plan: &AppendPlan,
    ) -> Result<AppendOutcome, SessionStoreError> {
        assert_lease(lease, lease.session_id())?;
        let mut guard = self.guard()?;
        let truth = guard.get(lease.session_id().as_str()).map_or_else(
            SessionTruth::default,
            |stored| SessionTruth {
                events: stored.events.clone(),
                manifest: stored.manifest.clone(),
            },
        );
        if admit_plan(&truth, plan)? == DedupeDisposition::FullReplay {
            return Ok(AppendOutcome::IdempotentReplay);
        }

        let records = attestation_records(plan, truth.manifest.len() as u64)?;
        let first_event_index = plan.expected_first_event_index;
        let last_event_index = first_event_index + plan.events.len() as u64 - 1;
        let stored = guard.entry(lease.session_id().as_str().to_string()).or_default();
        stored.events.extend(plan.events.iter().cloned());
        stored.manifest.extend(records);
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
        let mut guard = self.guard()?;
        if guard.contains_key(session_id.as_str()) {
            return Err(SessionStoreError::InvariantViolation {
                detail: format!("session {session_id} already exists"),
            });
        }
        guard.insert(
            session_id.as_str().to_string(),
            StoredSession {
                events: events.to_vec(),
                manifest: manifest.to_vec(),
            },
        );
        Ok(())
    }
}

// ============================================================================
// SECTION: In-Memory Snapshot Store
// ============================================================================

/// In-memory content-addressed store for tests and examples.
#[derive(Debug, Default, Clone)]
pub struct InMemorySnapshotStore {
    /// Snapshots keyed by reference text.
    snapshots: Arc<Mutex<BTreeMap<String, ExecutionSnapshot>>>,
    /// Workflows keyed by hash text.
    workflows: Arc<Mutex<BTreeMap<String, WorkflowSpec>>>,
}

impl InMemorySnapshotStore {
    /// Creates a new in-memory snapshot store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn put_snapshot(
        &self,
        snapshot: &ExecutionSnapshot,
    ) -> Result<SnapshotRef, SnapshotStoreError> {
        let reference = snapshot.reference().map_err(|err| SnapshotStoreError::Io {
            message: err.to_string(),
        })?;
        self.snapshots
            .lock()
            .map_err(|_| SnapshotStoreError::Io {
                message: "snapshot store mutex poisoned".to_string(),
            })?
            .insert(reference.to_string(), snapshot.clone());
        Ok(reference)
    }

    fn get_snapshot(
        &self,
        reference: &SnapshotRef,
    ) -> Result<ExecutionSnapshot, SnapshotStoreError> {
        self.snapshots
            .lock()
            .map_err(|_| SnapshotStoreError::Io {
                message: "snapshot store mutex poisoned".to_string(),
            })?
            .get(&reference.to_string())
            .cloned()
            .ok_or_else(|| SnapshotStoreError::CorruptionDetected {
                detail: format!("missing snapshot {reference}"),
            })
    }

    fn put_workflow(&self, workflow: &WorkflowSpec) -> Result<WorkflowHash, SnapshotStoreError> {
        let hash = workflow.hash().map_err(|err| SnapshotStoreError::Io {
            message: err.to_string(),
        })?;
        self.workflows
            .lock()
            .map_err(|_| SnapshotStoreError::Io {
                message: "snapshot store mutex poisoned".to_string(),
            })?
            .insert(hash.to_string(), workflow.clone());
        Ok(hash)
    }

    fn get_workflow(&self, hash: &WorkflowHash) -> Result<WorkflowSpec, SnapshotStoreError> {
        self.workflows
            .lock()
            .map_err(|_| SnapshotStoreError::Io {
                message: "snapshot store mutex poisoned".to_string(),
            })?
            .get(&hash.to_string())
            .cloned()
            .ok_or_else(|| SnapshotStoreError::CorruptionDetected {
                detail: format!("missing pinned workflow {hash}"),
            })
    }
}

// ============================================================================
// SECTION: In-Process Session Gate
// ============================================================================

/// Lock slot for one session.
#[derive(Debug, Default)]
struct GateSlot {
    /// Whether the lock is currently held.
    held: Mutex<bool>,
    /// Signaled when the lock is released.
    released: Condvar,
}

/// Hold on one gate slot; releases on drop.
struct SlotHold {
    /// Slot being held.
    slot: Arc<GateSlot>,
}

impl LeaseHold for SlotHold {}

impl Drop for SlotHold {
    fn drop(&mut self) {
        if let Ok(mut held) = self.slot.held.lock() {
            *held = false;
            self.slot.released.notify_one();
        }
    }
}

/// Process-wide per-session lock provider.
#[derive(Debug, Default, Clone)]
pub struct InProcessSessionGate {
    /// Lock slots keyed by session id.
    slots: Arc<Mutex<BTreeMap<String, Arc<GateSlot>>>>,
}

impl InProcessSessionGate {
    /// Creates a new in-process gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionGate for InProcessSessionGate {
    fn acquire(&self, session_id: &SessionId) -> Result<SessionLease, GateError> {
        let slot = {
            let mut slots = self.slots.lock().map_err(|_| GateError::Unavailable {
                detail: "session gate mutex poisoned".to_string(),
            })?;
            Arc::clone(slots.entry(session_id.as_str().to_string()).or_default())
        };

        let mut held = slot.held.lock().map_err(|_| GateError::Unavailable {
            detail: "session slot mutex poisoned".to_string(),
        })?;
        while *held {
            held = slot.released.wait(held).map_err(|_| GateError::Unavailable {
                detail: "session slot wait poisoned".to_string(),
            })?;
        }
        *held = true;
        drop(held);

        Ok(SessionLease::new(
            session_id.clone(),
            Box::new(SlotHold {
                slot,
            }),
        ))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use crate::core::SessionId;
    use crate::interfaces::SessionGate;

    use super::InProcessSessionGate;
    use super::segment_rel_path;

    /// Tests segment paths zero-pad to eight digits.
    #[test]
    fn test_segment_path_zero_padded() {
        assert_eq!(segment_rel_path(0, 6), "events/00000000-00000006.jsonl");
        assert_eq!(segment_rel_path(120, 123), "events/00000120-00000123.jsonl");
    }

    /// Tests a released lease reports not held.
    #[test]
    fn test_lease_release() {
        let gate = InProcessSessionGate::new();
        let mut lease = gate.acquire(&SessionId::new("sess_gate")).unwrap();
        assert!(lease.is_held());
        lease.release();
        assert!(!lease.is_held());
        // The slot is free again; a second acquire succeeds immediately.
        let lease2 = gate.acquire(&SessionId::new("sess_gate")).unwrap();
        assert!(lease2.is_held());
    }
}
