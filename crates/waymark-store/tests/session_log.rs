// waymark-store/tests/session_log.rs
// ============================================================================
// Module: Session Log Store Tests
// Description: Durable append, replay, salvage, and crash-safety behavior.
// ============================================================================
//! ## Overview
//! Exercises the file-backed session log end to end: append protocol and
//! on-disk layout, idempotent and partial replays, corrupt-tail salvage with
//! write refusal, and tolerance of unattested leftovers from crashes.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::fs;
use std::path::Path;

use waymark_core::AppendOutcome;
use waymark_core::AppendPlan;
use waymark_core::AttemptId;
use waymark_core::CorruptionLocation;
use waymark_core::CorruptionReason;
use waymark_core::DomainEvent;
use waymark_core::EngineState;
use waymark_core::EventId;
use waymark_core::EventPayload;
use waymark_core::EventScope;
use waymark_core::ExecutionSnapshot;
use waymark_core::InProcessSessionGate;
use waymark_core::NodeId;
use waymark_core::ObservationId;
use waymark_core::RunId;
use waymark_core::SessionEventStore;
use waymark_core::SessionGate;
use waymark_core::SessionId;
use waymark_core::SessionStoreError;
use waymark_core::WorkflowId;
use waymark_core::observation_recorded_dedupe_key;
use waymark_core::runtime::StartPlanInputs;
use waymark_core::runtime::build_session_start_plan;
use waymark_store::FileSessionStore;
use waymark_store::StdFilesystem;

/// Test session id.
fn session_id() -> SessionId {
    SessionId::minted(&[9; 16])
}

/// Builds a store over a temp directory.
fn store(root: &Path) -> FileSessionStore<StdFilesystem> {
    FileSessionStore::new(root, StdFilesystem::new())
}

/// Builds the three-event start plan for the test session.
fn start_plan() -> AppendPlan {
    let snapshot_ref = ExecutionSnapshot::from_state(EngineState::Complete).reference().unwrap();
    build_session_start_plan(StartPlanInputs {
        session_id: session_id(),
        run_id: RunId::minted(&[1; 16]),
        workflow_id: WorkflowId::new("wf-test"),
        workflow_hash: waymark_core::WorkflowHash::from_digest(
            waymark_core::ContentDigest::of_bytes(b"wf"),
        ),
        root_node_id: NodeId::minted(&[2; 16]),
        root_attempt_id: AttemptId::minted(&[3; 16]),
        snapshot_ref,
        created_at_ms: 42,
        session_event_id: EventId::minted(&[4; 16]),
        run_event_id: EventId::minted(&[5; 16]),
        node_event_id: EventId::minted(&[6; 16]),
        initial_context: None,
    })
    .unwrap()
}

/// Builds a one-event observation plan at the given index.
fn observation_plan(first_index: u64, marker: u8) -> AppendPlan {
    let sid = session_id();
    let observation_id = ObservationId::new(format!("obs-{marker}"));
    AppendPlan {
        session_id: sid.clone(),
        expected_first_event_index: first_index,
        events: vec![DomainEvent {
            v: 1,
            event_id: EventId::minted(&[marker; 16]),
            event_index: first_index,
            session_id: sid.clone(),
            dedupe_key: observation_recorded_dedupe_key(&sid, &observation_id),
            scope: EventScope::default(),
            payload: EventPayload::ObservationRecorded {
                observation_id,
                body_markdown: "observed".to_string(),
                recorded_at_ms: 42,
            },
        }],
        snapshot_pins: Vec::new(),
    }
}

/// Appends a plan under a fresh lease.
fn append(
    store: &FileSessionStore<StdFilesystem>,
    plan: &AppendPlan,
) -> Result<AppendOutcome, SessionStoreError> {
    let gate = InProcessSessionGate::new();
    let lease = gate.acquire(&session_id()).unwrap();
    store.append(&lease, plan)
}

/// Append writes the zero-padded segment and attests it in the manifest.
#[test]
fn test_append_writes_attested_segment() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());

    let outcome = append(&store, &start_plan()).unwrap();
    assert_eq!(
        outcome,
        AppendOutcome::Appended {
            first_event_index: 0,
            last_event_index: 2
        }
    );

    let session_dir = dir.path().join("sessions").join(session_id().as_str());
    assert!(session_dir.join("events/00000000-00000002.jsonl").is_file());
    assert!(session_dir.join("manifest.jsonl").is_file());
    assert!(session_dir.join("lock").exists());

    let truth = store.load_strict(&session_id()).unwrap().unwrap();
    assert_eq!(truth.events.len(), 3);
    // segment_closed plus one snapshot pin for the root node.
    assert_eq!(truth.manifest.len(), 2);
}

/// Replaying an identical plan appends nothing and succeeds.
#[test]
fn test_idempotent_replay() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    append(&store, &start_plan()).unwrap();
    let before = fs::read(
        dir.path()
            .join("sessions")
            .join(session_id().as_str())
            .join("manifest.jsonl"),
    )
    .unwrap();

    let outcome = append(&store, &start_plan()).unwrap();
    assert_eq!(outcome, AppendOutcome::IdempotentReplay);

    let after = fs::read(
        dir.path()
            .join("sessions")
            .join(session_id().as_str())
            .join("manifest.jsonl"),
    )
    .unwrap();
    assert_eq!(before, after);
    assert_eq!(store.load_strict(&session_id()).unwrap().unwrap().events.len(), 3);
}

/// A plan with some known and some fresh dedupe keys is rejected unchanged.
#[test]
fn test_partial_replay_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    append(&store, &start_plan()).unwrap();
    append(&store, &observation_plan(3, 0x21)).unwrap();

    // First event replays an existing observation, second is new.
    let mut plan = observation_plan(4, 0x21);
    let mut fresh = observation_plan(5, 0x22).events.remove(0);
    fresh.event_index = 5;
    plan.events.push(fresh);

    let before = store.load_strict(&session_id()).unwrap().unwrap();
    let result = append(&store, &plan);
    assert!(matches!(result, Err(SessionStoreError::InvariantViolation { .. })));
    let after = store.load_strict(&session_id()).unwrap().unwrap();
    assert_eq!(before, after);
}

/// A truncated tail segment salvages to the prior prefix and refuses writes.
#[test]
fn test_corrupt_tail_salvage() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    append(&store, &start_plan()).unwrap();
    append(&store, &observation_plan(3, 0x31)).unwrap();

    // Truncate the last segment file by one byte.
    let segment = dir
        .path()
        .join("sessions")
        .join(session_id().as_str())
        .join("events/00000003-00000003.jsonl");
    let bytes = fs::read(&segment).unwrap();
    fs::write(&segment, &bytes[..bytes.len() - 1]).unwrap();

    let prefix = store.load_validated_prefix(&session_id()).unwrap().unwrap();
    assert!(!prefix.is_complete);
    assert_eq!(prefix.truth.events.len(), 3);
    assert_eq!(prefix.tail_reason.as_ref().unwrap().reason, CorruptionReason::DigestMismatch);

    let strict = store.load_strict(&session_id());
    assert!(matches!(
        strict,
        Err(SessionStoreError::CorruptionDetected {
            location: CorruptionLocation::Tail,
            reason: CorruptionReason::DigestMismatch,
            ..
        })
    ));

    // Writes are refused until the tail is repaired.
    let result = append(&store, &observation_plan(4, 0x32));
    assert!(matches!(result, Err(SessionStoreError::CorruptionDetected { .. })));
}

/// Corrupting the first manifest record is head corruption, not salvage.
#[test]
fn test_head_corruption_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    append(&store, &start_plan()).unwrap();

    let manifest = dir
        .path()
        .join("sessions")
        .join(session_id().as_str())
        .join("manifest.jsonl");
    let text = fs::read_to_string(&manifest).unwrap();
    let doctored = format!("not json\n{text}");
    fs::write(&manifest, doctored).unwrap();

    let result = store.load_validated_prefix(&session_id());
    assert!(matches!(
        result,
        Err(SessionStoreError::CorruptionDetected {
            location: CorruptionLocation::Head,
            ..
        })
    ));
}

/// An unattested segment left by a crash is invisible to loads.
#[test]
fn test_unattested_segment_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    append(&store, &start_plan()).unwrap();

    // Simulate a crash after the segment rename but before attestation.
    let orphan = dir
        .path()
        .join("sessions")
        .join(session_id().as_str())
        .join("events/00000003-00000003.jsonl");
    fs::write(&orphan, b"{\"garbage\":true}\n").unwrap();

    let prefix = store.load_validated_prefix(&session_id()).unwrap().unwrap();
    assert!(prefix.is_complete);
    assert_eq!(prefix.truth.events.len(), 3);

    // The next append at index 3 overwrites the orphan durably.
    let outcome = append(&store, &observation_plan(3, 0x41)).unwrap();
    assert_eq!(
        outcome,
        AppendOutcome::Appended {
            first_event_index: 3,
            last_event_index: 3
        }
    );
    assert_eq!(store.load_strict(&session_id()).unwrap().unwrap().events.len(), 4);
}

/// A plan expecting the wrong index is rejected before any write.
#[test]
fn test_wrong_expected_index_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    append(&store, &start_plan()).unwrap();

    let result = append(&store, &observation_plan(7, 0x51));
    assert!(matches!(result, Err(SessionStoreError::InvariantViolation { .. })));
    assert_eq!(store.load_strict(&session_id()).unwrap().unwrap().events.len(), 3);
}

/// A released lease cannot append.
#[test]
fn test_released_lease_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());

    let gate = InProcessSessionGate::new();
    let mut lease = gate.acquire(&session_id()).unwrap();
    lease.release();
    let result = store.append(&lease, &start_plan());
    assert!(matches!(result, Err(SessionStoreError::InvariantViolation { .. })));
}
