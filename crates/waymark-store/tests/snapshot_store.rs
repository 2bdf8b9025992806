// waymark-store/tests/snapshot_store.rs
// ============================================================================
// Module: Snapshot Store Tests
// Description: CAS put/get, idempotency, and digest verification.
// ============================================================================
//! ## Overview
//! Exercises the file-backed content-addressed store: addresses follow
//! content, identical puts are no-ops, reads re-verify digests, and
//! tampered or missing content fails closed.

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

use waymark_core::EngineState;
use waymark_core::ExecutionSnapshot;
use waymark_core::PendingStep;
use waymark_core::SnapshotStore;
use waymark_core::SnapshotStoreError;
use waymark_core::StepId;
use waymark_core::WorkflowId;
use waymark_core::WorkflowSpec;
use waymark_store::FileSnapshotStore;
use waymark_store::StdFilesystem;

/// Builds a running snapshot for tests.
fn snapshot() -> ExecutionSnapshot {
    ExecutionSnapshot::from_state(EngineState::Running {
        pending_step: PendingStep {
            step_id: StepId::new("step-1"),
            loop_path: Vec::new(),
        },
    })
}

/// Put then get round-trips and the address matches the content.
#[test]
fn test_put_get_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSnapshotStore::new(dir.path(), StdFilesystem::new());

    let reference = store.put_snapshot(&snapshot()).unwrap();
    assert_eq!(reference, snapshot().reference().unwrap());

    let loaded = store.get_snapshot(&reference).unwrap();
    assert_eq!(loaded, snapshot());

    let expected_path =
        dir.path().join("snapshots").join(format!("sha256_{}.json", reference.digest().hex()));
    assert!(expected_path.is_file());
}

/// A second put of identical content leaves the stored file untouched.
#[test]
fn test_second_put_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSnapshotStore::new(dir.path(), StdFilesystem::new());

    let reference = store.put_snapshot(&snapshot()).unwrap();
    let path = store.snapshot_path(&reference);
    let before = fs::metadata(&path).unwrap().modified().unwrap();

    let again = store.put_snapshot(&snapshot()).unwrap();
    assert_eq!(reference, again);
    let after = fs::metadata(&path).unwrap().modified().unwrap();
    assert_eq!(before, after);
}

/// Tampered stored bytes fail with a digest mismatch.
#[test]
fn test_tampered_content_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSnapshotStore::new(dir.path(), StdFilesystem::new());

    let reference = store.put_snapshot(&snapshot()).unwrap();
    let path = store.snapshot_path(&reference);
    let mut bytes = fs::read(&path).unwrap();
    bytes[0] = b' ';
    fs::write(&path, bytes).unwrap();

    assert!(matches!(
        store.get_snapshot(&reference),
        Err(SnapshotStoreError::DigestMismatch { .. })
    ));
}

/// Missing content is corruption, not a panic.
#[test]
fn test_missing_content_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSnapshotStore::new(dir.path(), StdFilesystem::new());
    let reference = snapshot().reference().unwrap();
    assert!(matches!(
        store.get_snapshot(&reference),
        Err(SnapshotStoreError::CorruptionDetected { .. })
    ));
}

/// Pinned workflows share the same CAS discipline under their own directory.
#[test]
fn test_workflow_pinning() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSnapshotStore::new(dir.path(), StdFilesystem::new());

    let workflow = WorkflowSpec {
        v: 1,
        workflow_id: WorkflowId::new("wf-pin"),
        title: None,
        recommended: None,
        steps: Vec::new(),
    };
    let hash = store.put_workflow(&workflow).unwrap();
    assert_eq!(hash, workflow.hash().unwrap());
    assert_eq!(store.get_workflow(&hash).unwrap(), workflow);
    assert!(
        dir.path()
            .join("pinnedWorkflows")
            .join(format!("sha256_{}.json", hash.digest().hex()))
            .is_file()
    );
}
