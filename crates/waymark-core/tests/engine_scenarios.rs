// waymark-core/tests/engine_scenarios.rs
// ============================================================================
// Module: Engine Scenario Tests
// Description: End-to-end advance, blocking, replay, and fork scenarios.
// ============================================================================
//! ## Overview
//! Exercises the engine over in-memory stores: fresh starts, blocked
//! attempts, gap recording under never-stop autonomy, idempotent replays,
//! non-tip forks, checkpoints, and read-only rehydration.

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

use serde_json::json;
use waymark_core::AdvanceRequest;
use waymark_core::AutonomyMode;
use waymark_core::CauseKind;
use waymark_core::ContinueOutcome;
use waymark_core::ContinueWorkflowRequest;
use waymark_core::EngineError;
use waymark_core::EventPayload;
use waymark_core::GapSeverity;
use waymark_core::NodeKind;
use waymark_core::OutputChannel;
use waymark_core::RiskPolicy;
use waymark_core::SessionEventStore;
use waymark_core::StepId;
use waymark_core::WorkflowId;
use waymark_core::runtime::AdvanceDefaults;

mod common;

use common::MapWorkflows;
use common::ScriptedValidation;
use common::contracted_step;
use common::harness;
use common::harness_with_defaults;
use common::step;
use common::workflow;

/// Builds a continue request advancing with notes.
fn ack_request(ack_token: &str, notes: Option<&str>) -> ContinueWorkflowRequest {
    ContinueWorkflowRequest {
        ack_token: Some(ack_token.to_string()),
        advance: AdvanceRequest {
            notes_markdown: notes.map(ToString::to_string),
            ..AdvanceRequest::default()
        },
        ..ContinueWorkflowRequest::default()
    }
}

/// Returns the event kind labels of a session in index order.
fn event_kinds(
    harness: &common::TestHarness,
    session: &waymark_core::SessionId,
) -> Vec<&'static str> {
    let truth = harness.sessions.load_strict(session).unwrap().unwrap();
    truth.events.iter().map(|event| event.payload.kind_label()).collect()
}

/// Fresh start plus one advance records the expected event sequence.
#[test]
fn test_fresh_start_and_one_advance() {
    let workflows =
        MapWorkflows::default().with(workflow("wf-basic", vec![step("step-1"), step("step-2")]));
    let h = harness(workflows, ScriptedValidation::default());

    let started = h.engine.start_workflow(&WorkflowId::new("wf-basic"), None).unwrap();
    assert!(!started.is_complete);
    assert_eq!(started.pending.as_ref().unwrap().step_id, StepId::new("step-1"));
    assert_eq!(
        event_kinds(&h, &started.session_id),
        vec!["session_created", "run_started", "node_created"]
    );

    let result = h
        .engine
        .continue_workflow(&ack_request(&started.tokens.ack_token, Some("ok")))
        .unwrap();
    assert_eq!(result.outcome, ContinueOutcome::Advanced);
    assert_eq!(result.pending.as_ref().unwrap().step_id, StepId::new("step-2"));

    let truth = h.sessions.load_strict(&started.session_id).unwrap().unwrap();
    assert_eq!(
        event_kinds(&h, &started.session_id),
        vec![
            "session_created",
            "run_started",
            "node_created",
            "advance_recorded",
            "node_created",
            "edge_created",
            "node_output_appended",
        ]
    );

    // The new node is a default-kind child of the root via an intentional fork.
    let node_created = truth
        .events
        .iter()
        .filter_map(|event| match &event.payload {
            EventPayload::NodeCreated {
                node_kind,
                parent_node_id,
                ..
            } => Some((*node_kind, parent_node_id.clone())),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(node_created[1].0, NodeKind::Default);
    assert_eq!(node_created[1].1.as_ref(), Some(&started.root_node_id));

    let edge = truth
        .events
        .iter()
        .find_map(|event| match &event.payload {
            EventPayload::EdgeCreated {
                cause,
                from_node_id,
                ..
            } => Some((cause.kind, from_node_id.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(edge.0, CauseKind::IntentionalFork);
    assert_eq!(edge.1, started.root_node_id);

    // The recap output names the consumed attempt.
    let output = truth
        .events
        .iter()
        .find_map(|event| match &event.payload {
            EventPayload::NodeOutputAppended {
                output_id,
                channel,
                ..
            } => Some((output_id.clone(), *channel)),
            _ => None,
        })
        .unwrap();
    assert_eq!(output.1, OutputChannel::Recap);
    assert!(output.0.as_str().starts_with("out_recap_attempt_"));
}

/// A required output that is missing blocks the advance under guided autonomy.
#[test]
fn test_missing_required_output_blocks() {
    let workflows = MapWorkflows::default()
        .with(workflow("wf-contract", vec![contracted_step("step-1", "contract-1")]));
    let h = harness(workflows, ScriptedValidation::default());

    let started = h.engine.start_workflow(&WorkflowId::new("wf-contract"), None).unwrap();
    let result = h
        .engine
        .continue_workflow(&ack_request(&started.tokens.ack_token, None))
        .unwrap();

    assert_eq!(result.outcome, ContinueOutcome::Blocked);
    assert!(!result.is_complete);
    assert_eq!(result.pending.as_ref().unwrap().step_id, StepId::new("step-1"));
    assert_eq!(result.blockers.len(), 1);
    assert_eq!(result.blockers[0].code, "missing_required_output");

    assert_eq!(
        event_kinds(&h, &started.session_id),
        vec![
            "session_created",
            "run_started",
            "node_created",
            "validation_performed",
            "advance_recorded",
            "node_created",
            "edge_created",
        ]
    );

    let truth = h.sessions.load_strict(&started.session_id).unwrap().unwrap();
    let validation = truth
        .events
        .iter()
        .find_map(|event| match &event.payload {
            EventPayload::ValidationPerformed {
                engine_ran,
                result,
                ..
            } => Some((*engine_ran, result.clone())),
            _ => None,
        })
        .unwrap();
    assert!(!validation.0);
    assert!(!validation.1.valid);
    assert_eq!(
        validation.1.issues,
        vec!["Missing required output for contractRef=contract-1".to_string()]
    );

    let blocked_node = truth
        .events
        .iter()
        .find_map(|event| match &event.payload {
            EventPayload::NodeCreated {
                node_kind: NodeKind::BlockedAttempt,
                ..
            } => Some(event),
            _ => None,
        });
    assert!(blocked_node.is_some());
}

/// Never-stop autonomy records a critical gap instead of blocking.
#[test]
fn test_never_stop_records_gap() {
    let workflows = MapWorkflows::default()
        .with(workflow("wf-contract", vec![contracted_step("step-1", "contract-1")]));
    let h = harness_with_defaults(
        workflows,
        ScriptedValidation::default(),
        AdvanceDefaults {
            autonomy: AutonomyMode::FullAutoNeverStop,
            risk_policy: RiskPolicy::Conservative,
        },
    );

    let started = h.engine.start_workflow(&WorkflowId::new("wf-contract"), None).unwrap();
    let result = h
        .engine
        .continue_workflow(&ack_request(&started.tokens.ack_token, None))
        .unwrap();

    assert_eq!(result.outcome, ContinueOutcome::Advanced);
    assert!(result.is_complete);

    let truth = h.sessions.load_strict(&started.session_id).unwrap().unwrap();
    let gap = truth
        .events
        .iter()
        .find_map(|event| match &event.payload {
            EventPayload::GapRecorded {
                gap,
            } => Some(gap.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(gap.severity, GapSeverity::Critical);
    assert_eq!(gap.reason.category, "contract_violation");
    assert_eq!(gap.reason.detail, "missing_required_output");

    // The recap is still suppressed: no notes were submitted.
    let recap = truth
        .events
        .iter()
        .any(|event| matches!(event.payload, EventPayload::NodeOutputAppended { .. }));
    assert!(!recap);
}

/// Replaying the same ack token returns recorded facts with zero new events.
#[test]
fn test_idempotent_replay_returns_facts() {
    let workflows =
        MapWorkflows::default().with(workflow("wf-basic", vec![step("step-1"), step("step-2")]));
    let h = harness(workflows, ScriptedValidation::default());

    let started = h.engine.start_workflow(&WorkflowId::new("wf-basic"), None).unwrap();
    let first = h
        .engine
        .continue_workflow(&ack_request(&started.tokens.ack_token, Some("ok")))
        .unwrap();
    let count_after_first =
        h.sessions.load_strict(&started.session_id).unwrap().unwrap().events.len();

    let second = h
        .engine
        .continue_workflow(&ack_request(&started.tokens.ack_token, Some("ok")))
        .unwrap();
    let count_after_second =
        h.sessions.load_strict(&started.session_id).unwrap().unwrap().events.len();

    assert_eq!(second.outcome, ContinueOutcome::Replayed);
    assert_eq!(count_after_first, count_after_second);
    assert_eq!(first.node_id, second.node_id);
    assert_eq!(first.pending, second.pending);
}

/// Advancing from a non-tip node creates a fork edge.
#[test]
fn test_non_tip_advance_creates_fork() {
    let workflows = MapWorkflows::default()
        .with(workflow("wf-basic", vec![step("step-1"), step("step-2"), step("step-3")]));
    let h = harness(workflows, ScriptedValidation::default());

    let started = h.engine.start_workflow(&WorkflowId::new("wf-basic"), None).unwrap();
    h.engine
        .continue_workflow(&ack_request(&started.tokens.ack_token, Some("first")))
        .unwrap();

    // Rehydrate at the root via its state token; this mints a fresh ack.
    let rehydrated = h
        .engine
        .continue_workflow(&ContinueWorkflowRequest {
            state_token: Some(started.tokens.state_token.clone()),
            ..ContinueWorkflowRequest::default()
        })
        .unwrap();
    assert_eq!(rehydrated.outcome, ContinueOutcome::Rehydrated);
    assert_eq!(rehydrated.node_id, started.root_node_id);

    let forked = h
        .engine
        .continue_workflow(&ack_request(&rehydrated.tokens.ack_token, Some("again")))
        .unwrap();
    assert_eq!(forked.outcome, ContinueOutcome::Advanced);

    let truth = h.sessions.load_strict(&started.session_id).unwrap().unwrap();
    let causes: Vec<CauseKind> = truth
        .events
        .iter()
        .filter_map(|event| match &event.payload {
            EventPayload::EdgeCreated {
                cause,
                ..
            } => Some(cause.kind),
            _ => None,
        })
        .collect();
    assert_eq!(causes, vec![CauseKind::IntentionalFork, CauseKind::NonTipAdvance]);
}

/// Rehydration performs zero writes.
#[test]
fn test_rehydrate_is_pure() {
    let workflows =
        MapWorkflows::default().with(workflow("wf-basic", vec![step("step-1"), step("step-2")]));
    let h = harness(workflows, ScriptedValidation::default());

    let started = h.engine.start_workflow(&WorkflowId::new("wf-basic"), None).unwrap();
    let before = h.sessions.load_strict(&started.session_id).unwrap().unwrap();

    let result = h
        .engine
        .continue_workflow(&ContinueWorkflowRequest {
            session_id: Some(started.session_id.clone()),
            ..ContinueWorkflowRequest::default()
        })
        .unwrap();
    assert_eq!(result.outcome, ContinueOutcome::Rehydrated);
    assert_eq!(result.node_id, started.root_node_id);

    let after = h.sessions.load_strict(&started.session_id).unwrap().unwrap();
    assert_eq!(before.events.len(), after.events.len());
    assert_eq!(before.manifest.len(), after.manifest.len());
}

/// Checkpointing twice appends the checkpoint at most once.
#[test]
fn test_checkpoint_is_idempotent() {
    let workflows = MapWorkflows::default().with(workflow("wf-basic", vec![step("step-1")]));
    let h = harness(workflows, ScriptedValidation::default());

    let started = h.engine.start_workflow(&WorkflowId::new("wf-basic"), None).unwrap();
    let first = h.engine.checkpoint_workflow(&started.tokens.checkpoint_token).unwrap();
    let count_after_first =
        h.sessions.load_strict(&started.session_id).unwrap().unwrap().events.len();

    let second = h.engine.checkpoint_workflow(&started.tokens.checkpoint_token).unwrap();
    let count_after_second =
        h.sessions.load_strict(&started.session_id).unwrap().unwrap().events.len();

    assert_eq!(first.checkpoint_node_id, second.checkpoint_node_id);
    assert_eq!(count_after_first, count_after_second);
    assert_eq!(count_after_first, 5);
}

/// An oversized context fails the advance without any writes.
#[test]
fn test_context_budget_enforced() {
    let workflows = MapWorkflows::default().with(workflow("wf-basic", vec![step("step-1")]));
    let h = harness(workflows, ScriptedValidation::default());

    let started = h.engine.start_workflow(&WorkflowId::new("wf-basic"), None).unwrap();
    let before = h.sessions.load_strict(&started.session_id).unwrap().unwrap().events.len();

    let huge = json!({"blob": "x".repeat(waymark_core::MAX_CONTEXT_BYTES)});
    let result = h.engine.continue_workflow(&ContinueWorkflowRequest {
        ack_token: Some(started.tokens.ack_token.clone()),
        advance: AdvanceRequest {
            context: Some(huge),
            notes_markdown: Some("ok".to_string()),
            ..AdvanceRequest::default()
        },
        ..ContinueWorkflowRequest::default()
    });
    assert!(matches!(
        result,
        Err(EngineError::Advance(waymark_core::AdvanceError::ApplyFailed { .. }))
    ));

    let after = h.sessions.load_strict(&started.session_id).unwrap().unwrap().events.len();
    assert_eq!(before, after);
}

/// A timed-out validation engine surfaces as an apply failure with no writes.
#[test]
fn test_validation_timeout_fails_closed() {
    let mut spec = common::step_spec("step-1");
    spec.validation_criteria = Some(waymark_core::ValidationCriteria {
        criteria_ref: "criteria-1".to_string(),
        spec: json!({}),
    });
    let workflows = MapWorkflows::default()
        .with(workflow("wf-validate", vec![waymark_core::StepNode::Step(spec)]));
    let h = harness(
        workflows,
        ScriptedValidation {
            timeout: true,
            ..ScriptedValidation::default()
        },
    );

    let started = h.engine.start_workflow(&WorkflowId::new("wf-validate"), None).unwrap();
    let before = h.sessions.load_strict(&started.session_id).unwrap().unwrap().events.len();
    let result = h
        .engine
        .continue_workflow(&ack_request(&started.tokens.ack_token, Some("notes")));
    assert!(matches!(
        result,
        Err(EngineError::Advance(waymark_core::AdvanceError::ApplyFailed { .. }))
    ));
    let after = h.sessions.load_strict(&started.session_id).unwrap().unwrap().events.len();
    assert_eq!(before, after);
}

/// A retry after a blocked attempt succeeds and emits the validation record.
#[test]
fn test_retry_after_block_succeeds() {
    let workflows = MapWorkflows::default()
        .with(workflow("wf-contract", vec![contracted_step("step-1", "contract-1")]));
    let h = harness(workflows, ScriptedValidation::default());

    let started = h.engine.start_workflow(&WorkflowId::new("wf-contract"), None).unwrap();
    let blocked = h
        .engine
        .continue_workflow(&ack_request(&started.tokens.ack_token, None))
        .unwrap();
    assert_eq!(blocked.outcome, ContinueOutcome::Blocked);

    // Retrying from the blocked node with notes satisfies the contract.
    let retried = h
        .engine
        .continue_workflow(&ack_request(&blocked.tokens.ack_token, Some("done")))
        .unwrap();
    assert_eq!(retried.outcome, ContinueOutcome::Advanced);
    assert!(retried.is_complete);

    let truth = h.sessions.load_strict(&started.session_id).unwrap().unwrap();
    // Retry success emits a validation record on the success path.
    let validations = truth
        .events
        .iter()
        .filter(|event| matches!(event.payload, EventPayload::ValidationPerformed { .. }))
        .count();
    assert_eq!(validations, 2);

    // The retry's node kind is a step node.
    let kinds: Vec<NodeKind> = truth
        .events
        .iter()
        .filter_map(|event| match &event.payload {
            EventPayload::NodeCreated {
                node_kind,
                ..
            } => Some(*node_kind),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, vec![NodeKind::Root, NodeKind::BlockedAttempt, NodeKind::Step]);
}
