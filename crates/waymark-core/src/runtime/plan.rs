// waymark-core/src/runtime/plan.rs
// ============================================================================
// Module: Waymark Append Plan Builders
// Description: Deterministic assembly of the event sets one advance commits.
// Purpose: Produce fully validated append plans before any I/O happens.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Plan builders take pre-minted identifiers and already-built payloads and
//! compose them into an [`AppendPlan`] with final event indices, scopes, and
//! dedupe keys. Every invariant is checked here, purely, before the plan is
//! handed to a session store: event-count agreement, pin coverage, and the
//! fixed event order `advance_recorded → extras → node_created →
//! edge_created → node_output_appended*` (with leading events, such as the
//! blocked-path validation record, ahead of the advance).

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::AdvanceOutcome;
use crate::core::AppendPlan;
use crate::core::AttemptId;
use crate::core::CauseKind;
use crate::core::DomainEvent;
use crate::core::EVENT_SCHEMA_VERSION;
use crate::core::EdgeCause;
use crate::core::EdgeKind;
use crate::core::EventId;
use crate::core::EventPayload;
use crate::core::EventScope;
use crate::core::NodeId;
use crate::core::NodeKind;
use crate::core::OutputChannel;
use crate::core::OutputId;
use crate::core::OutputPayload;
use crate::core::RunId;
use crate::core::SessionId;
use crate::core::SnapshotPin;
use crate::core::SnapshotRef;
use crate::core::WorkflowHash;
use crate::core::WorkflowId;
use crate::core::advance_recorded_dedupe_key;
use crate::core::context_set_dedupe_key;
use crate::core::edge_created_dedupe_key;
use crate::core::node_created_dedupe_key;
use crate::core::node_output_dedupe_key;
use crate::core::run_started_dedupe_key;
use crate::core::session_created_dedupe_key;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while composing an append plan.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    /// A pure plan invariant was violated.
    #[error("append plan invariant violation: {detail}")]
    InvariantViolation {
        /// Invariant description.
        detail: String,
    },
}

// ============================================================================
// SECTION: Plan Inputs
// ============================================================================

/// Event minted by the advance core ahead of plan assembly.
///
/// Extras never carry an event index or session id; the builder assigns both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraEvent {
    /// Pre-minted event identifier.
    pub event_id: EventId,
    /// Deterministic dedupe key.
    pub dedupe_key: String,
    /// Run/node scope.
    pub scope: EventScope,
    /// Kind-specific payload.
    pub payload: EventPayload,
}

/// Normalized output ready to append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedOutput {
    /// Output identifier.
    pub output_id: OutputId,
    /// Output channel.
    pub channel: OutputChannel,
    /// Output payload.
    pub payload: OutputPayload,
}

/// Event identifiers minted for one advance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintedAdvanceIds {
    /// Identifier for the `advance_recorded` event.
    pub advance_event_id: EventId,
    /// Identifier for the `node_created` event.
    pub node_created_event_id: EventId,
    /// Identifier for the `edge_created` event.
    pub edge_created_event_id: EventId,
    /// Identifiers for the `node_output_appended` events, in output order.
    pub output_event_ids: Vec<EventId>,
}

/// Inputs for one acked advance append plan (success or blocked attempt).
#[derive(Debug, Clone)]
pub struct AckAdvancePlanInputs {
    /// Session the plan appends to.
    pub session_id: SessionId,
    /// Run the advance belongs to.
    pub run_id: RunId,
    /// Node the advance starts from.
    pub from_node_id: NodeId,
    /// Attempt consumed by the advance.
    pub attempt_id: AttemptId,
    /// Index the first plan event must land at.
    pub expected_first_event_index: u64,
    /// Node the advance produces.
    pub to_node_id: NodeId,
    /// Kind of the produced node.
    pub node_kind: NodeKind,
    /// Attempt bound to the produced node.
    pub to_attempt_id: AttemptId,
    /// Snapshot reference of the produced node.
    pub snapshot_ref: SnapshotRef,
    /// Cause of the produced edge.
    pub cause_kind: CauseKind,
    /// Pre-minted event identifiers.
    pub minted: MintedAdvanceIds,
    /// Events appended before the advance record (blocked-path validation).
    pub leading_events: Vec<ExtraEvent>,
    /// Events appended between the advance record and the node creation.
    pub extra_events: Vec<ExtraEvent>,
    /// Normalized outputs to append after the edge.
    pub outputs: Vec<NormalizedOutput>,
}

// ============================================================================
// SECTION: Advance Plan Builder
// ============================================================================

/// Composes the append plan for one acked advance.
///
/// # Errors
///
/// Returns [`PlanError::InvariantViolation`] when minted identifiers and
/// outputs disagree or the composed plan fails validation.
pub fn build_ack_advance_append_plan(
    inputs: AckAdvancePlanInputs,
) -> Result<AppendPlan, PlanError> {
    if inputs.minted.output_event_ids.len() != inputs.outputs.len() {
        return Err(PlanError::InvariantViolation {
            detail: format!(
                "minted {} output event ids for {} outputs",
                inputs.minted.output_event_ids.len(),
                inputs.outputs.len()
            ),
        });
    }

    let mut events = Vec::new();
    let mut index = inputs.expected_first_event_index;

    for leading in &inputs.leading_events {
        events.push(materialize_extra(&inputs.session_id, index, leading));
        index += 1;
    }

    events.push(DomainEvent {
        v: EVENT_SCHEMA_VERSION,
        event_id: inputs.minted.advance_event_id.clone(),
        event_index: index,
        session_id: inputs.session_id.clone(),
        dedupe_key: advance_recorded_dedupe_key(
            &inputs.session_id,
            &inputs.from_node_id,
            &inputs.attempt_id,
        ),
        scope: EventScope {
            run_id: Some(inputs.run_id.clone()),
            node_id: Some(inputs.from_node_id.clone()),
        },
        payload: EventPayload::AdvanceRecorded {
            from_node_id: inputs.from_node_id.clone(),
            attempt_id: inputs.attempt_id.clone(),
            outcome: AdvanceOutcome::Advanced {
                to_node_id: inputs.to_node_id.clone(),
            },
        },
    });
    index += 1;

    for extra in &inputs.extra_events {
        events.push(materialize_extra(&inputs.session_id, index, extra));
        index += 1;
    }

    let node_created_index = index;
    events.push(DomainEvent {
        v: EVENT_SCHEMA_VERSION,
        event_id: inputs.minted.node_created_event_id.clone(),
        event_index: index,
        session_id: inputs.session_id.clone(),
        dedupe_key: node_created_dedupe_key(&inputs.session_id, &inputs.run_id, &inputs.to_node_id),
        scope: EventScope {
            run_id: Some(inputs.run_id.clone()),
            node_id: Some(inputs.to_node_id.clone()),
        },
        payload: EventPayload::NodeCreated {
            node_kind: inputs.node_kind,
            parent_node_id: Some(inputs.from_node_id.clone()),
            snapshot_ref: inputs.snapshot_ref.clone(),
            attempt_id: inputs.to_attempt_id.clone(),
        },
    });
    index += 1;

    events.push(DomainEvent {
        v: EVENT_SCHEMA_VERSION,
        event_id: inputs.minted.edge_created_event_id.clone(),
        event_index: index,
        session_id: inputs.session_id.clone(),
        dedupe_key: edge_created_dedupe_key(
            &inputs.session_id,
            &inputs.run_id,
            &inputs.from_node_id,
            &inputs.to_node_id,
            EdgeKind::AckedStep,
        ),
        scope: EventScope {
            run_id: Some(inputs.run_id.clone()),
            node_id: Some(inputs.to_node_id.clone()),
        },
        payload: EventPayload::EdgeCreated {
            from_node_id: inputs.from_node_id.clone(),
            to_node_id: inputs.to_node_id.clone(),
            edge_kind: EdgeKind::AckedStep,
            cause: EdgeCause {
                kind: inputs.cause_kind,
            },
        },
    });
    index += 1;

    for (output, event_id) in inputs.outputs.iter().zip(&inputs.minted.output_event_ids) {
        events.push(DomainEvent {
            v: EVENT_SCHEMA_VERSION,
            event_id: event_id.clone(),
            event_index: index,
            session_id: inputs.session_id.clone(),
            dedupe_key: node_output_dedupe_key(&inputs.session_id, &output.output_id),
            scope: EventScope {
                run_id: Some(inputs.run_id.clone()),
                node_id: Some(inputs.to_node_id.clone()),
            },
            payload: EventPayload::NodeOutputAppended {
                output_id: output.output_id.clone(),
                channel: output.channel,
                payload: output.payload.clone(),
            },
        });
        index += 1;
    }

    let plan = AppendPlan {
        session_id: inputs.session_id,
        expected_first_event_index: inputs.expected_first_event_index,
        events,
        snapshot_pins: vec![SnapshotPin {
            snapshot_ref: inputs.snapshot_ref,
            event_index: node_created_index,
            created_by_event_id: inputs.minted.node_created_event_id,
        }],
    };
    plan.validate().map_err(|detail| PlanError::InvariantViolation {
        detail,
    })?;
    Ok(plan)
}

/// Assigns the session id and final index to an extra event.
fn materialize_extra(session_id: &SessionId, index: u64, extra: &ExtraEvent) -> DomainEvent {
    DomainEvent {
        v: EVENT_SCHEMA_VERSION,
        event_id: extra.event_id.clone(),
        event_index: index,
        session_id: session_id.clone(),
        dedupe_key: extra.dedupe_key.clone(),
        scope: extra.scope.clone(),
        payload: extra.payload.clone(),
    }
}

// ============================================================================
// SECTION: Session Start Plan
// ============================================================================

/// Inputs for the session start append plan.
#[derive(Debug, Clone)]
pub struct StartPlanInputs {
    /// New session identifier.
    pub session_id: SessionId,
    /// New run identifier.
    pub run_id: RunId,
    /// Workflow being started.
    pub workflow_id: WorkflowId,
    /// Pinned workflow hash.
    pub workflow_hash: WorkflowHash,
    /// Root node identifier.
    pub root_node_id: NodeId,
    /// Root attempt identifier.
    pub root_attempt_id: AttemptId,
    /// Snapshot reference of the root node.
    pub snapshot_ref: SnapshotRef,
    /// Creation time in milliseconds since the epoch.
    pub created_at_ms: u64,
    /// Identifier for the `session_created` event.
    pub session_event_id: EventId,
    /// Identifier for the `run_started` event.
    pub run_event_id: EventId,
    /// Identifier for the root `node_created` event.
    pub node_event_id: EventId,
    /// Initial context to record, with its pre-minted event identifier.
    pub initial_context: Option<(EventId, serde_json::Map<String, serde_json::Value>)>,
}

/// Composes the append plan recording session creation and the root node.
///
/// # Errors
///
/// Returns [`PlanError::InvariantViolation`] when the composed plan fails
/// validation.
pub fn build_session_start_plan(inputs: StartPlanInputs) -> Result<AppendPlan, PlanError> {
    let mut events = vec![
        DomainEvent {
            v: EVENT_SCHEMA_VERSION,
            event_id: inputs.session_event_id,
            event_index: 0,
            session_id: inputs.session_id.clone(),
            dedupe_key: session_created_dedupe_key(&inputs.session_id),
            scope: EventScope::default(),
            payload: EventPayload::SessionCreated {
                created_at_ms: inputs.created_at_ms,
            },
        },
        DomainEvent {
            v: EVENT_SCHEMA_VERSION,
            event_id: inputs.run_event_id,
            event_index: 1,
            session_id: inputs.session_id.clone(),
            dedupe_key: run_started_dedupe_key(&inputs.session_id, &inputs.run_id),
            scope: EventScope {
                run_id: Some(inputs.run_id.clone()),
                node_id: None,
            },
            payload: EventPayload::RunStarted {
                workflow_id: inputs.workflow_id,
                workflow_hash: inputs.workflow_hash,
                started_at_ms: inputs.created_at_ms,
            },
        },
        DomainEvent {
            v: EVENT_SCHEMA_VERSION,
            event_id: inputs.node_event_id.clone(),
            event_index: 2,
            session_id: inputs.session_id.clone(),
            dedupe_key: node_created_dedupe_key(
                &inputs.session_id,
                &inputs.run_id,
                &inputs.root_node_id,
            ),
            scope: EventScope {
                run_id: Some(inputs.run_id.clone()),
                node_id: Some(inputs.root_node_id),
            },
            payload: EventPayload::NodeCreated {
                node_kind: NodeKind::Root,
                parent_node_id: None,
                snapshot_ref: inputs.snapshot_ref.clone(),
                attempt_id: inputs.root_attempt_id,
            },
        },
    ];

    if let Some((context_event_id, context)) = inputs.initial_context {
        let dedupe_key = context_set_dedupe_key(&inputs.session_id, &context_event_id);
        events.push(DomainEvent {
            v: EVENT_SCHEMA_VERSION,
            event_id: context_event_id,
            event_index: 3,
            session_id: inputs.session_id.clone(),
            dedupe_key,
            scope: EventScope {
                run_id: Some(inputs.run_id),
                node_id: None,
            },
            payload: EventPayload::ContextSet {
                context,
                applied_at_ms: inputs.created_at_ms,
            },
        });
    }

    let plan = AppendPlan {
        session_id: inputs.session_id,
        expected_first_event_index: 0,
        events,
        snapshot_pins: vec![SnapshotPin {
            snapshot_ref: inputs.snapshot_ref,
            event_index: 2,
            created_by_event_id: inputs.node_event_id,
        }],
    };
    plan.validate().map_err(|detail| PlanError::InvariantViolation {
        detail,
    })?;
    Ok(plan)
}

// ============================================================================
// SECTION: Checkpoint Plan
// ============================================================================

/// Inputs for a checkpoint append plan.
#[derive(Debug, Clone)]
pub struct CheckpointPlanInputs {
    /// Session the plan appends to.
    pub session_id: SessionId,
    /// Run the checkpoint belongs to.
    pub run_id: RunId,
    /// Node being checkpointed.
    pub source_node_id: NodeId,
    /// Attempt bound to the source node.
    pub attempt_id: AttemptId,
    /// Deterministic checkpoint node identifier.
    pub checkpoint_node_id: NodeId,
    /// Snapshot reference shared with the source node.
    pub snapshot_ref: SnapshotRef,
    /// Index the first plan event must land at.
    pub expected_first_event_index: u64,
    /// Identifier for the checkpoint `node_created` event.
    pub node_event_id: EventId,
    /// Identifier for the checkpoint `edge_created` event.
    pub edge_event_id: EventId,
}

/// Composes the idempotent checkpoint append plan.
///
/// # Errors
///
/// Returns [`PlanError::InvariantViolation`] when the composed plan fails
/// validation.
pub fn build_checkpoint_append_plan(inputs: CheckpointPlanInputs) -> Result<AppendPlan, PlanError> {
    let node_index = inputs.expected_first_event_index;
    let events = vec![
        DomainEvent {
            v: EVENT_SCHEMA_VERSION,
            event_id: inputs.node_event_id.clone(),
            event_index: node_index,
            session_id: inputs.session_id.clone(),
            dedupe_key: node_created_dedupe_key(
                &inputs.session_id,
                &inputs.run_id,
                &inputs.checkpoint_node_id,
            ),
            scope: EventScope {
                run_id: Some(inputs.run_id.clone()),
                node_id: Some(inputs.checkpoint_node_id.clone()),
            },
            payload: EventPayload::NodeCreated {
                node_kind: NodeKind::Checkpoint,
                parent_node_id: Some(inputs.source_node_id.clone()),
                snapshot_ref: inputs.snapshot_ref.clone(),
                attempt_id: inputs.attempt_id,
            },
        },
        DomainEvent {
            v: EVENT_SCHEMA_VERSION,
            event_id: inputs.edge_event_id,
            event_index: node_index + 1,
            session_id: inputs.session_id.clone(),
            dedupe_key: edge_created_dedupe_key(
                &inputs.session_id,
                &inputs.run_id,
                &inputs.source_node_id,
                &inputs.checkpoint_node_id,
                EdgeKind::Checkpoint,
            ),
            scope: EventScope {
                run_id: Some(inputs.run_id),
                node_id: Some(inputs.checkpoint_node_id.clone()),
            },
            payload: EventPayload::EdgeCreated {
                from_node_id: inputs.source_node_id,
                to_node_id: inputs.checkpoint_node_id,
                edge_kind: EdgeKind::Checkpoint,
                cause: EdgeCause {
                    kind: CauseKind::CheckpointCreated,
                },
            },
        },
    ];

    let plan = AppendPlan {
        session_id: inputs.session_id,
        expected_first_event_index: inputs.expected_first_event_index,
        events,
        snapshot_pins: vec![SnapshotPin {
            snapshot_ref: inputs.snapshot_ref,
            event_index: node_index,
            created_by_event_id: inputs.node_event_id,
        }],
    };
    plan.validate().map_err(|detail| PlanError::InvariantViolation {
        detail,
    })?;
    Ok(plan)
}
