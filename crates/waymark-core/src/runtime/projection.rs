// waymark-core/src/runtime/projection.rs
// ============================================================================
// Module: Waymark Projections
// Description: Pure, replayable derivations over a session's event prefix.
// Purpose: Materialize the per-run DAG, outputs, gaps, and tip selection.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Projections are pure functions of the event log prefix: rerunning them on
//! the same events yields the same maps. The DAG is materialized into lookup
//! tables keyed by opaque ids; nothing owns anything cyclically. The
//! preferred tip is ranked by recorded activity (event index) and then
//! lexical node id, never by wall-clock time.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use crate::core::AdvanceOutcome;
use crate::core::AttemptId;
use crate::core::CauseKind;
use crate::core::DomainEvent;
use crate::core::EdgeKind;
use crate::core::EventPayload;
use crate::core::GapV1;
use crate::core::NodeId;
use crate::core::NodeKind;
use crate::core::OutputChannel;
use crate::core::OutputId;
use crate::core::RunId;
use crate::core::SnapshotRef;

// ============================================================================
// SECTION: DAG Projection
// ============================================================================

/// Materialized node of the per-run DAG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// Node identifier.
    pub node_id: NodeId,
    /// Node kind.
    pub node_kind: NodeKind,
    /// Parent node; absent only for the root.
    pub parent_node_id: Option<NodeId>,
    /// Snapshot the node references.
    pub snapshot_ref: SnapshotRef,
    /// Attempt bound to the node.
    pub attempt_id: AttemptId,
    /// Index of the `node_created` event.
    pub created_event_index: u64,
}

/// Materialized edge of the per-run DAG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeInfo {
    /// Source node.
    pub from_node_id: NodeId,
    /// Target node.
    pub to_node_id: NodeId,
    /// Edge kind.
    pub edge_kind: EdgeKind,
    /// Why the edge exists.
    pub cause_kind: CauseKind,
    /// Index of the `edge_created` event.
    pub event_index: u64,
}

/// Materialized per-run DAG with activity ranking.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunDag {
    /// Nodes keyed by id.
    pub nodes: BTreeMap<NodeId, NodeInfo>,
    /// Edges in creation order.
    pub edges: Vec<EdgeInfo>,
    /// Highest event index touching each node.
    pub activity: BTreeMap<NodeId, u64>,
}

impl RunDag {
    /// Returns true when the node has an outgoing acked-step edge.
    #[must_use]
    pub fn has_outgoing_acked_edge(&self, node_id: &NodeId) -> bool {
        self.edges.iter().any(|edge| {
            edge.from_node_id == *node_id && edge.edge_kind == EdgeKind::AckedStep
        })
    }

    /// Returns the deterministically preferred tip of the run.
    ///
    /// Candidates are non-checkpoint nodes without an outgoing acked-step
    /// edge, ranked by most recent activity first and lexical node id as the
    /// tiebreak.
    #[must_use]
    pub fn preferred_tip(&self) -> Option<&NodeId> {
        self.nodes
            .values()
            .filter(|node| {
                node.node_kind != NodeKind::Checkpoint
                    && !self.has_outgoing_acked_edge(&node.node_id)
            })
            .map(|node| {
                let activity = self.activity.get(&node.node_id).copied().unwrap_or(0);
                (activity, &node.node_id)
            })
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(a.1)))
            .map(|(_, node_id)| node_id)
    }
}

/// Projects the DAG for one run from the event prefix.
#[must_use]
pub fn project_run_dag(events: &[DomainEvent], run_id: &RunId) -> RunDag {
    let mut dag = RunDag::default();
    for event in events {
        if event.scope.run_id.as_ref() != Some(run_id) {
            continue;
        }
        match &event.payload {
            EventPayload::NodeCreated {
                node_kind,
                parent_node_id,
                snapshot_ref,
                attempt_id,
            } => {
                if let Some(node_id) = &event.scope.node_id {
                    dag.nodes.insert(
                        node_id.clone(),
                        NodeInfo {
                            node_id: node_id.clone(),
                            node_kind: *node_kind,
                            parent_node_id: parent_node_id.clone(),
                            snapshot_ref: snapshot_ref.clone(),
                            attempt_id: attempt_id.clone(),
                            created_event_index: event.event_index,
                        },
                    );
                }
            }
            EventPayload::EdgeCreated {
                from_node_id,
                to_node_id,
                edge_kind,
                cause,
            } => {
                dag.edges.push(EdgeInfo {
                    from_node_id: from_node_id.clone(),
                    to_node_id: to_node_id.clone(),
                    edge_kind: *edge_kind,
                    cause_kind: cause.kind,
                    event_index: event.event_index,
                });
                bump_activity(&mut dag.activity, from_node_id, event.event_index);
                bump_activity(&mut dag.activity, to_node_id, event.event_index);
            }
            _ => {}
        }
        if let Some(node_id) = &event.scope.node_id {
            bump_activity(&mut dag.activity, node_id, event.event_index);
        }
    }
    dag
}

/// Raises a node's recorded activity to at least the given index.
fn bump_activity(activity: &mut BTreeMap<NodeId, u64>, node_id: &NodeId, index: u64) {
    let entry = activity.entry(node_id.clone()).or_insert(index);
    if *entry < index {
        *entry = index;
    }
}

// ============================================================================
// SECTION: Run and Advance Lookups
// ============================================================================

/// Returns run ids in start order.
#[must_use]
pub fn run_ids(events: &[DomainEvent]) -> Vec<RunId> {
    let mut runs = Vec::new();
    for event in events {
        if matches!(event.payload, EventPayload::RunStarted { .. }) {
            if let Some(run_id) = &event.scope.run_id {
                runs.push(run_id.clone());
            }
        }
    }
    runs
}

/// Returns the attempts recorded by advances from a node, in event order.
#[must_use]
pub fn advance_attempts_from(events: &[DomainEvent], node_id: &NodeId) -> Vec<AttemptId> {
    events
        .iter()
        .filter_map(|event| match &event.payload {
            EventPayload::AdvanceRecorded {
                from_node_id,
                attempt_id,
                ..
            } if from_node_id == node_id => Some(attempt_id.clone()),
            _ => None,
        })
        .collect()
}

/// Returns the advance recorded from a node with a given attempt, if any.
#[must_use]
pub fn find_recorded_advance<'a>(
    events: &'a [DomainEvent],
    node_id: &NodeId,
    attempt_id: &AttemptId,
) -> Option<(&'a DomainEvent, &'a NodeId)> {
    events.iter().find_map(|event| match &event.payload {
        EventPayload::AdvanceRecorded {
            from_node_id,
            attempt_id: recorded,
            outcome: AdvanceOutcome::Advanced {
                to_node_id,
            },
        } if from_node_id == node_id && recorded == attempt_id => Some((event, to_node_id)),
        _ => None,
    })
}

// ============================================================================
// SECTION: Stored Context
// ============================================================================

/// Folds `context_set` events into the stored context for a run.
///
/// Entries apply in event order; `null` values are tombstones that delete
/// the key, mirroring the merge semantics at the advance boundary.
#[must_use]
pub fn stored_context(
    events: &[DomainEvent],
    run_id: &RunId,
) -> serde_json::Map<String, serde_json::Value> {
    let mut context = serde_json::Map::new();
    for event in events {
        if event.scope.run_id.as_ref() != Some(run_id) {
            continue;
        }
        if let EventPayload::ContextSet {
            context: entries,
            ..
        } = &event.payload
        {
            for (key, value) in entries {
                if value.is_null() {
                    context.remove(key);
                } else {
                    context.insert(key.clone(), value.clone());
                }
            }
        }
    }
    context
}

// ============================================================================
// SECTION: Outputs and Gaps
// ============================================================================

/// One recorded output with its node scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRecord {
    /// Node the output attaches to.
    pub node_id: Option<NodeId>,
    /// Output identifier.
    pub output_id: OutputId,
    /// Output channel.
    pub channel: OutputChannel,
    /// Index of the recording event.
    pub event_index: u64,
}

/// Projects recorded outputs from the event prefix.
#[must_use]
pub fn recorded_outputs(events: &[DomainEvent]) -> Vec<OutputRecord> {
    events
        .iter()
        .filter_map(|event| match &event.payload {
            EventPayload::NodeOutputAppended {
                output_id,
                channel,
                ..
            } => Some(OutputRecord {
                node_id: event.scope.node_id.clone(),
                output_id: output_id.clone(),
                channel: *channel,
                event_index: event.event_index,
            }),
            _ => None,
        })
        .collect()
}

/// Projects recorded gaps from the event prefix.
#[must_use]
pub fn recorded_gaps(events: &[DomainEvent]) -> Vec<GapV1> {
    events
        .iter()
        .filter_map(|event| match &event.payload {
            EventPayload::GapRecorded {
                gap,
            } => Some(gap.clone()),
            _ => None,
        })
        .collect()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
