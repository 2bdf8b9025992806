// waymark-core/src/core/event.rs
// ============================================================================
// Module: Waymark Domain Events
// Description: Append-only domain event records and dedupe-key recipes.
// Purpose: Define the closed event vocabulary that is the durable truth.
// Dependencies: serde, crate::core::{hashing, identifiers, reason, trace, workflow}
// ============================================================================

//! ## Overview
//! Every durable fact in a session is one immutable event. Events carry a
//! contiguous per-session index, a deterministic dedupe key, and a closed
//! kind with a kind-specific payload. The dedupe-key recipes are bit-exact:
//! they are what makes replays idempotent and partial replays detectable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::core::hashing::ContentDigest;
use crate::core::hashing::SnapshotRef;
use crate::core::hashing::WorkflowHash;
use crate::core::identifiers::AttemptId;
use crate::core::identifiers::EventId;
use crate::core::identifiers::GapId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::ObservationId;
use crate::core::identifiers::OutputId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::SessionId;
use crate::core::identifiers::TraceId;
use crate::core::identifiers::WorkflowId;
use crate::core::reason::GapV1;
use crate::core::trace::TraceEntry;
use crate::core::workflow::ValidationResult;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Schema version accepted for domain events.
pub const EVENT_SCHEMA_VERSION: u32 = 1;

// ============================================================================
// SECTION: Graph Vocabulary
// ============================================================================

/// Kind of a DAG node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Root node created at run start.
    Root,
    /// Node produced by a fresh advance.
    Default,
    /// Node produced by a successful retry advance.
    Step,
    /// Node recording a blocked attempt.
    BlockedAttempt,
    /// Checkpoint node.
    Checkpoint,
}

/// Kind of a DAG edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Edge created by an acknowledged advance.
    AckedStep,
    /// Edge created by a checkpoint.
    Checkpoint,
}

impl EdgeKind {
    /// Returns the stable label used in dedupe keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AckedStep => "acked_step",
            Self::Checkpoint => "checkpoint",
        }
    }
}

/// Why an edge exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CauseKind {
    /// First advance off a tip node.
    IntentionalFork,
    /// Advance off a node that already had an outgoing edge.
    NonTipAdvance,
    /// Edge re-observed through an idempotent replay.
    IdempotentReplay,
    /// Edge created by a checkpoint.
    CheckpointCreated,
}

/// Cause record attached to an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeCause {
    /// Cause kind.
    pub kind: CauseKind,
}

/// Outcome recorded for an advance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    /// The advance produced a new node (success or blocked attempt).
    Advanced {
        /// Node the advance produced.
        to_node_id: NodeId,
    },
}

// ============================================================================
// SECTION: Node Outputs
// ============================================================================

/// Channel an output was appended on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputChannel {
    /// Recap notes for the completed step.
    Recap,
    /// Structured artifact submitted with the step.
    Artifact,
}

/// Payload of an appended node output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum OutputPayload {
    /// Markdown recap notes.
    NotesV1 {
        /// Notes body.
        notes_markdown: String,
    },
    /// Canonicalized JSON artifact with its content address.
    ArtifactJsonV1 {
        /// Digest over the artifact's canonical bytes.
        sha256: ContentDigest,
        /// Content type; always `application/json`.
        content_type: String,
        /// Canonical byte length.
        byte_length: u64,
        /// Artifact content.
        content: Value,
    },
}

// ============================================================================
// SECTION: Event Payloads
// ============================================================================

/// Kind-specific payload of a domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    /// Session came into existence.
    SessionCreated {
        /// Creation time in milliseconds since the epoch.
        created_at_ms: u64,
    },
    /// A workflow run started inside the session.
    RunStarted {
        /// Workflow identifier.
        workflow_id: WorkflowId,
        /// Pinned workflow hash.
        workflow_hash: WorkflowHash,
        /// Start time in milliseconds since the epoch.
        started_at_ms: u64,
    },
    /// A DAG node was created.
    NodeCreated {
        /// Node kind.
        node_kind: NodeKind,
        /// Parent node; absent only for the root.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_node_id: Option<NodeId>,
        /// Snapshot the node references.
        snapshot_ref: SnapshotRef,
        /// Attempt bound to the node.
        attempt_id: AttemptId,
    },
    /// A DAG edge was created.
    EdgeCreated {
        /// Source node.
        from_node_id: NodeId,
        /// Target node.
        to_node_id: NodeId,
        /// Edge kind.
        edge_kind: EdgeKind,
        /// Why the edge exists.
        cause: EdgeCause,
    },
    /// An advance was recorded.
    AdvanceRecorded {
        /// Node the advance started from.
        from_node_id: NodeId,
        /// Attempt consumed by the advance.
        attempt_id: AttemptId,
        /// Advance outcome.
        outcome: AdvanceOutcome,
    },
    /// An output was appended to a node.
    NodeOutputAppended {
        /// Output identifier.
        output_id: OutputId,
        /// Output channel.
        channel: OutputChannel,
        /// Output payload.
        payload: OutputPayload,
    },
    /// Context entries were applied.
    ContextSet {
        /// Context object as submitted (tombstones included).
        context: Map<String, Value>,
        /// Application time in milliseconds since the epoch.
        applied_at_ms: u64,
    },
    /// A validation result was recorded for an attempt.
    ValidationPerformed {
        /// Attempt the validation belongs to.
        attempt_id: AttemptId,
        /// Whether the validation engine actually ran.
        engine_ran: bool,
        /// Validation result (synthetic when the engine did not run).
        result: ValidationResult,
    },
    /// A gap was recorded instead of blocking.
    GapRecorded {
        /// Gap record.
        gap: GapV1,
    },
    /// A decision trace was appended.
    DecisionTraceAppended {
        /// Trace identifier.
        trace_id: TraceId,
        /// Budgeted trace entries.
        entries: Vec<TraceEntry>,
    },
    /// A free-form observation was recorded.
    ObservationRecorded {
        /// Observation identifier.
        observation_id: ObservationId,
        /// Observation body.
        body_markdown: String,
        /// Recording time in milliseconds since the epoch.
        recorded_at_ms: u64,
    },
}

impl EventPayload {
    /// Returns the stable kind label for the payload.
    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self {
            Self::SessionCreated { .. } => "session_created",
            Self::RunStarted { .. } => "run_started",
            Self::NodeCreated { .. } => "node_created",
            Self::EdgeCreated { .. } => "edge_created",
            Self::AdvanceRecorded { .. } => "advance_recorded",
            Self::NodeOutputAppended { .. } => "node_output_appended",
            Self::ContextSet { .. } => "context_set",
            Self::ValidationPerformed { .. } => "validation_performed",
            Self::GapRecorded { .. } => "gap_recorded",
            Self::DecisionTraceAppended { .. } => "decision_trace_appended",
            Self::ObservationRecorded { .. } => "observation_recorded",
        }
    }
}

// ============================================================================
// SECTION: Domain Event
// ============================================================================

/// Scope an event applies to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventScope {
    /// Run the event belongs to, when scoped to a run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    /// Node the event belongs to, when scoped to a node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
}

/// One immutable, append-only domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Schema version; always [`EVENT_SCHEMA_VERSION`].
    pub v: u32,
    /// Unique event identifier.
    pub event_id: EventId,
    /// Monotonic, contiguous per-session index starting at 0.
    pub event_index: u64,
    /// Session the event belongs to.
    pub session_id: SessionId,
    /// Deterministic dedupe key (recipe per kind).
    pub dedupe_key: String,
    /// Run/node scope.
    #[serde(default, skip_serializing_if = "scope_is_empty")]
    pub scope: EventScope,
    /// Kind and payload.
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Returns true when the scope carries neither a run nor a node.
fn scope_is_empty(scope: &EventScope) -> bool {
    scope.run_id.is_none() && scope.node_id.is_none()
}

impl DomainEvent {
    /// Validates schema version, identifiers, and dedupe-key presence.
    ///
    /// # Errors
    ///
    /// Returns [`EventError`] when the event is malformed.
    pub fn validate(&self) -> Result<(), EventError> {
        if self.v != EVENT_SCHEMA_VERSION {
            return Err(EventError::UnsupportedVersion {
                version: self.v,
            });
        }
        self.event_id.validate().map_err(|_| EventError::MalformedIdentifier {
            field: "event_id",
        })?;
        self.session_id.validate().map_err(|_| EventError::MalformedIdentifier {
            field: "session_id",
        })?;
        if self.dedupe_key.is_empty() {
            return Err(EventError::EmptyDedupeKey);
        }
        if let Some(run_id) = &self.scope.run_id {
            run_id.validate().map_err(|_| EventError::MalformedIdentifier {
                field: "scope.run_id",
            })?;
        }
        if let Some(node_id) = &self.scope.node_id {
            node_id.validate().map_err(|_| EventError::MalformedIdentifier {
                field: "scope.node_id",
            })?;
        }
        Ok(())
    }

    /// Returns the snapshot reference introduced by this event, if any.
    #[must_use]
    pub const fn introduced_snapshot_ref(&self) -> Option<&SnapshotRef> {
        match &self.payload {
            EventPayload::NodeCreated {
                snapshot_ref,
                ..
            } => Some(snapshot_ref),
            _ => None,
        }
    }
}

/// Errors raised when validating a single event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    /// Schema version is not supported.
    #[error("unsupported event schema version {version}")]
    UnsupportedVersion {
        /// Rejected version.
        version: u32,
    },
    /// An identifier field is malformed.
    #[error("malformed identifier in field {field}")]
    MalformedIdentifier {
        /// Field carrying the malformed identifier.
        field: &'static str,
    },
    /// The dedupe key is empty.
    #[error("event dedupe key is empty")]
    EmptyDedupeKey,
}

// ============================================================================
// SECTION: Append Plan
// ============================================================================

/// Snapshot pin requested alongside an append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPin {
    /// Pinned snapshot reference.
    pub snapshot_ref: SnapshotRef,
    /// Index of the plan event introducing the reference.
    pub event_index: u64,
    /// Plan event introducing the reference.
    pub created_by_event_id: EventId,
}

/// The deterministic, validated unit of atomicity handed to a session store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendPlan {
    /// Session the plan appends to (the session named inside the events).
    pub session_id: SessionId,
    /// Index the first plan event must land at.
    pub expected_first_event_index: u64,
    /// Events in append order with final indices assigned.
    pub events: Vec<DomainEvent>,
    /// Snapshot pins, sorted by `(snapshot_ref, event_index, created_by_event_id)`.
    pub snapshot_pins: Vec<SnapshotPin>,
}

/// Disposition of a plan's dedupe keys against the existing log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupeDisposition {
    /// No plan key exists yet; the plan appends fresh events.
    AllNew,
    /// Every plan key already exists; the append is a pure no-op replay.
    FullReplay,
    /// Some keys exist and some do not; the plan is invalid.
    Partial,
}

impl AppendPlan {
    /// Validates the plan's internal shape before any I/O.
    ///
    /// Checks event schemas, session-id agreement, index contiguity at the
    /// expected position, intra-plan dedupe uniqueness, and that every pin
    /// references an event inside the plan.
    ///
    /// # Errors
    ///
    /// Returns a human-readable invariant description on the first failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.events.is_empty() {
            return Err("append plan has no events".to_string());
        }
        let mut keys: std::collections::BTreeSet<&str> = std::collections::BTreeSet::new();
        for (offset, event) in self.events.iter().enumerate() {
            event.validate().map_err(|err| format!("plan event {offset}: {err}"))?;
            if event.session_id != self.session_id {
                return Err(format!("plan event {offset} names a foreign session"));
            }
            let expected = self.expected_first_event_index + offset as u64;
            if event.event_index != expected {
                return Err(format!(
                    "plan event {offset} has index {} (expected {expected})",
                    event.event_index
                ));
            }
            if !keys.insert(event.dedupe_key.as_str()) {
                return Err(format!("plan repeats dedupe key {}", event.dedupe_key));
            }
        }
        for pin in &self.snapshot_pins {
            let Some(event) = self
                .events
                .iter()
                .find(|event| event.event_index == pin.event_index)
            else {
                return Err(format!("pin references event index {} outside plan", pin.event_index));
            };
            if event.event_id != pin.created_by_event_id {
                return Err(format!("pin at index {} names the wrong event", pin.event_index));
            }
            if event.introduced_snapshot_ref() != Some(&pin.snapshot_ref) {
                return Err(format!(
                    "pin at index {} does not match the event's snapshot ref",
                    pin.event_index
                ));
            }
        }
        for event in &self.events {
            if let Some(snapshot_ref) = event.introduced_snapshot_ref() {
                let pinned = self.snapshot_pins.iter().any(|pin| {
                    pin.event_index == event.event_index && pin.snapshot_ref == *snapshot_ref
                });
                if !pinned {
                    return Err(format!(
                        "event index {} introduces an unpinned snapshot ref",
                        event.event_index
                    ));
                }
            }
        }
        Ok(())
    }

    /// Returns pins sorted by the deterministic attestation order.
    #[must_use]
    pub fn sorted_pins(&self) -> Vec<SnapshotPin> {
        let mut pins = self.snapshot_pins.clone();
        pins.sort_by(|a, b| {
            (&a.snapshot_ref, a.event_index, &a.created_by_event_id).cmp(&(
                &b.snapshot_ref,
                b.event_index,
                &b.created_by_event_id,
            ))
        });
        pins
    }

    /// Classifies the plan's dedupe keys against the existing key set.
    #[must_use]
    pub fn dedupe_disposition(
        &self,
        existing: &std::collections::BTreeSet<String>,
    ) -> DedupeDisposition {
        let present = self
            .events
            .iter()
            .filter(|event| existing.contains(&event.dedupe_key))
            .count();
        if present == 0 {
            DedupeDisposition::AllNew
        } else if present == self.events.len() {
            DedupeDisposition::FullReplay
        } else {
            DedupeDisposition::Partial
        }
    }
}

// ============================================================================
// SECTION: Dedupe Key Recipes
// ============================================================================

/// Dedupe key for `session_created`.
#[must_use]
pub fn session_created_dedupe_key(session_id: &SessionId) -> String {
    format!("session_created:{session_id}")
}

/// Dedupe key for `run_started`.
#[must_use]
pub fn run_started_dedupe_key(session_id: &SessionId, run_id: &RunId) -> String {
    format!("run_started:{session_id}:{run_id}")
}

/// Dedupe key for `advance_recorded`.
#[must_use]
pub fn advance_recorded_dedupe_key(
    session_id: &SessionId,
    from_node_id: &NodeId,
    attempt_id: &AttemptId,
) -> String {
    format!("advance_recorded:{session_id}:{from_node_id}:{attempt_id}")
}

/// Dedupe key for `node_created`.
#[must_use]
pub fn node_created_dedupe_key(
    session_id: &SessionId,
    run_id: &RunId,
    to_node_id: &NodeId,
) -> String {
    format!("node_created:{session_id}:{run_id}:{to_node_id}")
}

/// Dedupe key for `edge_created`.
#[must_use]
pub fn edge_created_dedupe_key(
    session_id: &SessionId,
    run_id: &RunId,
    from_node_id: &NodeId,
    to_node_id: &NodeId,
    edge_kind: EdgeKind,
) -> String {
    format!(
        "edge_created:{session_id}:{run_id}:{from_node_id}->{to_node_id}:{}",
        edge_kind.as_str()
    )
}

/// Dedupe key for `node_output_appended`.
#[must_use]
pub fn node_output_dedupe_key(session_id: &SessionId, output_id: &OutputId) -> String {
    format!("node_output_appended:{session_id}:{output_id}")
}

/// Dedupe key for `gap_recorded`.
#[must_use]
pub fn gap_recorded_dedupe_key(session_id: &SessionId, gap_id: &GapId) -> String {
    format!("gap_recorded:{session_id}:{gap_id}")
}

/// Dedupe key for `decision_trace_appended`.
#[must_use]
pub fn decision_trace_dedupe_key(session_id: &SessionId, trace_id: &TraceId) -> String {
    format!("decision_trace_appended:{session_id}:{trace_id}")
}

/// Dedupe key for `validation_performed`.
#[must_use]
pub fn validation_performed_dedupe_key(
    session_id: &SessionId,
    node_id: &NodeId,
    attempt_id: &AttemptId,
) -> String {
    format!("validation_performed:{session_id}:{node_id}:{attempt_id}")
}

/// Dedupe key for `context_set` (unique per emission by design).
#[must_use]
pub fn context_set_dedupe_key(session_id: &SessionId, event_id: &EventId) -> String {
    format!("context_set:{session_id}:{event_id}")
}

/// Dedupe key for `observation_recorded`.
#[must_use]
pub fn observation_recorded_dedupe_key(
    session_id: &SessionId,
    observation_id: &ObservationId,
) -> String {
    format!("observation_recorded:{session_id}:{observation_id}")
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use crate::core::identifiers::AttemptId;
    use crate::core::identifiers::EventId;
    use crate::core::identifiers::NodeId;
    use crate::core::identifiers::SessionId;

    use super::DomainEvent;
    use super::EventPayload;
    use super::EventScope;
    use super::advance_recorded_dedupe_key;

    /// Tests the advance dedupe recipe shape.
    #[test]
    fn test_advance_dedupe_recipe() {
        let key = advance_recorded_dedupe_key(
            &SessionId::new("sess_a"),
            &NodeId::new("node_b"),
            &AttemptId::new("attempt_c"),
        );
        assert_eq!(key, "advance_recorded:sess_a:node_b:attempt_c");
    }

    /// Tests events serialize with an adjacent kind/data envelope.
    #[test]
    fn test_event_kind_envelope() {
        let event = DomainEvent {
            v: 1,
            event_id: EventId::new("evt_x"),
            event_index: 0,
            session_id: SessionId::new("sess_a"),
            dedupe_key: "session_created:sess_a".to_string(),
            scope: EventScope::default(),
            payload: EventPayload::SessionCreated {
                created_at_ms: 42,
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "session_created");
        assert_eq!(value["data"]["created_at_ms"], 42);
    }
}
