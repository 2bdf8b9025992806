// waymark-core/src/core/snapshot.rs
// ============================================================================
// Module: Waymark Execution Snapshots
// Description: Content-addressed snapshots of the workflow interpreter state.
// Purpose: Persist engine state per node as immutable CAS documents.
// Dependencies: serde, crate::core::{hashing, identifiers, reason}
// ============================================================================

//! ## Overview
//! Every node in the per-run DAG references exactly one execution snapshot:
//! the interpreter state after the advance that created the node. Snapshots
//! are pure values keyed by the SHA-256 of their canonical bytes, so two
//! identical states share one file and integrity is checked on every read.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::hashing::ContentDigest;
use crate::core::hashing::DigestError;
use crate::core::hashing::SnapshotRef;
use crate::core::identifiers::AttemptId;
use crate::core::identifiers::EventId;
use crate::core::identifiers::LoopId;
use crate::core::identifiers::StepId;
use crate::core::reason::BlockerV1;
use crate::core::reason::ReasonV1;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Schema version accepted for execution snapshots.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;
/// Document kind discriminator for execution snapshots.
pub const SNAPSHOT_KIND: &str = "execution_snapshot";

// ============================================================================
// SECTION: Pending Step
// ============================================================================

/// Position inside a loop: which loop and which (1-based) iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopFrame {
    /// Loop identifier.
    pub loop_id: LoopId,
    /// Iteration number, starting at 1.
    pub iteration: u32,
}

/// The step the session is currently waiting on, with its loop position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingStep {
    /// Step identifier.
    pub step_id: StepId,
    /// Enclosing loop frames, outermost first.
    #[serde(default)]
    pub loop_path: Vec<LoopFrame>,
}

// ============================================================================
// SECTION: Engine State
// ============================================================================

/// Pure state of the workflow interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EngineState {
    /// No step has been derived yet.
    Init,
    /// A step is pending execution.
    Running {
        /// Step the agent must execute next.
        pending_step: PendingStep,
    },
    /// The last advance attempt was blocked.
    Blocked {
        /// Step the agent must retry.
        pending_step: PendingStep,
        /// The reason chosen as primary.
        primary_reason: ReasonV1,
        /// Budgeted blocker projection.
        blockers: Vec<BlockerV1>,
        /// Event carrying the validation result for the blocked attempt.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        validation_ref: Option<EventId>,
        /// Attempt that was blocked.
        attempt_id: AttemptId,
    },
    /// The workflow has no further steps.
    Complete,
}

impl EngineState {
    /// Returns true when the run has finished.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Returns true when the last attempt was blocked.
    #[must_use]
    pub const fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

// ============================================================================
// SECTION: Snapshot Document
// ============================================================================

/// Engine payload carried by a snapshot document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnginePayload {
    /// Interpreter state at the node.
    pub engine_state: EngineState,
}

/// Content-addressed execution snapshot document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    /// Schema version; always [`SNAPSHOT_SCHEMA_VERSION`].
    pub v: u32,
    /// Document kind; always [`SNAPSHOT_KIND`].
    pub kind: String,
    /// Engine payload.
    pub engine_payload: EnginePayload,
}

impl ExecutionSnapshot {
    /// Wraps an engine state in a versioned snapshot document.
    #[must_use]
    pub fn from_state(engine_state: EngineState) -> Self {
        Self {
            v: SNAPSHOT_SCHEMA_VERSION,
            kind: SNAPSHOT_KIND.to_string(),
            engine_payload: EnginePayload {
                engine_state,
            },
        }
    }

    /// Computes the snapshot's content-addressed reference.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError`] when canonicalization fails.
    pub fn reference(&self) -> Result<SnapshotRef, DigestError> {
        Ok(SnapshotRef::from_digest(ContentDigest::of_canonical_json(self)?))
    }

    /// Returns the interpreter state inside the document.
    #[must_use]
    pub const fn state(&self) -> &EngineState {
        &self.engine_payload.engine_state
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use crate::core::identifiers::StepId;

    use super::EngineState;
    use super::ExecutionSnapshot;
    use super::PendingStep;

    /// Tests identical states share one snapshot reference.
    #[test]
    fn test_identical_states_share_reference() {
        let state = EngineState::Running {
            pending_step: PendingStep {
                step_id: StepId::new("step-1"),
                loop_path: Vec::new(),
            },
        };
        let a = ExecutionSnapshot::from_state(state.clone()).reference().unwrap();
        let b = ExecutionSnapshot::from_state(state).reference().unwrap();
        assert_eq!(a, b);
    }
}
