// waymark-core/src/runtime/state.rs
// ============================================================================
// Module: Waymark Execution State Machine
// Description: Pure transitions over the interpreter's engine state.
// Purpose: Derive pending steps and apply step completions without I/O.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! The execution state machine is deliberately small: `init` and `complete`
//! are terminal for step derivation, while `running` and `blocked` both carry
//! the pending step. Applying a step completion checks the completion names
//! exactly the pending step (including its loop position) and yields the
//! advanced state the interpreter continues from.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::EngineState;
use crate::core::LoopFrame;
use crate::core::PendingStep;
use crate::core::StepId;

// ============================================================================
// SECTION: Step Completion
// ============================================================================

/// Record that the pending step was completed by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepCompleted {
    /// Completed step.
    pub step_id: StepId,
    /// Loop position the step completed at.
    pub loop_path: Vec<LoopFrame>,
}

impl StepCompleted {
    /// Builds the completion for a pending step.
    #[must_use]
    pub fn of(pending: &PendingStep) -> Self {
        Self {
            step_id: pending.step_id.clone(),
            loop_path: pending.loop_path.clone(),
        }
    }
}

/// State after a completion was applied, before the next step is derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvancedState {
    /// Step position that completed.
    pub completed: StepCompleted,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by state transitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    /// The state carries no pending step.
    #[error("no pending step in the current state")]
    NoPendingStep,
    /// The completion does not name the pending step.
    #[error("completion names {actual}, pending step is {expected}")]
    CompletionMismatch {
        /// Step the state is waiting on.
        expected: StepId,
        /// Step the completion named.
        actual: StepId,
    },
}

// ============================================================================
// SECTION: Transitions
// ============================================================================

/// Returns the pending step when the state has one.
#[must_use]
pub const fn derive_pending_step(state: &EngineState) -> Option<&PendingStep> {
    match state {
        EngineState::Running {
            pending_step,
        }
        | EngineState::Blocked {
            pending_step,
            ..
        } => Some(pending_step),
        EngineState::Init | EngineState::Complete => None,
    }
}

/// Applies a step completion to the current state.
///
/// # Errors
///
/// Returns [`StateError`] when the state has no pending step or the
/// completion names a different step or loop position.
pub fn apply_step_completed(
    state: &EngineState,
    completion: &StepCompleted,
) -> Result<AdvancedState, StateError> {
    let pending = derive_pending_step(state).ok_or(StateError::NoPendingStep)?;
    if pending.step_id != completion.step_id || pending.loop_path != completion.loop_path {
        return Err(StateError::CompletionMismatch {
            expected: pending.step_id.clone(),
            actual: completion.step_id.clone(),
        });
    }
    Ok(AdvancedState {
        completed: completion.clone(),
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================
