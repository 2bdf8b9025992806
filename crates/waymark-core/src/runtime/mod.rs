// waymark-core/src/runtime/mod.rs
// ============================================================================
// Module: Waymark Runtime
// Description: State machine, interpreter, advance core, and projections.
// Purpose: Execute workflow sessions deterministically over the event log.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Runtime modules implement the execution substrate: the pure state
//! machine, the workflow interpreter, append plan builders, the advance
//! core, replayable projections, and the engine that wires them to stores.
//! All external surfaces must call into the same engine logic to preserve
//! invariance.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod advance;
pub mod engine;
pub mod interpreter;
pub mod plan;
pub mod projection;
pub mod state;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use advance::AdvanceDefaults;
pub use advance::AdvanceError;
pub use advance::AdvanceEvaluation;
pub use advance::AdvanceMode;
pub use advance::AdvanceRequest;
pub use advance::BlockedOutcome;
pub use advance::ValidatedAdvanceInputs;
pub use advance::build_blocked_outcome;
pub use advance::evaluate_advance;
pub use advance::normalize_outputs;
pub use advance::recommendation_warnings;
pub use advance::synthetic_validation_result;
pub use advance::validate_advance_inputs;
pub use engine::CheckpointWorkflowResult;
pub use engine::ContinueOutcome;
pub use engine::ContinueWorkflowRequest;
pub use engine::ContinueWorkflowResult;
pub use engine::Engine;
pub use engine::EngineError;
pub use engine::EngineOptions;
pub use engine::SessionTokens;
pub use engine::StartWorkflowResult;
pub use interpreter::NextError;
pub use interpreter::NextOutcome;
pub use interpreter::initial_state;
pub use interpreter::next_state;
pub use plan::AckAdvancePlanInputs;
pub use plan::CheckpointPlanInputs;
pub use plan::ExtraEvent;
pub use plan::MintedAdvanceIds;
pub use plan::NormalizedOutput;
pub use plan::PlanError;
pub use plan::StartPlanInputs;
pub use plan::build_ack_advance_append_plan;
pub use plan::build_checkpoint_append_plan;
pub use plan::build_session_start_plan;
pub use projection::EdgeInfo;
pub use projection::NodeInfo;
pub use projection::OutputRecord;
pub use projection::RunDag;
pub use projection::advance_attempts_from;
pub use projection::find_recorded_advance;
pub use projection::project_run_dag;
pub use projection::recorded_gaps;
pub use projection::recorded_outputs;
pub use projection::run_ids;
pub use projection::stored_context;
pub use state::AdvancedState;
pub use state::StateError;
pub use state::StepCompleted;
pub use state::apply_step_completed;
pub use state::derive_pending_step;
pub use store::InMemorySessionStore;
pub use store::InMemorySnapshotStore;
pub use store::InProcessSessionGate;
pub use store::admit_plan;
pub use store::assert_lease;
pub use store::attestation_records;
pub use store::encode_segment;
pub use store::segment_rel_path;
pub use store::verify_import_parts;
