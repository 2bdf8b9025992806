// waymark-core/src/runtime/advance.rs
// ============================================================================
// Module: Waymark Advance Core
// Description: Boundary validation, blocking pipeline, and outcome assembly.
// Purpose: Turn one acked request into a fully determined append plan input.
// Dependencies: crate::core, crate::interfaces, crate::runtime::plan
// ============================================================================

//! ## Overview
//! An advance is the single mutation of the durable log. The mode variant
//! (fresh or retry) carries the node identity and snapshot and alone decides
//! event-emission policy; nothing else in the pipeline branches on mode.
//! External input is narrowed exactly once into [`ValidatedAdvanceInputs`];
//! everything after the boundary trusts the types. All functions here are
//! pure except [`evaluate_advance`], which invokes the validation engine
//! port.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::core::AttemptId;
use crate::core::AutonomyMode;
use crate::core::ContentDigest;
use crate::core::EngineState;
use crate::core::EventId;
use crate::core::EventPayload;
use crate::core::EventScope;
use crate::core::ExecutionSnapshot;
use crate::core::GapId;
use crate::core::GapReason;
use crate::core::GapSeverity;
use crate::core::GapV1;
use crate::core::NodeId;
use crate::core::NodeKind;
use crate::core::OutputChannel;
use crate::core::OutputContract;
use crate::core::OutputId;
use crate::core::OutputPayload;
use crate::core::OutputRequirement;
use crate::core::PendingStep;
use crate::core::ReasonV1;
use crate::core::RecommendedPrefs;
use crate::core::RiskPolicy;
use crate::core::RunId;
use crate::core::SessionId;
use crate::core::TraceEntry;
use crate::core::TraceId;
use crate::core::UserOnlyDependency;
use crate::core::ValidationCriteria;
use crate::core::ValidationResult;
use crate::core::WorkflowSpec;
use crate::core::apply_guardrails;
use crate::core::build_blocker_report;
use crate::core::canonical_json_bytes;
use crate::core::context_set_dedupe_key;
use crate::core::context_value_truthy;
use crate::core::decision_trace_dedupe_key;
use crate::core::detect_blocking_reasons;
use crate::core::gap_recorded_dedupe_key;
use crate::core::merge_context;
use crate::core::narrow_context_object;
use crate::core::reason_to_blocker;
use crate::core::should_block;
use crate::core::validation_performed_dedupe_key;
use crate::interfaces::ValidationEngine;
use crate::interfaces::ValidationEngineError;
use crate::runtime::plan::ExtraEvent;
use crate::runtime::plan::NormalizedOutput;
use crate::runtime::state::derive_pending_step;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Closed set of advance-local errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdvanceError {
    /// The mode's snapshot carries no pending step.
    #[error("no pending step for this advance")]
    NoPendingStep,
    /// A caller-side invariant was violated.
    #[error("advance invariant violation: {detail}")]
    InvariantViolation {
        /// Invariant description.
        detail: String,
    },
    /// Applying the advance failed before any write.
    #[error("advance apply failed: {message}")]
    ApplyFailed {
        /// Failure description.
        message: String,
    },
    /// Deriving the next step failed.
    #[error("advance next failed: {message}")]
    NextFailed {
        /// Failure description.
        message: String,
    },
}

// ============================================================================
// SECTION: Advance Mode
// ============================================================================

/// Mode discriminant carrying all mode-specific data for one advance.
#[derive(Debug, Clone)]
pub enum AdvanceMode {
    /// First advance from a running node.
    Fresh {
        /// Node the advance starts from.
        source_node_id: NodeId,
        /// Snapshot of that node.
        snapshot: ExecutionSnapshot,
    },
    /// Retry advance from a blocked-attempt node.
    Retry {
        /// Blocked node the retry starts from.
        blocked_node_id: NodeId,
        /// Snapshot of the blocked node.
        blocked_snapshot: ExecutionSnapshot,
    },
}

impl AdvanceMode {
    /// Returns the node the advance starts from.
    #[must_use]
    pub const fn node_id(&self) -> &NodeId {
        match self {
            Self::Fresh {
                source_node_id,
                ..
            } => source_node_id,
            Self::Retry {
                blocked_node_id,
                ..
            } => blocked_node_id,
        }
    }

    /// Returns the snapshot the advance starts from.
    #[must_use]
    pub const fn snapshot(&self) -> &ExecutionSnapshot {
        match self {
            Self::Fresh {
                snapshot,
                ..
            } => snapshot,
            Self::Retry {
                blocked_snapshot,
                ..
            } => blocked_snapshot,
        }
    }

    /// Returns whether a success records a `validation_performed` event.
    #[must_use]
    pub const fn emit_validation_on_success(&self) -> bool {
        match self {
            Self::Fresh { .. } => false,
            Self::Retry { .. } => true,
        }
    }

    /// Returns the node kind a successful advance creates.
    #[must_use]
    pub const fn success_node_kind(&self) -> NodeKind {
        match self {
            Self::Fresh { .. } => NodeKind::Default,
            Self::Retry { .. } => NodeKind::Step,
        }
    }
}

// ============================================================================
// SECTION: Request and Boundary Validation
// ============================================================================

/// Raw advance request as received from the caller.
#[derive(Debug, Clone, Default)]
pub struct AdvanceRequest {
    /// Incoming context value, merged when it is a JSON object.
    pub context: Option<Value>,
    /// Recap notes for the pending step.
    pub notes_markdown: Option<String>,
    /// JSON artifacts submitted with the step.
    pub artifacts: Vec<Value>,
    /// Autonomy mode as a free string, when overridden.
    pub autonomy: Option<String>,
    /// Risk policy as a free string, when overridden.
    pub risk_policy: Option<String>,
}

/// Default execution preferences applied when the request carries none.
#[derive(Debug, Clone, Copy)]
pub struct AdvanceDefaults {
    /// Default autonomy mode.
    pub autonomy: AutonomyMode,
    /// Default risk policy.
    pub risk_policy: RiskPolicy,
}

/// Inputs narrowed once at the boundary; the core trusts these types.
#[derive(Debug, Clone)]
pub struct ValidatedAdvanceInputs {
    /// Step the advance completes or retries.
    pub pending_step: PendingStep,
    /// Merged context after tombstones.
    pub merged_context: Map<String, Value>,
    /// Incoming context object, when one was supplied.
    pub input_context_obj: Option<Map<String, Value>>,
    /// Validation criteria from the step definition.
    pub validation_criteria: Option<ValidationCriteria>,
    /// Output contract from the step definition.
    pub output_contract: Option<OutputContract>,
    /// Context keys the step requires.
    pub requires_context_keys: Vec<String>,
    /// Capabilities the step requires.
    pub required_capabilities: Vec<String>,
    /// User-only dependency declared by the step.
    pub user_only_dependency: Option<UserOnlyDependency>,
    /// Recap notes from the request.
    pub notes_markdown: Option<String>,
    /// Artifacts from the request.
    pub artifacts: Vec<Value>,
    /// Narrowed autonomy mode.
    pub autonomy: AutonomyMode,
    /// Narrowed risk policy.
    pub risk_policy: RiskPolicy,
}

/// Validates an advance request at the boundary.
///
/// # Errors
///
/// Returns [`AdvanceError::NoPendingStep`] when the mode's snapshot carries
/// none, [`AdvanceError::InvariantViolation`] on unknown preference strings
/// or a pending step missing from the workflow, and
/// [`AdvanceError::ApplyFailed`] on context violations.
pub fn validate_advance_inputs(
    mode: &AdvanceMode,
    workflow: &WorkflowSpec,
    stored_context: &Map<String, Value>,
    request: &AdvanceRequest,
    defaults: AdvanceDefaults,
) -> Result<ValidatedAdvanceInputs, AdvanceError> {
    let pending_step = derive_pending_step(mode.snapshot().state())
        .ok_or(AdvanceError::NoPendingStep)?
        .clone();

    let step = workflow.find_step(&pending_step.step_id).ok_or_else(|| {
        AdvanceError::InvariantViolation {
            detail: format!("pending step {} is not in the pinned workflow", pending_step.step_id),
        }
    })?;

    let autonomy = narrow_autonomy(request.autonomy.as_deref(), defaults.autonomy)?;
    let risk_policy = narrow_risk_policy(request.risk_policy.as_deref(), defaults.risk_policy)?;

    let input_context_obj = narrow_context_object(request.context.as_ref()).cloned();
    let merged_context = merge_context(stored_context, input_context_obj.as_ref())
        .map_err(|err| AdvanceError::ApplyFailed {
            message: err.to_string(),
        })?;

    Ok(ValidatedAdvanceInputs {
        pending_step,
        merged_context,
        input_context_obj,
        validation_criteria: step.validation_criteria.clone(),
        output_contract: step.output_contract.clone(),
        requires_context_keys: step.requires_context_keys.clone(),
        required_capabilities: step.required_capabilities.clone(),
        user_only_dependency: step.user_only_dependency.as_ref().map(|detail| {
            UserOnlyDependency {
                detail: detail.clone(),
                step_id: step.step_id.clone(),
            }
        }),
        notes_markdown: request.notes_markdown.clone(),
        artifacts: request.artifacts.clone(),
        autonomy,
        risk_policy,
    })
}

/// Narrows an autonomy string or applies the default.
fn narrow_autonomy(
    value: Option<&str>,
    default: AutonomyMode,
) -> Result<AutonomyMode, AdvanceError> {
    match value {
        None => Ok(default),
        Some(text) => AutonomyMode::narrow(text).ok_or_else(|| AdvanceError::InvariantViolation {
            detail: format!("unknown autonomy mode {text}"),
        }),
    }
}

/// Narrows a risk policy string or applies the default.
fn narrow_risk_policy(
    value: Option<&str>,
    default: RiskPolicy,
) -> Result<RiskPolicy, AdvanceError> {
    match value {
        None => Ok(default),
        Some(text) => RiskPolicy::narrow(text).ok_or_else(|| AdvanceError::InvariantViolation {
            detail: format!("unknown risk policy {text}"),
        }),
    }
}

// ============================================================================
// SECTION: Evaluation Pipeline
// ============================================================================

/// Outcome of the blocking-decision pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvanceEvaluation {
    /// Validation engine result, when the engine ran.
    pub validation: Option<ValidationResult>,
    /// Whether the validation engine ran.
    pub engine_ran: bool,
    /// Reasons that remain blocking after guardrails.
    pub effective_reasons: Vec<ReasonV1>,
    /// Reasons demoted to advisory.
    pub advisory_reasons: Vec<ReasonV1>,
    /// Whether this advance blocks now.
    pub block_now: bool,
}

/// Runs the blocking-decision pipeline for validated inputs.
///
/// # Errors
///
/// Returns [`AdvanceError::ApplyFailed`] when the validation engine times
/// out or fails.
pub fn evaluate_advance<V: ValidationEngine>(
    inputs: &ValidatedAdvanceInputs,
    validation_engine: &V,
    capabilities: &BTreeSet<String>,
) -> Result<AdvanceEvaluation, AdvanceError> {
    let validation = match (&inputs.validation_criteria, &inputs.notes_markdown) {
        (Some(criteria), Some(notes)) => Some(
            validation_engine
                .validate(notes, criteria, &inputs.merged_context)
                .map_err(|err| AdvanceError::ApplyFailed {
                    message: match err {
                        ValidationEngineError::Timeout => {
                            "validation engine timed out".to_string()
                        }
                        ValidationEngineError::Engine(message) => {
                            format!("validation engine failed: {message}")
                        }
                    },
                })?,
        ),
        _ => None,
    };
    let engine_ran = validation.is_some();

    let requirement = OutputRequirement {
        contract: inputs.output_contract.clone(),
        criteria_ref: inputs
            .validation_criteria
            .as_ref()
            .map(|criteria| criteria.criteria_ref.clone()),
        has_notes: inputs.notes_markdown.is_some(),
        artifact_count: inputs.artifacts.len(),
        validation: validation.clone(),
        missing_context_keys: inputs
            .requires_context_keys
            .iter()
            .filter(|key| !context_value_truthy(inputs.merged_context.get(key.as_str())))
            .cloned()
            .collect(),
        unavailable_capabilities: inputs
            .required_capabilities
            .iter()
            .filter(|capability| !capabilities.contains(capability.as_str()))
            .cloned()
            .collect(),
        user_only_dependency: inputs.user_only_dependency.clone(),
    };

    let reasons = detect_blocking_reasons(&requirement);
    let split = apply_guardrails(inputs.risk_policy, &reasons);
    let block_now =
        !split.blocking.is_empty() && should_block(inputs.autonomy, &split.blocking);

    Ok(AdvanceEvaluation {
        validation,
        engine_ran,
        effective_reasons: split.blocking,
        advisory_reasons: split.advisory,
        block_now,
    })
}

// ============================================================================
// SECTION: Validation Results
// ============================================================================

/// Synthesizes the validation result recorded on a blocked attempt.
///
/// # Errors
///
/// Returns [`AdvanceError::InvariantViolation`] when no reasons exist or a
/// reason cannot be projected into a blocker message.
pub fn synthetic_validation_result(
    effective_reasons: &[ReasonV1],
) -> Result<ValidationResult, AdvanceError> {
    if effective_reasons.is_empty() {
        return Err(AdvanceError::InvariantViolation {
            detail: "synthetic validation requires at least one reason".to_string(),
        });
    }
    let mut issues = Vec::new();
    let mut suggestions = Vec::new();
    for reason in effective_reasons {
        let blocker = reason_to_blocker(reason).map_err(|err| AdvanceError::InvariantViolation {
            detail: err.to_string(),
        })?;
        issues.push(blocker.message);
        if let Some(fix) = blocker.suggested_fix {
            suggestions.push(fix);
        }
    }
    Ok(ValidationResult {
        valid: false,
        issues,
        suggestions,
        warnings: Vec::new(),
    })
}

// ============================================================================
// SECTION: Blocked Outcome
// ============================================================================

/// Pieces assembled for a blocked advance.
#[derive(Debug, Clone)]
pub struct BlockedOutcome {
    /// Validation event appended ahead of the advance record.
    pub validation_event: ExtraEvent,
    /// Snapshot of the blocked-attempt node.
    pub snapshot: ExecutionSnapshot,
}

/// Builds the blocked-path pieces: validation event and blocked snapshot.
///
/// # Errors
///
/// Returns [`AdvanceError::InvariantViolation`] when no primary reason
/// exists or the blocker report cannot be built.
#[allow(clippy::too_many_arguments, reason = "All blocked-path facts feed one assembly.")]
pub fn build_blocked_outcome(
    session_id: &SessionId,
    run_id: &RunId,
    from_node_id: &NodeId,
    attempt_id: &AttemptId,
    pending_step: &PendingStep,
    evaluation: &AdvanceEvaluation,
    validation_event_id: EventId,
) -> Result<BlockedOutcome, AdvanceError> {
    let primary_reason = evaluation.effective_reasons.first().cloned().ok_or_else(|| {
        AdvanceError::InvariantViolation {
            detail: "blocked outcome requires a primary reason".to_string(),
        }
    })?;
    let report = build_blocker_report(&evaluation.effective_reasons).map_err(|err| {
        AdvanceError::InvariantViolation {
            detail: err.to_string(),
        }
    })?;
    let result = match (&evaluation.validation, evaluation.engine_ran) {
        (Some(result), true) => result.clone(),
        _ => synthetic_validation_result(&evaluation.effective_reasons)?,
    };

    let validation_event = ExtraEvent {
        event_id: validation_event_id.clone(),
        dedupe_key: validation_performed_dedupe_key(session_id, from_node_id, attempt_id),
        scope: EventScope {
            run_id: Some(run_id.clone()),
            node_id: Some(from_node_id.clone()),
        },
        payload: EventPayload::ValidationPerformed {
            attempt_id: attempt_id.clone(),
            engine_ran: evaluation.engine_ran,
            result,
        },
    };

    let snapshot = ExecutionSnapshot::from_state(EngineState::Blocked {
        pending_step: pending_step.clone(),
        primary_reason,
        blockers: report.blockers,
        validation_ref: Some(validation_event_id),
        attempt_id: attempt_id.clone(),
    });

    Ok(BlockedOutcome {
        validation_event,
        snapshot,
    })
}

// ============================================================================
// SECTION: Success Extras
// ============================================================================

/// Returns recommendation warnings when effective prefs exceed recommended.
#[must_use]
pub fn recommendation_warnings(
    recommended: Option<&RecommendedPrefs>,
    autonomy: AutonomyMode,
    risk_policy: RiskPolicy,
) -> Vec<GapReason> {
    let Some(recommended) = recommended else {
        return Vec::new();
    };
    let mut warnings = Vec::new();
    if autonomy.rank() > recommended.autonomy.rank() {
        warnings.push(GapReason {
            category: "recommendation".to_string(),
            detail: format!(
                "autonomy {} exceeds recommended {}",
                autonomy.as_str(),
                recommended.autonomy.as_str()
            ),
        });
    }
    if risk_policy.rank() > recommended.risk_policy.rank() {
        warnings.push(GapReason {
            category: "recommendation".to_string(),
            detail: format!(
                "risk policy {} exceeds recommended {}",
                risk_policy.as_str(),
                recommended.risk_policy.as_str()
            ),
        });
    }
    warnings
}

/// Builds a `gap_recorded` extra event.
#[must_use]
pub fn gap_extra_event(
    session_id: &SessionId,
    run_id: &RunId,
    event_id: EventId,
    gap: GapV1,
) -> ExtraEvent {
    ExtraEvent {
        event_id,
        dedupe_key: gap_recorded_dedupe_key(session_id, &gap.gap_id),
        scope: EventScope {
            run_id: Some(run_id.clone()),
            node_id: None,
        },
        payload: EventPayload::GapRecorded {
            gap,
        },
    }
}

/// Builds a recommendation-warning gap record.
#[must_use]
pub fn recommendation_gap(gap_id: GapId, reason: GapReason) -> GapV1 {
    GapV1 {
        gap_id,
        severity: GapSeverity::Warning,
        reason,
        step_id: None,
    }
}

/// Builds the `context_set` extra event.
#[must_use]
pub fn context_set_extra_event(
    session_id: &SessionId,
    run_id: &RunId,
    event_id: EventId,
    context: Map<String, Value>,
    applied_at_ms: u64,
) -> ExtraEvent {
    let dedupe_key = context_set_dedupe_key(session_id, &event_id);
    ExtraEvent {
        event_id,
        dedupe_key,
        scope: EventScope {
            run_id: Some(run_id.clone()),
            node_id: None,
        },
        payload: EventPayload::ContextSet {
            context,
            applied_at_ms,
        },
    }
}

/// Builds the success-path `validation_performed` extra event.
#[must_use]
pub fn validation_extra_event(
    session_id: &SessionId,
    run_id: &RunId,
    from_node_id: &NodeId,
    attempt_id: &AttemptId,
    event_id: EventId,
    engine_ran: bool,
    result: ValidationResult,
) -> ExtraEvent {
    ExtraEvent {
        event_id,
        dedupe_key: validation_performed_dedupe_key(session_id, from_node_id, attempt_id),
        scope: EventScope {
            run_id: Some(run_id.clone()),
            node_id: Some(from_node_id.clone()),
        },
        payload: EventPayload::ValidationPerformed {
            attempt_id: attempt_id.clone(),
            engine_ran,
            result,
        },
    }
}

/// Builds the `decision_trace_appended` extra event.
#[must_use]
pub fn trace_extra_event(
    session_id: &SessionId,
    run_id: &RunId,
    event_id: EventId,
    trace_id: TraceId,
    entries: Vec<TraceEntry>,
) -> ExtraEvent {
    let dedupe_key = decision_trace_dedupe_key(session_id, &trace_id);
    ExtraEvent {
        event_id,
        dedupe_key,
        scope: EventScope {
            run_id: Some(run_id.clone()),
            node_id: None,
        },
        payload: EventPayload::DecisionTraceAppended {
            trace_id,
            entries,
        },
    }
}

// ============================================================================
// SECTION: Output Normalization
// ============================================================================

/// Normalizes recap and artifact outputs for one successful advance.
///
/// The recap is emitted when notes are present and validation, if criteria
/// exist, passed. Artifacts are canonicalized, content-addressed, and sorted
/// by `(sha256, content_type)` before output ids are assigned.
///
/// # Errors
///
/// Returns [`AdvanceError::ApplyFailed`] when an artifact cannot be
/// canonicalized.
pub fn normalize_outputs(
    attempt_id: &AttemptId,
    notes_markdown: Option<&str>,
    criteria_present: bool,
    validation: Option<&ValidationResult>,
    artifacts: &[Value],
) -> Result<Vec<NormalizedOutput>, AdvanceError> {
    let mut outputs = Vec::new();

    let validation_passed = validation.is_none_or(|result| result.valid);
    if let Some(notes) = notes_markdown {
        if !criteria_present || validation_passed {
            outputs.push(NormalizedOutput {
                output_id: OutputId::recap(attempt_id),
                channel: OutputChannel::Recap,
                payload: OutputPayload::NotesV1 {
                    notes_markdown: notes.to_string(),
                },
            });
        }
    }

    let mut normalized: Vec<(ContentDigest, u64, Value)> = Vec::new();
    for artifact in artifacts {
        let bytes = canonical_json_bytes(artifact).map_err(|err| AdvanceError::ApplyFailed {
            message: format!("artifact canonicalization failed: {err}"),
        })?;
        normalized.push((ContentDigest::of_bytes(&bytes), bytes.len() as u64, artifact.clone()));
    }
    normalized.sort_by(|a, b| a.0.cmp(&b.0));

    for (position, (sha256, byte_length, content)) in normalized.into_iter().enumerate() {
        outputs.push(NormalizedOutput {
            output_id: OutputId::artifact(attempt_id, position),
            channel: OutputChannel::Artifact,
            payload: OutputPayload::ArtifactJsonV1 {
                sha256,
                content_type: "application/json".to_string(),
                byte_length,
                content,
            },
        });
    }

    Ok(outputs)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::Map;
    use serde_json::json;

    use crate::core::AutonomyMode;
    use crate::core::EngineState;
    use crate::core::ExecutionSnapshot;
    use crate::core::NodeId;
    use crate::core::NodeKind;
    use crate::core::PendingStep;
    use crate::core::RiskPolicy;
    use crate::core::StepId;
    use crate::core::StepNode;
    use crate::core::StepSpec;
    use crate::core::WorkflowId;
    use crate::core::WorkflowSpec;

    use super::AdvanceDefaults;
    use super::AdvanceError;
    use super::AdvanceMode;
    use super::AdvanceRequest;
    use super::normalize_outputs;
    use super::validate_advance_inputs;

    /// Builds a one-step workflow.
    fn workflow() -> WorkflowSpec {
        WorkflowSpec {
            v: 1,
            workflow_id: WorkflowId::new("wf-test"),
            title: None,
            recommended: None,
            steps: vec![StepNode::Step(StepSpec {
                step_id: StepId::new("step-1"),
                title: None,
                run_condition: None,
                requires_context_keys: Vec::new(),
                required_capabilities: Vec::new(),
                user_only_dependency: None,
                validation_criteria: None,
                output_contract: None,
            })],
        }
    }

    /// Builds a fresh mode pending step-1.
    fn fresh_mode() -> AdvanceMode {
        AdvanceMode::Fresh {
            source_node_id: NodeId::new("node_src"),
            snapshot: ExecutionSnapshot::from_state(EngineState::Running {
                pending_step: PendingStep {
                    step_id: StepId::new("step-1"),
                    loop_path: Vec::new(),
                },
            }),
        }
    }

    /// Default preferences for tests.
    const DEFAULTS: AdvanceDefaults = AdvanceDefaults {
        autonomy: AutonomyMode::Guided,
        risk_policy: RiskPolicy::Conservative,
    };

    /// Tests the emission policy is a function of the mode alone.
    #[test]
    fn test_mode_emission_policy() {
        let fresh = fresh_mode();
        assert!(!fresh.emit_validation_on_success());
        assert_eq!(fresh.success_node_kind(), NodeKind::Default);

        let retry = AdvanceMode::Retry {
            blocked_node_id: NodeId::new("node_blk"),
            blocked_snapshot: fresh.snapshot().clone(),
        };
        assert!(retry.emit_validation_on_success());
        assert_eq!(retry.success_node_kind(), NodeKind::Step);
    }

    /// Tests unknown autonomy strings are invariant violations.
    #[test]
    fn test_unknown_autonomy_rejected() {
        let request = AdvanceRequest {
            autonomy: Some("yolo".to_string()),
            ..AdvanceRequest::default()
        };
        let result =
            validate_advance_inputs(&fresh_mode(), &workflow(), &Map::new(), &request, DEFAULTS);
        assert!(matches!(result, Err(AdvanceError::InvariantViolation { .. })));
    }

    /// Tests a complete snapshot yields no pending step.
    #[test]
    fn test_complete_snapshot_no_pending() {
        let mode = AdvanceMode::Fresh {
            source_node_id: NodeId::new("node_src"),
            snapshot: ExecutionSnapshot::from_state(EngineState::Complete),
        };
        let result = validate_advance_inputs(
            &mode,
            &workflow(),
            &Map::new(),
            &AdvanceRequest::default(),
            DEFAULTS,
        );
        assert!(matches!(result, Err(AdvanceError::NoPendingStep)));
    }

    /// Tests artifact outputs are sorted by digest.
    #[test]
    fn test_artifacts_sorted_by_digest() {
        let attempt = crate::core::AttemptId::new("attempt_t");
        let artifacts = vec![json!({"z": 1}), json!({"a": 1})];
        let outputs = normalize_outputs(&attempt, None, false, None, &artifacts).unwrap();
        assert_eq!(outputs.len(), 2);
        let digests: Vec<String> = outputs
            .iter()
            .filter_map(|output| match &output.payload {
                crate::core::OutputPayload::ArtifactJsonV1 {
                    sha256,
                    ..
                } => Some(sha256.to_string()),
                crate::core::OutputPayload::NotesV1 { .. } => None,
            })
            .collect();
        let mut sorted = digests.clone();
        sorted.sort();
        assert_eq!(digests, sorted);
    }

    /// Tests the recap is suppressed without notes.
    #[test]
    fn test_recap_requires_notes() {
        let attempt = crate::core::AttemptId::new("attempt_t");
        let outputs = normalize_outputs(&attempt, None, false, None, &[]).unwrap();
        assert!(outputs.is_empty());
    }
}
