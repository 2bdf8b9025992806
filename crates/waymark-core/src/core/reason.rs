// waymark-core/src/core/reason.rs
// ============================================================================
// Module: Waymark Reasons and Blockers
// Description: Closed reason model, guardrails, and budgeted blocker reports.
// Purpose: Turn step output requirements into proceed/blocked decisions.
// Dependencies: serde, crate::core::{identifiers, workflow}
// ============================================================================

//! ## Overview
//! Reasons are the closed vocabulary for "why an advance cannot proceed".
//! Detection maps an output requirement onto reasons; guardrails filter by
//! risk policy; the autonomy mode decides whether the surviving reasons
//! block or are recorded as gaps. Blockers are the budget-enforced,
//! UI-facing projection of reasons. Everything in this module is pure.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::GapId;
use crate::core::identifiers::StepId;
use crate::core::workflow::AutonomyMode;
use crate::core::workflow::OutputContract;
use crate::core::workflow::RiskPolicy;
use crate::core::workflow::ValidationResult;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum UTF-8 bytes allowed in a blocker message.
pub const MAX_BLOCKER_MESSAGE_BYTES: usize = 2048;
/// Maximum UTF-8 bytes allowed in a blocker suggested fix.
pub const MAX_BLOCKER_SUGGESTED_FIX_BYTES: usize = 1024;
/// Maximum number of blockers in a single report.
pub const MAX_BLOCKERS: usize = 32;
/// Maximum length accepted for a contract reference.
const MAX_CONTRACT_REF_LEN: usize = 256;

// ============================================================================
// SECTION: Reasons
// ============================================================================

/// Closed set of reasons a step cannot (yet) advance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReasonV1 {
    /// The step's required output is missing entirely.
    MissingRequiredOutput {
        /// Contract the output was required by.
        contract_ref: String,
    },
    /// The step's output failed validation against its criteria.
    InvalidRequiredOutput {
        /// Contract or criteria reference the output failed.
        contract_ref: String,
        /// Issues reported by validation.
        issues: Vec<String>,
    },
    /// A context key the step requires is absent.
    MissingContextKey {
        /// Missing context key.
        key: String,
    },
    /// A capability the step requires is unavailable to the agent.
    RequiredCapabilityUnavailable {
        /// Missing capability name.
        capability: String,
    },
    /// The step depends on work only a human can perform.
    UserOnlyDependency {
        /// Short explanation of the dependency.
        detail: String,
        /// Step carrying the dependency.
        step_id: StepId,
    },
    /// An internal invariant was violated while evaluating the step.
    InvariantViolation {
        /// Invariant description.
        detail: String,
    },
    /// Durable storage failed an integrity check.
    StorageCorruptionDetected {
        /// Corruption description.
        detail: String,
    },
    /// Evaluation itself failed (validation engine or interpreter).
    EvaluationError {
        /// Failure description.
        detail: String,
    },
}

impl ReasonV1 {
    /// Returns the stable code label for the reason.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingRequiredOutput { .. } => "missing_required_output",
            Self::InvalidRequiredOutput { .. } => "invalid_required_output",
            Self::MissingContextKey { .. } => "missing_context_key",
            Self::RequiredCapabilityUnavailable { .. } => "required_capability_unavailable",
            Self::UserOnlyDependency { .. } => "user_only_dependency",
            Self::InvariantViolation { .. } => "invariant_violation",
            Self::StorageCorruptionDetected { .. } => "storage_corruption_detected",
            Self::EvaluationError { .. } => "evaluation_error",
        }
    }

    /// Returns the gap category recorded when autonomy continues past this reason.
    #[must_use]
    pub const fn gap_category(&self) -> &'static str {
        match self {
            Self::MissingRequiredOutput { .. } | Self::InvalidRequiredOutput { .. } => {
                "contract_violation"
            }
            Self::MissingContextKey { .. } => "context_gap",
            Self::RequiredCapabilityUnavailable { .. } => "capability_gap",
            Self::UserOnlyDependency { .. } => "user_dependency",
            Self::InvariantViolation { .. } => "invariant",
            Self::StorageCorruptionDetected { .. } => "storage",
            Self::EvaluationError { .. } => "evaluation",
        }
    }

    /// Returns the gap severity derived from the reason.
    #[must_use]
    pub const fn gap_severity(&self) -> GapSeverity {
        match self {
            Self::MissingContextKey { .. } | Self::RequiredCapabilityUnavailable { .. } => {
                GapSeverity::Warning
            }
            Self::MissingRequiredOutput { .. }
            | Self::InvalidRequiredOutput { .. }
            | Self::UserOnlyDependency { .. }
            | Self::InvariantViolation { .. }
            | Self::StorageCorruptionDetected { .. }
            | Self::EvaluationError { .. } => GapSeverity::Critical,
        }
    }

    /// Returns true when aggressive guardrails may demote the reason.
    #[must_use]
    const fn demotable(&self) -> bool {
        matches!(
            self,
            Self::MissingContextKey { .. } | Self::RequiredCapabilityUnavailable { .. }
        )
    }
}

// ============================================================================
// SECTION: Output Requirement
// ============================================================================

/// A user-only dependency surfaced by the pending step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserOnlyDependency {
    /// Short explanation of the dependency.
    pub detail: String,
    /// Step carrying the dependency.
    pub step_id: StepId,
}

/// Everything reason detection needs to know about the step's submission.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutputRequirement {
    /// Output contract declared by the step, if any.
    pub contract: Option<OutputContract>,
    /// Criteria reference when validation criteria are declared.
    pub criteria_ref: Option<String>,
    /// Whether the agent submitted recap notes.
    pub has_notes: bool,
    /// Number of submitted artifacts.
    pub artifact_count: usize,
    /// Validation engine result, when the engine ran.
    pub validation: Option<ValidationResult>,
    /// Context keys the step requires that the merged context lacks.
    pub missing_context_keys: Vec<String>,
    /// Capabilities the step requires that the agent lacks.
    pub unavailable_capabilities: Vec<String>,
    /// User-only dependency declared by the step, if any.
    pub user_only_dependency: Option<UserOnlyDependency>,
}

/// Maps an output requirement onto zero or more blocking reasons.
#[must_use]
pub fn detect_blocking_reasons(requirement: &OutputRequirement) -> Vec<ReasonV1> {
    let mut reasons = Vec::new();

    if let Some(dependency) = &requirement.user_only_dependency {
        reasons.push(ReasonV1::UserOnlyDependency {
            detail: dependency.detail.clone(),
            step_id: dependency.step_id.clone(),
        });
    }

    if let Some(contract) = &requirement.contract {
        if contract.required && !requirement.has_notes && requirement.artifact_count == 0 {
            reasons.push(ReasonV1::MissingRequiredOutput {
                contract_ref: contract.contract_ref.clone(),
            });
        }
    }

    if let Some(validation) = &requirement.validation {
        if !validation.valid {
            let contract_ref = requirement
                .contract
                .as_ref()
                .map(|contract| contract.contract_ref.clone())
                .or_else(|| requirement.criteria_ref.clone())
                .unwrap_or_else(|| "unspecified".to_string());
            reasons.push(ReasonV1::InvalidRequiredOutput {
                contract_ref,
                issues: validation.issues.clone(),
            });
        }
    }

    for key in &requirement.missing_context_keys {
        reasons.push(ReasonV1::MissingContextKey {
            key: key.clone(),
        });
    }

    for capability in &requirement.unavailable_capabilities {
        reasons.push(ReasonV1::RequiredCapabilityUnavailable {
            capability: capability.clone(),
        });
    }

    reasons
}

// ============================================================================
// SECTION: Guardrails and Blocking Decision
// ============================================================================

/// Reasons split by the guardrail pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GuardrailSplit {
    /// Reasons that remain blocking.
    pub blocking: Vec<ReasonV1>,
    /// Reasons demoted to advisory.
    pub advisory: Vec<ReasonV1>,
}

/// Filters reasons by the effective risk policy.
#[must_use]
pub fn apply_guardrails(risk_policy: RiskPolicy, reasons: &[ReasonV1]) -> GuardrailSplit {
    let mut split = GuardrailSplit::default();
    for reason in reasons {
        if risk_policy == RiskPolicy::Aggressive && reason.demotable() {
            split.advisory.push(reason.clone());
        } else {
            split.blocking.push(reason.clone());
        }
    }
    split
}

/// Decides whether the surviving reasons block under the autonomy mode.
#[must_use]
pub fn should_block(autonomy: AutonomyMode, reasons: &[ReasonV1]) -> bool {
    if reasons.is_empty() {
        return false;
    }
    match autonomy {
        AutonomyMode::FullAutoNeverStop => false,
        AutonomyMode::FullAutoStopOnUserDeps | AutonomyMode::Guided => true,
    }
}

// ============================================================================
// SECTION: Blockers
// ============================================================================

/// Pointer directing a blocker at the thing that must change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockerPointer {
    /// Points at an output contract.
    Contract {
        /// Contract reference.
        contract_ref: String,
    },
    /// Points at a context key.
    ContextKey {
        /// Context key.
        key: String,
    },
    /// Points at a missing capability.
    Capability {
        /// Capability name.
        capability: String,
    },
    /// Points at a step.
    Step {
        /// Step identifier.
        step_id: StepId,
    },
    /// Points at the engine itself.
    Engine,
}

impl BlockerPointer {
    /// Returns the stable kind label used for sorting.
    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self {
            Self::Contract { .. } => "contract",
            Self::ContextKey { .. } => "context_key",
            Self::Capability { .. } => "capability",
            Self::Step { .. } => "step",
            Self::Engine => "engine",
        }
    }

    /// Returns the stable payload text used for sorting.
    #[must_use]
    pub fn stable(&self) -> &str {
        match self {
            Self::Contract {
                contract_ref,
            } => contract_ref,
            Self::ContextKey {
                key,
            } => key,
            Self::Capability {
                capability,
            } => capability,
            Self::Step {
                step_id,
            } => step_id.as_str(),
            Self::Engine => "",
        }
    }
}

/// UI-facing projection of a blocking reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockerV1 {
    /// Stable blocker code (the reason code).
    pub code: String,
    /// Pointer at the thing that must change.
    pub pointer: BlockerPointer,
    /// Human-readable message within [`MAX_BLOCKER_MESSAGE_BYTES`].
    pub message: String,
    /// Optional remediation hint within [`MAX_BLOCKER_SUGGESTED_FIX_BYTES`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
}

/// Budgeted, deterministically ordered blocker report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockerReport {
    /// Blockers sorted by `(code, pointer kind, pointer payload)`.
    pub blockers: Vec<BlockerV1>,
}

/// Errors raised when building blockers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReasonError {
    /// An identifier embedded in the reason is not delimiter-safe.
    #[error("reason carries an id that is not delimiter-safe: {value}")]
    InvalidDelimiterSafeId {
        /// Rejected identifier text.
        value: String,
    },
    /// A contract reference is empty, oversized, or carries whitespace.
    #[error("invalid contract ref: {value}")]
    InvalidContractRef {
        /// Rejected contract reference.
        value: String,
    },
    /// The blocker message exceeds its byte budget.
    #[error("blocker message exceeds {MAX_BLOCKER_MESSAGE_BYTES} bytes")]
    BlockerMessageTooLarge,
    /// The blocker suggested fix exceeds its byte budget.
    #[error("blocker suggested fix exceeds {MAX_BLOCKER_SUGGESTED_FIX_BYTES} bytes")]
    BlockerSuggestedFixTooLarge,
    /// The report cannot be built from the given reasons.
    #[error("blocker report invariant violation: {detail}")]
    InvariantViolation {
        /// Invariant description.
        detail: String,
    },
}

/// Validates a contract reference for use in blockers and issues.
///
/// # Errors
///
/// Returns [`ReasonError::InvalidContractRef`] when the reference is empty,
/// oversized, or contains whitespace or control characters.
pub fn validate_contract_ref(value: &str) -> Result<(), ReasonError> {
    let well_formed = !value.is_empty()
        && value.len() <= MAX_CONTRACT_REF_LEN
        && value.bytes().all(|b| b.is_ascii_graphic());
    if well_formed {
        Ok(())
    } else {
        Err(ReasonError::InvalidContractRef {
            value: value.to_string(),
        })
    }
}

/// Projects one reason into a blocker, enforcing budgets and id safety.
///
/// # Errors
///
/// Returns [`ReasonError`] when embedded ids are malformed or a budget is
/// exceeded.
pub fn reason_to_blocker(reason: &ReasonV1) -> Result<BlockerV1, ReasonError> {
    let (pointer, message, suggested_fix) = match reason {
        ReasonV1::MissingRequiredOutput {
            contract_ref,
        } => {
            validate_contract_ref(contract_ref)?;
            (
                BlockerPointer::Contract {
                    contract_ref: contract_ref.clone(),
                },
                format!("Missing required output for contractRef={contract_ref}"),
                Some("Submit recap notes or at least one artifact for this step.".to_string()),
            )
        }
        ReasonV1::InvalidRequiredOutput {
            contract_ref,
            issues,
        } => {
            validate_contract_ref(contract_ref)?;
            (
                BlockerPointer::Contract {
                    contract_ref: contract_ref.clone(),
                },
                format!(
                    "Output failed validation for contractRef={contract_ref}: {}",
                    issues.join("; ")
                ),
                Some("Address the validation issues and retry the step.".to_string()),
            )
        }
        ReasonV1::MissingContextKey {
            key,
        } => (
            BlockerPointer::ContextKey {
                key: key.clone(),
            },
            format!("Required context key is missing: {key}"),
            Some(format!("Provide a value for context key {key} and retry.")),
        ),
        ReasonV1::RequiredCapabilityUnavailable {
            capability,
        } => (
            BlockerPointer::Capability {
                capability: capability.clone(),
            },
            format!("Required capability is unavailable: {capability}"),
            None,
        ),
        ReasonV1::UserOnlyDependency {
            detail,
            step_id,
        } => {
            step_id.validate().map_err(|_| ReasonError::InvalidDelimiterSafeId {
                value: step_id.to_string(),
            })?;
            (
                BlockerPointer::Step {
                    step_id: step_id.clone(),
                },
                format!("Step {step_id} depends on work only a user can do: {detail}"),
                None,
            )
        }
        ReasonV1::InvariantViolation {
            detail,
        } => (BlockerPointer::Engine, format!("Invariant violation: {detail}"), None),
        ReasonV1::StorageCorruptionDetected {
            detail,
        } => (BlockerPointer::Engine, format!("Storage corruption detected: {detail}"), None),
        ReasonV1::EvaluationError {
            detail,
        } => (BlockerPointer::Engine, format!("Evaluation failed: {detail}"), None),
    };

    if message.len() > MAX_BLOCKER_MESSAGE_BYTES {
        return Err(ReasonError::BlockerMessageTooLarge);
    }
    if let Some(fix) = &suggested_fix {
        if fix.len() > MAX_BLOCKER_SUGGESTED_FIX_BYTES {
            return Err(ReasonError::BlockerSuggestedFixTooLarge);
        }
    }

    Ok(BlockerV1 {
        code: reason.code().to_string(),
        pointer,
        message,
        suggested_fix,
    })
}

/// Builds the budgeted report for a non-empty reason set.
///
/// # Errors
///
/// Returns [`ReasonError::InvariantViolation`] when no reasons are supplied,
/// or the first blocker construction error otherwise.
pub fn build_blocker_report(reasons: &[ReasonV1]) -> Result<BlockerReport, ReasonError> {
    if reasons.is_empty() {
        return Err(ReasonError::InvariantViolation {
            detail: "blocker report requires at least one reason".to_string(),
        });
    }
    let mut blockers = reasons.iter().map(reason_to_blocker).collect::<Result<Vec<_>, _>>()?;
    blockers.sort_by(|a, b| {
        (a.code.as_str(), a.pointer.kind_label(), a.pointer.stable()).cmp(&(
            b.code.as_str(),
            b.pointer.kind_label(),
            b.pointer.stable(),
        ))
    });
    blockers.truncate(MAX_BLOCKERS);
    Ok(BlockerReport {
        blockers,
    })
}

// ============================================================================
// SECTION: Gaps
// ============================================================================

/// Severity of a recorded gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapSeverity {
    /// Worth surfacing, not fatal.
    Warning,
    /// A requirement was skipped outright.
    Critical,
}

/// Structured description of why a gap was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapReason {
    /// Gap category (for example `contract_violation`).
    pub category: String,
    /// Gap detail (the reason code or a recommendation note).
    pub detail: String,
}

/// Record of an unsatisfied requirement when autonomy continued anyway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapV1 {
    /// Gap identifier.
    pub gap_id: GapId,
    /// Derived severity.
    pub severity: GapSeverity,
    /// Structured reason.
    pub reason: GapReason,
    /// Step the gap was recorded against, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
}

impl GapV1 {
    /// Builds the gap recorded when autonomy continues past a reason.
    #[must_use]
    pub fn from_reason(gap_id: GapId, reason: &ReasonV1, step_id: Option<StepId>) -> Self {
        Self {
            gap_id,
            severity: reason.gap_severity(),
            reason: GapReason {
                category: reason.gap_category().to_string(),
                detail: reason.code().to_string(),
            },
            step_id,
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use crate::core::workflow::AutonomyMode;
    use crate::core::workflow::RiskPolicy;

    use super::OutputRequirement;
    use super::ReasonV1;
    use super::apply_guardrails;
    use super::build_blocker_report;
    use super::detect_blocking_reasons;
    use super::should_block;

    /// Tests empty reasons never block.
    #[test]
    fn test_empty_reasons_never_block() {
        assert!(!should_block(AutonomyMode::Guided, &[]));
        assert!(!should_block(AutonomyMode::FullAutoNeverStop, &[]));
        assert!(!should_block(AutonomyMode::FullAutoStopOnUserDeps, &[]));
    }

    /// Tests never-stop autonomy never blocks.
    #[test]
    fn test_never_stop_never_blocks() {
        let reasons = vec![ReasonV1::MissingContextKey {
            key: "plan".to_string(),
        }];
        assert!(!should_block(AutonomyMode::FullAutoNeverStop, &reasons));
        assert!(should_block(AutonomyMode::Guided, &reasons));
        assert!(should_block(AutonomyMode::FullAutoStopOnUserDeps, &reasons));
    }

    /// Tests aggressive guardrails demote context and capability reasons.
    #[test]
    fn test_aggressive_demotes_non_critical() {
        let reasons = vec![
            ReasonV1::MissingContextKey {
                key: "plan".to_string(),
            },
            ReasonV1::MissingRequiredOutput {
                contract_ref: "contract-1".to_string(),
            },
        ];
        let split = apply_guardrails(RiskPolicy::Aggressive, &reasons);
        assert_eq!(split.advisory.len(), 1);
        assert_eq!(split.blocking.len(), 1);
        let conservative = apply_guardrails(RiskPolicy::Conservative, &reasons);
        assert_eq!(conservative.blocking.len(), 2);
        assert!(conservative.advisory.is_empty());
    }

    /// Tests a missing required output is detected.
    #[test]
    fn test_detect_missing_required_output() {
        let requirement = OutputRequirement {
            contract: Some(crate::core::workflow::OutputContract {
                contract_ref: "contract-1".to_string(),
                required: true,
            }),
            ..OutputRequirement::default()
        };
        let reasons = detect_blocking_reasons(&requirement);
        assert_eq!(
            reasons,
            vec![ReasonV1::MissingRequiredOutput {
                contract_ref: "contract-1".to_string(),
            }]
        );
    }

    /// Tests report ordering is deterministic ASCII order.
    #[test]
    fn test_report_sorted_by_code_then_pointer() {
        let reasons = vec![
            ReasonV1::RequiredCapabilityUnavailable {
                capability: "web".to_string(),
            },
            ReasonV1::MissingContextKey {
                key: "b".to_string(),
            },
            ReasonV1::MissingContextKey {
                key: "a".to_string(),
            },
        ];
        let report = build_blocker_report(&reasons).unwrap();
        let codes: Vec<&str> = report.blockers.iter().map(|b| b.code.as_str()).collect();
        assert_eq!(
            codes,
            vec!["missing_context_key", "missing_context_key", "required_capability_unavailable"]
        );
        assert_eq!(report.blockers[0].pointer.stable(), "a");
        assert_eq!(report.blockers[1].pointer.stable(), "b");
    }

    /// Tests an empty reason set cannot produce a report.
    #[test]
    fn test_report_requires_primary_reason() {
        assert!(build_blocker_report(&[]).is_err());
    }
}
