// waymark-core/src/core/workflow.rs
// ============================================================================
// Module: Waymark Workflow Specifications
// Description: Compiled workflow model with steps, loops, and contracts.
// Purpose: Provide the validated, content-addressed program the engine runs.
// Dependencies: serde, crate::core::{hashing, identifiers}
// ============================================================================

//! ## Overview
//! A workflow is an ordered tree of steps and bounded loops. Each step may
//! carry a run condition, context-key and capability requirements, validation
//! criteria, and an output contract. Workflows are validated once, hashed
//! over canonical bytes, and pinned immutably; the engine only ever executes
//! a pinned workflow by its hash.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::hashing::DigestError;
use crate::core::hashing::WorkflowHash;
use crate::core::identifiers::LoopId;
use crate::core::identifiers::StepId;
use crate::core::identifiers::WorkflowId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Schema version accepted for workflow specifications.
pub const WORKFLOW_SCHEMA_VERSION: u32 = 1;

// ============================================================================
// SECTION: Execution Preferences
// ============================================================================

/// Autonomy mode controlling whether detected reasons block an advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyMode {
    /// Block on any effective reason and wait for the operator.
    Guided,
    /// Block on any effective reason, tuned for user-dependency stops.
    FullAutoStopOnUserDeps,
    /// Never block; record gaps and continue.
    FullAutoNeverStop,
}

impl AutonomyMode {
    /// Narrows a free string into an autonomy mode.
    #[must_use]
    pub fn narrow(value: &str) -> Option<Self> {
        match value {
            "guided" => Some(Self::Guided),
            "full_auto_stop_on_user_deps" => Some(Self::FullAutoStopOnUserDeps),
            "full_auto_never_stop" => Some(Self::FullAutoNeverStop),
            _ => None,
        }
    }

    /// Returns the stable string label for the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Guided => "guided",
            Self::FullAutoStopOnUserDeps => "full_auto_stop_on_user_deps",
            Self::FullAutoNeverStop => "full_auto_never_stop",
        }
    }

    /// Returns an ordinal for comparing autonomy strength.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Guided => 0,
            Self::FullAutoStopOnUserDeps => 1,
            Self::FullAutoNeverStop => 2,
        }
    }
}

/// Risk policy applied by guardrails when classifying reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskPolicy {
    /// Every detected reason stays blocking.
    Conservative,
    /// Every detected reason stays blocking.
    Balanced,
    /// Non-critical reasons are demoted to advisory.
    Aggressive,
}

impl RiskPolicy {
    /// Narrows a free string into a risk policy.
    #[must_use]
    pub fn narrow(value: &str) -> Option<Self> {
        match value {
            "conservative" => Some(Self::Conservative),
            "balanced" => Some(Self::Balanced),
            "aggressive" => Some(Self::Aggressive),
            _ => None,
        }
    }

    /// Returns the stable string label for the policy.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Balanced => "balanced",
            Self::Aggressive => "aggressive",
        }
    }

    /// Returns an ordinal for comparing risk appetite.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Conservative => 0,
            Self::Balanced => 1,
            Self::Aggressive => 2,
        }
    }
}

/// Preferences the workflow author recommends for execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendedPrefs {
    /// Recommended autonomy mode.
    pub autonomy: AutonomyMode,
    /// Recommended risk policy.
    pub risk_policy: RiskPolicy,
}

// ============================================================================
// SECTION: Step Contracts
// ============================================================================

/// Condition gating whether a step runs for the current context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCondition {
    /// Context key the condition inspects.
    pub context_key: String,
    /// Expected value; absent means a truthiness check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<Value>,
}

/// Output contract a step imposes on the agent's submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputContract {
    /// Stable reference naming the contract.
    pub contract_ref: String,
    /// Whether satisfying the contract is required to advance.
    pub required: bool,
}

/// Validation criteria evaluated against submitted notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationCriteria {
    /// Stable reference naming the criteria.
    pub criteria_ref: String,
    /// Criteria body handed to the validation engine.
    pub spec: Value,
}

/// Result returned by the validation engine (or synthesized on block).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether the submission satisfied the criteria.
    pub valid: bool,
    /// Issues preventing validity.
    #[serde(default)]
    pub issues: Vec<String>,
    /// Suggested remediations.
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// Non-fatal warnings.
    #[serde(default)]
    pub warnings: Vec<String>,
}

// ============================================================================
// SECTION: Steps and Loops
// ============================================================================

/// A single executable step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Step identifier, unique across the workflow.
    pub step_id: StepId,
    /// Human-readable title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Optional condition gating execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_condition: Option<RunCondition>,
    /// Context keys that must be present before the step can complete.
    #[serde(default)]
    pub requires_context_keys: Vec<String>,
    /// Capabilities the executing agent must hold.
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    /// Marks work only a human can perform, with a short explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_only_dependency: Option<String>,
    /// Validation criteria for submitted notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_criteria: Option<ValidationCriteria>,
    /// Output contract for the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_contract: Option<OutputContract>,
}

/// A bounded loop over a body of step nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopSpec {
    /// Loop identifier, unique across the workflow.
    pub loop_id: LoopId,
    /// Upper bound on iterations; at least one.
    pub max_iterations: u32,
    /// Context key that, when truthy, exits the loop early.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until_context_key: Option<String>,
    /// Ordered loop body.
    pub body: Vec<StepNode>,
}

/// A node in the workflow program: a step or a loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepNode {
    /// Executable step.
    Step(StepSpec),
    /// Bounded loop.
    Loop(LoopSpec),
}

// ============================================================================
// SECTION: Workflow Specification
// ============================================================================

/// A validated, hashable workflow program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    /// Schema version; always [`WORKFLOW_SCHEMA_VERSION`].
    pub v: u32,
    /// Workflow identifier.
    pub workflow_id: WorkflowId,
    /// Human-readable title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Author-recommended execution preferences.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended: Option<RecommendedPrefs>,
    /// Ordered top-level program.
    pub steps: Vec<StepNode>,
}

impl WorkflowSpec {
    /// Validates identifiers, uniqueness, and loop bounds.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] when the specification is malformed.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.v != WORKFLOW_SCHEMA_VERSION {
            return Err(WorkflowError::UnsupportedVersion {
                version: self.v,
            });
        }
        self.workflow_id
            .validate()
            .map_err(|_| WorkflowError::InvalidIdentifier {
                identifier: self.workflow_id.to_string(),
            })?;
        let mut step_ids = BTreeSet::new();
        let mut loop_ids = BTreeSet::new();
        validate_nodes(&self.steps, &mut step_ids, &mut loop_ids)
    }

    /// Computes the workflow's content hash over canonical bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError`] when canonicalization fails.
    pub fn hash(&self) -> Result<WorkflowHash, DigestError> {
        use crate::core::hashing::ContentDigest;
        Ok(WorkflowHash::from_digest(ContentDigest::of_canonical_json(self)?))
    }

    /// Finds a step specification by identifier anywhere in the program.
    #[must_use]
    pub fn find_step(&self, step_id: &StepId) -> Option<&StepSpec> {
        find_step_in(&self.steps, step_id)
    }
}

/// Recursively validates a node list.
fn validate_nodes(
    nodes: &[StepNode],
    step_ids: &mut BTreeSet<String>,
    loop_ids: &mut BTreeSet<String>,
) -> Result<(), WorkflowError> {
    for node in nodes {
        match node {
            StepNode::Step(step) => {
                step.step_id
                    .validate()
                    .map_err(|_| WorkflowError::InvalidIdentifier {
                        identifier: step.step_id.to_string(),
                    })?;
                if !step_ids.insert(step.step_id.to_string()) {
                    return Err(WorkflowError::DuplicateStepId {
                        step_id: step.step_id.clone(),
                    });
                }
            }
            StepNode::Loop(loop_spec) => {
                loop_spec
                    .loop_id
                    .validate()
                    .map_err(|_| WorkflowError::InvalidIdentifier {
                        identifier: loop_spec.loop_id.to_string(),
                    })?;
                if !loop_ids.insert(loop_spec.loop_id.to_string()) {
                    return Err(WorkflowError::DuplicateLoopId {
                        loop_id: loop_spec.loop_id.clone(),
                    });
                }
                if loop_spec.max_iterations == 0 {
                    return Err(WorkflowError::ZeroLoopIterations {
                        loop_id: loop_spec.loop_id.clone(),
                    });
                }
                if loop_spec.body.is_empty() {
                    return Err(WorkflowError::EmptyLoopBody {
                        loop_id: loop_spec.loop_id.clone(),
                    });
                }
                validate_nodes(&loop_spec.body, step_ids, loop_ids)?;
            }
        }
    }
    Ok(())
}

/// Recursively searches a node list for a step by identifier.
fn find_step_in<'a>(nodes: &'a [StepNode], step_id: &StepId) -> Option<&'a StepSpec> {
    for node in nodes {
        match node {
            StepNode::Step(step) => {
                if step.step_id == *step_id {
                    return Some(step);
                }
            }
            StepNode::Loop(loop_spec) => {
                if let Some(found) = find_step_in(&loop_spec.body, step_id) {
                    return Some(found);
                }
            }
        }
    }
    None
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when validating a workflow specification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    /// Schema version is not supported.
    #[error("unsupported workflow schema version {version}")]
    UnsupportedVersion {
        /// Rejected version.
        version: u32,
    },
    /// An identifier is not delimiter-safe.
    #[error("invalid workflow identifier: {identifier}")]
    InvalidIdentifier {
        /// Rejected identifier text.
        identifier: String,
    },
    /// A step identifier appears more than once.
    #[error("duplicate step id {step_id}")]
    DuplicateStepId {
        /// Duplicated step id.
        step_id: StepId,
    },
    /// A loop identifier appears more than once.
    #[error("duplicate loop id {loop_id}")]
    DuplicateLoopId {
        /// Duplicated loop id.
        loop_id: LoopId,
    },
    /// A loop declares zero iterations.
    #[error("loop {loop_id} declares zero iterations")]
    ZeroLoopIterations {
        /// Offending loop id.
        loop_id: LoopId,
    },
    /// A loop body is empty.
    #[error("loop {loop_id} has an empty body")]
    EmptyLoopBody {
        /// Offending loop id.
        loop_id: LoopId,
    },
}
