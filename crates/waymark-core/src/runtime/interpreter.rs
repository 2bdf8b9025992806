// waymark-core/src/runtime/interpreter.rs
// ============================================================================
// Module: Waymark Workflow Interpreter
// Description: Pure next-step selection over workflow programs.
// Purpose: Derive the next pending step with a budgeted decision trace.
// Dependencies: crate::core, crate::runtime::state
// ============================================================================

//! ## Overview
//! The interpreter walks the workflow program forward from a completed step:
//! run conditions can skip steps, loops re-enter their body until their exit
//! key turns truthy or the iteration bound is hit, and exhausting the
//! program completes the run. Selection is deterministic for a given
//! workflow, position, and context, and every decision lands in the trace.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::core::EngineState;
use crate::core::LoopFrame;
use crate::core::LoopSpec;
use crate::core::PendingStep;
use crate::core::RunCondition;
use crate::core::StepId;
use crate::core::StepNode;
use crate::core::StepSpec;
use crate::core::TraceEntry;
use crate::core::TraceEntryKind;
use crate::core::WorkflowSpec;
use crate::core::budget_trace;
use crate::core::context_value_truthy;
use crate::runtime::state::AdvancedState;
use crate::runtime::state::StepCompleted;

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// Result of one interpreter evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextOutcome {
    /// New engine state: running with a pending step, or complete.
    pub state: EngineState,
    /// Budgeted decision trace explaining the selection.
    pub trace: Vec<TraceEntry>,
}

/// Errors raised while interpreting a workflow.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NextError {
    /// The completed step does not exist at the recorded loop position.
    #[error("completed step not found at its loop position: {step_id}")]
    UnknownStep {
        /// Step that could not be located.
        step_id: String,
    },
}

// ============================================================================
// SECTION: Entry Points
// ============================================================================

/// Derives the initial engine state for a freshly started run.
#[must_use]
pub fn initial_state(workflow: &WorkflowSpec, context: &Map<String, Value>) -> NextOutcome {
    let mut trace = Vec::new();
    let mut prefix = Vec::new();
    let state = match scan_from(&workflow.steps, 0, &mut prefix, context, &mut trace) {
        Some(pending) => EngineState::Running {
            pending_step: pending,
        },
        None => EngineState::Complete,
    };
    NextOutcome {
        state,
        trace: budget_trace(trace),
    }
}

/// Derives the state after a completed step.
///
/// # Errors
///
/// Returns [`NextError::UnknownStep`] when the completed step cannot be
/// located at its recorded loop position.
pub fn next_state(
    workflow: &WorkflowSpec,
    advanced: &AdvancedState,
    context: &Map<String, Value>,
) -> Result<NextOutcome, NextError> {
    let completed = &advanced.completed;
    let path = locate(&workflow.steps, completed).ok_or_else(|| NextError::UnknownStep {
        step_id: completed.step_id.to_string(),
    })?;

    let mut trace = Vec::new();
    let mut prefix = Vec::new();
    let pending = resume(
        &workflow.steps,
        &path,
        &completed.loop_path,
        &mut prefix,
        context,
        &mut trace,
    );
    let state = match pending {
        Some(pending) => EngineState::Running {
            pending_step: pending,
        },
        None => EngineState::Complete,
    };
    Ok(NextOutcome {
        state,
        trace: budget_trace(trace),
    })
}

// ============================================================================
// SECTION: Traversal
// ============================================================================

/// Locates the index path of a completed step, following its loop frames.
fn locate(nodes: &[StepNode], completed: &StepCompleted) -> Option<Vec<usize>> {
    locate_inner(nodes, &completed.step_id, &completed.loop_path)
}

/// Recursive helper for [`locate`].
fn locate_inner(nodes: &[StepNode], step_id: &StepId, frames: &[LoopFrame]) -> Option<Vec<usize>> {
    match frames.first() {
        None => nodes.iter().position(|node| match node {
            StepNode::Step(step) => step.step_id == *step_id,
            StepNode::Loop(_) => false,
        }).map(|index| vec![index]),
        Some(frame) => {
            let index = nodes.iter().position(|node| match node {
                StepNode::Loop(loop_spec) => loop_spec.loop_id == frame.loop_id,
                StepNode::Step(_) => false,
            })?;
            let StepNode::Loop(loop_spec) = &nodes[index] else {
                return None;
            };
            let mut path = vec![index];
            path.extend(locate_inner(&loop_spec.body, step_id, &frames[1..])?);
            Some(path)
        }
    }
}

/// Resumes scanning after a completed step, unwinding loop frames as needed.
fn resume(
    nodes: &[StepNode],
    path: &[usize],
    frames: &[LoopFrame],
    prefix: &mut Vec<LoopFrame>,
    context: &Map<String, Value>,
    trace: &mut Vec<TraceEntry>,
) -> Option<PendingStep> {
    let index = *path.first()?;
    if path.len() == 1 {
        return scan_from(nodes, index + 1, prefix, context, trace);
    }

    let StepNode::Loop(loop_spec) = &nodes[index] else {
        return None;
    };
    let frame = frames.first()?.clone();
    prefix.push(frame.clone());
    if let Some(pending) = resume(&loop_spec.body, &path[1..], &frames[1..], prefix, context, trace)
    {
        return Some(pending);
    }
    prefix.pop();

    // The body of this iteration is exhausted; decide exit or re-entry.
    if let Some(pending) =
        continue_or_exit_loop(loop_spec, frame.iteration, prefix, context, trace)
    {
        return Some(pending);
    }
    scan_from(nodes, index + 1, prefix, context, trace)
}

/// Re-enters a loop body or exits, honoring the until key and the bound.
fn continue_or_exit_loop(
    loop_spec: &LoopSpec,
    iteration: u32,
    prefix: &mut Vec<LoopFrame>,
    context: &Map<String, Value>,
    trace: &mut Vec<TraceEntry>,
) -> Option<PendingStep> {
    if until_satisfied(loop_spec, context) {
        trace.push(loop_trace(
            TraceEntryKind::ExitedLoop,
            loop_spec,
            format!("exited loop {} (until key satisfied)", loop_spec.loop_id),
        ));
        return None;
    }
    if iteration >= loop_spec.max_iterations {
        trace.push(loop_trace(
            TraceEntryKind::ExitedLoop,
            loop_spec,
            format!("exited loop {} (iteration bound reached)", loop_spec.loop_id),
        ));
        return None;
    }

    let next_frame = LoopFrame {
        loop_id: loop_spec.loop_id.clone(),
        iteration: iteration + 1,
    };
    trace.push(loop_trace(
        TraceEntryKind::EnteredLoop,
        loop_spec,
        format!("entered loop {} iteration {}", loop_spec.loop_id, next_frame.iteration),
    ));
    prefix.push(next_frame);
    if let Some(pending) = scan_from(&loop_spec.body, 0, prefix, context, trace) {
        return Some(pending);
    }
    prefix.pop();
    trace.push(loop_trace(
        TraceEntryKind::ExitedLoop,
        loop_spec,
        format!("exited loop {} (no runnable step in body)", loop_spec.loop_id),
    ));
    None
}

/// Scans forward for the next runnable step at one nesting level.
fn scan_from(
    nodes: &[StepNode],
    start: usize,
    prefix: &mut Vec<LoopFrame>,
    context: &Map<String, Value>,
    trace: &mut Vec<TraceEntry>,
) -> Option<PendingStep> {
    for node in nodes.iter().skip(start) {
        match node {
            StepNode::Step(step) => {
                if step_runnable(step, context, trace) {
                    let pending = PendingStep {
                        step_id: step.step_id.clone(),
                        loop_path: prefix.clone(),
                    };
                    // A plain linear selection leaves no trace; the selection
                    // entry only annotates runs of real decisions.
                    if !trace.is_empty() {
                        trace.push(TraceEntry {
                            kind: TraceEntryKind::SelectedNextStep,
                            summary: format!("selected step {}", step.step_id),
                            refs: vec![step.step_id.to_string()],
                        });
                    }
                    return Some(pending);
                }
            }
            StepNode::Loop(loop_spec) => {
                if until_satisfied(loop_spec, context) {
                    trace.push(loop_trace(
                        TraceEntryKind::EvaluatedCondition,
                        loop_spec,
                        format!("skipped loop {} (until key already satisfied)", loop_spec.loop_id),
                    ));
                    continue;
                }
                trace.push(loop_trace(
                    TraceEntryKind::EnteredLoop,
                    loop_spec,
                    format!("entered loop {} iteration 1", loop_spec.loop_id),
                ));
                prefix.push(LoopFrame {
                    loop_id: loop_spec.loop_id.clone(),
                    iteration: 1,
                });
                if let Some(pending) = scan_from(&loop_spec.body, 0, prefix, context, trace) {
                    return Some(pending);
                }
                prefix.pop();
                trace.push(loop_trace(
                    TraceEntryKind::ExitedLoop,
                    loop_spec,
                    format!("exited loop {} (no runnable step in body)", loop_spec.loop_id),
                ));
            }
        }
    }
    None
}

/// Evaluates a step's run condition, tracing the decision.
fn step_runnable(
    step: &StepSpec,
    context: &Map<String, Value>,
    trace: &mut Vec<TraceEntry>,
) -> bool {
    let Some(condition) = &step.run_condition else {
        return true;
    };
    let satisfied = condition_satisfied(condition, context);
    trace.push(TraceEntry {
        kind: TraceEntryKind::EvaluatedCondition,
        summary: format!(
            "condition on {} {} for step {}",
            condition.context_key,
            if satisfied { "held" } else { "skipped" },
            step.step_id
        ),
        refs: vec![step.step_id.to_string()],
    });
    satisfied
}

/// Evaluates one run condition against the context.
fn condition_satisfied(condition: &RunCondition, context: &Map<String, Value>) -> bool {
    let value = context.get(&condition.context_key);
    match &condition.equals {
        Some(expected) => value == Some(expected),
        None => context_value_truthy(value),
    }
}

/// Returns true when a loop's until key is truthy in the context.
fn until_satisfied(loop_spec: &LoopSpec, context: &Map<String, Value>) -> bool {
    loop_spec
        .until_context_key
        .as_ref()
        .is_some_and(|key| context_value_truthy(context.get(key)))
}

/// Builds a loop-related trace entry.
fn loop_trace(kind: TraceEntryKind, loop_spec: &LoopSpec, summary: String) -> TraceEntry {
    TraceEntry {
        kind,
        summary,
        refs: vec![loop_spec.loop_id.to_string()],
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::Map;
    use serde_json::Value;
    use serde_json::json;

    use crate::core::EngineState;
    use crate::core::LoopSpec;
    use crate::core::StepId;
    use crate::core::StepNode;
    use crate::core::StepSpec;
    use crate::core::WorkflowId;
    use crate::core::WorkflowSpec;
    use crate::runtime::state::AdvancedState;
    use crate::runtime::state::StepCompleted;

    use super::initial_state;
    use super::next_state;

    /// Builds a bare step node.
    fn step(id: &str) -> StepNode {
        StepNode::Step(StepSpec {
            step_id: StepId::new(id),
            title: None,
            run_condition: None,
            requires_context_keys: Vec::new(),
            required_capabilities: Vec::new(),
            user_only_dependency: None,
            validation_criteria: None,
            output_contract: None,
        })
    }

    /// Builds a workflow from nodes.
    fn workflow(steps: Vec<StepNode>) -> WorkflowSpec {
        WorkflowSpec {
            v: 1,
            workflow_id: WorkflowId::new("wf-test"),
            title: None,
            recommended: None,
            steps,
        }
    }

    /// Builds an empty context.
    fn empty_context() -> Map<String, Value> {
        Map::new()
    }

    /// Completes the named step at the top level.
    fn completed(id: &str) -> AdvancedState {
        AdvancedState {
            completed: StepCompleted {
                step_id: StepId::new(id),
                loop_path: Vec::new(),
            },
        }
    }

    /// Tests linear advancement selects the following step.
    #[test]
    fn test_linear_next() {
        let wf = workflow(vec![step("step-1"), step("step-2")]);
        let outcome = next_state(&wf, &completed("step-1"), &empty_context()).unwrap();
        match outcome.state {
            EngineState::Running {
                pending_step,
            } => assert_eq!(pending_step.step_id, StepId::new("step-2")),
            other => panic!("unexpected state {other:?}"),
        }
    }

    /// Tests completing the last step completes the run.
    #[test]
    fn test_last_step_completes() {
        let wf = workflow(vec![step("step-1")]);
        let outcome = next_state(&wf, &completed("step-1"), &empty_context()).unwrap();
        assert_eq!(outcome.state, EngineState::Complete);
    }

    /// Tests the initial state selects the first step.
    #[test]
    fn test_initial_selects_first() {
        let wf = workflow(vec![step("step-1"), step("step-2")]);
        let outcome = initial_state(&wf, &empty_context());
        match outcome.state {
            EngineState::Running {
                pending_step,
            } => assert_eq!(pending_step.step_id, StepId::new("step-1")),
            other => panic!("unexpected state {other:?}"),
        }
    }

    /// Tests loops re-enter until the iteration bound.
    #[test]
    fn test_loop_iterates_to_bound() {
        let wf = workflow(vec![StepNode::Loop(LoopSpec {
            loop_id: crate::core::LoopId::new("loop-a"),
            max_iterations: 2,
            until_context_key: None,
            body: vec![step("inner")],
        })]);

        // Entering the loop selects iteration 1.
        let outcome = initial_state(&wf, &empty_context());
        let EngineState::Running {
            pending_step,
        } = outcome.state
        else {
            panic!("expected running state");
        };
        assert_eq!(pending_step.loop_path[0].iteration, 1);

        // Completing iteration 1 re-enters at iteration 2.
        let advanced = AdvancedState {
            completed: StepCompleted {
                step_id: StepId::new("inner"),
                loop_path: pending_step.loop_path.clone(),
            },
        };
        let outcome = next_state(&wf, &advanced, &empty_context()).unwrap();
        let EngineState::Running {
            pending_step,
        } = outcome.state
        else {
            panic!("expected running state");
        };
        assert_eq!(pending_step.loop_path[0].iteration, 2);

        // Completing iteration 2 exits and completes the run.
        let advanced = AdvancedState {
            completed: StepCompleted {
                step_id: StepId::new("inner"),
                loop_path: pending_step.loop_path,
            },
        };
        let outcome = next_state(&wf, &advanced, &empty_context()).unwrap();
        assert_eq!(outcome.state, EngineState::Complete);
    }

    /// Tests the until key exits a loop early.
    #[test]
    fn test_loop_until_key_exits() {
        let wf = workflow(vec![
            StepNode::Loop(LoopSpec {
                loop_id: crate::core::LoopId::new("loop-a"),
                max_iterations: 10,
                until_context_key: Some("done".to_string()),
                body: vec![step("inner")],
            }),
            step("after"),
        ]);
        let outcome = initial_state(&wf, &empty_context());
        let EngineState::Running {
            pending_step,
        } = outcome.state
        else {
            panic!("expected running state");
        };

        let mut context = Map::new();
        context.insert("done".to_string(), json!(true));
        let advanced = AdvancedState {
            completed: StepCompleted {
                step_id: StepId::new("inner"),
                loop_path: pending_step.loop_path,
            },
        };
        let outcome = next_state(&wf, &advanced, &context).unwrap();
        let EngineState::Running {
            pending_step,
        } = outcome.state
        else {
            panic!("expected running state");
        };
        assert_eq!(pending_step.step_id, StepId::new("after"));
        assert!(pending_step.loop_path.is_empty());
    }

    /// Tests a run condition skips a step and records the decision.
    #[test]
    fn test_condition_skips_step() {
        let conditional = StepNode::Step(StepSpec {
            step_id: StepId::new("maybe"),
            title: None,
            run_condition: Some(crate::core::RunCondition {
                context_key: "flagged".to_string(),
                equals: None,
            }),
            requires_context_keys: Vec::new(),
            required_capabilities: Vec::new(),
            user_only_dependency: None,
            validation_criteria: None,
            output_contract: None,
        });
        let wf = workflow(vec![step("step-1"), conditional, step("step-3")]);
        let outcome = next_state(&wf, &completed("step-1"), &empty_context()).unwrap();
        let EngineState::Running {
            pending_step,
        } = outcome.state
        else {
            panic!("expected running state");
        };
        assert_eq!(pending_step.step_id, StepId::new("step-3"));
        assert!(outcome
            .trace
            .iter()
            .any(|entry| entry.kind == crate::core::TraceEntryKind::EvaluatedCondition));
    }
}
