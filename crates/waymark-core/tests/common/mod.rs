// waymark-core/tests/common/mod.rs
// ============================================================================
// Module: Core Test Fixtures
// Description: Deterministic ports and workflow builders for engine tests.
// ============================================================================
//! ## Overview
//! Shared fixtures: a fixed clock, counting entropy, scripted validation,
//! map-backed workflows, and an engine wired to the in-memory stores.

#![allow(
    dead_code,
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only fixtures; not every test uses every helper."
)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use serde_json::Map;
use serde_json::Value;
use waymark_core::AutonomyMode;
use waymark_core::Clock;
use waymark_core::Engine;
use waymark_core::EngineOptions;
use waymark_core::Entropy;
use waymark_core::FeatureFlags;
use waymark_core::InMemorySessionStore;
use waymark_core::InMemorySnapshotStore;
use waymark_core::InProcessSessionGate;
use waymark_core::LoopSpec;
use waymark_core::OutputContract;
use waymark_core::RiskPolicy;
use waymark_core::StepId;
use waymark_core::StepNode;
use waymark_core::StepSpec;
use waymark_core::ValidationCriteria;
use waymark_core::ValidationEngine;
use waymark_core::ValidationEngineError;
use waymark_core::ValidationResult;
use waymark_core::WorkflowId;
use waymark_core::WorkflowProvider;
use waymark_core::WorkflowProviderError;
use waymark_core::WorkflowSpec;
use waymark_core::runtime::AdvanceDefaults;

/// Clock pinned to a fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now_millis(&self) -> u64 {
        self.0
    }
}

/// Deterministic entropy counting upward per call.
#[derive(Debug, Default, Clone)]
pub struct CountingEntropy {
    counter: Arc<AtomicU64>,
}

impl Entropy for CountingEntropy {
    fn random_bytes(&self, n: usize) -> Vec<u8> {
        let seed = self.counter.fetch_add(1, Ordering::SeqCst);
        let mut bytes = vec![0_u8; n];
        for (index, slot) in bytes.iter_mut().enumerate() {
            *slot = seed.to_le_bytes()[index % 8].wrapping_add(index.to_le_bytes()[0]);
        }
        bytes
    }
}

/// Feature flag provider with everything disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFlags;

impl FeatureFlags for NoFlags {
    fn is_enabled(&self, _name: &str) -> bool {
        false
    }
}

/// Workflow provider backed by a map.
#[derive(Debug, Default, Clone)]
pub struct MapWorkflows {
    workflows: BTreeMap<String, WorkflowSpec>,
}

impl MapWorkflows {
    /// Registers one workflow.
    pub fn with(mut self, workflow: WorkflowSpec) -> Self {
        self.workflows.insert(workflow.workflow_id.to_string(), workflow);
        self
    }
}

impl WorkflowProvider for MapWorkflows {
    fn fetch_by_id(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<WorkflowSpec>, WorkflowProviderError> {
        Ok(self.workflows.get(workflow_id.as_str()).cloned())
    }
}

/// Validation engine returning a scripted result.
#[derive(Debug, Default, Clone)]
pub struct ScriptedValidation {
    /// Result returned when the engine runs; valid-by-default when absent.
    pub result: Option<ValidationResult>,
    /// When set, the engine fails with a timeout.
    pub timeout: bool,
}

impl ValidationEngine for ScriptedValidation {
    fn validate(
        &self,
        _notes_markdown: &str,
        _criteria: &ValidationCriteria,
        _context: &Map<String, Value>,
    ) -> Result<ValidationResult, ValidationEngineError> {
        if self.timeout {
            return Err(ValidationEngineError::Timeout);
        }
        Ok(self.result.clone().unwrap_or(ValidationResult {
            valid: true,
            issues: Vec::new(),
            suggestions: Vec::new(),
            warnings: Vec::new(),
        }))
    }
}

/// Concrete engine type used by the tests.
pub type TestEngine =
    Engine<InMemorySessionStore, InMemorySnapshotStore, MapWorkflows, ScriptedValidation>;

/// Handles kept alongside a test engine for direct store inspection.
pub struct TestHarness {
    /// Engine under test.
    pub engine: TestEngine,
    /// Shared handle onto the session store.
    pub sessions: InMemorySessionStore,
    /// Shared handle onto the snapshot store.
    pub snapshots: InMemorySnapshotStore,
}

/// Builds an engine over in-memory stores with deterministic ports.
pub fn harness(workflows: MapWorkflows, validation: ScriptedValidation) -> TestHarness {
    harness_with_defaults(
        workflows,
        validation,
        AdvanceDefaults {
            autonomy: AutonomyMode::Guided,
            risk_policy: RiskPolicy::Conservative,
        },
    )
}

/// Builds a harness with explicit execution defaults.
pub fn harness_with_defaults(
    workflows: MapWorkflows,
    validation: ScriptedValidation,
    defaults: AdvanceDefaults,
) -> TestHarness {
    let sessions = InMemorySessionStore::new();
    let snapshots = InMemorySnapshotStore::new();
    let engine = Engine::new(
        sessions.clone(),
        snapshots.clone(),
        workflows,
        validation,
        Box::new(InProcessSessionGate::new()),
        Box::new(FixedClock(1_700_000_000_000)),
        Box::new(CountingEntropy::default()),
        Box::new(NoFlags),
        EngineOptions {
            defaults,
            ..EngineOptions::default()
        },
    );
    TestHarness {
        engine,
        sessions,
        snapshots,
    }
}

/// Builds a bare step.
pub fn step(id: &str) -> StepNode {
    StepNode::Step(step_spec(id))
}

/// Builds a bare step specification.
pub fn step_spec(id: &str) -> StepSpec {
    StepSpec {
        step_id: StepId::new(id),
        title: None,
        run_condition: None,
        requires_context_keys: Vec::new(),
        required_capabilities: Vec::new(),
        user_only_dependency: None,
        validation_criteria: None,
        output_contract: None,
    }
}

/// Builds a step with a required output contract.
pub fn contracted_step(id: &str, contract_ref: &str) -> StepNode {
    let mut spec = step_spec(id);
    spec.output_contract = Some(OutputContract {
        contract_ref: contract_ref.to_string(),
        required: true,
    });
    StepNode::Step(spec)
}

/// Builds a loop node.
pub fn loop_node(
    id: &str,
    max_iterations: u32,
    until: Option<&str>,
    body: Vec<StepNode>,
) -> StepNode {
    StepNode::Loop(LoopSpec {
        loop_id: waymark_core::LoopId::new(id),
        max_iterations,
        until_context_key: until.map(ToString::to_string),
        body,
    })
}

/// Builds a workflow from nodes.
pub fn workflow(id: &str, steps: Vec<StepNode>) -> WorkflowSpec {
    WorkflowSpec {
        v: 1,
        workflow_id: WorkflowId::new(id),
        title: None,
        recommended: None,
        steps,
    }
}
