// waymark-core/src/runtime/engine.rs
// ============================================================================
// Module: Waymark Engine
// Description: Single canonical execution path for session operations.
// Purpose: Drive start, continue, checkpoint, export, and import durably.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! The engine is the single canonical execution path for Waymark sessions.
//! All API surfaces (CLI, RPC wrappers) must call into these methods to
//! preserve invariance and auditability. Only a verified ack token may cause
//! a durable write: rehydrate paths read the validated prefix and mint fresh
//! tokens with zero writes, while the advance path holds the per-session
//! lease across one atomic append. Replays return recorded facts, never a
//! re-computation, and a token whose recorded advance should exist but does
//! not fails closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::core::AttemptId;
use crate::core::AutonomyMode;
use crate::core::BlockerV1;
use crate::core::BundleBuildError;
use crate::core::BundleExportInputs;
use crate::core::BundleId;
use crate::core::BundleImportError;
use crate::core::BundleProducer;
use crate::core::BundleSession;
use crate::core::CauseKind;
use crate::core::ContentDigest;
use crate::core::DomainEvent;
use crate::core::EngineState;
use crate::core::EventId;
use crate::core::EventPayload;
use crate::core::ExecutionSnapshot;
use crate::core::ExportBundle;
use crate::core::GapId;
use crate::core::GapV1;
use crate::core::NodeId;
use crate::core::NodeKind;
use crate::core::PendingStep;
use crate::core::RiskPolicy;
use crate::core::RunId;
use crate::core::SessionId;
use crate::core::TokenError;
use crate::core::TokenKey;
use crate::core::TokenKind;
use crate::core::TokenPayload;
use crate::core::TraceEntry;
use crate::core::TOKEN_KEY_BYTES;
use crate::core::TraceEntryKind;
use crate::core::TraceId;
use crate::core::ValidationResult;
use crate::core::WorkflowError;
use crate::core::WorkflowHash;
use crate::core::WorkflowId;
use crate::core::WorkflowSpec;
use crate::core::budget_trace;
use crate::core::build_export_bundle;
use crate::core::merge_context;
use crate::core::mint_token;
use crate::core::narrow_context_object;
use crate::core::validate_import_bundle;
use crate::core::verify_token;
use crate::interfaces::Clock;
use crate::interfaces::Entropy;
use crate::interfaces::FeatureFlags;
use crate::interfaces::GateError;
use crate::interfaces::SessionEventStore;
use crate::interfaces::SessionGate;
use crate::interfaces::SessionStoreError;
use crate::interfaces::SessionTruth;
use crate::interfaces::SnapshotStore;
use crate::interfaces::SnapshotStoreError;
use crate::interfaces::ValidationEngine;
use crate::interfaces::WorkflowProvider;
use crate::interfaces::WorkflowProviderError;
use crate::runtime::advance::AdvanceDefaults;
use crate::runtime::advance::AdvanceError;
use crate::runtime::advance::AdvanceEvaluation;
use crate::runtime::advance::AdvanceMode;
use crate::runtime::advance::AdvanceRequest;
use crate::runtime::advance::ValidatedAdvanceInputs;
use crate::runtime::advance::build_blocked_outcome;
use crate::runtime::advance::context_set_extra_event;
use crate::runtime::advance::evaluate_advance;
use crate::runtime::advance::gap_extra_event;
use crate::runtime::advance::normalize_outputs;
use crate::runtime::advance::recommendation_gap;
use crate::runtime::advance::recommendation_warnings;
use crate::runtime::advance::trace_extra_event;
use crate::runtime::advance::validate_advance_inputs;
use crate::runtime::advance::validation_extra_event;
use crate::runtime::interpreter::initial_state;
use crate::runtime::interpreter::next_state;
use crate::runtime::plan::AckAdvancePlanInputs;
use crate::runtime::plan::CheckpointPlanInputs;
use crate::runtime::plan::ExtraEvent;
use crate::runtime::plan::MintedAdvanceIds;
use crate::runtime::plan::PlanError;
use crate::runtime::plan::StartPlanInputs;
use crate::runtime::plan::build_ack_advance_append_plan;
use crate::runtime::plan::build_checkpoint_append_plan;
use crate::runtime::plan::build_session_start_plan;
use crate::runtime::projection::NodeInfo;
use crate::runtime::projection::RunDag;
use crate::runtime::projection::advance_attempts_from;
use crate::runtime::projection::find_recorded_advance;
use crate::runtime::projection::project_run_dag;
use crate::runtime::projection::run_ids;
use crate::runtime::projection::stored_context;
use crate::runtime::state::StepCompleted;
use crate::runtime::state::apply_step_completed;
use crate::runtime::state::derive_pending_step;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Session store failure.
    #[error(transparent)]
    SessionStore(#[from] SessionStoreError),
    /// Snapshot store failure.
    #[error(transparent)]
    SnapshotStore(#[from] SnapshotStoreError),
    /// Session gate failure.
    #[error(transparent)]
    Gate(#[from] GateError),
    /// Capability token failure.
    #[error(transparent)]
    Token(#[from] TokenError),
    /// Advance-local failure.
    #[error(transparent)]
    Advance(#[from] AdvanceError),
    /// Append plan failure.
    #[error(transparent)]
    Plan(#[from] PlanError),
    /// Workflow provider failure.
    #[error(transparent)]
    WorkflowProvider(#[from] WorkflowProviderError),
    /// Workflow specification failure.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    /// Bundle build failure.
    #[error(transparent)]
    BundleBuild(#[from] BundleBuildError),
    /// Bundle import failure.
    #[error(transparent)]
    BundleImport(#[from] BundleImportError),
    /// The requested workflow does not exist.
    #[error("workflow not found: {workflow_id}")]
    WorkflowNotFound {
        /// Missing workflow identifier.
        workflow_id: WorkflowId,
    },
    /// The requested session does not exist.
    #[error("session not found: {session_id}")]
    SessionNotFound {
        /// Missing session identifier.
        session_id: SessionId,
    },
    /// An engine-level invariant was violated.
    #[error("engine invariant violation: {detail}")]
    InvariantViolation {
        /// Invariant description.
        detail: String,
    },
}

// ============================================================================
// SECTION: Options and Results
// ============================================================================

/// Engine configuration assembled by the host.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Default execution preferences.
    pub defaults: AdvanceDefaults,
    /// Capabilities the executing agent holds.
    pub capabilities: BTreeSet<String>,
    /// Application version stamped into bundles.
    pub app_version: String,
    /// Hash of the applied configuration, when known.
    pub applied_config_hash: Option<ContentDigest>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            defaults: AdvanceDefaults {
                autonomy: AutonomyMode::Guided,
                risk_policy: RiskPolicy::Conservative,
            },
            capabilities: BTreeSet::new(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            applied_config_hash: None,
        }
    }
}

/// Capability tokens minted for one node position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokens {
    /// State token naming the observed node.
    pub state_token: String,
    /// Ack token entitling the next advance.
    pub ack_token: String,
    /// Checkpoint token for the node.
    pub checkpoint_token: String,
}

/// Result of starting a workflow.
#[derive(Debug, Clone)]
pub struct StartWorkflowResult {
    /// New session identifier.
    pub session_id: SessionId,
    /// New run identifier.
    pub run_id: RunId,
    /// Root node identifier.
    pub root_node_id: NodeId,
    /// Tokens minted for the root node.
    pub tokens: SessionTokens,
    /// Step pending after start, when the workflow has steps.
    pub pending: Option<PendingStep>,
    /// True when the workflow completed immediately.
    pub is_complete: bool,
}

/// How a continue call was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinueOutcome {
    /// Read-only rehydrate with zero writes.
    Rehydrated,
    /// A successful advance appended events.
    Advanced,
    /// A blocked attempt appended events.
    Blocked,
    /// The advance was already recorded; facts were returned from the log.
    Replayed,
}

/// Request for a continue call.
#[derive(Debug, Clone, Default)]
pub struct ContinueWorkflowRequest {
    /// Ack token; the only input that may cause a durable write.
    pub ack_token: Option<String>,
    /// State token for read-only rehydrate at a specific node.
    pub state_token: Option<String>,
    /// Session identifier for read-only rehydrate at the preferred tip.
    pub session_id: Option<SessionId>,
    /// Advance inputs (context, notes, artifacts, preference overrides).
    pub advance: AdvanceRequest,
}

/// Result of a continue call.
#[derive(Debug, Clone)]
pub struct ContinueWorkflowResult {
    /// Session the call operated on.
    pub session_id: SessionId,
    /// Node the fresh tokens point at.
    pub node_id: NodeId,
    /// Freshly minted tokens.
    pub tokens: SessionTokens,
    /// How the call was resolved.
    pub outcome: ContinueOutcome,
    /// True when the run has no further steps.
    pub is_complete: bool,
    /// Pending step, when the run is not complete.
    pub pending: Option<PendingStep>,
    /// Blockers, when the position is blocked.
    pub blockers: Vec<BlockerV1>,
}

/// Result of a checkpoint call.
#[derive(Debug, Clone)]
pub struct CheckpointWorkflowResult {
    /// Session the checkpoint belongs to.
    pub session_id: SessionId,
    /// Deterministic checkpoint node identifier.
    pub checkpoint_node_id: NodeId,
    /// State token naming the checkpoint node.
    pub state_token: String,
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Durable workflow engine over pluggable stores and ports.
pub struct Engine<S, C, W, V> {
    /// Session event log store.
    session_store: S,
    /// Content-addressed snapshot and workflow store.
    snapshot_store: C,
    /// Workflow provider.
    workflows: W,
    /// Validation engine.
    validation: V,
    /// Per-session lock provider.
    gate: Box<dyn SessionGate>,
    /// Wall clock.
    clock: Box<dyn Clock>,
    /// Entropy source.
    entropy: Box<dyn Entropy>,
    /// Feature flag provider.
    flags: Box<dyn FeatureFlags>,
    /// In-memory token signing key, rotated per process.
    token_key: TokenKey,
    /// Engine configuration.
    options: EngineOptions,
}

impl<S, C, W, V> Engine<S, C, W, V>
where
    S: SessionEventStore,
    C: SnapshotStore,
    W: WorkflowProvider,
    V: ValidationEngine,
{
    /// Creates an engine over the given stores and ports.
    ///
    /// The token signing key is drawn from entropy at construction; tokens
    /// from earlier processes are deliberately invalid.
    #[must_use]
    #[allow(clippy::too_many_arguments, reason = "Construction wires every port once.")]
    pub fn new(
        session_store: S,
        snapshot_store: C,
        workflows: W,
        validation: V,
        gate: Box<dyn SessionGate>,
        clock: Box<dyn Clock>,
        entropy: Box<dyn Entropy>,
        flags: Box<dyn FeatureFlags>,
        options: EngineOptions,
    ) -> Self {
        let mut key_bytes = [0_u8; TOKEN_KEY_BYTES];
        let drawn = entropy.random_bytes(TOKEN_KEY_BYTES);
        for (slot, value) in key_bytes.iter_mut().zip(drawn) {
            *slot = value;
        }
        let token_key = TokenKey::from_bytes(key_bytes);
        Self::with_token_key(
            session_store,
            snapshot_store,
            workflows,
            validation,
            gate,
            clock,
            entropy,
            flags,
            token_key,
            options,
        )
    }

    /// Creates an engine with a host-provided token signing key.
    ///
    /// Long-lived hosts should prefer [`Engine::new`]; this variant exists
    /// for hosts whose process lifetime is shorter than a session exchange.
    #[must_use]
    #[allow(clippy::too_many_arguments, reason = "Construction wires every port once.")]
    pub fn with_token_key(
        session_store: S,
        snapshot_store: C,
        workflows: W,
        validation: V,
        gate: Box<dyn SessionGate>,
        clock: Box<dyn Clock>,
        entropy: Box<dyn Entropy>,
        flags: Box<dyn FeatureFlags>,
        token_key: TokenKey,
        options: EngineOptions,
    ) -> Self {
        Self {
            session_store,
            snapshot_store,
            workflows,
            validation,
            gate,
            clock,
            entropy,
            flags,
            token_key,
            options,
        }
    }

    // ------------------------------------------------------------------
    // Operation: start_workflow
    // ------------------------------------------------------------------

    /// Starts a workflow in a fresh session.
    ///
    /// Appends `session_created`, `run_started`, and the root
    /// `node_created` (plus `context_set` when initial context arrives),
    /// pins the workflow, and mints the first token set.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the workflow is missing or invalid, the
    /// context violates its budget, or storage fails.
    pub fn start_workflow(
        &self,
        workflow_id: &WorkflowId,
        initial_context: Option<&Value>,
    ) -> Result<StartWorkflowResult, EngineError> {
        let workflow = self
            .workflows
            .fetch_by_id(workflow_id)?
            .ok_or_else(|| EngineError::WorkflowNotFound {
                workflow_id: workflow_id.clone(),
            })?;
        workflow.validate()?;
        let workflow_hash = self.snapshot_store.put_workflow(&workflow)?;

        let input_context = narrow_context_object(initial_context).cloned();
        let context = merge_context(&Map::new(), input_context.as_ref()).map_err(|err| {
            EngineError::Advance(AdvanceError::ApplyFailed {
                message: err.to_string(),
            })
        })?;

        let session_id = SessionId::minted(&self.entropy.id_body());
        let run_id = RunId::minted(&self.entropy.id_body());
        let root_node_id = NodeId::minted(&self.entropy.id_body());
        let root_attempt_id = AttemptId::minted(&self.entropy.id_body());

        let outcome = initial_state(&workflow, &context);
        let snapshot = ExecutionSnapshot::from_state(outcome.state.clone());
        let snapshot_ref = self.snapshot_store.put_snapshot(&snapshot)?;

        let plan = build_session_start_plan(StartPlanInputs {
            session_id: session_id.clone(),
            run_id: run_id.clone(),
            workflow_id: workflow_id.clone(),
            workflow_hash: workflow_hash.clone(),
            root_node_id: root_node_id.clone(),
            root_attempt_id: root_attempt_id.clone(),
            snapshot_ref,
            created_at_ms: self.clock.now_millis(),
            session_event_id: self.mint_event_id(),
            run_event_id: self.mint_event_id(),
            node_event_id: self.mint_event_id(),
            initial_context: input_context.map(|context| (self.mint_event_id(), context)),
        })?;

        let lease = self.gate.acquire(&session_id)?;
        self.session_store.append(&lease, &plan)?;
        drop(lease);

        let tokens = self.mint_tokens(
            &session_id,
            &run_id,
            &root_node_id,
            &root_attempt_id,
            Some(&workflow_hash),
        )?;
        let pending = derive_pending_step(&outcome.state).cloned();
        Ok(StartWorkflowResult {
            session_id,
            run_id,
            root_node_id,
            tokens,
            is_complete: outcome.state.is_complete(),
            pending,
        })
    }

    // ------------------------------------------------------------------
    // Operation: continue_workflow
    // ------------------------------------------------------------------

    /// Continues a workflow: advances with an ack token, or rehydrates
    /// read-only with a state token or a bare session id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on token failures, missing sessions, replay
    /// invariant violations, or storage failures.
    pub fn continue_workflow(
        &self,
        request: &ContinueWorkflowRequest,
    ) -> Result<ContinueWorkflowResult, EngineError> {
        if let Some(token) = &request.ack_token {
            let payload = verify_token(&self.token_key, token, TokenKind::Ack)?;
            return self.advance_with_ack(&payload, &request.advance);
        }
        if let Some(token) = &request.state_token {
            let payload = verify_token(&self.token_key, token, TokenKind::State)?;
            return self.rehydrate_at(&payload.session_id, Some(&payload.node_id));
        }
        let session_id = request.session_id.as_ref().ok_or_else(|| {
            EngineError::InvariantViolation {
                detail: "continue requires an ack token, a state token, or a session id"
                    .to_string(),
            }
        })?;
        self.rehydrate_at(session_id, None)
    }

    // ------------------------------------------------------------------
    // Operation: checkpoint_workflow
    // ------------------------------------------------------------------

    /// Creates (idempotently) a checkpoint node off the token's position.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on token failures, unknown nodes, or storage
    /// failures.
    pub fn checkpoint_workflow(
        &self,
        checkpoint_token: &str,
    ) -> Result<CheckpointWorkflowResult, EngineError> {
        let payload = verify_token(&self.token_key, checkpoint_token, TokenKind::Checkpoint)?;
        let lease = self.gate.acquire(&payload.session_id)?;
        let truth = self
            .session_store
            .load_strict(&payload.session_id)?
            .ok_or_else(|| EngineError::SessionNotFound {
                session_id: payload.session_id.clone(),
            })?;
        let internal_session_id = internal_session_id(&truth)?;
        let dag = project_run_dag(&truth.events, &payload.run_id);
        let node = known_node(&dag, &payload.node_id)?;

        let checkpoint_node_id = NodeId::derived_checkpoint(&node.node_id, &payload.attempt_id);
        let plan = build_checkpoint_append_plan(CheckpointPlanInputs {
            session_id: internal_session_id,
            run_id: payload.run_id.clone(),
            source_node_id: node.node_id.clone(),
            attempt_id: payload.attempt_id.clone(),
            checkpoint_node_id: checkpoint_node_id.clone(),
            snapshot_ref: node.snapshot_ref.clone(),
            expected_first_event_index: truth.expected_next_event_index(),
            node_event_id: self.mint_event_id(),
            edge_event_id: self.mint_event_id(),
        })?;
        self.session_store.append(&lease, &plan)?;
        drop(lease);

        let state_token = mint_token(
            &self.token_key,
            &TokenPayload {
                token_kind: TokenKind::State,
                session_id: payload.session_id.clone(),
                run_id: payload.run_id.clone(),
                node_id: checkpoint_node_id.clone(),
                attempt_id: payload.attempt_id.clone(),
                workflow_hash_ref: self.run_workflow_hash(&truth.events, &payload.run_id),
            },
        )?;
        Ok(CheckpointWorkflowResult {
            session_id: payload.session_id,
            checkpoint_node_id,
            state_token,
        })
    }

    // ------------------------------------------------------------------
    // Operation: export_session
    // ------------------------------------------------------------------

    /// Exports a session into a self-describing bundle. Read-only.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the session is missing, corrupt, or a
    /// referenced snapshot or workflow cannot be loaded.
    pub fn export_session(&self, session_id: &SessionId) -> Result<ExportBundle, EngineError> {
        let truth = self
            .session_store
            .load_strict(session_id)?
            .ok_or_else(|| EngineError::SessionNotFound {
                session_id: session_id.clone(),
            })?;
        let internal = internal_session_id(&truth)?;

        let mut snapshots = std::collections::BTreeMap::new();
        let mut pinned_workflows = std::collections::BTreeMap::new();
        for event in &truth.events {
            match &event.payload {
                EventPayload::NodeCreated {
                    snapshot_ref,
                    ..
                } => {
                    if !snapshots.contains_key(snapshot_ref) {
                        let snapshot = self.snapshot_store.get_snapshot(snapshot_ref)?;
                        snapshots.insert(snapshot_ref.clone(), snapshot);
                    }
                }
                EventPayload::RunStarted {
                    workflow_hash,
                    ..
                } => {
                    if !pinned_workflows.contains_key(workflow_hash) {
                        let workflow = self.snapshot_store.get_workflow(workflow_hash)?;
                        pinned_workflows.insert(workflow_hash.clone(), workflow);
                    }
                }
                _ => {}
            }
        }

        Ok(build_export_bundle(BundleExportInputs {
            bundle_id: BundleId::minted(&self.entropy.id_body()),
            exported_at_ms: self.clock.now_millis(),
            producer: BundleProducer {
                app_version: self.options.app_version.clone(),
                applied_config_hash: self.options.applied_config_hash.clone(),
            },
            session: BundleSession {
                session_id: internal,
                events: truth.events,
                manifest: truth.manifest,
                snapshots,
                pinned_workflows,
            },
        })?)
    }

    // ------------------------------------------------------------------
    // Operation: import_session
    // ------------------------------------------------------------------

    /// Imports a bundle as a brand-new session and returns its identifier.
    ///
    /// The bundle's session content is preserved byte-exactly; a fresh
    /// session id names the stored copy and tokens are minted only on the
    /// next load.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on bundle validation or storage failures.
    pub fn import_session(&self, bundle: &ExportBundle) -> Result<SessionId, EngineError> {
        validate_import_bundle(bundle)?;

        for (reference, snapshot) in &bundle.session.snapshots {
            let stored = self.snapshot_store.put_snapshot(snapshot)?;
            if stored != *reference {
                return Err(EngineError::BundleImport(BundleImportError::IntegrityFailed {
                    detail: format!("snapshot stored under {reference} hashes to {stored}"),
                }));
            }
        }
        for (hash, workflow) in &bundle.session.pinned_workflows {
            let stored = self.snapshot_store.put_workflow(workflow)?;
            if stored != *hash {
                return Err(EngineError::BundleImport(BundleImportError::IntegrityFailed {
                    detail: format!("workflow stored under {hash} hashes to {stored}"),
                }));
            }
        }

        let new_session_id = SessionId::minted(&self.entropy.id_body());
        self.session_store.import_raw(
            &new_session_id,
            &bundle.session.events,
            &bundle.session.manifest,
        )?;
        Ok(new_session_id)
    }

    // ------------------------------------------------------------------
    // Advance path
    // ------------------------------------------------------------------

    /// Performs one acked advance, the only durable mutation.
    fn advance_with_ack(
        &self,
        payload: &TokenPayload,
        request: &AdvanceRequest,
    ) -> Result<ContinueWorkflowResult, EngineError> {
        let lease = self.gate.acquire(&payload.session_id)?;
        let truth = self
            .session_store
            .load_strict(&payload.session_id)?
            .ok_or_else(|| EngineError::SessionNotFound {
                session_id: payload.session_id.clone(),
            })?;
        let internal = internal_session_id(&truth)?;
        let dag = project_run_dag(&truth.events, &payload.run_id);
        let node = known_node(&dag, &payload.node_id)?.clone();

        // Replay: the same (session, node, attempt) returns recorded facts.
        if let Some((_, to_node_id)) =
            find_recorded_advance(&truth.events, &node.node_id, &payload.attempt_id)
        {
            let to_node = known_node(&dag, to_node_id)?.clone();
            drop(lease);
            return self.position_result(payload, &truth, &to_node, ContinueOutcome::Replayed);
        }

        // Fail closed on attempts that are neither recorded nor expected.
        let expected_attempt = expected_next_attempt(&truth.events, &node);
        if payload.attempt_id != expected_attempt {
            return Err(EngineError::InvariantViolation {
                detail: format!(
                    "attempt {} is neither recorded nor the expected next attempt for node {}",
                    payload.attempt_id, node.node_id
                ),
            });
        }

        let snapshot = self.snapshot_store.get_snapshot(&node.snapshot_ref)?;
        if snapshot.state().is_complete() {
            drop(lease);
            return self.position_result(payload, &truth, &node, ContinueOutcome::Rehydrated);
        }
        let mode = if snapshot.state().is_blocked() {
            AdvanceMode::Retry {
                blocked_node_id: node.node_id.clone(),
                blocked_snapshot: snapshot,
            }
        } else {
            AdvanceMode::Fresh {
                source_node_id: node.node_id.clone(),
                snapshot,
            }
        };

        let workflow_hash = self.run_workflow_hash(&truth.events, &payload.run_id).ok_or_else(
            || EngineError::InvariantViolation {
                detail: format!("run {} has no pinned workflow", payload.run_id),
            },
        )?;
        let workflow = self.snapshot_store.get_workflow(&workflow_hash)?;
        let stored = stored_context(&truth.events, &payload.run_id);

        let inputs =
            validate_advance_inputs(&mode, &workflow, &stored, request, self.options.defaults)?;
        let capabilities = self.available_capabilities(&inputs.required_capabilities);
        let evaluation = evaluate_advance(&inputs, &self.validation, &capabilities)?;

        let cause_kind = if dag.has_outgoing_acked_edge(&node.node_id) {
            CauseKind::NonTipAdvance
        } else {
            CauseKind::IntentionalFork
        };
        let to_node_id = NodeId::minted(&self.entropy.id_body());
        let to_attempt_id = payload.attempt_id.derive_next();

        let (plan_inputs, new_state, blockers) = if evaluation.block_now {
            self.build_blocked_plan_inputs(
                &internal,
                payload,
                &node,
                &mode,
                &inputs,
                &evaluation,
                &truth,
                to_node_id.clone(),
                to_attempt_id.clone(),
                cause_kind,
            )?
        } else {
            self.build_success_plan_inputs(
                &internal,
                payload,
                &node,
                &mode,
                &workflow,
                &inputs,
                &evaluation,
                &truth,
                to_node_id.clone(),
                to_attempt_id.clone(),
                cause_kind,
            )?
        };

        let plan = build_ack_advance_append_plan(plan_inputs)?;
        self.session_store.append(&lease, &plan)?;
        drop(lease);

        let tokens = self.mint_tokens(
            &payload.session_id,
            &payload.run_id,
            &to_node_id,
            &to_attempt_id,
            Some(&workflow_hash),
        )?;
        let pending = derive_pending_step(&new_state).cloned();
        Ok(ContinueWorkflowResult {
            session_id: payload.session_id.clone(),
            node_id: to_node_id,
            tokens,
            outcome: if blockers.is_empty() {
                ContinueOutcome::Advanced
            } else {
                ContinueOutcome::Blocked
            },
            is_complete: new_state.is_complete(),
            pending,
            blockers,
        })
    }

    /// Assembles plan inputs for a blocked attempt.
    #[allow(clippy::too_many_arguments, reason = "All advance facts feed one assembly.")]
    fn build_blocked_plan_inputs(
        &self,
        internal: &SessionId,
        payload: &TokenPayload,
        node: &NodeInfo,
        _mode: &AdvanceMode,
        inputs: &ValidatedAdvanceInputs,
        evaluation: &AdvanceEvaluation,
        truth: &SessionTruth,
        to_node_id: NodeId,
        to_attempt_id: AttemptId,
        cause_kind: CauseKind,
    ) -> Result<(AckAdvancePlanInputs, EngineState, Vec<BlockerV1>), EngineError> {
        let blocked = build_blocked_outcome(
            internal,
            &payload.run_id,
            &node.node_id,
            &payload.attempt_id,
            &inputs.pending_step,
            evaluation,
            self.mint_event_id(),
        )?;
        let snapshot_ref = self.snapshot_store.put_snapshot(&blocked.snapshot)?;
        let new_state = blocked.snapshot.state().clone();
        let blockers = match &new_state {
            EngineState::Blocked {
                blockers,
                ..
            } => blockers.clone(),
            _ => Vec::new(),
        };

        Ok((
            AckAdvancePlanInputs {
                session_id: internal.clone(),
                run_id: payload.run_id.clone(),
                from_node_id: node.node_id.clone(),
                attempt_id: payload.attempt_id.clone(),
                expected_first_event_index: truth.expected_next_event_index(),
                to_node_id,
                node_kind: NodeKind::BlockedAttempt,
                to_attempt_id,
                snapshot_ref,
                cause_kind,
                minted: MintedAdvanceIds {
                    advance_event_id: self.mint_event_id(),
                    node_created_event_id: self.mint_event_id(),
                    edge_created_event_id: self.mint_event_id(),
                    output_event_ids: Vec::new(),
                },
                leading_events: vec![blocked.validation_event],
                extra_events: Vec::new(),
                outputs: Vec::new(),
            },
            new_state,
            blockers,
        ))
    }

    /// Assembles plan inputs for a successful advance.
    #[allow(clippy::too_many_arguments, reason = "All advance facts feed one assembly.")]
    fn build_success_plan_inputs(
        &self,
        internal: &SessionId,
        payload: &TokenPayload,
        node: &NodeInfo,
        mode: &AdvanceMode,
        workflow: &WorkflowSpec,
        inputs: &ValidatedAdvanceInputs,
        evaluation: &AdvanceEvaluation,
        truth: &SessionTruth,
        to_node_id: NodeId,
        to_attempt_id: AttemptId,
        cause_kind: CauseKind,
    ) -> Result<(AckAdvancePlanInputs, EngineState, Vec<BlockerV1>), EngineError> {
        let completion = StepCompleted::of(&inputs.pending_step);
        let advanced = apply_step_completed(mode.snapshot().state(), &completion).map_err(
            |err| AdvanceError::ApplyFailed {
                message: err.to_string(),
            },
        )?;
        let next = next_state(workflow, &advanced, &inputs.merged_context).map_err(|err| {
            AdvanceError::NextFailed {
                message: err.to_string(),
            }
        })?;

        let mut extras: Vec<ExtraEvent> = Vec::new();

        // 1. Gap events when never-stop autonomy continues past reasons.
        if inputs.autonomy == AutonomyMode::FullAutoNeverStop {
            for reason in &evaluation.effective_reasons {
                let gap = GapV1::from_reason(
                    GapId::minted(&self.entropy.id_body()),
                    reason,
                    Some(inputs.pending_step.step_id.clone()),
                );
                extras.push(gap_extra_event(
                    internal,
                    &payload.run_id,
                    self.mint_event_id(),
                    gap,
                ));
            }
        }

        // 2. Recommendation warnings when effective prefs exceed recommended.
        let warnings = recommendation_warnings(
            workflow.recommended.as_ref(),
            inputs.autonomy,
            inputs.risk_policy,
        );
        for warning in warnings {
            let gap = recommendation_gap(GapId::minted(&self.entropy.id_body()), warning);
            extras.push(gap_extra_event(internal, &payload.run_id, self.mint_event_id(), gap));
        }

        // 3. Context application, when an object arrived.
        if let Some(context) = &inputs.input_context_obj {
            extras.push(context_set_extra_event(
                internal,
                &payload.run_id,
                self.mint_event_id(),
                context.clone(),
                self.clock.now_millis(),
            ));
        }

        // 4. Validation record, by mode policy.
        if mode.emit_validation_on_success() {
            let result = evaluation.validation.clone().unwrap_or(ValidationResult {
                valid: true,
                issues: Vec::new(),
                suggestions: Vec::new(),
                warnings: Vec::new(),
            });
            extras.push(validation_extra_event(
                internal,
                &payload.run_id,
                &node.node_id,
                &payload.attempt_id,
                self.mint_event_id(),
                evaluation.engine_ran,
                result,
            ));
        }

        // 5. Decision trace, when the interpreter produced one.
        let mut trace_entries: Vec<TraceEntry> = Vec::new();
        if cause_kind == CauseKind::NonTipAdvance {
            trace_entries.push(TraceEntry {
                kind: TraceEntryKind::DetectedNonTipAdvance,
                summary: format!("advance source {} was not the preferred tip", node.node_id),
                refs: vec![node.node_id.to_string()],
            });
        }
        trace_entries.extend(next.trace.clone());
        let trace_entries = budget_trace(trace_entries);
        if !trace_entries.is_empty() {
            extras.push(trace_extra_event(
                internal,
                &payload.run_id,
                self.mint_event_id(),
                TraceId::minted(&self.entropy.id_body()),
                trace_entries,
            ));
        }

        let outputs = normalize_outputs(
            &payload.attempt_id,
            inputs.notes_markdown.as_deref(),
            inputs.validation_criteria.is_some(),
            evaluation.validation.as_ref(),
            &inputs.artifacts,
        )?;
        let output_event_ids = outputs.iter().map(|_| self.mint_event_id()).collect();

        let snapshot = ExecutionSnapshot::from_state(next.state.clone());
        let snapshot_ref = self.snapshot_store.put_snapshot(&snapshot)?;

        Ok((
            AckAdvancePlanInputs {
                session_id: internal.clone(),
                run_id: payload.run_id.clone(),
                from_node_id: node.node_id.clone(),
                attempt_id: payload.attempt_id.clone(),
                expected_first_event_index: truth.expected_next_event_index(),
                to_node_id,
                node_kind: mode.success_node_kind(),
                to_attempt_id,
                snapshot_ref,
                cause_kind,
                minted: MintedAdvanceIds {
                    advance_event_id: self.mint_event_id(),
                    node_created_event_id: self.mint_event_id(),
                    edge_created_event_id: self.mint_event_id(),
                    output_event_ids,
                },
                leading_events: Vec::new(),
                extra_events: extras,
                outputs,
            },
            next.state,
            Vec::new(),
        ))
    }

    // ------------------------------------------------------------------
    // Rehydrate path
    // ------------------------------------------------------------------

    /// Rehydrates a session read-only at a node or the preferred tip.
    fn rehydrate_at(
        &self,
        session_id: &SessionId,
        node_id: Option<&NodeId>,
    ) -> Result<ContinueWorkflowResult, EngineError> {
        let prefix = self
            .session_store
            .load_validated_prefix(session_id)?
            .ok_or_else(|| EngineError::SessionNotFound {
                session_id: session_id.clone(),
            })?;
        let truth = prefix.truth;

        // A named node anchors its own run; otherwise use the latest run.
        let run_id = match node_id {
            Some(node_id) => owning_run(&truth.events, node_id).ok_or_else(|| {
                EngineError::InvariantViolation {
                    detail: format!("token names unknown node {node_id}"),
                }
            })?,
            None => run_ids(&truth.events).pop().ok_or_else(|| {
                EngineError::InvariantViolation {
                    detail: format!("session {session_id} has no runs"),
                }
            })?,
        };
        let dag = project_run_dag(&truth.events, &run_id);
        let node = match node_id {
            Some(node_id) => known_node(&dag, node_id)?.clone(),
            None => {
                let tip = dag.preferred_tip().ok_or_else(|| EngineError::InvariantViolation {
                    detail: format!("run {run_id} has no tip"),
                })?;
                known_node(&dag, tip)?.clone()
            }
        };

        let payload = TokenPayload {
            token_kind: TokenKind::State,
            session_id: session_id.clone(),
            run_id,
            node_id: node.node_id.clone(),
            attempt_id: node.attempt_id.clone(),
            workflow_hash_ref: None,
        };
        self.position_result(&payload, &truth, &node, ContinueOutcome::Rehydrated)
    }

    /// Builds the continue result for a node position, minting fresh tokens.
    fn position_result(
        &self,
        payload: &TokenPayload,
        truth: &SessionTruth,
        node: &NodeInfo,
        outcome: ContinueOutcome,
    ) -> Result<ContinueWorkflowResult, EngineError> {
        let snapshot = self.snapshot_store.get_snapshot(&node.snapshot_ref)?;
        let state = snapshot.state();
        let attempt = expected_next_attempt(&truth.events, node);
        let tokens = self.mint_tokens(
            &payload.session_id,
            &payload.run_id,
            &node.node_id,
            &attempt,
            self.run_workflow_hash(&truth.events, &payload.run_id).as_ref(),
        )?;
        let blockers = match state {
            EngineState::Blocked {
                blockers,
                ..
            } => blockers.clone(),
            _ => Vec::new(),
        };
        Ok(ContinueWorkflowResult {
            session_id: payload.session_id.clone(),
            node_id: node.node_id.clone(),
            tokens,
            outcome,
            is_complete: state.is_complete(),
            pending: derive_pending_step(state).cloned(),
            blockers,
        })
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    /// Mints the three capability tokens for a node position.
    fn mint_tokens(
        &self,
        session_id: &SessionId,
        run_id: &RunId,
        node_id: &NodeId,
        attempt_id: &AttemptId,
        workflow_hash: Option<&WorkflowHash>,
    ) -> Result<SessionTokens, EngineError> {
        let base = TokenPayload {
            token_kind: TokenKind::State,
            session_id: session_id.clone(),
            run_id: run_id.clone(),
            node_id: node_id.clone(),
            attempt_id: attempt_id.clone(),
            workflow_hash_ref: workflow_hash.cloned(),
        };
        let state_token = mint_token(&self.token_key, &base)?;
        let ack_token = mint_token(
            &self.token_key,
            &TokenPayload {
                token_kind: TokenKind::Ack,
                workflow_hash_ref: None,
                ..base.clone()
            },
        )?;
        let checkpoint_token = mint_token(
            &self.token_key,
            &TokenPayload {
                token_kind: TokenKind::Checkpoint,
                workflow_hash_ref: None,
                ..base
            },
        )?;
        Ok(SessionTokens {
            state_token,
            ack_token,
            checkpoint_token,
        })
    }

    /// Mints one event identifier.
    fn mint_event_id(&self) -> EventId {
        EventId::minted(&self.entropy.id_body())
    }

    /// Returns the pinned workflow hash for a run, when recorded.
    fn run_workflow_hash(&self, events: &[DomainEvent], run_id: &RunId) -> Option<WorkflowHash> {
        events.iter().find_map(|event| match &event.payload {
            EventPayload::RunStarted {
                workflow_hash,
                ..
            } if event.scope.run_id.as_ref() == Some(run_id) => Some(workflow_hash.clone()),
            _ => None,
        })
    }

    /// Returns which of the required capabilities are actually available.
    fn available_capabilities(&self, required: &[String]) -> BTreeSet<String> {
        required
            .iter()
            .filter(|capability| {
                self.options.capabilities.contains(capability.as_str())
                    || self.flags.is_enabled(&format!("capability:{capability}"))
            })
            .cloned()
            .collect()
    }
}

// ============================================================================
// SECTION: Free Helpers
// ============================================================================

/// Returns the session id named inside a non-empty truth.
fn internal_session_id(truth: &SessionTruth) -> Result<SessionId, EngineError> {
    truth.session_id().cloned().ok_or_else(|| EngineError::InvariantViolation {
        detail: "session log is empty".to_string(),
    })
}

/// Looks up a node the token claims to name; unknown nodes fail closed.
fn known_node<'a>(dag: &'a RunDag, node_id: &NodeId) -> Result<&'a NodeInfo, EngineError> {
    dag.nodes.get(node_id).ok_or_else(|| EngineError::InvariantViolation {
        detail: format!("token names unknown node {node_id}"),
    })
}

/// Returns the attempt the next advance from a node must consume.
///
/// The first advance consumes the node's own attempt; later advances (forks)
/// consume the deterministic successor of the last recorded attempt.
fn expected_next_attempt(
    events: &[DomainEvent],
    node: &NodeInfo,
) -> AttemptId {
    match advance_attempts_from(events, &node.node_id).last() {
        Some(last) => last.derive_next(),
        None => node.attempt_id.clone(),
    }
}

/// Returns the run a node was created in, when it exists.
fn owning_run(events: &[DomainEvent], node_id: &NodeId) -> Option<RunId> {
    events.iter().find_map(|event| match &event.payload {
        EventPayload::NodeCreated {
            ..
        } if event.scope.node_id.as_ref() == Some(node_id) => event.scope.run_id.clone(),
        _ => None,
    })
}
