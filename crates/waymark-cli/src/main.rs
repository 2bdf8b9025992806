// waymark-cli/src/main.rs
// ============================================================================
// Module: Waymark CLI Entry Point
// Description: Command dispatcher for local Waymark session operations.
// Purpose: Drive start, continue, checkpoint, status, export, and import.
// Dependencies: clap, serde_json, waymark-config, waymark-core, waymark-store
// ============================================================================

//! ## Overview
//! The Waymark CLI wires the engine to the local filesystem: sessions and
//! CAS content under the configured data directory, workflow files in the
//! workflows directory, and results as JSON on stdout. Every command routes
//! through the same engine the long-running hosts use, so the protocol
//! invariants hold identically here.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clap::Subcommand;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use waymark_config::StaticFlags;
use waymark_config::WaymarkConfig;
use waymark_core::AdvanceRequest;
use waymark_core::ContinueOutcome;
use waymark_core::ContinueWorkflowRequest;
use waymark_core::Engine;
use waymark_core::EngineError;
use waymark_core::EngineOptions;
use waymark_core::EngineState;
use waymark_core::ExportBundle;
use waymark_core::PendingStep;
use waymark_core::SessionEventStore;
use waymark_core::SessionId;
use waymark_core::SnapshotStore;
use waymark_core::WorkflowId;
use waymark_core::runtime::InProcessSessionGate;
use waymark_core::runtime::project_run_dag;
use waymark_core::runtime::recorded_gaps;
use waymark_core::runtime::run_ids;
use waymark_store::FileSessionStore;
use waymark_store::FileSnapshotStore;
use waymark_store::StdFilesystem;

use crate::host::FileWorkflowProvider;
use crate::host::HostError;
use crate::host::OsEntropy;
use crate::host::RuleValidationEngine;
use crate::host::SystemClock;
use crate::host::load_or_create_token_key;

mod host;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI failure mapped to an exit code.
#[derive(Debug, Error)]
enum CliError {
    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] waymark_config::ConfigError),
    /// Engine failure.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// Host port failure.
    #[error(transparent)]
    Host(#[from] HostError),
    /// Local I/O failure.
    #[error("io error: {0}")]
    Io(String),
    /// Input JSON failure.
    #[error("invalid json input: {0}")]
    Json(String),
}

impl CliError {
    /// Maps the failure onto a process exit code.
    fn exit_code(&self) -> ExitCode {
        match self {
            Self::Config(_) => ExitCode::from(2),
            Self::Json(_) => ExitCode::from(3),
            Self::Host(_) | Self::Io(_) => ExitCode::from(4),
            Self::Engine(_) => ExitCode::from(5),
        }
    }
}

// ============================================================================
// SECTION: Arguments
// ============================================================================

/// Waymark durable workflow engine CLI.
#[derive(Debug, Parser)]
#[command(name = "waymark", version, about = "Durable workflow session engine")]
struct Cli {
    /// Config file path (defaults to waymark.toml or $WAYMARK_CONFIG).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Start a workflow in a fresh session.
    Start {
        /// Workflow identifier resolved in the workflows directory.
        #[arg(long)]
        workflow: String,
        /// Initial context as a JSON object.
        #[arg(long)]
        context: Option<String>,
    },
    /// Continue a session: advance with an ack token or rehydrate.
    Continue {
        /// Ack token authorizing one advance.
        #[arg(long)]
        ack_token: Option<String>,
        /// State token for read-only rehydrate.
        #[arg(long)]
        state_token: Option<String>,
        /// Session id for read-only rehydrate at the preferred tip.
        #[arg(long)]
        session: Option<String>,
        /// Recap notes for the pending step.
        #[arg(long)]
        notes: Option<String>,
        /// Context update as a JSON object.
        #[arg(long)]
        context: Option<String>,
        /// JSON artifact; repeatable.
        #[arg(long = "artifact")]
        artifacts: Vec<String>,
        /// Autonomy mode override.
        #[arg(long)]
        autonomy: Option<String>,
        /// Risk policy override.
        #[arg(long)]
        risk_policy: Option<String>,
    },
    /// Create (idempotently) a checkpoint off a node.
    Checkpoint {
        /// Checkpoint token.
        #[arg(long)]
        token: String,
    },
    /// Show the projected status of a session.
    Status {
        /// Session identifier.
        #[arg(long)]
        session: String,
    },
    /// Export a session as a bundle file.
    Export {
        /// Session identifier.
        #[arg(long)]
        session: String,
        /// Output file path.
        #[arg(long)]
        out: PathBuf,
    },
    /// Import a bundle file as a new session.
    Import {
        /// Bundle file path.
        #[arg(long)]
        bundle: PathBuf,
    },
}

// ============================================================================
// SECTION: Output Shapes
// ============================================================================

/// JSON output for token-bearing results.
#[derive(Debug, Serialize)]
struct PositionOutput {
    /// Session identifier.
    session_id: String,
    /// Node the tokens point at.
    node_id: String,
    /// State token.
    state_token: String,
    /// Ack token.
    ack_token: String,
    /// Checkpoint token.
    checkpoint_token: String,
    /// How the call resolved.
    outcome: String,
    /// Whether the run is complete.
    is_complete: bool,
    /// Pending step, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pending: Option<PendingStep>,
    /// Blockers, when blocked.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    blockers: Vec<waymark_core::BlockerV1>,
}

/// JSON output for the status command.
#[derive(Debug, Serialize)]
struct StatusOutput {
    /// Session identifier.
    session_id: String,
    /// Runs in start order.
    runs: Vec<String>,
    /// Preferred tip of the latest run.
    #[serde(skip_serializing_if = "Option::is_none")]
    preferred_tip: Option<String>,
    /// Whether the latest run is complete.
    is_complete: bool,
    /// Whether the tip is blocked.
    blocked: bool,
    /// Number of committed events.
    event_count: usize,
    /// Whether the on-disk log validated fully.
    log_intact: bool,
    /// Recorded gaps.
    gaps: Vec<waymark_core::GapV1>,
}

// ============================================================================
// SECTION: Engine Wiring
// ============================================================================

/// Concrete engine type for the CLI host.
type CliEngine = Engine<
    FileSessionStore<StdFilesystem>,
    FileSnapshotStore<StdFilesystem>,
    FileWorkflowProvider,
    RuleValidationEngine,
>;

/// Builds the engine from loaded configuration.
fn build_engine(config: &WaymarkConfig) -> Result<CliEngine, CliError> {
    let data_dir = &config.storage.data_dir;
    let token_key = load_or_create_token_key(data_dir)?;
    let options = EngineOptions {
        defaults: config.advance_defaults()?,
        capabilities: config.defaults.capabilities.iter().cloned().collect(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        applied_config_hash: Some(config.config_hash()?),
    };
    Ok(Engine::with_token_key(
        FileSessionStore::new(data_dir, StdFilesystem::new()),
        FileSnapshotStore::new(data_dir, StdFilesystem::new()),
        FileWorkflowProvider::new(config.workflows_dir()),
        RuleValidationEngine,
        Box::new(InProcessSessionGate::new()),
        Box::new(SystemClock),
        Box::new(OsEntropy),
        Box::new(StaticFlags::from_config(config)),
        token_key,
        options,
    ))
}

// ============================================================================
// SECTION: Command Handlers
// ============================================================================

/// Parses an optional JSON argument.
fn parse_json(text: Option<&str>) -> Result<Option<Value>, CliError> {
    text.map(|text| serde_json::from_str(text).map_err(|err| CliError::Json(err.to_string())))
        .transpose()
}

/// Writes a serializable value as pretty JSON on stdout.
fn emit<T: Serialize>(value: &T) -> Result<(), CliError> {
    let text =
        serde_json::to_string_pretty(value).map_err(|err| CliError::Json(err.to_string()))?;
    let mut stdout = std::io::stdout();
    writeln!(stdout, "{text}").map_err(|err| CliError::Io(err.to_string()))
}

/// Runs the parsed command.
fn run(cli: Cli) -> Result<(), CliError> {
    let config = WaymarkConfig::load(cli.config.as_deref())?;
    let engine = build_engine(&config)?;

    match cli.command {
        Command::Start {
            workflow,
            context,
        } => {
            let context = parse_json(context.as_deref())?;
            let result =
                engine.start_workflow(&WorkflowId::new(workflow), context.as_ref())?;
            emit(&PositionOutput {
                session_id: result.session_id.to_string(),
                node_id: result.root_node_id.to_string(),
                state_token: result.tokens.state_token,
                ack_token: result.tokens.ack_token,
                checkpoint_token: result.tokens.checkpoint_token,
                outcome: "started".to_string(),
                is_complete: result.is_complete,
                pending: result.pending,
                blockers: Vec::new(),
            })
        }
        Command::Continue {
            ack_token,
            state_token,
            session,
            notes,
            context,
            artifacts,
            autonomy,
            risk_policy,
        } => {
            let context = parse_json(context.as_deref())?;
            let artifacts = artifacts
                .iter()
                .map(|text| {
                    serde_json::from_str(text).map_err(|err| CliError::Json(err.to_string()))
                })
                .collect::<Result<Vec<Value>, _>>()?;
            let result = engine.continue_workflow(&ContinueWorkflowRequest {
                ack_token,
                state_token,
                session_id: session.map(SessionId::new),
                advance: AdvanceRequest {
                    context,
                    notes_markdown: notes,
                    artifacts,
                    autonomy,
                    risk_policy,
                },
            })?;
            emit(&PositionOutput {
                session_id: result.session_id.to_string(),
                node_id: result.node_id.to_string(),
                state_token: result.tokens.state_token,
                ack_token: result.tokens.ack_token,
                checkpoint_token: result.tokens.checkpoint_token,
                outcome: outcome_label(result.outcome).to_string(),
                is_complete: result.is_complete,
                pending: result.pending,
                blockers: result.blockers,
            })
        }
        Command::Checkpoint {
            token,
        } => {
            let result = engine.checkpoint_workflow(&token)?;
            emit(&serde_json::json!({
                "session_id": result.session_id.to_string(),
                "checkpoint_node_id": result.checkpoint_node_id.to_string(),
                "state_token": result.state_token,
            }))
        }
        Command::Status {
            session,
        } => status(&config, &SessionId::new(session)),
        Command::Export {
            session,
            out,
        } => {
            let bundle = engine.export_session(&SessionId::new(session))?;
            let text = serde_json::to_string_pretty(&bundle)
                .map_err(|err| CliError::Json(err.to_string()))?;
            std::fs::write(&out, text).map_err(|err| CliError::Io(err.to_string()))?;
            emit(&serde_json::json!({
                "bundle_id": bundle.bundle_id.to_string(),
                "path": out.display().to_string(),
            }))
        }
        Command::Import {
            bundle,
        } => {
            let text =
                std::fs::read_to_string(&bundle).map_err(|err| CliError::Io(err.to_string()))?;
            let parsed: ExportBundle =
                serde_json::from_str(&text).map_err(|err| CliError::Json(err.to_string()))?;
            let session_id = engine.import_session(&parsed)?;
            emit(&serde_json::json!({
                "session_id": session_id.to_string(),
            }))
        }
    }
}

/// Returns the stable label for a continue outcome.
const fn outcome_label(outcome: ContinueOutcome) -> &'static str {
    match outcome {
        ContinueOutcome::Rehydrated => "rehydrated",
        ContinueOutcome::Advanced => "advanced",
        ContinueOutcome::Blocked => "blocked",
        ContinueOutcome::Replayed => "replayed",
    }
}

/// Projects and prints session status read-only.
fn status(config: &WaymarkConfig, session_id: &SessionId) -> Result<(), CliError> {
    let store = FileSessionStore::new(&config.storage.data_dir, StdFilesystem::new());
    let cas = FileSnapshotStore::new(&config.storage.data_dir, StdFilesystem::new());
    let prefix = store
        .load_validated_prefix(session_id)
        .map_err(EngineError::from)?
        .ok_or_else(|| EngineError::SessionNotFound {
            session_id: session_id.clone(),
        })?;
    let events = &prefix.truth.events;

    let runs = run_ids(events);
    let (preferred_tip, is_complete, blocked) = match runs.last() {
        None => (None, false, false),
        Some(run_id) => {
            let dag = project_run_dag(events, run_id);
            match dag.preferred_tip() {
                None => (None, false, false),
                Some(tip) => {
                    let state = dag
                        .nodes
                        .get(tip)
                        .map(|node| cas.get_snapshot(&node.snapshot_ref))
                        .transpose()
                        .map_err(EngineError::from)?
                        .map(|snapshot| snapshot.state().clone());
                    let is_complete = matches!(state, Some(EngineState::Complete));
                    let blocked = matches!(state, Some(EngineState::Blocked { .. }));
                    (Some(tip.to_string()), is_complete, blocked)
                }
            }
        }
    };

    emit(&StatusOutput {
        session_id: session_id.to_string(),
        runs: runs.iter().map(ToString::to_string).collect(),
        preferred_tip,
        is_complete,
        blocked,
        event_count: events.len(),
        log_intact: prefix.is_complete,
        gaps: recorded_gaps(events),
    })
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point.
fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let mut stderr = std::io::stderr();
            let _ = writeln!(stderr, "waymark: {err}");
            err.exit_code()
        }
    }
}
