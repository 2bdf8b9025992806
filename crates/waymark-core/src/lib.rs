// waymark-core/src/lib.rs
// ============================================================================
// Module: Waymark Core Library
// Description: Public API surface for the Waymark durable execution substrate.
// Purpose: Expose core types, interfaces, and runtime helpers.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Waymark core provides the durable execution substrate for AI-agent
//! workflows: an append-only attested event log model, content-addressed
//! snapshots and pinned workflows, HMAC capability tokens, a pure blocking
//! pipeline, and the engine driving it all. It is backend-agnostic and
//! integrates through explicit interfaces rather than embedding into agent
//! frameworks.

#![cfg_attr(
    test,
    allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        clippy::dbg_macro,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        reason = "Test-only output and panic-based assertions are permitted."
    )
)]

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::AppendOutcome;
pub use interfaces::Clock;
pub use interfaces::CorruptionLocation;
pub use interfaces::CorruptionReason;
pub use interfaces::DirEntryInfo;
pub use interfaces::Entropy;
pub use interfaces::FeatureFlags;
pub use interfaces::FileWriter;
pub use interfaces::Filesystem;
pub use interfaces::FsError;
pub use interfaces::GateError;
pub use interfaces::LeaseHold;
pub use interfaces::SessionEventStore;
pub use interfaces::SessionGate;
pub use interfaces::SessionLease;
pub use interfaces::SessionStoreError;
pub use interfaces::SessionTruth;
pub use interfaces::SnapshotStore;
pub use interfaces::SnapshotStoreError;
pub use interfaces::TailReason;
pub use interfaces::VALIDATION_ENGINE_TIMEOUT;
pub use interfaces::ValidatedPrefix;
pub use interfaces::ValidationEngine;
pub use interfaces::ValidationEngineError;
pub use interfaces::WorkflowProvider;
pub use interfaces::WorkflowProviderError;
pub use runtime::AdvanceDefaults;
pub use runtime::AdvanceError;
pub use runtime::AdvanceMode;
pub use runtime::AdvanceRequest;
pub use runtime::CheckpointWorkflowResult;
pub use runtime::ContinueOutcome;
pub use runtime::ContinueWorkflowRequest;
pub use runtime::ContinueWorkflowResult;
pub use runtime::Engine;
pub use runtime::EngineError;
pub use runtime::EngineOptions;
pub use runtime::InMemorySessionStore;
pub use runtime::InMemorySnapshotStore;
pub use runtime::InProcessSessionGate;
pub use runtime::SessionTokens;
pub use runtime::StartWorkflowResult;
