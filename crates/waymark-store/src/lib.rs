// waymark-store/src/lib.rs
// ============================================================================
// Module: Waymark Store Library
// Description: Durable file-backed stores for the Waymark engine.
// Purpose: Provide the crash-safe session log and CAS implementations.
// Dependencies: serde, serde_json, waymark-core
// ============================================================================

//! ## Overview
//! This crate implements the durable side of Waymark: the segmented,
//! attested session event log and the content-addressed snapshot and
//! pinned-workflow stores, all over the engine's filesystem port. Every
//! commit follows the rename-then-fsync protocol, so crashes at any point
//! leave the validated prefix intact.

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

pub mod fs;
pub mod session_log;
pub mod snapshot_store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use fs::StdFilesystem;
pub use session_log::FileSessionStore;
pub use snapshot_store::FileSnapshotStore;
