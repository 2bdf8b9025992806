// waymark-config/src/lib.rs
// ============================================================================
// Module: Waymark Config Library
// Description: Strict TOML configuration for Waymark hosts.
// Purpose: Expose config loading, validation, and the static flag provider.
// Dependencies: serde, toml, waymark-core
// ============================================================================

//! ## Overview
//! Waymark configuration is deliberately small: a data directory, hard
//! limits, the validation deadline, execution-preference defaults, and a
//! static feature-flag table. Loading fails closed on anything unknown or
//! out of range.

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

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::CONFIG_ENV_VAR;
pub use config::ConfigError;
pub use config::DEFAULT_CONFIG_NAME;
pub use config::DefaultsConfig;
pub use config::LimitsConfig;
pub use config::MAX_CONFIG_FILE_SIZE;
pub use config::StaticFlags;
pub use config::StorageConfig;
pub use config::ValidationConfig;
pub use config::WaymarkConfig;
