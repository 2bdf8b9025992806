// waymark-config/tests/config_validation.rs
// ============================================================================
// Module: Config Validation Tests
// Description: Strict parsing, defaults, and fail-closed rejection.
// ============================================================================
//! ## Overview
//! Validates config loading end to end: defaults fill in, unknown keys and
//! out-of-range values fail closed, and the flag provider reflects the
//! static table.

#![allow(
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
)]

use std::fs;

use waymark_config::ConfigError;
use waymark_config::StaticFlags;
use waymark_config::WaymarkConfig;
use waymark_core::AutonomyMode;
use waymark_core::FeatureFlags;
use waymark_core::MAX_CONTEXT_BYTES;
use waymark_core::RiskPolicy;

/// Writes a config file and loads it.
fn load(text: &str) -> Result<WaymarkConfig, ConfigError> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("waymark.toml");
    fs::write(&path, text).unwrap();
    WaymarkConfig::load(Some(&path))
}

/// A minimal config fills every default.
#[test]
fn test_minimal_config_defaults() {
    let config = load("[storage]\ndata_dir = \"data\"\n").unwrap();
    assert_eq!(config.limits.max_context_bytes, MAX_CONTEXT_BYTES);
    assert_eq!(config.validation.timeout_secs, 30);
    assert_eq!(config.defaults.autonomy, "guided");
    assert_eq!(config.defaults.risk_policy, "conservative");
    assert!(config.flags.is_empty());
    assert_eq!(config.workflows_dir(), std::path::Path::new("data").join("workflows"));

    let defaults = config.advance_defaults().unwrap();
    assert_eq!(defaults.autonomy, AutonomyMode::Guided);
    assert_eq!(defaults.risk_policy, RiskPolicy::Conservative);
}

/// Unknown keys are rejected.
#[test]
fn test_unknown_keys_rejected() {
    let result = load("[storage]\ndata_dir = \"data\"\nmystery = 1\n");
    assert!(matches!(result, Err(ConfigError::Parse { .. })));
}

/// An out-of-range context budget is rejected.
#[test]
fn test_context_budget_range_enforced() {
    let result = load(
        "[storage]\ndata_dir = \"data\"\n[limits]\nmax_context_bytes = 10000000\n",
    );
    assert!(matches!(
        result,
        Err(ConfigError::Invalid {
            field: "limits.max_context_bytes",
            ..
        })
    ));
}

/// Unknown preference labels are rejected.
#[test]
fn test_unknown_autonomy_rejected() {
    let result = load("[storage]\ndata_dir = \"data\"\n[defaults]\nautonomy = \"reckless\"\n");
    assert!(matches!(
        result,
        Err(ConfigError::Invalid {
            field: "defaults.autonomy",
            ..
        })
    ));
}

/// Upward path traversal is rejected.
#[test]
fn test_path_traversal_rejected() {
    let result = load("[storage]\ndata_dir = \"../outside\"\n");
    assert!(matches!(
        result,
        Err(ConfigError::Invalid {
            field: "storage.data_dir",
            ..
        })
    ));
}

/// A zero validation timeout is rejected.
#[test]
fn test_zero_timeout_rejected() {
    let result = load("[storage]\ndata_dir = \"data\"\n[validation]\ntimeout_secs = 0\n");
    assert!(matches!(
        result,
        Err(ConfigError::Invalid {
            field: "validation.timeout_secs",
            ..
        })
    ));
}

/// The flag provider reflects the static table and defaults to off.
#[test]
fn test_flag_provider() {
    let config = load(
        "[storage]\ndata_dir = \"data\"\n[flags]\n\"capability:browser\" = true\nconsole = false\n",
    )
    .unwrap();
    let flags = StaticFlags::from_config(&config);
    assert!(flags.is_enabled("capability:browser"));
    assert!(!flags.is_enabled("console"));
    assert!(!flags.is_enabled("missing"));
}

/// The applied-config hash is stable for identical content.
#[test]
fn test_config_hash_stable() {
    let a = load("[storage]\ndata_dir = \"data\"\n").unwrap();
    let b = load("[storage]\ndata_dir = \"data\"\n").unwrap();
    assert_eq!(a.config_hash().unwrap(), b.config_hash().unwrap());
}
