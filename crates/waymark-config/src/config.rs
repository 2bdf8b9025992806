// waymark-config/src/config.rs
// ============================================================================
// Module: Waymark Configuration
// Description: Configuration loading and validation for the Waymark engine.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: serde, toml, waymark-core
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path
//! limits. Unknown keys, oversized files, out-of-range limits, and unknown
//! preference strings all fail closed; a host that cannot load its config
//! must not run. The applied configuration hashes over canonical bytes so
//! exports can attest which settings were in effect.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use waymark_core::AdvanceDefaults;
use waymark_core::AutonomyMode;
use waymark_core::ContentDigest;
use waymark_core::DigestError;
use waymark_core::FeatureFlags;
use waymark_core::MAX_BLOCKERS;
use waymark_core::MAX_CONTEXT_BYTES;
use waymark_core::RiskPolicy;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
pub const DEFAULT_CONFIG_NAME: &str = "waymark.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "WAYMARK_CONFIG";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Smallest permitted context budget.
const MIN_CONTEXT_BYTES: usize = 1024;
/// Largest permitted validation timeout in seconds.
const MAX_VALIDATION_TIMEOUT_SECS: u64 = 300;
/// Largest permitted artifact size in bytes.
const MAX_ARTIFACT_BYTES_CEILING: usize = 16 * 1024 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("config io error at {path}: {message}")]
    Io {
        /// Config path.
        path: String,
        /// Failure description.
        message: String,
    },
    /// The config file exceeds [`MAX_CONFIG_FILE_SIZE`].
    #[error("config file {path} exceeds {MAX_CONFIG_FILE_SIZE} bytes")]
    TooLarge {
        /// Config path.
        path: String,
    },
    /// The config file does not parse as TOML.
    #[error("config parse error: {message}")]
    Parse {
        /// Parser message.
        message: String,
    },
    /// A config value is invalid.
    #[error("invalid config field {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
    /// The config could not be hashed.
    #[error("config hashing failed: {0}")]
    Hash(#[from] DigestError),
}

// ============================================================================
// SECTION: Sections
// ============================================================================

/// Storage section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Data directory holding sessions, snapshots, and pinned workflows.
    pub data_dir: PathBuf,
    /// Directory holding workflow files; defaults to `<data_dir>/workflows`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflows_dir: Option<PathBuf>,
}

/// Limits section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Canonical byte budget for merged context.
    #[serde(default = "default_max_context_bytes")]
    pub max_context_bytes: usize,
    /// Maximum blockers in one report.
    #[serde(default = "default_max_blockers")]
    pub max_blockers: usize,
    /// Maximum canonical bytes per submitted artifact.
    #[serde(default = "default_max_artifact_bytes")]
    pub max_artifact_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_context_bytes: default_max_context_bytes(),
            max_blockers: default_max_blockers(),
            max_artifact_bytes: default_max_artifact_bytes(),
        }
    }
}

/// Validation section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationConfig {
    /// Soft deadline for one validation engine call, in seconds.
    #[serde(default = "default_validation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_validation_timeout_secs(),
        }
    }
}

/// Defaults section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultsConfig {
    /// Default autonomy mode label.
    #[serde(default = "default_autonomy")]
    pub autonomy: String,
    /// Default risk policy label.
    #[serde(default = "default_risk_policy")]
    pub risk_policy: String,
    /// Capabilities held by the executing agent.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            autonomy: default_autonomy(),
            risk_policy: default_risk_policy(),
            capabilities: Vec::new(),
        }
    }
}

/// Default context budget.
const fn default_max_context_bytes() -> usize {
    MAX_CONTEXT_BYTES
}

/// Default blocker cap.
const fn default_max_blockers() -> usize {
    MAX_BLOCKERS
}

/// Default artifact size cap.
const fn default_max_artifact_bytes() -> usize {
    1024 * 1024
}

/// Default validation timeout.
const fn default_validation_timeout_secs() -> u64 {
    30
}

/// Default autonomy label.
fn default_autonomy() -> String {
    "guided".to_string()
}

/// Default risk policy label.
fn default_risk_policy() -> String {
    "conservative".to_string()
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Top-level Waymark configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaymarkConfig {
    /// Storage section.
    pub storage: StorageConfig,
    /// Limits section.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Validation section.
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Defaults section.
    #[serde(default)]
    pub defaults: DefaultsConfig,
    /// Feature flags by name.
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
}

impl WaymarkConfig {
    /// Loads configuration from an explicit path, the environment override,
    /// or the default filename, in that order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on read failures, oversized files, parse
    /// failures, or invalid values.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved: PathBuf = match path {
            Some(path) => path.to_path_buf(),
            None => env::var(CONFIG_ENV_VAR)
                .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_NAME), PathBuf::from),
        };
        let text = fs::read_to_string(&resolved).map_err(|err| ConfigError::Io {
            path: resolved.display().to_string(),
            message: err.to_string(),
        })?;
        if text.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::TooLarge {
                path: resolved.display().to_string(),
            });
        }
        let config: Self = toml::from_str(&text).map_err(|err| ConfigError::Parse {
            message: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every field against its permitted range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] on the first out-of-range value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_path(&self.storage.data_dir, "storage.data_dir")?;
        if let Some(workflows_dir) = &self.storage.workflows_dir {
            validate_path(workflows_dir, "storage.workflows_dir")?;
        }

        if self.limits.max_context_bytes < MIN_CONTEXT_BYTES
            || self.limits.max_context_bytes > MAX_CONTEXT_BYTES
        {
            return Err(ConfigError::Invalid {
                field: "limits.max_context_bytes",
                reason: format!(
                    "must be within {MIN_CONTEXT_BYTES}..={MAX_CONTEXT_BYTES}, got {}",
                    self.limits.max_context_bytes
                ),
            });
        }
        if self.limits.max_blockers == 0 || self.limits.max_blockers > MAX_BLOCKERS {
            return Err(ConfigError::Invalid {
                field: "limits.max_blockers",
                reason: format!(
                    "must be within 1..={MAX_BLOCKERS}, got {}",
                    self.limits.max_blockers
                ),
            });
        }
        if self.limits.max_artifact_bytes == 0
            || self.limits.max_artifact_bytes > MAX_ARTIFACT_BYTES_CEILING
        {
            return Err(ConfigError::Invalid {
                field: "limits.max_artifact_bytes",
                reason: format!(
                    "must be within 1..={MAX_ARTIFACT_BYTES_CEILING}, got {}",
                    self.limits.max_artifact_bytes
                ),
            });
        }
        if self.validation.timeout_secs == 0
            || self.validation.timeout_secs > MAX_VALIDATION_TIMEOUT_SECS
        {
            return Err(ConfigError::Invalid {
                field: "validation.timeout_secs",
                reason: format!(
                    "must be within 1..={MAX_VALIDATION_TIMEOUT_SECS}, got {}",
                    self.validation.timeout_secs
                ),
            });
        }
        if AutonomyMode::narrow(&self.defaults.autonomy).is_none() {
            return Err(ConfigError::Invalid {
                field: "defaults.autonomy",
                reason: format!("unknown autonomy mode {}", self.defaults.autonomy),
            });
        }
        if RiskPolicy::narrow(&self.defaults.risk_policy).is_none() {
            return Err(ConfigError::Invalid {
                field: "defaults.risk_policy",
                reason: format!("unknown risk policy {}", self.defaults.risk_policy),
            });
        }
        for flag in self.flags.keys() {
            if flag.is_empty() || flag.len() > MAX_PATH_COMPONENT_LENGTH {
                return Err(ConfigError::Invalid {
                    field: "flags",
                    reason: format!("flag name {flag:?} has an invalid length"),
                });
            }
        }
        Ok(())
    }

    /// Returns the narrowed execution defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a preference label is unknown.
    pub fn advance_defaults(&self) -> Result<AdvanceDefaults, ConfigError> {
        let autonomy =
            AutonomyMode::narrow(&self.defaults.autonomy).ok_or(ConfigError::Invalid {
                field: "defaults.autonomy",
                reason: self.defaults.autonomy.clone(),
            })?;
        let risk_policy =
            RiskPolicy::narrow(&self.defaults.risk_policy).ok_or(ConfigError::Invalid {
                field: "defaults.risk_policy",
                reason: self.defaults.risk_policy.clone(),
            })?;
        Ok(AdvanceDefaults {
            autonomy,
            risk_policy,
        })
    }

    /// Returns the effective workflows directory.
    #[must_use]
    pub fn workflows_dir(&self) -> PathBuf {
        self.storage
            .workflows_dir
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("workflows"))
    }

    /// Hashes the applied configuration over canonical bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Hash`] when canonicalization fails.
    pub fn config_hash(&self) -> Result<ContentDigest, ConfigError> {
        Ok(ContentDigest::of_canonical_json(self)?)
    }
}

/// Validates a configured path against traversal and length limits.
fn validate_path(path: &Path, field: &'static str) -> Result<(), ConfigError> {
    let display = path.display().to_string();
    if display.is_empty() {
        return Err(ConfigError::Invalid {
            field,
            reason: "path is empty".to_string(),
        });
    }
    if display.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("path exceeds {MAX_TOTAL_PATH_LENGTH} characters"),
        });
    }
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "path must not traverse upward".to_string(),
                });
            }
            Component::Normal(part) => {
                if part.len() > MAX_PATH_COMPONENT_LENGTH {
                    return Err(ConfigError::Invalid {
                        field,
                        reason: format!(
                            "path component exceeds {MAX_PATH_COMPONENT_LENGTH} characters"
                        ),
                    });
                }
            }
            _ => {}
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Feature Flags
// ============================================================================

/// Feature flag provider backed by the config's static flag table.
#[derive(Debug, Clone, Default)]
pub struct StaticFlags {
    /// Flags by name.
    flags: BTreeMap<String, bool>,
}

impl StaticFlags {
    /// Builds the provider from a config's flag table.
    #[must_use]
    pub fn from_config(config: &WaymarkConfig) -> Self {
        Self {
            flags: config.flags.clone(),
        }
    }
}

impl FeatureFlags for StaticFlags {
    fn is_enabled(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }
}
