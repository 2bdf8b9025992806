// waymark-cli/src/host.rs
// ============================================================================
// Module: CLI Host Ports
// Description: Concrete port implementations for the local CLI host.
// Purpose: Wire clock, entropy, workflows, and validation into the engine.
// Dependencies: rand, serde_json, waymark-core
// ============================================================================

//! ## Overview
//! The CLI host supplies the engine's ports from local resources: the system
//! clock, operating-system entropy, workflow files on disk, and a small
//! deterministic rule validator. The token signing key persists in the data
//! directory so tokens survive across short-lived CLI invocations; tokens
//! themselves are never written anywhere.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use rand::RngCore;
use rand::rngs::OsRng;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;
use waymark_core::Clock;
use waymark_core::Entropy;
use waymark_core::TOKEN_KEY_BYTES;
use waymark_core::TokenKey;
use waymark_core::ValidationCriteria;
use waymark_core::ValidationEngine;
use waymark_core::ValidationEngineError;
use waymark_core::ValidationResult;
use waymark_core::WorkflowId;
use waymark_core::WorkflowProvider;
use waymark_core::WorkflowProviderError;
use waymark_core::WorkflowSpec;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// File holding the host's token signing key under the data directory.
const TOKEN_KEY_FILE: &str = "token.key";

// ============================================================================
// SECTION: Clock and Entropy
// ============================================================================

/// System wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Operating-system entropy source.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl Entropy for OsEntropy {
    fn random_bytes(&self, n: usize) -> Vec<u8> {
        let mut bytes = vec![0_u8; n];
        OsRng.fill_bytes(&mut bytes);
        bytes
    }
}

// ============================================================================
// SECTION: Token Key Persistence
// ============================================================================

/// Errors raised while loading the host token key.
#[derive(Debug, Error)]
pub enum HostError {
    /// Key file I/O failed.
    #[error("token key io error at {path}: {message}")]
    KeyIo {
        /// Key file path.
        path: String,
        /// Failure description.
        message: String,
    },
    /// Key file content is malformed.
    #[error("token key file at {path} is malformed")]
    KeyMalformed {
        /// Key file path.
        path: String,
    },
}

/// Loads the host token key, creating it on first use.
///
/// # Errors
///
/// Returns [`HostError`] when the key file cannot be read or written.
pub fn load_or_create_token_key(data_dir: &Path) -> Result<TokenKey, HostError> {
    let path = data_dir.join(TOKEN_KEY_FILE);
    if path.exists() {
        let bytes = fs::read(&path).map_err(|err| HostError::KeyIo {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        let key: [u8; TOKEN_KEY_BYTES] =
            bytes.as_slice().try_into().map_err(|_| HostError::KeyMalformed {
                path: path.display().to_string(),
            })?;
        return Ok(TokenKey::from_bytes(key));
    }

    let mut key = [0_u8; TOKEN_KEY_BYTES];
    OsRng.fill_bytes(&mut key);
    fs::create_dir_all(data_dir).map_err(|err| HostError::KeyIo {
        path: data_dir.display().to_string(),
        message: err.to_string(),
    })?;
    fs::write(&path, key).map_err(|err| HostError::KeyIo {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    Ok(TokenKey::from_bytes(key))
}

// ============================================================================
// SECTION: Workflow Provider
// ============================================================================

/// Workflow provider reading workflow specification files from a directory.
///
/// A workflow with id `wf` resolves to `<dir>/wf.json`.
#[derive(Debug, Clone)]
pub struct FileWorkflowProvider {
    /// Directory holding workflow files.
    dir: PathBuf,
}

impl FileWorkflowProvider {
    /// Creates a provider over a workflow directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
        }
    }
}

impl WorkflowProvider for FileWorkflowProvider {
    fn fetch_by_id(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<WorkflowSpec>, WorkflowProviderError> {
        let path = self.dir.join(format!("{workflow_id}.json"));
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(WorkflowProviderError::Provider(format!(
                    "cannot read {}: {err}",
                    path.display()
                )));
            }
        };
        let spec: WorkflowSpec = serde_json::from_str(&text).map_err(|err| {
            WorkflowProviderError::Provider(format!("cannot parse {}: {err}", path.display()))
        })?;
        if spec.workflow_id != *workflow_id {
            return Err(WorkflowProviderError::Provider(format!(
                "file {} declares workflow {}",
                path.display(),
                spec.workflow_id
            )));
        }
        Ok(Some(spec))
    }
}

// ============================================================================
// SECTION: Rule Validation Engine
// ============================================================================

/// Small deterministic validator over criteria rule objects.
///
/// Recognized criteria spec fields: `min_length` (notes byte length),
/// `must_contain` (array of required substrings), and `required_context`
/// (array of context keys that must be present).
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleValidationEngine;

impl ValidationEngine for RuleValidationEngine {
    fn validate(
        &self,
        notes_markdown: &str,
        criteria: &ValidationCriteria,
        context: &Map<String, Value>,
    ) -> Result<ValidationResult, ValidationEngineError> {
        let mut issues = Vec::new();
        let mut suggestions = Vec::new();

        if let Some(min_length) = criteria.spec.get("min_length").and_then(Value::as_u64) {
            if (notes_markdown.len() as u64) < min_length {
                issues.push(format!(
                    "notes are {} bytes, criteria {} requires at least {min_length}",
                    notes_markdown.len(),
                    criteria.criteria_ref
                ));
                suggestions.push("Expand the recap notes with more detail.".to_string());
            }
        }
        if let Some(required) = criteria.spec.get("must_contain").and_then(Value::as_array) {
            for needle in required.iter().filter_map(Value::as_str) {
                if !notes_markdown.contains(needle) {
                    issues.push(format!("notes do not mention required phrase {needle:?}"));
                }
            }
        }
        if let Some(keys) = criteria.spec.get("required_context").and_then(Value::as_array) {
            for key in keys.iter().filter_map(Value::as_str) {
                if !context.contains_key(key) {
                    issues.push(format!("context key {key} is required by the criteria"));
                }
            }
        }

        Ok(ValidationResult {
            valid: issues.is_empty(),
            issues,
            suggestions,
            warnings: Vec::new(),
        })
    }
}
