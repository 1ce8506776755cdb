//! Environment-driven configuration for both processes.
//!
//! The deployment contract is env vars (`PORT`, `DATA_DIR`, ...), each
//! secret-bearing variable also accepting a `<NAME>_FILE` indirection that
//! reads and trims a file. Values are resolved once at startup;
//! [`GatewayConfig::validate`] / [`KeyringConfig::validate`] report issues
//! with a severity so the caller can warn-and-continue or abort.

mod gateway;
mod keyring;

pub use gateway::*;
pub use keyring::*;

use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation findings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Env helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn env_opt(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => None,
    }
}

pub(crate) fn env_or(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

pub(crate) fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_opt(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Resolve `<NAME>` or, failing that, read and trim the file named by
/// `<NAME>_FILE`. Returns `None` when neither is set.
pub(crate) fn env_or_file(name: &str) -> Result<Option<String>> {
    if let Some(v) = env_opt(name) {
        return Ok(Some(v));
    }
    let file_var = format!("{name}_FILE");
    match env_opt(&file_var) {
        Some(path) => {
            let raw = std::fs::read_to_string(Path::new(&path)).map_err(|e| {
                Error::Validation(format!("{file_var}: cannot read {path}: {e}"))
            })?;
            let trimmed = raw.trim().to_string();
            if trimmed.is_empty() {
                return Err(Error::Validation(format!("{file_var}: {path} is empty")));
            }
            Ok(Some(trimmed))
        }
        None => Ok(None),
    }
}
