//! Registry configuration
//!
//! Configured once at construction, immutable afterwards. Can be built in
//! code or parsed from TOML:
//!
//! ```toml
//! activity_timeout_ms = 60000
//! temp_file_prefix = "recovery."
//! scheduler_thread_name = "recovery-monitor"
//! ```

use recovery_core::{RecoveryError, Result};
use serde::Deserialize;
use std::time::Duration;

/// Default inactivity timeout: 15 minutes
pub const DEFAULT_ACTIVITY_TIMEOUT_MS: u64 = 15 * 60 * 1000;

/// Default prefix of temporary recovery file names
pub const DEFAULT_TEMP_FILE_PREFIX: &str = "recovery.";

/// Recovery registry configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// Inactivity timeout used by `start_with_default_timeout`
    pub activity_timeout_ms: u64,

    /// Prefix of temporary file names; a per-attempt uuid follows it
    pub temp_file_prefix: String,

    /// Name of the monitor thread spawned by `ThreadScheduler`
    pub scheduler_thread_name: String,
}

impl RegistryConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: RegistryConfig =
            toml::from_str(input).map_err(|e| RecoveryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Override the activity timeout
    pub fn with_activity_timeout(mut self, timeout: Duration) -> Self {
        self.activity_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Inactivity timeout as a `Duration`
    pub fn activity_timeout(&self) -> Duration {
        Duration::from_millis(self.activity_timeout_ms)
    }

    /// Check invariants the registry relies on
    pub fn validate(&self) -> Result<()> {
        if self.activity_timeout_ms == 0 {
            return Err(RecoveryError::Config(
                "activity_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.temp_file_prefix.is_empty() {
            return Err(RecoveryError::Config(
                "temp_file_prefix must not be empty".to_string(),
            ));
        }
        if self.temp_file_prefix.contains(|c: char| c == '/' || c == '\\') {
            return Err(RecoveryError::Config(format!(
                "temp_file_prefix must not contain path separators: {}",
                self.temp_file_prefix
            )));
        }
        if self.scheduler_thread_name.is_empty() {
            return Err(RecoveryError::Config(
                "scheduler_thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            activity_timeout_ms: DEFAULT_ACTIVITY_TIMEOUT_MS,
            temp_file_prefix: DEFAULT_TEMP_FILE_PREFIX.to_string(),
            scheduler_thread_name: "recovery-monitor".to_string(),
        }
    }
}
