//! Engine process configuration.
//!
//! ```toml
//! engine_path = "/opt/attest/bin/attest-engine"   # optional
//! log_level = "warn"
//! shutdown_grace_ms = 5000
//! required_capabilities = ["layers_1_4"]
//! ```
//!
//! Every field is optional in the file. `ATTEST_ENGINE_PATH` and
//! `ATTEST_LOG_LEVEL` override the file when set via `apply_env`.

use std::{path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use attest_contracts::{
    capability::{CapabilitySet, LAYERS_1_4},
    error::{AttestError, AttestResult},
};

pub const ENV_ENGINE_PATH: &str = "ATTEST_ENGINE_PATH";
pub const ENV_LOG_LEVEL: &str = "ATTEST_LOG_LEVEL";

const LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Explicit engine binary. When unset the binary is discovered.
    pub engine_path: Option<PathBuf>,
    /// Passed to the engine as `--log-level=<level>`.
    pub log_level: String,
    /// How long `stop()` waits for a graceful exit before killing.
    pub shutdown_grace_ms: u64,
    pub required_capabilities: Vec<String>,
    pub sdk_name: String,
    pub sdk_version: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine_path: None,
            log_level: "warn".to_string(),
            shutdown_grace_ms: 5_000,
            required_capabilities: vec![LAYERS_1_4.to_string()],
            sdk_name: "attest-rust".to_string(),
            sdk_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl EngineConfig {
    /// Parse `s` as TOML.
    ///
    /// Returns `AttestError::Config` if the TOML is malformed, has unknown
    /// keys, or names an unsupported log level.
    pub fn from_toml_str(s: &str) -> AttestResult<Self> {
        let config: EngineConfig = toml::from_str(s).map_err(|e| AttestError::Config {
            reason: format!("failed to parse engine TOML: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read the file at `path` and parse it as TOML engine configuration.
    pub fn from_file(path: &Path) -> AttestResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| AttestError::Config {
            reason: format!("failed to read engine config '{}': {e}", path.display()),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Apply the `ATTEST_*` environment overrides.
    pub fn apply_env(self) -> AttestResult<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup. Empty values are ignored.
    pub fn apply_overrides<F>(mut self, lookup: F) -> AttestResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_ENGINE_PATH).filter(|v| !v.trim().is_empty()) {
            self.engine_path = Some(PathBuf::from(path));
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.trim().is_empty()) {
            self.log_level = level.trim().to_lowercase();
        }
        self.validate()?;
        Ok(self)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.required_capabilities.iter().cloned().collect()
    }

    fn validate(&self) -> AttestResult<()> {
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(AttestError::Config {
                reason: format!(
                    "log_level must be one of {}, got '{}'",
                    LOG_LEVELS.join(", "),
                    self.log_level
                ),
            });
        }
        Ok(())
    }
}
