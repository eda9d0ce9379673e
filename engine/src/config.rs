//! Engine configuration.
//!
//! Settings come from a TOML file with compiled-in defaults for every key.
//! Lookup order for `load_or_default`:
//! 1. The path in the `BACKUP_ENGINE_CONFIG` environment variable.
//! 2. `backup.toml` in the working directory.
//! 3. Defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::EngineError;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "BACKUP_ENGINE_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "backup.toml";

/// Resolved configuration consumed by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Registry capacity
    pub max_backup_jobs: usize,
    /// Extensions transferred first and encrypted after copy
    pub priority_extensions: Vec<String>,
    /// Files larger than this (bytes) wait for pending priority files
    /// in every job. 0 disables the rule.
    pub max_parallel_transfer_size: u64,
    /// External encryption tool
    pub crypto_soft_path: Option<PathBuf>,
    pub crypto_key: String,
    /// Process name that pauses every job while it runs. Empty disables.
    pub business_software: String,
    pub business_poll_interval_ms: u64,
    pub priority_poll_interval_ms: u64,
    /// Persisted job registry
    pub jobs_file: PathBuf,
    /// Live progress snapshot read by monitors
    pub state_file: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_backup_jobs: 5,
            priority_extensions: Vec::new(),
            max_parallel_transfer_size: 0,
            crypto_soft_path: None,
            crypto_key: String::new(),
            business_software: String::new(),
            business_poll_interval_ms: 2000,
            priority_poll_interval_ms: 50,
            jobs_file: PathBuf::from("jobs.json"),
            state_file: PathBuf::from("state.json"),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path).map_err(|e| EngineError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| EngineError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        info!(path = %path.display(), "loaded engine configuration");
        Ok(config)
    }

    /// Load from the environment override, then the working directory,
    /// then fall back to defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(config) => return config,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "BACKUP_ENGINE_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            match Self::load(local) {
                Ok(config) => return config,
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// True if `path` has one of the priority extensions.
    ///
    /// Comparison ignores case and a leading dot in the configured value.
    pub fn is_priority(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.priority_extensions
            .iter()
            .map(|p| p.trim().trim_start_matches('.'))
            .any(|p| !p.is_empty() && p.eq_ignore_ascii_case(ext))
    }

    /// Large-file threshold in bytes, if the rule is enabled.
    pub fn large_file_threshold(&self) -> Option<u64> {
        (self.max_parallel_transfer_size > 0).then_some(self.max_parallel_transfer_size)
    }

    /// Encryption tool path if one is configured. Whether it exists is
    /// checked at the start of each run.
    pub fn encryption_tool(&self) -> Option<&Path> {
        self.crypto_soft_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    pub fn business_software(&self) -> Option<&str> {
        let name = self.business_software.trim();
        (!name.is_empty()).then_some(name)
    }

    pub fn business_poll_interval(&self) -> Duration {
        Duration::from_millis(self.business_poll_interval_ms.max(1))
    }

    pub fn priority_poll_interval(&self) -> Duration {
        Duration::from_millis(self.priority_poll_interval_ms.max(1))
    }
}
