//! Shoal configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::BackendConfig;
use crate::scheduler::SchedulerConfig;

/// Main Shoal configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scheduler behavior
    pub scheduler: SchedulerConfig,

    /// Transport pulse parameters
    pub transport: TransportConfig,

    /// Sound backend configuration
    pub backend: BackendConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.transport.period_ms == 0 {
            return Err(eyre::eyre!("transport.period-ms must be greater than zero"));
        }
        if self.backend.boot_timeout_ms == 0 {
            return Err(eyre::eyre!("backend.boot-timeout-ms must be greater than zero"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .shoal.yml
        let local_config = PathBuf::from(".shoal.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/shoal/shoal.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("shoal").join("shoal.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Transport pulse configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Pulse period in milliseconds
    #[serde(rename = "period-ms")]
    pub period_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { period_ms: 500 }
    }
}

impl TransportConfig {
    /// Get the pulse period as a Duration
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}
