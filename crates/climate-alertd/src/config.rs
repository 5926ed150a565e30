//! Daemon configuration.

use std::path::Path;

use anyhow::{Context, bail};
use climate_alerts::EngineConfig;
use serde::{Deserialize, Serialize};

/// Configuration for `climate-alertd`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Engine settings.
    pub engine: EngineConfig,
    /// Extra attempts for a measurement whose alert could not be stored.
    pub ingest_retries: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub retry_backoff_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            ingest_retries: 3,
            retry_backoff_ms: 200,
        }
    }
}

impl DaemonConfig {
    /// Loads and validates a JSON config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("invalid config file '{}'", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the config as pretty JSON.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write config file '{}'", path.display()))?;
        Ok(())
    }

    /// Validates the config.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.engine.validate()?;
        if self.ingest_retries > 10 {
            bail!("ingest_retries cannot exceed 10");
        }
        Ok(())
    }
}
