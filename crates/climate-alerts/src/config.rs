//! Engine configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bus::{DEFAULT_MAX_SUBSCRIBERS, DEFAULT_SUBSCRIBER_BUFFER};
use crate::error::{AlertError, Result};

/// Configuration for [`crate::AlertEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-subscriber delivery buffer.
    pub subscriber_buffer: usize,
    /// Maximum concurrent live subscribers.
    pub max_subscribers: usize,
    /// Page size when a request omits one.
    pub default_page_limit: usize,
    /// Hard cap on any page size.
    pub max_page_limit: usize,
    /// Durable alert log; alerts are kept in memory when unset.
    pub alert_log_path: Option<PathBuf>,
    /// Rule snapshot file; rules are kept in memory when unset.
    pub rule_snapshot_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            max_subscribers: DEFAULT_MAX_SUBSCRIBERS,
            default_page_limit: 100,
            max_page_limit: 500,
            alert_log_path: None,
            rule_snapshot_path: None,
        }
    }
}

impl EngineConfig {
    /// Creates the default in-memory configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-subscriber buffer.
    #[must_use]
    pub const fn with_subscriber_buffer(mut self, buffer: usize) -> Self {
        self.subscriber_buffer = buffer;
        self
    }

    /// Sets the subscriber limit.
    #[must_use]
    pub const fn with_max_subscribers(mut self, max: usize) -> Self {
        self.max_subscribers = max;
        self
    }

    /// Sets the default and maximum page sizes.
    #[must_use]
    pub const fn with_page_limits(mut self, default_limit: usize, max_limit: usize) -> Self {
        self.default_page_limit = default_limit;
        self.max_page_limit = max_limit;
        self
    }

    /// Persists alerts to a JSON-lines log.
    #[must_use]
    pub fn with_alert_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.alert_log_path = Some(path.into());
        self
    }

    /// Persists rules to a JSON snapshot.
    #[must_use]
    pub fn with_rule_snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.rule_snapshot_path = Some(path.into());
        self
    }

    /// Loads and validates configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| AlertError::InvalidConfig {
            reason: format!("failed to read config file '{}': {e}", path.display()),
        })?;
        Self::from_json(&content)
    }

    /// Parses and validates configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content).map_err(|e| AlertError::InvalidConfig {
            reason: format!("invalid JSON: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidConfig` describing the first bad value.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(AlertError::InvalidConfig {
                reason: reason.to_string(),
            })
        };

        if self.subscriber_buffer == 0 {
            return invalid("subscriber_buffer must be greater than 0");
        }
        if self.max_subscribers == 0 {
            return invalid("max_subscribers must be greater than 0");
        }
        if self.default_page_limit == 0 {
            return invalid("default_page_limit must be greater than 0");
        }
        if self.max_page_limit < self.default_page_limit {
            return invalid("max_page_limit must be at least default_page_limit");
        }
        if self
            .alert_log_path
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            return invalid("alert_log_path cannot be empty");
        }
        if self
            .rule_snapshot_path
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            return invalid("rule_snapshot_path cannot be empty");
        }
        Ok(())
    }
}
