//! Error types for the climate-alerts crate.

use thiserror::Error;

/// Errors that can occur in the alerting engine.
#[derive(Debug, Error)]
pub enum AlertError {
    /// A rule draft or patch violates a rule invariant.
    #[error("invalid alert rule: {reason}")]
    InvalidRule {
        /// The reason the rule is invalid.
        reason: String,
    },

    /// Alert rule with the given ID was not found.
    #[error("rule not found: {id}")]
    RuleNotFound {
        /// The rule ID that was not found.
        id: String,
    },

    /// Alert with the given ID was not found.
    #[error("alert not found: {id}")]
    AlertNotFound {
        /// The alert ID that was not found.
        id: String,
    },

    /// An alert state change that the lifecycle does not allow.
    #[error("alert {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The alert being transitioned.
        id: String,
        /// Current state.
        from: String,
        /// Requested state.
        to: String,
    },

    /// The backing store failed to write; the whole evaluation may be retried.
    #[error("transient storage error: {reason}")]
    TransientStorage {
        /// The reason the write failed.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Configuration failed validation.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// The reason the configuration is invalid.
        reason: String,
    },

    /// The dissemination bus already has the maximum number of subscribers.
    #[error("subscriber limit of {limit} reached")]
    SubscriberLimit {
        /// The configured limit.
        limit: usize,
    },
}

impl AlertError {
    /// Shorthand for an [`AlertError::InvalidRule`].
    pub(crate) fn invalid_rule(reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            reason: reason.into(),
        }
    }

    /// Returns true if the caller may retry the failed operation as a whole.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStorage { .. })
    }
}

impl From<serde_json::Error> for AlertError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for AlertError {
    fn from(err: std::io::Error) -> Self {
        Self::TransientStorage {
            reason: err.to_string(),
        }
    }
}

/// Result type for alert operations.
pub type Result<T> = std::result::Result<T, AlertError>;
