//! Error types for taskmon.
//!
//! Errors are strongly typed using thiserror. Only argument validation and
//! lifecycle problems reach the caller; failures of a single tracked subject
//! are turned into `Failed` events instead.

use thiserror::Error;

use crate::subject::SubjectId;

/// Raised by a completion predicate that could not determine a status.
///
/// Never propagated to callers: the monitor logs it and emits a `Failed`
/// event for the subject being checked.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Predicate failed: {message}")]
pub struct PredicateError {
    /// Human readable cause.
    pub message: String,
}

impl PredicateError {
    /// Creates a predicate error from any displayable cause.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Top-level error type for taskmon.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Invalid argument '{field}': {reason}")]
    InvalidArgument {
        field: String,
        reason: String,
    },

    #[error("Subject {id} is already being monitored")]
    AlreadyTracked {
        id: SubjectId,
    },

    #[error("Monitoring service has been shut down")]
    ShutDown,

    #[error("Wait timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
    },
}

impl MonitorError {
    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout {
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Returns true if this is an argument validation error.
    #[must_use]
    pub const fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }

    /// Returns true if the caller-side wait expired.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if the service was already stopped.
    #[must_use]
    pub const fn is_shut_down(&self) -> bool {
        matches!(self, Self::ShutDown)
    }

    /// Returns true if retrying the same call could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidArgument { .. } | Self::ShutDown | Self::Config { .. } => false,
            // The previous tracking session may end before the next attempt.
            Self::AlreadyTracked { .. } | Self::Timeout { .. } => true,
        }
    }
}

/// Result type alias for taskmon operations.
pub type MonitorResult<T> = Result<T, MonitorError>;
