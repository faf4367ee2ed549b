//! Monitor configuration.
//!
//! The polling delay is fixed for the lifetime of a service. It is also the
//! resolution of timeout detection: a deadline is noticed on the first tick
//! at or after it.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, MonitorResult};

/// Environment variable overriding [`MonitorConfig::polling_delay_ms`].
pub const ENV_POLLING_DELAY_MS: &str = "TASKMON_POLLING_DELAY_MS";
/// Environment variable overriding [`MonitorConfig::thread_name`].
pub const ENV_THREAD_NAME: &str = "TASKMON_THREAD_NAME";

/// Service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Time between the end of one tick and the start of the next.
    pub polling_delay_ms: u64,
    /// Name given to the scheduler thread.
    pub thread_name: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            polling_delay_ms: 5000,
            thread_name: "taskmon-poller".to_string(),
        }
    }
}

impl MonitorConfig {
    /// Default configuration with a custom polling delay.
    #[must_use]
    pub fn with_polling_delay(delay: Duration) -> Self {
        Self {
            polling_delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            ..Self::default()
        }
    }

    /// Polling delay as a `Duration`.
    #[must_use]
    pub const fn polling_delay(&self) -> Duration {
        Duration::from_millis(self.polling_delay_ms)
    }

    /// Checks the values a service cannot run with.
    pub fn validate(&self) -> MonitorResult<()> {
        if self.polling_delay_ms == 0 {
            return Err(MonitorError::invalid_argument(
                "polling_delay_ms",
                "polling delay must be greater than zero",
            ));
        }
        if self.thread_name.trim().is_empty() {
            return Err(MonitorError::invalid_argument(
                "thread_name",
                "scheduler thread name cannot be empty",
            ));
        }
        Ok(())
    }

    /// Parses a JSON document. Missing fields take their defaults.
    pub fn from_json(text: &str) -> MonitorResult<Self> {
        let cfg: Self = serde_json::from_str(text)
            .map_err(|e| MonitorError::config(format!("invalid monitor config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads and parses a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> MonitorResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| MonitorError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// Defaults overridden by `TASKMON_*` environment variables.
    pub fn from_env() -> MonitorResult<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> MonitorResult<Self> {
        if let Some(raw) = lookup(ENV_POLLING_DELAY_MS) {
            self.polling_delay_ms = raw.trim().parse().map_err(|_| {
                MonitorError::config(format!(
                    "{ENV_POLLING_DELAY_MS} must be an integer, got {raw:?}"
                ))
            })?;
        }
        if let Some(name) = lookup(ENV_THREAD_NAME) {
            self.thread_name = name;
        }
        self.validate()?;
        Ok(self)
    }
}
