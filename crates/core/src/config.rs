use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{DialerError, Result};

/// Dialer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialerConfig {
    /// Automatic queue scheduler settings
    pub dispatch: DispatchConfig,

    /// Manual multi-line supervisor settings
    pub multiline: MultiLineConfig,

    /// Persistence gateway settings
    pub persistence: PersistenceConfig,
}

/// Automatic queue scheduler ("power dialer") configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Concurrency limit used when a session does not specify one
    pub default_concurrency_limit: usize,

    /// Upper bound accepted for any session's concurrency limit
    pub max_concurrency_limit: usize,

    /// Interval between dispatch ticks
    pub tick_interval: Duration,

    /// Interval between call-state polls when the backend offers no push events
    pub poll_interval: Duration,

    /// A call still unanswered after this long is hung up as NO_ANSWER
    pub ring_timeout: Duration,

    /// Origination that has not returned a handle after this long fails the queue item
    pub origination_timeout: Duration,

    /// Time allowed for the backend to accept one hangup request
    pub hangup_timeout: Duration,

    /// Priority added to a queue item when its answered call is busy-dropped
    pub busy_priority_boost: i32,

    /// Attempts granted to queue items built without an explicit maximum
    pub default_max_attempts: u32,

    /// Consecutive failed polls after which a call is treated as disconnected
    pub max_poll_failures: u32,

    /// Interval between session stats flushes to the persistence gateway
    pub stats_flush_interval: Duration,
}

/// Manual multi-line supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiLineConfig {
    /// Maximum simultaneously ringing/connected manual calls
    pub max_lines: usize,

    /// Poll interval for per-call listeners without push events
    pub poll_interval: Duration,

    /// Consecutive failed polls after which a manual call is treated as disconnected
    pub max_poll_failures: u32,

    /// Time allowed for the backend to accept one hangup request
    pub hangup_timeout: Duration,
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// sqlx database URL for the SQLite gateway
    pub database_url: String,

    /// Maximum pooled connections (in-memory databases always use one)
    pub max_connections: u32,

    /// Retry recoverable write failures before dropping them
    pub retry_writes: bool,
}

impl DialerConfig {
    /// Load a JSON configuration file and validate it
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DialerError::config(format!("Cannot read {}: {}", path.display(), e)))?;
        let config: DialerConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        let dispatch = &self.dispatch;

        if dispatch.max_concurrency_limit == 0 {
            return Err(DialerError::config("max_concurrency_limit must be greater than 0"));
        }

        if dispatch.default_concurrency_limit == 0
            || dispatch.default_concurrency_limit > dispatch.max_concurrency_limit
        {
            return Err(DialerError::config(format!(
                "default_concurrency_limit must be between 1 and {}",
                dispatch.max_concurrency_limit
            )));
        }

        if dispatch.tick_interval.is_zero() || dispatch.poll_interval.is_zero() {
            return Err(DialerError::config("tick_interval and poll_interval must be non-zero"));
        }

        if dispatch.ring_timeout <= dispatch.poll_interval {
            return Err(DialerError::config("ring_timeout must exceed poll_interval"));
        }

        if dispatch.origination_timeout.is_zero() || dispatch.hangup_timeout.is_zero() {
            return Err(DialerError::config("origination_timeout and hangup_timeout must be non-zero"));
        }

        if dispatch.busy_priority_boost <= 0 {
            return Err(DialerError::config("busy_priority_boost must be positive"));
        }

        if dispatch.default_max_attempts == 0 {
            return Err(DialerError::config("default_max_attempts must be at least 1"));
        }

        if dispatch.max_poll_failures == 0 {
            return Err(DialerError::config("max_poll_failures must be at least 1"));
        }

        if dispatch.stats_flush_interval.is_zero() {
            return Err(DialerError::config("stats_flush_interval must be non-zero"));
        }

        if self.multiline.max_lines == 0 {
            return Err(DialerError::config("max_lines must be greater than 0"));
        }

        if self.multiline.poll_interval.is_zero() {
            return Err(DialerError::config("multiline poll_interval must be non-zero"));
        }

        if self.multiline.max_poll_failures == 0 {
            return Err(DialerError::config("multiline max_poll_failures must be at least 1"));
        }

        if self.multiline.hangup_timeout.is_zero() {
            return Err(DialerError::config("multiline hangup_timeout must be non-zero"));
        }

        if self.persistence.database_url.is_empty() {
            return Err(DialerError::config("database_url cannot be empty"));
        }

        Ok(())
    }
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            multiline: MultiLineConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_concurrency_limit: 2,
            max_concurrency_limit: 10,
            tick_interval: Duration::from_secs(2),
            poll_interval: Duration::from_secs(1),
            ring_timeout: Duration::from_secs(45),
            origination_timeout: Duration::from_secs(30),
            hangup_timeout: Duration::from_secs(5),
            busy_priority_boost: 1000,
            default_max_attempts: 3,
            max_poll_failures: 3,
            stats_flush_interval: Duration::from_secs(10),
        }
    }
}

impl Default for MultiLineConfig {
    fn default() -> Self {
        Self {
            max_lines: 3,
            poll_interval: Duration::from_secs(1),
            max_poll_failures: 3,
            hangup_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 5,
            retry_writes: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DialerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.multiline.max_lines, 3);
        assert_eq!(config.dispatch.tick_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_rejects_concurrency_above_ceiling() {
        let mut config = DialerConfig::default();
        config.dispatch.default_concurrency_limit = 11;
        assert!(matches!(config.validate(), Err(DialerError::Config(_))));
    }

    #[test]
    fn test_rejects_ring_timeout_shorter_than_poll() {
        let mut config = DialerConfig::default();
        config.dispatch.ring_timeout = Duration::from_millis(500);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DialerConfig =
            serde_json::from_str(r#"{ "multiline": { "max_lines": 2 } }"#).unwrap();
        assert_eq!(config.multiline.max_lines, 2);
        assert_eq!(config.dispatch.busy_priority_boost, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_timeouts_and_poll_failures() {
        let mut config = DialerConfig::default();
        config.dispatch.origination_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = DialerConfig::default();
        config.multiline.max_poll_failures = 0;
        assert!(matches!(config.validate(), Err(DialerError::Config(_))));

        let config: DialerConfig =
            serde_json::from_str(r#"{ "multiline": { "max_poll_failures": 1 } }"#).unwrap();
        assert_eq!(config.multiline.max_poll_failures, 1);
        assert_eq!(config.multiline.hangup_timeout, Duration::from_secs(5));
    }
}
