//! Configuration for the queue processor.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the queue processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// How often to re-check the queue when idle (milliseconds).
    /// Enqueues wake the processor immediately.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Upper bound for a single delivery attempt (seconds).
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,

    /// How long `stop()` waits for a running delivery before aborting it (seconds).
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Retry configuration.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry configuration for transient delivery failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum delivery attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay unit; the wait after attempt `n` is `n * base_delay_ms`.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Maximum delay between attempts.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_poll_interval() -> u64 {
    1000 // 1 second
}

fn default_delivery_timeout() -> u64 {
    600 // 10 minutes
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay() -> u64 {
    30_000 // 30 seconds
}

fn default_max_delay() -> u64 {
    600_000 // 10 minutes
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl RetryConfig {
    /// Delay before the attempt following attempt number `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(u64::from(attempt))
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// Whether another attempt is allowed after `attempts` attempts.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            delivery_timeout_secs: default_delivery_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
            retry: RetryConfig::default(),
        }
    }
}

impl ProcessorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Sets the idle poll interval.
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Sets the per-attempt delivery timeout.
    pub fn with_delivery_timeout_secs(mut self, secs: u64) -> Self {
        self.delivery_timeout_secs = secs;
        self
    }

    /// Sets the shutdown grace period.
    pub fn with_shutdown_grace_secs(mut self, secs: u64) -> Self {
        self.shutdown_grace_secs = secs;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.retry = RetryConfig {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProcessorConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.delivery_timeout(), Duration::from_secs(600));
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_backoff_is_linear_and_capped() {
        let retry = RetryConfig {
            max_attempts: 10,
            base_delay_ms: 1000,
            max_delay_ms: 3500,
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(1000));
        assert_eq!(retry.backoff(2), Duration::from_millis(2000));
        assert_eq!(retry.backoff(3), Duration::from_millis(3000));
        assert_eq!(retry.backoff(4), Duration::from_millis(3500));
        assert_eq!(retry.backoff(u32::MAX), Duration::from_millis(3500));
    }

    #[test]
    fn test_allows_retry() {
        let retry = RetryConfig {
            max_attempts: 3,
            ..Default::default()
        };
        assert!(retry.allows_retry(1));
        assert!(retry.allows_retry(2));
        assert!(!retry.allows_retry(3));
    }

    #[test]
    fn test_config_builder() {
        let config = ProcessorConfig::default()
            .with_poll_interval_ms(10)
            .with_delivery_timeout_secs(2)
            .with_shutdown_grace_secs(0)
            .with_retry(2, 5, 50);

        assert_eq!(config.poll_interval(), Duration::from_millis(10));
        assert_eq!(config.delivery_timeout(), Duration::from_secs(2));
        assert_eq!(config.shutdown_grace(), Duration::ZERO);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.max_delay_ms, 50);
    }
}
