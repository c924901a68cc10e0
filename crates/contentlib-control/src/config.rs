//! Configuration for contentlib-control.

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{ControlError, ControlResult};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "CONTENTLIB_";

/// Top-level configuration for the controller.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ControllerConfig {
    /// Backing provider configuration.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Provider call retry policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Worker pool configuration.
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Periodic resync configuration.
    #[serde(default)]
    pub resync: ResyncConfig,
}

impl ControllerConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `controller.toml` in the current directory (if present)
    /// 3. Environment variables with `CONTENTLIB_` prefix
    pub fn load() -> ControlResult<Self> {
        Self::from_file("controller.toml")
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ControlError::config(e.to_string()))
    }
}

/// Backing provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Type of provider to use.
    #[serde(default)]
    pub provider_type: ProviderType,

    /// Timeout for a single provider call in milliseconds.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

const fn default_call_timeout_ms() -> u64 {
    10_000
}

impl ProviderConfig {
    /// Per-call timeout.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: ProviderType::default(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

/// Type of backing provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// In-process provider holding objects in memory.
    #[default]
    Memory,
}

/// Retry policy for transient provider failures.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound on any single delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Randomise delays over `[0, computed delay]`.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_delay_ms() -> u64 {
    200
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

const fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Number of resources reconciled concurrently per kind.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// How often to poll an object still being created or uploaded (milliseconds).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

const fn default_concurrency() -> usize {
    4
}

const fn default_poll_interval_ms() -> u64 {
    2_000
}

impl WorkerConfig {
    /// Poll interval for objects awaiting confirmation.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Periodic resync configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ResyncConfig {
    /// Interval between full resyncs in seconds. Zero disables resync.
    #[serde(default = "default_resync_interval_secs")]
    pub interval_secs: u64,
}

const fn default_resync_interval_secs() -> u64 {
    600 // 10 minutes
}

impl ResyncConfig {
    /// Resync interval, or `None` when disabled.
    #[must_use]
    pub const fn interval(&self) -> Option<Duration> {
        if self.interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.interval_secs))
        }
    }
}

impl Default for ResyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_resync_interval_secs(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ControllerConfig::default();
        assert_eq!(config.provider.provider_type, ProviderType::Memory);
        assert_eq!(config.provider.call_timeout(), Duration::from_secs(10));
        assert_eq!(config.retry.max_retries, 3);
        assert!(config.retry.jitter);
        assert_eq!(config.workers.concurrency, 4);
        assert_eq!(config.resync.interval(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn config_from_toml() {
        let toml = r#"
            [provider]
            provider_type = "memory"
            call_timeout_ms = 500

            [retry]
            max_retries = 5
            jitter = false

            [resync]
            interval_secs = 0
        "#;

        let config: ControllerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.provider.call_timeout(), Duration::from_millis(500));
        assert_eq!(config.retry.max_retries, 5);
        assert!(!config.retry.jitter);
        assert_eq!(config.retry.initial_delay_ms, 200);
        assert_eq!(config.resync.interval(), None);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = ControllerConfig::from_file("/nonexistent/controller.toml").unwrap();
        assert_eq!(config.workers.poll_interval(), Duration::from_secs(2));
    }
}
