//! Configuration management for Tollgate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, TollgateError};

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Default and auth-endpoint capacities
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Tenant override cache settings
    #[serde(default)]
    pub overrides: OverrideCacheConfig,

    /// Registry eviction settings
    #[serde(default)]
    pub eviction: EvictionConfig,
}

/// Capacities applied when no tenant override exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Standard per-minute capacity
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Standard per-hour capacity
    #[serde(default = "default_requests_per_hour")]
    pub requests_per_hour: u32,

    /// Per-minute capacity for the authentication endpoint
    #[serde(default = "default_auth_requests_per_minute")]
    pub auth_requests_per_minute: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            requests_per_hour: default_requests_per_hour(),
            auth_requests_per_minute: default_auth_requests_per_minute(),
        }
    }
}

fn default_requests_per_minute() -> u32 {
    100
}

fn default_requests_per_hour() -> u32 {
    1000
}

fn default_auth_requests_per_minute() -> u32 {
    10
}

/// Override cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideCacheConfig {
    /// How long a fetched override stays fresh, in seconds
    #[serde(default = "default_override_ttl")]
    pub ttl_secs: u64,

    /// Upper bound on a single store lookup, in milliseconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_ms: u64,

    /// Path to a YAML file of override records
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for OverrideCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_override_ttl(),
            fetch_timeout_ms: default_fetch_timeout(),
            path: None,
        }
    }
}

impl OverrideCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

fn default_override_ttl() -> u64 {
    60
}

fn default_fetch_timeout() -> u64 {
    250
}

/// Registry eviction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionConfig {
    /// Sweep interval in seconds
    #[serde(default = "default_eviction_interval")]
    pub interval_secs: u64,

    /// Entries idle for longer than this are removed, in seconds
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,

    /// Upper bound on the number of registry entries
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Fraction of `max_entries` to shrink to once the bound is exceeded
    #[serde(default = "default_target_ratio")]
    pub target_ratio: f64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_eviction_interval(),
            idle_ttl_secs: default_idle_ttl(),
            max_entries: default_max_entries(),
            target_ratio: default_target_ratio(),
        }
    }
}

impl EvictionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    /// Entry count the size-bounded pass shrinks the registry to.
    pub fn target_entries(&self) -> usize {
        (self.max_entries as f64 * self.target_ratio).floor() as usize
    }
}

fn default_eviction_interval() -> u64 {
    60
}

fn default_idle_ttl() -> u64 {
    2 * 60 * 60
}

fn default_max_entries() -> usize {
    100_000
}

fn default_target_ratio() -> f64 {
    0.8
}

impl TollgateConfig {
    /// Load configuration from an optional YAML file layered under
    /// `TOLLGATE__*` environment variables.
    ///
    /// `TOLLGATE__LIMITS__REQUESTS_PER_MINUTE=500` overrides
    /// `limits.requests_per_minute`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::new(path, config::FileFormat::Yaml).required(true),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix("TOLLGATE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: TollgateConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the registry cannot operate with.
    pub fn validate(&self) -> Result<()> {
        let limits = &self.limits;
        if limits.requests_per_minute == 0
            || limits.requests_per_hour == 0
            || limits.auth_requests_per_minute == 0
        {
            return Err(TollgateError::Config(
                "capacities must be greater than zero".to_string(),
            ));
        }
        if self.overrides.ttl_secs == 0 {
            return Err(TollgateError::Config(
                "overrides.ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.eviction.interval_secs == 0 || self.eviction.max_entries == 0 {
            return Err(TollgateError::Config(
                "eviction interval and max_entries must be greater than zero".to_string(),
            ));
        }
        if !(self.eviction.target_ratio > 0.0 && self.eviction.target_ratio <= 1.0) {
            return Err(TollgateError::Config(format!(
                "eviction.target_ratio must be in (0, 1], got {}",
                self.eviction.target_ratio
            )));
        }
        Ok(())
    }
}
