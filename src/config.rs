//! Configuration management for the rollup store
//!
//! TOML files with environment variable overrides and defaults for every
//! field, so an empty file is a valid configuration.

use crate::error::ModelError;
use crate::granularity::Granularity;
use crate::types::{Shard, NUM_SHARDS};
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Rollup scheduling and retention
    #[serde(default)]
    pub rollup: RollupConfig,

    /// Delayed sample tracking
    #[serde(default)]
    pub delayed: DelayedConfig,

    /// Shard ownership
    #[serde(default)]
    pub sharding: ShardingConfig,

    /// Monitoring and observability
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Rollup configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RollupConfig {
    /// Maximum ranges rolled concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Scheduler tick in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// A slot is rolled once its newest sample is this old
    #[serde(default = "default_rollup_delay_ms")]
    pub rollup_delay_ms: i64,

    /// A re-roll waits until the slot's newest sample is this old
    #[serde(default = "default_short_delay_rollup_delay_ms")]
    pub short_delay_rollup_delay_ms: i64,

    /// A re-roll after a long-delayed sample waits this long after the last ingest
    #[serde(default = "default_long_delay_rollup_wait_ms")]
    pub long_delay_rollup_wait_ms: i64,

    /// A rollup within this span of the previous one counts as a re-roll
    #[serde(default = "default_reroll_time_span_ms")]
    pub reroll_time_span_ms: i64,

    /// TTL of raw samples in seconds
    #[serde(default = "default_full_ttl_seconds")]
    pub full_ttl_seconds: u32,

    /// TTL of 5 minute rollups in seconds
    #[serde(default = "default_min_5_ttl_seconds")]
    pub min_5_ttl_seconds: u32,

    /// TTL of 20 minute rollups in seconds
    #[serde(default = "default_min_20_ttl_seconds")]
    pub min_20_ttl_seconds: u32,

    /// TTL of 60 minute rollups in seconds
    #[serde(default = "default_min_60_ttl_seconds")]
    pub min_60_ttl_seconds: u32,

    /// TTL of 4 hour rollups in seconds
    #[serde(default = "default_min_240_ttl_seconds")]
    pub min_240_ttl_seconds: u32,

    /// TTL of 1 day rollups in seconds
    #[serde(default = "default_min_1440_ttl_seconds")]
    pub min_1440_ttl_seconds: u32,
}

/// Delayed sample tracking configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DelayedConfig {
    /// Record delayed locators at ingest
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// A sample older than this at ingest is delayed
    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: i64,

    /// Granularity whose slots delayed locators are recorded against
    #[serde(default = "default_tracking_granularity")]
    pub tracking_granularity: String,

    /// Seconds a `(slot, locator)` pair stays deduplicated after last use
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Maximum `(slot, locator)` pairs remembered
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

/// Sharding configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShardingConfig {
    /// Total shards; must match the compiled shard count
    #[serde(default = "default_num_shards")]
    pub num_shards: u32,

    /// Shards this process rolls up; empty means all
    #[serde(default)]
    pub managed_shards: Vec<Shard>,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

const DAY_SECONDS: u32 = 86_400;

fn default_concurrency() -> usize { 8 }
fn default_poll_interval_ms() -> u64 { 1_000 }
fn default_rollup_delay_ms() -> i64 { 300_000 }
fn default_short_delay_rollup_delay_ms() -> i64 { 600_000 }
fn default_long_delay_rollup_wait_ms() -> i64 { 300_000 }
fn default_reroll_time_span_ms() -> i64 { 259_200_000 }
fn default_full_ttl_seconds() -> u32 { 5 * DAY_SECONDS }
fn default_min_5_ttl_seconds() -> u32 { 10 * DAY_SECONDS }
fn default_min_20_ttl_seconds() -> u32 { 20 * DAY_SECONDS }
fn default_min_60_ttl_seconds() -> u32 { 155 * DAY_SECONDS }
fn default_min_240_ttl_seconds() -> u32 { 300 * DAY_SECONDS }
fn default_min_1440_ttl_seconds() -> u32 { 1825 * DAY_SECONDS }
fn default_max_age_ms() -> i64 { 300_000 }
fn default_tracking_granularity() -> String { "20m".to_string() }
fn default_cache_ttl_secs() -> u64 { 600 }
fn default_cache_capacity() -> usize { 100_000 }
fn default_num_shards() -> u32 { NUM_SHARDS }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            rollup_delay_ms: default_rollup_delay_ms(),
            short_delay_rollup_delay_ms: default_short_delay_rollup_delay_ms(),
            long_delay_rollup_wait_ms: default_long_delay_rollup_wait_ms(),
            reroll_time_span_ms: default_reroll_time_span_ms(),
            full_ttl_seconds: default_full_ttl_seconds(),
            min_5_ttl_seconds: default_min_5_ttl_seconds(),
            min_20_ttl_seconds: default_min_20_ttl_seconds(),
            min_60_ttl_seconds: default_min_60_ttl_seconds(),
            min_240_ttl_seconds: default_min_240_ttl_seconds(),
            min_1440_ttl_seconds: default_min_1440_ttl_seconds(),
        }
    }
}

impl Default for DelayedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age_ms: default_max_age_ms(),
            tracking_granularity: default_tracking_granularity(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            num_shards: default_num_shards(),
            managed_shards: Vec::new(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            log_level: default_log_level(),
        }
    }
}

impl RollupConfig {
    /// TTL for cells written at `granularity`
    pub fn ttl_for(&self, granularity: Granularity) -> u32 {
        match granularity {
            Granularity::Full => self.full_ttl_seconds,
            Granularity::Min5 => self.min_5_ttl_seconds,
            Granularity::Min20 => self.min_20_ttl_seconds,
            Granularity::Min60 => self.min_60_ttl_seconds,
            Granularity::Min240 => self.min_240_ttl_seconds,
            Granularity::Min1440 => self.min_1440_ttl_seconds,
        }
    }
}

impl DelayedConfig {
    /// Parsed tracking granularity
    pub fn granularity(&self) -> Result<Granularity, ModelError> {
        Granularity::from_name(&self.tracking_granularity)
    }

    /// Cache TTL in milliseconds
    pub fn cache_ttl_ms(&self) -> i64 {
        (self.cache_ttl_secs as i64).saturating_mul(1_000)
    }
}

impl ShardingConfig {
    /// Managed shards, expanding an empty list to every shard
    pub fn resolved_shards(&self) -> Vec<Shard> {
        if self.managed_shards.is_empty() {
            (0..NUM_SHARDS).collect()
        } else {
            self.managed_shards.clone()
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;

        toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file {}: {}", path, e))
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self, String> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_env_overrides(&mut self) {
        // Rollup
        if let Ok(concurrency) = std::env::var("ROLLUP_CONCURRENCY") {
            if let Ok(c) = concurrency.parse() {
                self.rollup.concurrency = c;
            }
        }
        if let Ok(delay) = std::env::var("ROLLUP_DELAY_MS") {
            if let Ok(d) = delay.parse() {
                self.rollup.rollup_delay_ms = d;
            }
        }

        // Delayed tracking
        if let Ok(max_age) = std::env::var("ROLLUP_MAX_AGE_MS") {
            if let Ok(m) = max_age.parse() {
                self.delayed.max_age_ms = m;
            }
        }
        if let Ok(granularity) = std::env::var("ROLLUP_DELAYED_GRANULARITY") {
            self.delayed.tracking_granularity = granularity;
        }

        // Sharding
        if let Ok(shards) = std::env::var("ROLLUP_MANAGED_SHARDS") {
            let parsed: Result<Vec<Shard>, _> = shards
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse)
                .collect();
            if let Ok(parsed) = parsed {
                self.sharding.managed_shards = parsed;
            }
        }

        // Monitoring
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.rollup.concurrency == 0 {
            return Err("Rollup concurrency must be > 0".to_string());
        }
        if self.rollup.poll_interval_ms == 0 {
            return Err("Poll interval must be > 0".to_string());
        }
        if self.rollup.rollup_delay_ms < 0
            || self.rollup.short_delay_rollup_delay_ms < 0
            || self.rollup.long_delay_rollup_wait_ms < 0
        {
            return Err("Rollup delays cannot be negative".to_string());
        }

        if self.delayed.max_age_ms < 0 {
            return Err("Delayed max age cannot be negative".to_string());
        }
        match self.delayed.granularity() {
            Ok(Granularity::Full) => {
                return Err("Delayed tracking granularity cannot be full".to_string())
            }
            Ok(_) => {}
            Err(e) => return Err(format!("Invalid delayed tracking granularity: {}", e)),
        }
        if self.delayed.cache_capacity == 0 {
            return Err("Delayed cache capacity must be > 0".to_string());
        }

        if self.sharding.num_shards != NUM_SHARDS {
            return Err(format!(
                "Shard count {} does not match the compiled shard count {}",
                self.sharding.num_shards, NUM_SHARDS
            ));
        }
        if let Some(shard) = self.sharding.managed_shards.iter().find(|s| **s >= NUM_SHARDS) {
            return Err(format!("Managed shard {} out of range", shard));
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: &str) -> Result<(), String> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        std::fs::write(path, contents)
            .map_err(|e| format!("Failed to write config file {}: {}", path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.rollup.concurrency, 8);
        assert_eq!(config.rollup.rollup_delay_ms, 300_000);
        assert_eq!(config.delayed.granularity().unwrap(), Granularity::Min20);
        assert_eq!(config.sharding.resolved_shards().len(), NUM_SHARDS as usize);
        assert!(config.monitoring.metrics_enabled);
    }

    #[test]
    fn test_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values() {
        let mut config = Config::default();
        config.rollup.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sharding.num_shards = 64;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.delayed.tracking_granularity = "full".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sharding.managed_shards = vec![NUM_SHARDS];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ttl_per_granularity() {
        let config = RollupConfig::default();
        assert_eq!(config.ttl_for(Granularity::Full), 5 * DAY_SECONDS);
        assert_eq!(config.ttl_for(Granularity::Min1440), 1825 * DAY_SECONDS);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [rollup]
            concurrency = 2

            [sharding]
            managed_shards = [1, 2, 3]
            "#,
        )
        .unwrap();
        assert_eq!(config.rollup.concurrency, 2);
        assert_eq!(config.rollup.poll_interval_ms, 1_000);
        assert_eq!(config.sharding.resolved_shards(), vec![1, 2, 3]);
        assert_eq!(config.delayed.cache_capacity, 100_000);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollup.toml");
        let path = path.to_str().unwrap();

        let mut config = Config::default();
        config.rollup.concurrency = 3;
        config.delayed.tracking_granularity = "60m".to_string();
        config.save_to_file(path).unwrap();

        let loaded = Config::from_file(path).unwrap();
        assert_eq!(loaded.rollup.concurrency, 3);
        assert_eq!(loaded.delayed.granularity().unwrap(), Granularity::Min60);
        assert!(Config::from_file("/nonexistent/rollup.toml").is_err());
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("ROLLUP_MANAGED_SHARDS", "4, 5");
        std::env::set_var("ROLLUP_CONCURRENCY", "16");
        let config = Config::from_env();
        assert_eq!(config.sharding.managed_shards, vec![4, 5]);
        assert_eq!(config.rollup.concurrency, 16);
        std::env::remove_var("ROLLUP_MANAGED_SHARDS");
        std::env::remove_var("ROLLUP_CONCURRENCY");
    }
}
