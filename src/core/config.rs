//! Configuration module for the CourseBot execution core
//!
//! Handles execution-core configuration including:
//! - Memory thresholds (soft / critical / hard ceiling)
//! - Worker process timeouts and concurrency limits
//! - Monitor and watchdog pacing
//!
//! Configuration is read once at startup from `COURSEBOT_*` environment
//! variables layered over built-in defaults, then validated and frozen.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix for all environment variable overrides (`COURSEBOT_*`).
pub const ENV_PREFIX: &str = "COURSEBOT";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    ReadFailed(#[from] config::ConfigError),

    #[error("Invalid config value: {field} = {value}")]
    InvalidValue { field: String, value: String },
}

/// Result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Main configuration for the execution core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Memory thresholds driving the monitor and watchdog
    pub memory: MemoryThresholdPolicy,

    /// Worker process execution settings
    pub executor: ExecutorConfig,

    /// Periodic monitor pacing
    pub monitor: MonitorConfig,

    /// Watchdog pacing and restart behavior
    pub watchdog: WatchdogTiming,

    /// Model cache settings
    pub model: ModelConfig,
}

/// Memory thresholds in megabytes of resident set size.
///
/// Invariant: `soft_mb < critical_mb < hard_ceiling_mb`. The hard ceiling
/// sits below the platform kill limit so the watchdog can act first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryThresholdPolicy {
    /// Light cleanup above this
    pub soft_mb: u64,

    /// Aggressive cleanup above this
    pub critical_mb: u64,

    /// Watchdog restarts the process above this
    pub hard_ceiling_mb: u64,
}

/// Severity tier for a resident-memory sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryTier {
    /// Below every threshold
    Nominal,
    /// Above the soft threshold
    Soft,
    /// Above the critical threshold
    Critical,
}

impl MemoryThresholdPolicy {
    /// Classify a resident-memory sample against the soft/critical tiers.
    pub fn tier(&self, rss_bytes: u64) -> MemoryTier {
        let rss_mb = rss_bytes / (1024 * 1024);
        if rss_mb > self.critical_mb {
            MemoryTier::Critical
        } else if rss_mb > self.soft_mb {
            MemoryTier::Soft
        } else {
            MemoryTier::Nominal
        }
    }

    /// Whether a sample is over the hard ceiling (watchdog territory).
    pub fn exceeds_ceiling(&self, rss_bytes: u64) -> bool {
        rss_bytes / (1024 * 1024) > self.hard_ceiling_mb
    }
}

/// Worker process execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Default timeout for model operations dispatched to a worker
    pub model_op_timeout_secs: u64,

    /// Default timeout for fire-and-forget heavy jobs
    pub heavy_job_timeout_secs: u64,

    /// Maximum number of concurrently running worker processes
    pub max_workers: usize,

    /// Grace period between SIGTERM and SIGKILL when a worker overruns
    pub worker_grace_ms: u64,

    /// Override for the worker command (program + args). `None` means
    /// re-invoke the current executable with the worker flag. Used by tests;
    /// not read from the environment.
    #[serde(skip)]
    pub worker_command: Option<(PathBuf, Vec<String>)>,
}

impl ExecutorConfig {
    pub fn model_op_timeout(&self) -> Duration {
        Duration::from_secs(self.model_op_timeout_secs)
    }

    pub fn heavy_job_timeout(&self) -> Duration {
        Duration::from_secs(self.heavy_job_timeout_secs)
    }

    pub fn worker_grace(&self) -> Duration {
        Duration::from_millis(self.worker_grace_ms)
    }
}

/// Periodic monitor pacing
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between monitor ticks
    pub interval_secs: u64,

    /// Emit a full diagnostic snapshot every N ticks
    pub snapshot_every: u64,
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Watchdog pacing and restart behavior
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WatchdogTiming {
    /// Seconds between resident-memory samples
    pub interval_secs: u64,

    /// Seconds to let in-flight work drain before restarting
    pub drain_secs: u64,

    /// Replace the process image in place (unix exec) instead of exiting
    /// with the restart status code for the supervisor
    pub restart_in_place: bool,
}

impl WatchdogTiming {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn drain_wait(&self) -> Duration {
        Duration::from_secs(self.drain_secs)
    }
}

/// Model cache settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Evict cached models idle longer than this
    pub cache_ttl_secs: u64,

    /// Embedding dimension of the text encoder
    pub embedding_dimension: usize,
}

impl ModelConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            memory: MemoryThresholdPolicy::default(),
            executor: ExecutorConfig::default(),
            monitor: MonitorConfig::default(),
            watchdog: WatchdogTiming::default(),
            model: ModelConfig::default(),
        }
    }
}

impl Default for MemoryThresholdPolicy {
    fn default() -> Self {
        Self {
            soft_mb: 128,
            critical_mb: 400,
            // Below the 512MB-class host plans this service is deployed on,
            // leaving headroom for the watchdog to act before the platform does
            hard_ceiling_mb: 550,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            model_op_timeout_secs: 60,
            heavy_job_timeout_secs: 120,
            max_workers: 4,
            worker_grace_ms: 500,
            worker_command: None,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            snapshot_every: 10,
        }
    }
}

impl Default for WatchdogTiming {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            drain_secs: 5,
            restart_in_place: false,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            embedding_dimension: 256,
        }
    }
}

/// Flat environment overrides, one key per `COURSEBOT_*` variable.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EnvOverrides {
    memory_soft_mb: Option<u64>,
    memory_critical_mb: Option<u64>,
    memory_hard_ceiling_mb: Option<u64>,
    model_op_timeout_secs: Option<u64>,
    heavy_job_timeout_secs: Option<u64>,
    max_workers: Option<usize>,
    worker_grace_ms: Option<u64>,
    monitor_interval_secs: Option<u64>,
    monitor_snapshot_every: Option<u64>,
    watchdog_interval_secs: Option<u64>,
    watchdog_drain_secs: Option<u64>,
    restart_in_place: Option<bool>,
    model_cache_ttl_secs: Option<u64>,
    embedding_dimension: Option<usize>,
}

impl AppConfig {
    /// Load configuration from `COURSEBOT_*` environment variables layered
    /// over the built-in defaults, then validate.
    pub fn from_env() -> ConfigResult<Self> {
        let overrides: EnvOverrides = Config::builder()
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;

        let mut cfg = Self::default();
        cfg.apply(overrides);
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply(&mut self, env: EnvOverrides) {
        macro_rules! set {
            ($field:expr, $value:expr) => {
                if let Some(v) = $value {
                    $field = v;
                }
            };
        }

        set!(self.memory.soft_mb, env.memory_soft_mb);
        set!(self.memory.critical_mb, env.memory_critical_mb);
        set!(self.memory.hard_ceiling_mb, env.memory_hard_ceiling_mb);
        set!(self.executor.model_op_timeout_secs, env.model_op_timeout_secs);
        set!(self.executor.heavy_job_timeout_secs, env.heavy_job_timeout_secs);
        set!(self.executor.max_workers, env.max_workers);
        set!(self.executor.worker_grace_ms, env.worker_grace_ms);
        set!(self.monitor.interval_secs, env.monitor_interval_secs);
        set!(self.monitor.snapshot_every, env.monitor_snapshot_every);
        set!(self.watchdog.interval_secs, env.watchdog_interval_secs);
        set!(self.watchdog.drain_secs, env.watchdog_drain_secs);
        set!(self.watchdog.restart_in_place, env.restart_in_place);
        set!(self.model.cache_ttl_secs, env.model_cache_ttl_secs);
        set!(self.model.embedding_dimension, env.embedding_dimension);
    }

    /// Reject configurations the subsystem cannot run under.
    pub fn validate(&self) -> ConfigResult<()> {
        let m = &self.memory;
        if !(m.soft_mb < m.critical_mb && m.critical_mb < m.hard_ceiling_mb) {
            return Err(ConfigError::InvalidValue {
                field: "memory thresholds".to_string(),
                value: format!(
                    "soft={} critical={} hard_ceiling={} (must be strictly increasing)",
                    m.soft_mb, m.critical_mb, m.hard_ceiling_mb
                ),
            });
        }

        for (field, value) in [
            ("model_op_timeout_secs", self.executor.model_op_timeout_secs),
            ("heavy_job_timeout_secs", self.executor.heavy_job_timeout_secs),
            ("monitor_interval_secs", self.monitor.interval_secs),
            ("monitor_snapshot_every", self.monitor.snapshot_every),
            ("watchdog_interval_secs", self.watchdog.interval_secs),
            ("model_cache_ttl_secs", self.model.cache_ttl_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: "0".to_string(),
                });
            }
        }

        if self.executor.max_workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_workers".to_string(),
                value: "0".to_string(),
            });
        }

        if self.model.embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue {
                field: "embedding_dimension".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(())
    }
}
