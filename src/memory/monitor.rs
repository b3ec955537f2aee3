//! Periodic memory monitor
//!
//! Runs as a cooperative task on the service runtime: one cheap sample per
//! tick, tiered cleanup when thresholds are crossed, and a full diagnostic
//! snapshot every Nth tick. A tick must never block long enough to delay
//! concurrent work; everything it calls is bounded.

use std::sync::Arc;

use crate::core::config::{MemoryThresholdPolicy, MemoryTier, MonitorConfig};
use crate::logging::MetricsCollector;
use crate::memory::cleanup;
use crate::memory::{DiagnosticSnapshot, MemorySampler, ProcessSampler};
use crate::model::ModelCache;

/// Periodic monitor over the main process's own resident memory.
pub struct MemoryMonitor {
    policy: MemoryThresholdPolicy,
    config: MonitorConfig,
    sampler: Box<dyn MemorySampler>,
    cache: Arc<ModelCache>,
    metrics: Arc<MetricsCollector>,
    ticks: u64,
}

impl MemoryMonitor {
    /// Create a monitor sampling the current process.
    pub fn new(
        policy: MemoryThresholdPolicy,
        config: MonitorConfig,
        cache: Arc<ModelCache>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self::with_sampler(policy, config, cache, metrics, Box::new(ProcessSampler::new()))
    }

    /// Create a monitor with an injected sampler.
    pub fn with_sampler(
        policy: MemoryThresholdPolicy,
        config: MonitorConfig,
        cache: Arc<ModelCache>,
        metrics: Arc<MetricsCollector>,
        sampler: Box<dyn MemorySampler>,
    ) -> Self {
        Self {
            policy,
            config,
            sampler,
            cache,
            metrics,
            ticks: 0,
        }
    }

    /// Run one monitoring pass and return the tier that was observed.
    ///
    /// Fast path by contract: sample, classify, bounded cleanup, counters.
    pub fn tick(&mut self) -> MemoryTier {
        self.ticks += 1;
        self.metrics.increment("monitor.ticks");

        let Some(sample) = self.sampler.sample() else {
            return MemoryTier::Nominal;
        };
        self.metrics.record_gauge("memory.rss_mb", sample.rss_mb());

        let tier = self.policy.tier(sample.rss_bytes);
        match tier {
            MemoryTier::Critical => {
                tracing::warn!(
                    rss_mb = sample.rss_mb(),
                    critical_mb = self.policy.critical_mb,
                    "Critical memory usage, running aggressive cleanup"
                );
                let outcome = cleanup::critical_cleanup(&self.cache, &self.metrics);
                self.metrics.increment("monitor.critical_cleanups");
                tracing::info!(
                    models_evicted = outcome.models_evicted,
                    history_dropped = outcome.history_dropped,
                    "Critical cleanup finished"
                );
            }
            MemoryTier::Soft => {
                tracing::info!(
                    rss_mb = sample.rss_mb(),
                    soft_mb = self.policy.soft_mb,
                    "Elevated memory usage, running light cleanup"
                );
                let outcome = cleanup::soft_cleanup(&self.cache, &self.metrics);
                self.metrics.increment("monitor.soft_cleanups");
                if outcome.models_evicted > 0 {
                    tracing::info!(models_evicted = outcome.models_evicted, "Light cleanup finished");
                }
            }
            MemoryTier::Nominal => {}
        }

        // Observability only: the snapshot never gates cleanup
        if self.ticks % self.config.snapshot_every == 0 {
            DiagnosticSnapshot::capture(&sample, Some(&self.cache)).log("periodic monitor");
        }

        tier
    }

    /// Number of ticks performed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Run the monitor loop forever on the cooperative scheduler.
    ///
    /// The caller owns the task handle and aborts it on shutdown.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            interval_secs = self.config.interval_secs,
            soft_mb = self.policy.soft_mb,
            critical_mb = self.policy.critical_mb,
            "Memory monitor started"
        );

        loop {
            interval.tick().await;
            self.tick();
        }
    }
}
