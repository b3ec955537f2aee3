//! Tests for the memory subsystem: sampling, monitor tiers, watchdog.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use proptest::prelude::*;

use super::watchdog::{MemoryWatchdog, RestartStrategy, WatchdogConfig, WatchdogVerdict};
use super::{MemoryMonitor, MemorySample, ProcessSampler};
use crate::core::config::{MemoryThresholdPolicy, MemoryTier, ModelConfig, MonitorConfig};
use crate::logging::MetricsCollector;
use crate::memory::MemorySampler;
use crate::model::{ModelCache, ModelId};

/// Synthetic sample at a given resident size
fn sample_of_mb(mb: u64) -> MemorySample {
    MemorySample {
        rss_bytes: mb * 1024 * 1024,
        virtual_bytes: mb * 4 * 1024 * 1024,
        cpu_percent: 1.0,
        num_threads: Some(4),
        sampled_at: Instant::now(),
    }
}

/// Sampler returning a fixed resident size forever
fn fixed_sampler(mb: u64) -> Box<dyn MemorySampler> {
    Box::new(move || Some(sample_of_mb(mb)))
}

fn monitor_with(rss_mb: u64, cache_ttl_secs: u64) -> (MemoryMonitor, Arc<ModelCache>, Arc<MetricsCollector>) {
    let cache = Arc::new(ModelCache::new(ModelConfig {
        cache_ttl_secs,
        embedding_dimension: 32,
    }));
    let metrics = Arc::new(MetricsCollector::new());
    let monitor = MemoryMonitor::with_sampler(
        MemoryThresholdPolicy::default(),
        MonitorConfig {
            interval_secs: 60,
            snapshot_every: 10,
        },
        cache.clone(),
        metrics.clone(),
        fixed_sampler(rss_mb),
    );
    (monitor, cache, metrics)
}

#[test]
fn process_sampler_reads_own_memory() {
    let mut sampler = ProcessSampler::new();
    let sample = sampler.sample().expect("own process should be sampleable");
    assert!(sample.rss_bytes > 0);
    assert!(sample.virtual_bytes >= sample.rss_bytes);
}

#[test]
fn nominal_tick_performs_no_cleanup() {
    let (mut monitor, cache, metrics) = monitor_with(64, 300);
    drop(cache.acquire(ModelId::TextEncoder).expect("warm cache"));

    assert_eq!(monitor.tick(), MemoryTier::Nominal);
    assert_eq!(metrics.counter_value("monitor.soft_cleanups"), 0);
    assert_eq!(metrics.counter_value("monitor.critical_cleanups"), 0);
    assert_eq!(cache.loaded_count(), 1);
    assert_eq!(metrics.counter_value("monitor.ticks"), 1);
}

#[test]
fn soft_tick_evicts_idle_models_and_counts() {
    let (mut monitor, cache, metrics) = monitor_with(200, 0);
    drop(cache.acquire(ModelId::TextEncoder).expect("warm cache"));
    std::thread::sleep(Duration::from_millis(10));

    assert_eq!(monitor.tick(), MemoryTier::Soft);
    assert_eq!(metrics.counter_value("monitor.soft_cleanups"), 1);
    assert_eq!(cache.loaded_count(), 0, "idle model should be evicted");
}

#[test]
fn soft_tick_spares_recently_used_models() {
    let (mut monitor, cache, metrics) = monitor_with(200, 300);
    drop(cache.acquire(ModelId::TextEncoder).expect("warm cache"));

    assert_eq!(monitor.tick(), MemoryTier::Soft);
    assert_eq!(metrics.counter_value("monitor.soft_cleanups"), 1);
    assert_eq!(cache.loaded_count(), 1, "fresh model survives light cleanup");
}

#[test]
fn critical_tick_evicts_everything() {
    let (mut monitor, cache, metrics) = monitor_with(450, 3600);
    drop(cache.acquire(ModelId::TextEncoder).expect("warm cache"));
    for _ in 0..5 {
        metrics.record_gauge("memory.rss_mb", 450.0);
    }

    assert_eq!(monitor.tick(), MemoryTier::Critical);
    assert_eq!(metrics.counter_value("monitor.critical_cleanups"), 1);
    assert_eq!(cache.loaded_count(), 0, "critical cleanup drops fresh models too");
    assert_eq!(metrics.history_len(), 0, "retained metric history is cleared");
}

#[test]
fn repeated_soft_ticks_keep_counting() {
    let (mut monitor, _cache, metrics) = monitor_with(200, 300);
    for _ in 0..3 {
        monitor.tick();
    }
    assert_eq!(metrics.counter_value("monitor.soft_cleanups"), 3);
    assert_eq!(monitor.ticks(), 3);
}

#[test]
fn tick_returns_within_time_budget() {
    let (mut monitor, _cache, _metrics) = monitor_with(450, 0);

    let start = Instant::now();
    monitor.tick();
    let elapsed = start.elapsed();
    assert!(
        elapsed < Duration::from_millis(250),
        "monitor tick took {elapsed:?}, expected a fast bounded pass"
    );
}

#[test]
fn unavailable_sample_is_nominal() {
    let cache = Arc::new(ModelCache::new(ModelConfig::default()));
    let metrics = Arc::new(MetricsCollector::new());
    let mut monitor = MemoryMonitor::with_sampler(
        MemoryThresholdPolicy::default(),
        MonitorConfig::default(),
        cache,
        metrics.clone(),
        Box::new(|| None),
    );

    assert_eq!(monitor.tick(), MemoryTier::Nominal);
    assert_eq!(metrics.counter_value("monitor.soft_cleanups"), 0);
}

/// Restart strategy that records invocations instead of replacing the process
struct RecordingRestart {
    calls: Arc<AtomicUsize>,
}

impl RestartStrategy for RecordingRestart {
    fn restart(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

fn watchdog_with(rss_mb: u64) -> (MemoryWatchdog, Arc<AtomicUsize>, Arc<MetricsCollector>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let metrics = Arc::new(MetricsCollector::new());
    let watchdog = MemoryWatchdog::new(
        WatchdogConfig {
            interval: Duration::from_millis(10),
            drain_wait: Duration::ZERO,
            policy: MemoryThresholdPolicy::default(),
        },
        metrics.clone(),
    )
    .with_sampler(fixed_sampler(rss_mb))
    .with_strategy(Box::new(RecordingRestart {
        calls: calls.clone(),
    }));
    (watchdog, calls, metrics)
}

#[test]
fn watchdog_below_ceiling_never_restarts() {
    let (mut watchdog, calls, _metrics) = watchdog_with(400);
    for _ in 0..5 {
        assert_eq!(watchdog.observe(), WatchdogVerdict::Nominal);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!watchdog.restart_pending());
}

#[test]
fn ceiling_breach_triggers_exactly_one_restart() {
    // 600MB sample against the default 550MB ceiling
    let (mut watchdog, calls, metrics) = watchdog_with(600);

    assert_eq!(watchdog.observe(), WatchdogVerdict::RestartTriggered);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(watchdog.restart_pending());
    assert_eq!(metrics.counter_value("watchdog.restarts"), 1);

    // Further breaches while the first sequence is pending are no-ops
    assert_eq!(watchdog.observe(), WatchdogVerdict::RestartAlreadyPending);
    assert_eq!(watchdog.observe(), WatchdogVerdict::RestartAlreadyPending);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(metrics.counter_value("watchdog.restarts"), 1);
}

#[test]
fn watchdog_sample_failure_does_not_restart() {
    let calls = Arc::new(AtomicUsize::new(0));
    let metrics = Arc::new(MetricsCollector::new());
    let mut watchdog = MemoryWatchdog::new(
        WatchdogConfig {
            interval: Duration::from_millis(10),
            drain_wait: Duration::ZERO,
            policy: MemoryThresholdPolicy::default(),
        },
        metrics,
    )
    .with_sampler(Box::new(|| None))
    .with_strategy(Box::new(RecordingRestart {
        calls: calls.clone(),
    }));

    assert_eq!(watchdog.observe(), WatchdogVerdict::SampleUnavailable);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn watchdog_thread_runs_and_stops_cleanly() {
    let (watchdog, calls, _metrics) = watchdog_with(100);
    let handle = watchdog.spawn().expect("spawn watchdog thread");

    std::thread::sleep(Duration::from_millis(50));
    assert!(!handle.restart_pending());
    handle.stop();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn watchdog_thread_observes_breaches() {
    let (watchdog, calls, _metrics) = watchdog_with(600);
    let handle = watchdog.spawn().expect("spawn watchdog thread");

    // First observation happens only after a full interval (startup grace)
    let start = Instant::now();
    while calls.load(Ordering::SeqCst) == 0 && start.elapsed() < Duration::from_secs(2) {
        std::thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(handle.restart_pending());
    handle.stop();
}

proptest! {
    /// Tier classification and ceiling checks agree with the raw ordering
    /// for any strictly increasing policy.
    #[test]
    fn tiers_are_consistent_with_policy(
        soft in 16u64..200,
        critical_gap in 1u64..200,
        ceiling_gap in 1u64..200,
        rss_mb in 0u64..1200,
    ) {
        let policy = MemoryThresholdPolicy {
            soft_mb: soft,
            critical_mb: soft + critical_gap,
            hard_ceiling_mb: soft + critical_gap + ceiling_gap,
        };
        let rss_bytes = rss_mb * 1024 * 1024;

        let tier = policy.tier(rss_bytes);
        match tier {
            MemoryTier::Nominal => prop_assert!(rss_mb <= policy.soft_mb),
            MemoryTier::Soft => prop_assert!(rss_mb > policy.soft_mb && rss_mb <= policy.critical_mb),
            MemoryTier::Critical => prop_assert!(rss_mb > policy.critical_mb),
        }

        if policy.exceeds_ceiling(rss_bytes) {
            prop_assert_eq!(tier, MemoryTier::Critical);
        }
    }
}
