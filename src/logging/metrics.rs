//! Performance metrics collection
//!
//! Records what the memory subsystem does (cleanup invocations, dispatch
//! durations, memory gauges) as aggregated stats plus a bounded recent
//! history. Observability only; nothing reads these to make decisions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Type of metric being recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MetricType {
    /// Duration of an operation
    Duration(Duration),
    /// Counter value
    Counter(u64),
    /// Gauge value (can go up or down)
    Gauge(f64),
}

/// A single metric entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEntry {
    /// Name of the metric
    pub name: String,
    /// Metric value
    pub value: MetricType,
    /// Timestamp when recorded
    pub timestamp: DateTime<Utc>,
}

/// Aggregated statistics for a metric
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricStats {
    /// Number of samples
    pub count: u64,
    /// Sum of all values
    pub sum: f64,
    /// Minimum value
    pub min: f64,
    /// Maximum value
    pub max: f64,
    /// Mean value
    pub mean: f64,
    /// Last recorded value
    pub last: f64,
}

impl MetricStats {
    fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::MAX,
            max: f64::MIN,
            mean: 0.0,
            last: 0.0,
        }
    }

    fn update(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.mean = self.sum / self.count as f64;
        self.last = value;
    }
}

/// Metrics collector for recording and aggregating performance data
pub struct MetricsCollector {
    /// Aggregated metrics by name
    metrics: RwLock<HashMap<String, MetricStats>>,
    /// Recent entries for detailed analysis
    recent_entries: RwLock<Vec<MetricEntry>>,
    /// Maximum number of recent entries to keep
    max_recent_entries: usize,
    /// Total metrics recorded
    total_recorded: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    /// Create a new metrics collector with custom history capacity
    pub fn with_capacity(max_recent_entries: usize) -> Self {
        Self {
            metrics: RwLock::new(HashMap::new()),
            recent_entries: RwLock::new(Vec::with_capacity(max_recent_entries)),
            max_recent_entries,
            total_recorded: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a metric
    pub fn record(&self, name: &str, value: MetricType) {
        let numeric_value = match &value {
            MetricType::Duration(d) => d.as_millis() as f64,
            MetricType::Counter(c) => *c as f64,
            MetricType::Gauge(g) => *g,
        };

        {
            let mut metrics = self.metrics.write();
            let stats = metrics.entry(name.to_string()).or_insert_with(MetricStats::new);
            stats.update(numeric_value);
        }

        {
            let mut recent = self.recent_entries.write();
            if recent.len() >= self.max_recent_entries {
                recent.remove(0);
            }
            recent.push(MetricEntry {
                name: name.to_string(),
                value,
                timestamp: Utc::now(),
            });
        }

        self.total_recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a duration metric
    pub fn record_duration(&self, name: &str, duration: Duration) {
        self.record(name, MetricType::Duration(duration));
    }

    /// Record a gauge metric
    pub fn record_gauge(&self, name: &str, value: f64) {
        self.record(name, MetricType::Gauge(value));
    }

    /// Increment a counter by one
    pub fn increment(&self, name: &str) {
        let next = {
            let metrics = self.metrics.read();
            metrics.get(name).map(|s| s.last + 1.0).unwrap_or(1.0)
        };
        self.record(name, MetricType::Counter(next as u64));
    }

    /// Get statistics for a specific metric
    pub fn get_stats(&self, name: &str) -> Option<MetricStats> {
        let metrics = self.metrics.read();
        metrics.get(name).cloned()
    }

    /// Current value of a counter (0 if never recorded)
    pub fn counter_value(&self, name: &str) -> u64 {
        self.get_stats(name).map(|s| s.last as u64).unwrap_or(0)
    }

    /// Get all metric statistics
    pub fn get_all_stats(&self) -> HashMap<String, MetricStats> {
        let metrics = self.metrics.read();
        metrics.clone()
    }

    /// Get total number of metrics recorded
    pub fn total_recorded(&self) -> u64 {
        self.total_recorded.load(Ordering::Relaxed)
    }

    /// Get uptime duration
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Shrink the retained history to at most `keep` entries, oldest first.
    ///
    /// Called by the cleanup coordinator when memory is tight; aggregated
    /// stats are untouched. Returns the number of entries dropped.
    pub fn trim_history(&self, keep: usize) -> usize {
        let mut recent = self.recent_entries.write();
        if recent.len() <= keep {
            return 0;
        }
        let dropped = recent.len() - keep;
        recent.drain(..dropped);
        recent.shrink_to_fit();
        dropped
    }

    /// Number of retained history entries
    pub fn history_len(&self) -> usize {
        self.recent_entries.read().len()
    }

    /// Export aggregated metrics as JSON
    pub fn export_json(&self) -> String {
        let stats = self.get_all_stats();
        serde_json::to_string_pretty(&stats).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Timer guard for automatic duration recording
pub struct TimerGuard<'a> {
    collector: &'a MetricsCollector,
    name: String,
    start: Instant,
}

impl<'a> TimerGuard<'a> {
    /// Create a new timer guard
    pub fn new(collector: &'a MetricsCollector, name: impl Into<String>) -> Self {
        Self {
            collector,
            name: name.into(),
            start: Instant::now(),
        }
    }
}

impl<'a> Drop for TimerGuard<'a> {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        self.collector.record_duration(&self.name, duration);
    }
}
