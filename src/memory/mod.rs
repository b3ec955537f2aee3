//! Memory Module
//!
//! Keeps the long-lived service under its platform memory ceiling:
//! - Resident-memory sampling via `sysinfo` ([`ProcessSampler`])
//! - Cleanup coordinator for tiered reclamation ([`cleanup`])
//! - Cooperative periodic monitor ([`monitor::MemoryMonitor`])
//! - Independent hard-ceiling watchdog ([`watchdog::MemoryWatchdog`])
//!
//! The monitor and watchdog sample the same process through independent
//! sampler instances and never coordinate; both only trigger idempotent
//! cleanup actions.

pub mod cleanup;
pub mod monitor;
pub mod watchdog;

#[cfg(test)]
mod tests;

pub use monitor::MemoryMonitor;
pub use watchdog::{
    MemoryWatchdog, RestartStrategy, SupervisorExit, WatchdogConfig, WatchdogHandle,
    WatchdogVerdict, RESTART_EXIT_CODE,
};

use std::time::Instant;

use serde::Serialize;
use sysinfo::{Pid, System};

use crate::model::ModelCache;

/// One observation of the current process's memory and activity.
///
/// Transient: produced, classified, and discarded.
#[derive(Debug, Clone)]
pub struct MemorySample {
    /// Resident set size in bytes
    pub rss_bytes: u64,

    /// Virtual memory size in bytes
    pub virtual_bytes: u64,

    /// Process CPU usage since the previous refresh
    pub cpu_percent: f32,

    /// OS thread count, where the platform exposes it
    pub num_threads: Option<usize>,

    /// When the sample was taken
    pub sampled_at: Instant,
}

impl MemorySample {
    /// Resident set size in megabytes
    pub fn rss_mb(&self) -> f64 {
        self.rss_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Source of memory samples.
///
/// The production implementation is [`ProcessSampler`]; tests inject
/// scripted closures.
pub trait MemorySampler: Send {
    /// Take one sample, or `None` if the platform refused
    fn sample(&mut self) -> Option<MemorySample>;
}

impl<F> MemorySampler for F
where
    F: FnMut() -> Option<MemorySample> + Send,
{
    fn sample(&mut self) -> Option<MemorySample> {
        self()
    }
}

/// Samples the current process through `sysinfo`.
pub struct ProcessSampler {
    sys: System,
    pid: Pid,
}

impl ProcessSampler {
    pub fn new() -> Self {
        Self {
            sys: System::new(),
            pid: Pid::from_u32(std::process::id()),
        }
    }
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for ProcessSampler {
    fn sample(&mut self) -> Option<MemorySample> {
        if !self.sys.refresh_process(self.pid) {
            tracing::warn!("Failed to refresh process information for memory sample");
            return None;
        }
        let process = self.sys.process(self.pid)?;

        Some(MemorySample {
            rss_bytes: process.memory(),
            virtual_bytes: process.virtual_memory(),
            cpu_percent: process.cpu_usage(),
            num_threads: thread_count(),
            sampled_at: Instant::now(),
        })
    }
}

/// OS thread count of the current process (`/proc` on Linux).
#[cfg(target_os = "linux")]
fn thread_count() -> Option<usize> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    status
        .lines()
        .find(|line| line.starts_with("Threads:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|v| v.parse().ok())
}

#[cfg(not(target_os = "linux"))]
fn thread_count() -> Option<usize> {
    None
}

/// Full diagnostic snapshot for observability logging.
///
/// Logged periodically by the monitor and once per watchdog trigger; never
/// read back to make decisions.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticSnapshot {
    pub rss_mb: f64,
    pub virtual_mb: f64,
    pub cpu_percent: f32,
    pub num_threads: Option<usize>,
    pub system_total_mb: f64,
    pub system_used_mb: f64,
    pub system_available_mb: f64,
    pub loaded_models: usize,
}

impl DiagnosticSnapshot {
    /// Build a snapshot from a process sample plus a fresh system-wide
    /// memory refresh.
    pub fn capture(sample: &MemorySample, cache: Option<&ModelCache>) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        let to_mb = |bytes: u64| bytes as f64 / (1024.0 * 1024.0);

        Self {
            rss_mb: sample.rss_mb(),
            virtual_mb: to_mb(sample.virtual_bytes),
            cpu_percent: sample.cpu_percent,
            num_threads: sample.num_threads,
            system_total_mb: to_mb(sys.total_memory()),
            system_used_mb: to_mb(sys.used_memory()),
            system_available_mb: to_mb(sys.available_memory()),
            loaded_models: cache.map(|c| c.loaded_count()).unwrap_or(0),
        }
    }

    /// Emit the snapshot at info level.
    pub fn log(&self, context: &str) {
        tracing::info!(
            target: "memory",
            context,
            rss_mb = self.rss_mb,
            virtual_mb = self.virtual_mb,
            cpu_percent = self.cpu_percent,
            num_threads = self.num_threads,
            system_used_mb = self.system_used_mb,
            system_available_mb = self.system_available_mb,
            loaded_models = self.loaded_models,
            "Memory diagnostic snapshot"
        );
    }

    /// Emit the snapshot at error level (watchdog trigger path).
    pub fn log_critical(&self, context: &str) {
        tracing::error!(
            target: "memory",
            context,
            rss_mb = self.rss_mb,
            virtual_mb = self.virtual_mb,
            cpu_percent = self.cpu_percent,
            num_threads = self.num_threads,
            system_used_mb = self.system_used_mb,
            system_available_mb = self.system_available_mb,
            loaded_models = self.loaded_models,
            "Memory over hard ceiling"
        );
    }
}
