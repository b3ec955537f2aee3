//! Memory watchdog
//!
//! Last line of defense against runaway memory growth. Runs on a dedicated
//! OS thread — never the cooperative runtime — so it keeps sampling even
//! when the scheduler is stalled or saturated. Above the hard ceiling it
//! logs a critical snapshot, waits a brief drain interval for in-flight
//! work, and replaces the process through its restart strategy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::core::config::MemoryThresholdPolicy;
use crate::logging::MetricsCollector;
use crate::memory::{DiagnosticSnapshot, MemorySampler, ProcessSampler};

/// Deliberate exit status that asks the external supervisor for a restart.
pub const RESTART_EXIT_CODE: i32 = 86;

/// Watchdog configuration
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Fixed wall-clock sampling interval
    pub interval: Duration,

    /// How long to let in-flight work drain before restarting
    pub drain_wait: Duration,

    /// Memory thresholds; only the hard ceiling matters here
    pub policy: MemoryThresholdPolicy,
}

/// How the watchdog replaces the process once the ceiling is breached.
pub trait RestartStrategy: Send {
    /// Carry out the restart. Production strategies do not return; test
    /// strategies record the call and do.
    fn restart(&self);

    /// Name for logs
    fn name(&self) -> &'static str;
}

/// Exit with [`RESTART_EXIT_CODE`] and let the external supervisor
/// (container orchestrator, service manager) start a fresh process.
pub struct SupervisorExit;

impl RestartStrategy for SupervisorExit {
    fn restart(&self) {
        tracing::error!(
            exit_code = RESTART_EXIT_CODE,
            "Exiting for supervisor-driven restart"
        );
        std::process::exit(RESTART_EXIT_CODE);
    }

    fn name(&self) -> &'static str {
        "supervisor-exit"
    }
}

/// Replace the process image in place via the platform's native re-exec.
///
/// Every allocation is discarded unconditionally, including in-flight
/// requests; the supervisor keeps seeing one continuously-running process.
/// Falls back to [`SupervisorExit`] behavior when exec fails.
#[cfg(unix)]
pub struct InPlaceExec {
    /// Arguments of the original invocation (without argv\[0\])
    pub args: Vec<std::ffi::OsString>,
}

#[cfg(unix)]
impl InPlaceExec {
    /// Capture the current process's own arguments.
    pub fn from_current_args() -> Self {
        Self {
            args: std::env::args_os().skip(1).collect(),
        }
    }
}

#[cfg(unix)]
impl RestartStrategy for InPlaceExec {
    fn restart(&self) {
        use std::os::unix::process::CommandExt;

        match std::env::current_exe() {
            Ok(exe) => {
                tracing::error!(exe = %exe.display(), "Replacing process image in place");
                // exec only returns on failure
                let err = std::process::Command::new(exe).args(&self.args).exec();
                tracing::error!(error = %err, "In-place exec failed, falling back to exit");
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot resolve own executable for re-exec");
            }
        }
        std::process::exit(RESTART_EXIT_CODE);
    }

    fn name(&self) -> &'static str {
        "in-place-exec"
    }
}

/// Outcome of one watchdog observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    /// Below the ceiling
    Nominal,
    /// The platform refused a sample
    SampleUnavailable,
    /// This observation started the restart sequence
    RestartTriggered,
    /// A restart sequence is already in flight; nothing done
    RestartAlreadyPending,
}

/// Independent hard-ceiling watchdog.
pub struct MemoryWatchdog {
    config: WatchdogConfig,
    sampler: Box<dyn MemorySampler>,
    strategy: Box<dyn RestartStrategy>,
    restart_pending: Arc<AtomicBool>,
    metrics: Arc<MetricsCollector>,
}

impl MemoryWatchdog {
    /// Create a watchdog over the current process with the default
    /// supervisor-exit strategy.
    pub fn new(config: WatchdogConfig, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            config,
            sampler: Box::new(ProcessSampler::new()),
            strategy: Box::new(SupervisorExit),
            restart_pending: Arc::new(AtomicBool::new(false)),
            metrics,
        }
    }

    /// Replace the restart strategy.
    pub fn with_strategy(mut self, strategy: Box<dyn RestartStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Replace the sampler (tests).
    pub fn with_sampler(mut self, sampler: Box<dyn MemorySampler>) -> Self {
        self.sampler = sampler;
        self
    }

    /// Run one observation step.
    ///
    /// Invariant: at most one restart sequence is ever in flight; the
    /// atomic swap on `restart_pending` makes a second trigger a no-op.
    pub fn observe(&mut self) -> WatchdogVerdict {
        let Some(sample) = self.sampler.sample() else {
            return WatchdogVerdict::SampleUnavailable;
        };
        self.metrics.record_gauge("watchdog.rss_mb", sample.rss_mb());

        if !self.config.policy.exceeds_ceiling(sample.rss_bytes) {
            return WatchdogVerdict::Nominal;
        }

        if self.restart_pending.swap(true, Ordering::SeqCst) {
            return WatchdogVerdict::RestartAlreadyPending;
        }

        DiagnosticSnapshot::capture(&sample, None).log_critical("watchdog ceiling breach");
        tracing::error!(
            rss_mb = sample.rss_mb(),
            hard_ceiling_mb = self.config.policy.hard_ceiling_mb,
            strategy = self.strategy.name(),
            drain_secs = self.config.drain_wait.as_secs(),
            "Hard memory ceiling exceeded, restarting process"
        );
        self.metrics.increment("watchdog.restarts");

        // Give in-flight work a bounded chance to finish
        thread::sleep(self.config.drain_wait);
        self.strategy.restart();

        // Only test strategies return here
        WatchdogVerdict::RestartTriggered
    }

    /// Whether a restart sequence has been started.
    pub fn restart_pending(&self) -> bool {
        self.restart_pending.load(Ordering::SeqCst)
    }

    /// Start the watchdog thread.
    ///
    /// The first sample happens one full interval after startup, so a
    /// freshly replaced image gets a grace window before it can trigger.
    pub fn spawn(self) -> std::io::Result<WatchdogHandle> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let restart_pending = self.restart_pending.clone();
        let interval = self.config.interval;

        let thread = thread::Builder::new()
            .name("memory-watchdog".to_string())
            .spawn(move || {
                let mut watchdog = self;
                tracing::info!(
                    interval_secs = interval.as_secs(),
                    hard_ceiling_mb = watchdog.config.policy.hard_ceiling_mb,
                    "Memory watchdog started"
                );

                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            watchdog.observe();
                        }
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("Memory watchdog stopped");
            })?;

        Ok(WatchdogHandle {
            stop_tx,
            restart_pending,
            thread: Some(thread),
        })
    }
}

/// Handle to a running watchdog thread.
pub struct WatchdogHandle {
    stop_tx: mpsc::Sender<()>,
    restart_pending: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WatchdogHandle {
    /// Stop the watchdog and join its thread.
    pub fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    /// Whether the watchdog has started a restart sequence.
    pub fn restart_pending(&self) -> bool {
        self.restart_pending.load(Ordering::SeqCst)
    }
}
