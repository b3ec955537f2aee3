//! CourseBot service binary
//!
//! Three process modes share this executable:
//! - no mode flag: the long-lived service (monitor + watchdog + dispatcher)
//! - `--worker`: a disposable worker child; reads one request from stdin,
//!   writes one response to stdout, exits
//! - `--job <kind>`: a fire-and-forget heavy-job child; the exit status is
//!   the outcome
//!
//! Keeping all modes in one binary is what lets the dispatcher and the
//! watchdog re-invoke "the same executable with the same arguments".

use std::sync::Arc;

use anyhow::Context;

use coursebot::core::config::AppConfig;
use coursebot::executor::{Dispatcher, JobKind, JOB_FLAG, WORKER_FLAG};
use coursebot::logging::{self, LoggingConfig, LoggingSystem, MetricsCollector};
use coursebot::memory::watchdog::WatchdogConfig;
use coursebot::memory::{MemoryMonitor, MemoryWatchdog};
use coursebot::model::ModelCache;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Child modes: minimal stderr logging, no service runtime
    if args.iter().any(|a| a == WORKER_FLAG) {
        logging::init_worker_logging();
        std::process::exit(coursebot::executor::worker::run_worker());
    }

    if let Some(position) = args.iter().position(|a| a == JOB_FLAG) {
        logging::init_worker_logging();
        let kind = args.get(position + 1).map(String::as_str).unwrap_or("");
        match kind.parse::<JobKind>() {
            Ok(kind) => std::process::exit(coursebot::executor::worker::run_job(kind)),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(2);
            }
        }
    }

    if let Err(e) = run_service() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run_service() -> anyhow::Result<()> {
    let _logging = LoggingSystem::init(LoggingConfig::default())
        .context("failed to initialize logging")?;

    let config = AppConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        hard_ceiling_mb = config.memory.hard_ceiling_mb,
        max_workers = config.executor.max_workers,
        "Starting CourseBot execution core"
    );

    let metrics = Arc::new(MetricsCollector::new());
    let cache = Arc::new(ModelCache::new(config.model));

    // Watchdog first: it must outlive any scheduler stall, so it gets its
    // own OS thread, never a runtime task
    let watchdog = MemoryWatchdog::new(
        WatchdogConfig {
            interval: config.watchdog.interval(),
            drain_wait: config.watchdog.drain_wait(),
            policy: config.memory,
        },
        metrics.clone(),
    );
    let watchdog = apply_restart_strategy(watchdog, config.watchdog.restart_in_place);
    let watchdog_handle = watchdog.spawn().context("failed to start memory watchdog")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build service runtime")?;

    runtime.block_on(async {
        let monitor = MemoryMonitor::new(
            config.memory,
            config.monitor,
            cache.clone(),
            metrics.clone(),
        );
        let monitor_task = tokio::spawn(monitor.run());

        let dispatcher = Dispatcher::new(config.executor.clone(), metrics.clone());

        // Startup heavy jobs run in children so their peak memory never
        // lands in this process
        let timeout = dispatcher.heavy_job_timeout();
        if !dispatcher.run_heavy_job(JobKind::SeedTips, timeout).await {
            tracing::warn!("Tip seeding did not complete, continuing without it");
        }

        tracing::info!("CourseBot execution core ready");
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to wait for shutdown signal");
        }

        tracing::info!("Shutting down");
        monitor_task.abort();
        let _ = monitor_task.await;
    });

    watchdog_handle.stop();
    tracing::info!(
        dispatches = metrics.counter_value("dispatch.calls"),
        uptime_secs = metrics.uptime().as_secs(),
        "CourseBot execution core stopped"
    );
    Ok(())
}

#[cfg(unix)]
fn apply_restart_strategy(watchdog: MemoryWatchdog, in_place: bool) -> MemoryWatchdog {
    use coursebot::memory::watchdog::InPlaceExec;

    if in_place {
        watchdog.with_strategy(Box::new(InPlaceExec::from_current_args()))
    } else {
        watchdog
    }
}

#[cfg(not(unix))]
fn apply_restart_strategy(watchdog: MemoryWatchdog, in_place: bool) -> MemoryWatchdog {
    if in_place {
        tracing::warn!("In-place restart is unix-only, using supervisor exit");
    }
    watchdog
}
