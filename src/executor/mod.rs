//! Task dispatcher for heavy operations
//!
//! Every heavy computation runs in a short-lived disposable worker process:
//! garbage collection inside a long-lived process cannot, in general,
//! return certain allocations to the operating system, but process
//! termination always can. The dispatcher spawns one worker per call,
//! exchanges exactly one request and one response over pipes, and always
//! reaps the child before returning — timeouts escalate from SIGTERM to
//! SIGKILL after a grace period.
//!
//! Concurrent dispatches each get their own child; a semaphore bounds how
//! many run at once so a burst of callers cannot stack up worker processes
//! and defeat the memory ceiling this subsystem exists to protect.

mod error;
mod ipc;
pub mod worker;


pub use error::ExecError;
pub use ipc::{
    exit_code, JobKind, Operation, UnknownJob, WorkerOutcome, WorkerRequest, WorkerResponse,
    JOB_FLAG, WORKER_FLAG,
};

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use uuid::Uuid;

use crate::core::config::ExecutorConfig;
use crate::logging::{MetricsCollector, TimerGuard};

/// Dispatches heavy operations to disposable worker processes.
pub struct Dispatcher {
    config: ExecutorConfig,
    permits: Arc<Semaphore>,
    metrics: Arc<MetricsCollector>,
}

impl Dispatcher {
    pub fn new(config: ExecutorConfig, metrics: Arc<MetricsCollector>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_workers));
        Self {
            config,
            permits,
            metrics,
        }
    }

    /// Worker slots currently free
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Default per-call timeout for model operations
    pub fn model_op_timeout(&self) -> Duration {
        self.config.model_op_timeout()
    }

    /// Default timeout for background heavy jobs
    pub fn heavy_job_timeout(&self) -> Duration {
        self.config.heavy_job_timeout()
    }

    /// Resolve the program and arguments for a child process.
    ///
    /// The configured override is used verbatim (tests point it at stand-in
    /// programs); otherwise the current executable is re-invoked with the
    /// mode arguments.
    fn command_for(&self, mode_args: &[String]) -> Result<(PathBuf, Vec<String>), ExecError> {
        if let Some((program, args)) = &self.config.worker_command {
            return Ok((program.clone(), args.clone()));
        }
        let exe = std::env::current_exe().map_err(|e| ExecError::SpawnFailed {
            detail: format!("cannot resolve own executable: {e}"),
        })?;
        Ok((exe, mode_args.to_vec()))
    }

    /// Run one operation in a fresh worker process.
    ///
    /// Blocks only this logical task: the wait is an awaited read with a
    /// deadline, not a blocked runtime thread. On timeout the worker is
    /// terminated, reaped, and `Err(Timeout)` is returned — never a stale
    /// or partial payload.
    pub async fn run_in_worker(
        &self,
        op: Operation,
        timeout_dur: Duration,
    ) -> Result<Value, ExecError> {
        // Waiting for a worker slot is not part of the caller's timeout
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ExecError::SpawnFailed {
                detail: "dispatcher is shut down".to_string(),
            })?;

        let request = WorkerRequest {
            id: Uuid::new_v4(),
            op,
        };
        let op_name = request.op.name();
        let _timer = TimerGuard::new(self.metrics.as_ref(), "dispatch.duration");
        self.metrics.increment("dispatch.calls");

        let (program, args) = self.command_for(&[WORKER_FLAG.to_string()])?;
        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecError::SpawnFailed {
                detail: e.to_string(),
            })?;

        tracing::debug!(
            request_id = %request.id,
            op = op_name,
            pid = child.id(),
            "Spawned worker process"
        );

        let mut stdin = child.stdin.take().ok_or_else(|| ExecError::Ipc {
            detail: "worker stdin unavailable".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| ExecError::Ipc {
            detail: "worker stdout unavailable".to_string(),
        })?;

        let request_line = ipc::encode_line(&request).map_err(|e| ExecError::Ipc {
            detail: format!("failed to encode request: {e}"),
        })?;

        let exchange = async move {
            stdin
                .write_all(request_line.as_bytes())
                .await
                .map_err(|e| ExecError::Ipc {
                    detail: format!("failed to write request: {e}"),
                })?;
            stdin.write_all(b"\n").await.map_err(|e| ExecError::Ipc {
                detail: format!("failed to write request: {e}"),
            })?;
            stdin.flush().await.map_err(|e| ExecError::Ipc {
                detail: format!("failed to flush request: {e}"),
            })?;
            // Closing stdin gives the worker EOF after its single read
            drop(stdin);

            let mut lines = BufReader::new(stdout).lines();
            let line = lines.next_line().await.map_err(|e| ExecError::Ipc {
                detail: format!("failed to read response: {e}"),
            })?;
            match line {
                Some(line) => {
                    ipc::decode_line::<WorkerResponse>(&line).map_err(|e| ExecError::Ipc {
                        detail: format!("malformed response: {e}"),
                    })
                }
                None => Err(ExecError::Ipc {
                    detail: "worker exited without sending a response".to_string(),
                }),
            }
        };

        match timeout(timeout_dur, exchange).await {
            Ok(Ok(response)) => {
                self.reap(&mut child).await;
                match response.outcome {
                    WorkerOutcome::Ok { value } => Ok(value),
                    WorkerOutcome::Error { trace } => {
                        self.metrics.increment("dispatch.worker_errors");
                        Err(ExecError::WorkerPanic { trace })
                    }
                }
            }
            Ok(Err(ipc_error)) => {
                tracing::warn!(
                    request_id = %request.id,
                    op = op_name,
                    error = %ipc_error,
                    "Worker channel failed, terminating"
                );
                self.terminate(&mut child).await;
                self.metrics.increment("dispatch.ipc_errors");
                Err(ipc_error)
            }
            Err(_) => {
                let timeout_ms = timeout_dur.as_millis() as u64;
                tracing::warn!(
                    request_id = %request.id,
                    op = op_name,
                    timeout_ms,
                    "Worker timed out, escalating termination"
                );
                self.terminate(&mut child).await;
                self.metrics.increment("dispatch.timeouts");
                Err(ExecError::Timeout { timeout_ms })
            }
        }
    }

    /// Run a fire-and-forget heavy job in a child process.
    ///
    /// Same spawn/timeout/escalation/reap discipline as
    /// [`Dispatcher::run_in_worker`], but the only outcome is the exit
    /// status: zero means success.
    pub async fn run_heavy_job(&self, kind: JobKind, timeout_dur: Duration) -> bool {
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return false,
        };

        let mode_args = [JOB_FLAG.to_string(), kind.as_str().to_string()];
        let (program, args) = match self.command_for(&mode_args) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::error!(job = kind.as_str(), error = %e, "Cannot resolve job command");
                return false;
            }
        };

        let mut child = match Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(job = kind.as_str(), error = %e, "Failed to spawn job process");
                return false;
            }
        };

        tracing::info!(
            job = kind.as_str(),
            pid = child.id(),
            timeout_secs = timeout_dur.as_secs(),
            "Started heavy job"
        );

        match timeout(timeout_dur, child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                tracing::info!(job = kind.as_str(), "Heavy job completed");
                true
            }
            Ok(Ok(status)) => {
                tracing::error!(
                    job = kind.as_str(),
                    exit_code = status.code(),
                    "Heavy job failed"
                );
                false
            }
            Ok(Err(e)) => {
                tracing::error!(job = kind.as_str(), error = %e, "Failed to wait for job");
                self.terminate(&mut child).await;
                false
            }
            Err(_) => {
                tracing::warn!(
                    job = kind.as_str(),
                    timeout_secs = timeout_dur.as_secs(),
                    "Heavy job timed out, escalating termination"
                );
                self.terminate(&mut child).await;
                false
            }
        }
    }

    /// Reap a worker that already responded. A worker wedged on its way
    /// out still gets escalated so no handle outlives the call.
    async fn reap(&self, child: &mut Child) {
        if timeout(self.config.worker_grace(), child.wait())
            .await
            .is_err()
        {
            self.terminate(child).await;
        }
    }

    /// Escalating termination: graceful signal, grace period, forced kill,
    /// then join. The child is always reaped when this returns.
    async fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // SAFETY: signaling a pid we own; ESRCH if it already exited
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }

        if timeout(self.config.worker_grace(), child.wait())
            .await
            .is_err()
        {
            let _ = child.start_kill();
        }
        let _ = child.wait().await;
    }
}
