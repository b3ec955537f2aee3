//! Worker entrypoint
//!
//! Runs inside the disposable child process spawned by the dispatcher.
//! Reads exactly one request from stdin, computes, writes exactly one
//! response to stdout, cleans up, and exits. stdout belongs to the IPC
//! channel; all logging goes to stderr, which the parent inherits.
//!
//! The worker shares nothing with the parent beyond the request it was
//! handed: it builds its own model cache and drops it before exit. Process
//! exit is what actually returns the memory to the operating system; the
//! explicit cleanup only shrinks the window before that.

use std::io::{self, BufRead};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::ipc::{self, exit_code, JobKind, Operation, WorkerRequest, WorkerResponse};
use crate::core::config::AppConfig;
use crate::core::error::CoursebotError;
use crate::memory::cleanup;
use crate::model::{ModelCache, ModelError, ModelId};

/// Handler-level failures, serialized into the response trace.
#[derive(Debug, Error)]
pub(crate) enum HandlerError {
    #[error("{0}")]
    Model(#[from] ModelError),

    #[error("Failed to serialize result: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Run the worker process end to end and return its exit code.
///
/// The parent must always receive a response line before the timeout, so
/// every failure path below still writes one (a kill signal is the only
/// way out without a response, and the dispatcher classifies that itself).
pub fn run_worker() -> i32 {
    let mut line = String::new();
    let request: WorkerRequest = match io::stdin().lock().read_line(&mut line) {
        Ok(0) => {
            respond(WorkerResponse::error(Uuid::nil(), "no request received"));
            return exit_code::COMPUTATION_ERROR;
        }
        Ok(_) => match ipc::decode_line(&line) {
            Ok(request) => request,
            Err(e) => {
                respond(WorkerResponse::error(
                    Uuid::nil(),
                    format!("malformed request: {e}"),
                ));
                return exit_code::COMPUTATION_ERROR;
            }
        },
        Err(e) => {
            respond(WorkerResponse::error(
                Uuid::nil(),
                format!("failed to read request: {e}"),
            ));
            return exit_code::COMPUTATION_ERROR;
        }
    };
    drop(line);

    tracing::info!(
        request_id = %request.id,
        op = request.op.name(),
        pid = std::process::id(),
        "Worker received request"
    );

    let config = load_worker_config();
    let cache = ModelCache::new(config.model);

    let outcome = run_guarded(|| handle_operation(&request.op, &cache));
    let exit = match &outcome {
        Ok(_) => exit_code::SUCCESS,
        Err(_) => exit_code::COMPUTATION_ERROR,
    };

    match outcome {
        Ok(value) => respond(WorkerResponse::ok(request.id, value)),
        Err(trace) => {
            tracing::error!(request_id = %request.id, trace = %trace, "Worker computation failed");
            respond(WorkerResponse::error(request.id, trace));
        }
    }

    let cleaned = cleanup::worker_exit_cleanup(&cache);
    tracing::debug!(
        request_id = %request.id,
        models_evicted = cleaned.models_evicted,
        "Worker exiting"
    );
    exit
}

/// Run a background job child and return its exit code.
///
/// No IPC: the exit status is the whole outcome.
pub fn run_job(kind: JobKind) -> i32 {
    tracing::info!(job = kind.as_str(), pid = std::process::id(), "Job started");
    let config = load_worker_config();

    let result = match kind {
        JobKind::WarmModelCache => warm_model_cache(&config),
        JobKind::SeedTips => seed_tips(),
    };

    cleanup::reclaim_passes(cleanup::EXIT_RECLAIM_PASSES);

    match result {
        Ok(()) => {
            tracing::info!(job = kind.as_str(), "Job completed");
            exit_code::SUCCESS
        }
        Err(e) => {
            tracing::error!(job = kind.as_str(), error = %e, "Job failed");
            exit_code::COMPUTATION_ERROR
        }
    }
}

/// Dispatch one operation against the worker-local cache.
pub(crate) fn handle_operation(op: &Operation, cache: &ModelCache) -> Result<Value, HandlerError> {
    match op {
        Operation::EmbedTexts { texts } => {
            let encoder = cache.acquire(ModelId::TextEncoder)?;
            let vectors: Vec<Vec<f32>> = texts.iter().map(|t| encoder.embed(t)).collect();
            let vectors = serde_json::to_value(vectors)?;
            Ok(serde_json::json!({
                "dimension": encoder.dimension(),
                "vectors": vectors,
            }))
        }

        Operation::RankSimilarity {
            query,
            candidates,
            threshold,
        } => {
            let encoder = cache.acquire(ModelId::TextEncoder)?;
            match encoder.rank(query, candidates) {
                Some((index, score)) if score >= *threshold => Ok(serde_json::json!({
                    "index": index,
                    "text": candidates[index],
                    "score": score,
                })),
                _ => Ok(Value::Null),
            }
        }

        Operation::Echo { value } => Ok(value.clone()),

        Operation::NoopSleep { seconds } => {
            std::thread::sleep(Duration::from_secs_f64(seconds.max(0.0)));
            Ok(Value::Null)
        }
    }
}

/// Run a computation with a top-level panic guard, converting any panic
/// into a non-empty serialized trace.
pub(crate) fn run_guarded<F>(f: F) -> Result<Value, String>
where
    F: FnOnce() -> Result<Value, HandlerError>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => Err(panic_trace(panic)),
    }
}

fn panic_trace(panic: Box<dyn std::any::Any + Send>) -> String {
    let message = if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    format!("worker panicked: {message}")
}

fn respond(response: WorkerResponse) {
    let mut stdout = io::stdout().lock();
    if let Err(e) = ipc::write_line(&mut stdout, &response) {
        tracing::error!(error = %e, "Failed to write worker response");
    }
}

/// Workers read the same environment the parent did; if it stopped
/// validating since then, defaults still let the computation run.
fn load_worker_config() -> AppConfig {
    AppConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Invalid environment configuration in worker, using defaults");
        AppConfig::default()
    })
}

/// Load the encoder and embed a probe set, proving the model path works.
fn warm_model_cache(config: &AppConfig) -> Result<(), CoursebotError> {
    let cache = ModelCache::new(config.model);
    let encoder = cache.acquire(ModelId::TextEncoder)?;

    let probes = [
        "how do I submit my assignment",
        "share a win from this week",
        "when is the next live session",
    ];
    for probe in probes {
        let vector = encoder.embed(probe);
        if vector.len() != encoder.dimension() {
            return Err(CoursebotError::Internal(format!(
                "probe embedding has dimension {} instead of {}",
                vector.len(),
                encoder.dimension()
            )));
        }
    }

    drop(encoder);
    cleanup::worker_exit_cleanup(&cache);
    Ok(())
}

/// Default tips written when no tip store exists yet.
const DEFAULT_TIPS: &[&str] = &[
    "Block out a fixed study slot each day; small consistent sessions beat weekend marathons.",
    "Write down one concrete goal before you start a module and check it when you finish.",
    "Review yesterday's notes for five minutes before starting anything new.",
    "Break big assignments into steps you can finish in under an hour.",
    "Teach what you just learned to someone else; gaps show up immediately.",
    "Take a short walk between study blocks instead of scrolling.",
    "Ask your question in the group the moment you are stuck for more than twenty minutes.",
];

/// Seed the local tip spool with the default set if it does not exist yet.
///
/// Idempotent: an existing spool is left untouched.
fn seed_tips() -> Result<(), CoursebotError> {
    let path = tips_spool_path();
    if path.exists() {
        tracing::info!(path = %path.display(), "Tip spool already present, nothing to seed");
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tips: Vec<serde_json::Value> = DEFAULT_TIPS
        .iter()
        .enumerate()
        .map(|(day, text)| {
            serde_json::json!({
                "day": day,
                "text": text,
                "source": "default",
            })
        })
        .collect();

    let body = serde_json::to_string_pretty(&tips)
        .map_err(|e| CoursebotError::Internal(format!("failed to encode tips: {e}")))?;
    std::fs::write(&path, body)?;

    tracing::info!(path = %path.display(), count = DEFAULT_TIPS.len(), "Seeded default tips");
    Ok(())
}

fn tips_spool_path() -> PathBuf {
    std::env::var_os("COURSEBOT_TIPS_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data/tips.json"))
}
