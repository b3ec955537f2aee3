//! IPC protocol types for dispatcher ↔ worker communication.
//!
//! JSON Lines over stdin/stdout pipes: exactly one request and one
//! response per worker process lifetime. Requests dispatch on a closed
//! operation enum — unknown tags fail deserialization at the boundary
//! instead of reaching any open-ended lookup.

use std::io::{self, Write};
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Argument that switches the binary into worker mode
pub const WORKER_FLAG: &str = "--worker";

/// Argument that switches the binary into background-job mode
pub const JOB_FLAG: &str = "--job";

/// Worker and job process exit codes
pub mod exit_code {
    /// Computation completed and the response was written
    pub const SUCCESS: i32 = 0;
    /// Computation failed; an error response was written where applicable
    pub const COMPUTATION_ERROR: i32 = 1;
    // Any other status means the process was killed by a signal
}

/// Request sent to a worker via stdin. Consumed exactly once.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WorkerRequest {
    /// Correlation id, echoed back in the response and in logs
    pub id: Uuid,
    /// What to compute
    pub op: Operation,
}

/// The closed set of heavy operations a worker can perform.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Embed each text with the cached encoder
    EmbedTexts { texts: Vec<String> },

    /// Find the best-matching candidate for a query, if any clears the
    /// threshold
    RankSimilarity {
        query: String,
        candidates: Vec<String>,
        threshold: f32,
    },

    /// Return the value unchanged
    Echo { value: Value },

    /// Sleep, then return null
    NoopSleep { seconds: f64 },
}

impl Operation {
    /// Stable name for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            Operation::EmbedTexts { .. } => "embed_texts",
            Operation::RankSimilarity { .. } => "rank_similarity",
            Operation::Echo { .. } => "echo",
            Operation::NoopSleep { .. } => "noop_sleep",
        }
    }
}

/// Response sent by a worker via stdout.
///
/// Serialized shape is `{"id": ..., "status": "ok"|"error", ...}`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WorkerResponse {
    /// Matches the request id
    pub id: Uuid,
    #[serde(flatten)]
    pub outcome: WorkerOutcome,
}

/// Success payload or serialized failure trace
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WorkerOutcome {
    Ok { value: Value },
    Error { trace: String },
}

impl WorkerResponse {
    pub fn ok(id: Uuid, value: Value) -> Self {
        Self {
            id,
            outcome: WorkerOutcome::Ok { value },
        }
    }

    pub fn error(id: Uuid, trace: impl Into<String>) -> Self {
        Self {
            id,
            outcome: WorkerOutcome::Error {
                trace: trace.into(),
            },
        }
    }
}

/// The closed set of fire-and-forget background jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    /// Seed the default daily-tips set if none exists yet
    SeedTips,
    /// Load the encoder and run a probe embedding
    WarmModelCache,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::SeedTips => "seed-tips",
            JobKind::WarmModelCache => "warm-model-cache",
        }
    }
}

/// Rejected `--job` argument
#[derive(Debug, Error)]
#[error("Unknown job kind: {0}")]
pub struct UnknownJob(pub String);

impl FromStr for JobKind {
    type Err = UnknownJob;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "seed-tips" => Ok(JobKind::SeedTips),
            "warm-model-cache" => Ok(JobKind::WarmModelCache),
            other => Err(UnknownJob(other.to_string())),
        }
    }
}

/// Serialize a message as one JSON line (without the trailing newline).
pub fn encode_line<T: Serialize>(message: &T) -> serde_json::Result<String> {
    serde_json::to_string(message)
}

/// Parse a message from one JSON line.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> serde_json::Result<T> {
    serde_json::from_str(line.trim())
}

/// Write a message as a JSON line and flush immediately.
pub fn write_line<W: Write>(writer: &mut W, message: &impl Serialize) -> io::Result<()> {
    let line = encode_line(message).map_err(io::Error::other)?;
    writeln!(writer, "{line}")?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrip() {
        let request = WorkerRequest {
            id: Uuid::new_v4(),
            op: Operation::RankSimilarity {
                query: "how do I submit".to_string(),
                candidates: vec!["submission guide".to_string()],
                threshold: 0.8,
            },
        };

        let line = encode_line(&request).unwrap();
        let decoded: WorkerRequest = decode_line(&line).unwrap();

        assert_eq!(decoded.id, request.id);
        match decoded.op {
            Operation::RankSimilarity {
                query, candidates, threshold,
            } => {
                assert_eq!(query, "how do I submit");
                assert_eq!(candidates.len(), 1);
                assert!((threshold - 0.8).abs() < f32::EPSILON);
            }
            other => panic!("wrong operation: {other:?}"),
        }
    }

    #[test]
    fn response_wire_shape_uses_status_tag() {
        let ok = WorkerResponse::ok(Uuid::nil(), serde_json::json!({"a": 1}));
        let line = encode_line(&ok).unwrap();
        assert!(line.contains(r#""status":"ok""#));
        assert!(line.contains(r#""value":{"a":1}"#));

        let err = WorkerResponse::error(Uuid::nil(), "boom");
        let line = encode_line(&err).unwrap();
        assert!(line.contains(r#""status":"error""#));
        assert!(line.contains(r#""trace":"boom""#));
    }

    #[test]
    fn response_roundtrip() {
        let response = WorkerResponse::ok(Uuid::new_v4(), serde_json::json!([1, 2, 3]));
        let line = encode_line(&response).unwrap();
        let decoded: WorkerResponse = decode_line(&line).unwrap();

        assert_eq!(decoded.id, response.id);
        match decoded.outcome {
            WorkerOutcome::Ok { value } => assert_eq!(value, serde_json::json!([1, 2, 3])),
            other => panic!("wrong outcome: {other:?}"),
        }
    }

    #[test]
    fn unknown_operation_tags_are_rejected() {
        let line = r#"{"id":"00000000-0000-0000-0000-000000000000","op":{"type":"run_arbitrary_code","path":"/bin/sh"}}"#;
        assert!(decode_line::<WorkerRequest>(line).is_err());
    }

    #[test]
    fn job_kind_parses_its_closed_set() {
        assert_eq!("seed-tips".parse::<JobKind>().unwrap(), JobKind::SeedTips);
        assert_eq!(
            "warm-model-cache".parse::<JobKind>().unwrap(),
            JobKind::WarmModelCache
        );
        assert!("format-disk".parse::<JobKind>().is_err());
    }

    #[test]
    fn write_line_appends_newline() {
        let mut buf = Vec::new();
        write_line(&mut buf, &WorkerResponse::ok(Uuid::nil(), Value::Null)).unwrap();
        assert!(buf.ends_with(b"\n"));
        let decoded: WorkerResponse =
            decode_line(std::str::from_utf8(&buf).unwrap()).unwrap();
        assert!(matches!(decoded.outcome, WorkerOutcome::Ok { .. }));
    }
}
