//! Typed errors crossing component boundaries.
//!
//! Transient vs permanent classification drives the coordinator's retry
//! policy; everything else bubbles up as `anyhow` at the binary edges.

use thiserror::Error;

/// Failure of a single `detect` call against a worker.
#[derive(Debug, Error)]
pub enum WorkerCallError {
    #[error("worker call timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("connection failed: {0}")]
    Connect(String),

    /// 5xx-equivalent, plus 408/429 which are transient by nature.
    #[error("transient server error (status {status}): {message}")]
    Server { status: u16, message: String },

    /// 4xx-equivalent client error.
    #[error("client error (status {status}): {message}")]
    Client { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    /// A structurally valid response whose body reports a detection failure.
    #[error("worker reported failure: {0}")]
    Failure(String),
}

impl WorkerCallError {
    /// Whether the coordinator may retry this call under its backoff policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkerCallError::Timeout { .. }
                | WorkerCallError::Connect(_)
                | WorkerCallError::Server { .. }
        )
    }
}

/// Fatal aggregation failures. Messages are safe to surface to callers:
/// they name services and artefact kinds, never filesystem paths.
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("missing results for expected services: {}", .0.join(", "))]
    MissingServices(Vec<String>),

    #[error("services not in a terminal state: {}", .0.join(", "))]
    NonFinalServices(Vec<String>),

    #[error("failed to write {artefact} artefact")]
    Write { artefact: &'static str },
}

/// A flat wire finding that cannot be converted back into the tagged
/// in-memory form because a variant-required field is absent.
#[derive(Debug, Error)]
#[error("{detection_type} finding is missing required field `{field}`")]
pub struct FindingConversionError {
    pub detection_type: &'static str,
    pub field: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(WorkerCallError::Timeout { timeout_secs: 30 }.is_retryable());
        assert!(WorkerCallError::Connect("refused".into()).is_retryable());
        assert!(WorkerCallError::Server {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());

        assert!(!WorkerCallError::Client {
            status: 422,
            message: "too many events".into()
        }
        .is_retryable());
        assert!(!WorkerCallError::Malformed("not json".into()).is_retryable());
        assert!(!WorkerCallError::Failure("detector blew up".into()).is_retryable());
    }

    #[test]
    fn test_aggregation_errors_name_services_not_paths() {
        let err = AggregationError::MissingServices(vec!["layering".into(), "wash_trading".into()]);
        let msg = err.to_string();
        assert!(msg.contains("layering"));
        assert!(msg.contains("wash_trading"));
        assert!(!msg.contains('/'));
    }
}
