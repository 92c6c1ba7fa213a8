//! Error types for orchestration

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use traffic_worker::WorkerError;

/// Why a request was not admitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    /// Another request for the same symbol is still running
    AlreadyInFlight {
        #[serde(rename = "retry_after_secs", serialize_with = "as_secs")]
        retry_after: Duration,
    },
    /// The symbol failed too often recently
    CircuitOpen {
        failures: u32,
        #[serde(rename = "retry_after_secs", serialize_with = "as_secs")]
        retry_after: Duration,
    },
}

fn as_secs<S: serde::Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_secs())
}

impl Rejection {
    /// Suggested delay before the caller tries again
    pub fn retry_after(&self) -> Duration {
        match self {
            Rejection::AlreadyInFlight { retry_after }
            | Rejection::CircuitOpen { retry_after, .. } => *retry_after,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::AlreadyInFlight { retry_after } => write!(
                f,
                "analysis already in progress, retry after {}s",
                retry_after.as_secs()
            ),
            Rejection::CircuitOpen {
                failures,
                retry_after,
            } => write!(
                f,
                "circuit open after {failures} failures, retry after {}s",
                retry_after.as_secs()
            ),
        }
    }
}

/// Orchestration errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// The admission controller refused the request
    #[error("Admission rejected: {0}")]
    AdmissionRejected(Rejection),

    /// Empty or malformed symbol
    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),

    /// Coupled run exceeded its global deadline
    #[error("Global timeout after {after_ms}ms")]
    GlobalTimeout { after_ms: u64 },

    /// Required workers produced no payload
    #[error("Required workers failed: {}", failed.join(", "))]
    TotalFailure { failed: Vec<String> },

    /// Some staged workers failed; the request itself still completed
    #[error("Partial failure: {}", failed.join(", "))]
    PartialFailure { failed: Vec<String> },

    /// The progress stream ended without a terminal event
    #[error("Progress stream disconnected")]
    Disconnected,

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Worker configuration or lookup error
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

impl From<Rejection> for EngineError {
    fn from(rejection: Rejection) -> Self {
        EngineError::AdmissionRejected(rejection)
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
