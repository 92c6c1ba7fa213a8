//! Error types for worker operations

use thiserror::Error;

/// Errors that can occur while configuring or running a worker
///
/// The runner never lets these escape [`crate::WorkerLauncher::run`]; they are
/// folded into a failed [`crate::WorkerResult`] and only surface directly from
/// configuration loading and catalog lookups.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The worker process could not be started
    #[error("Worker spawn failed: {0}")]
    SpawnFailed(String),

    /// The worker exceeded its timeout and was killed
    #[error("Worker timed out after {after_ms}ms")]
    TimedOut { after_ms: u64 },

    /// The worker exited cleanly but printed no usable payload
    #[error("Worker output unparsable: {0}")]
    OutputUnparsable(String),

    /// The worker exited with a non-zero status
    #[error("Worker exited with code {code:?}: {stderr}")]
    ExitedNonZero { code: Option<i32>, stderr: String },

    /// No spec registered for the requested worker
    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Environment variable error
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    /// Invalid pattern error
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WorkerError::TimedOut { after_ms: 60_000 };
        assert_eq!(err.to_string(), "Worker timed out after 60000ms");

        let err = WorkerError::ExitedNonZero {
            code: Some(2),
            stderr: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Worker exited with code Some(2): boom");
    }

    #[test]
    fn test_json_error_conversion() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: WorkerError = parse.unwrap_err().into();
        assert!(matches!(err, WorkerError::JsonError(_)));
    }
}
