//! Outcome of one worker run

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WorkerError;
use crate::kind::WorkerKind;

/// Lifecycle state of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Running,
    Success,
    Failed,
    TimedOut,
}

impl WorkerStatus {
    /// Whether the worker can no longer change state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Running => "running",
            WorkerStatus::Success => "success",
            WorkerStatus::Failed => "failed",
            WorkerStatus::TimedOut => "timed_out",
        }
    }
}

/// Result of a single worker run
///
/// A result transitions out of `Running` exactly once. Later attempts to
/// complete it are ignored, so duplicate completion signals from the same
/// process cannot overwrite the first outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    pub worker_name: String,
    pub kind: WorkerKind,
    pub status: WorkerStatus,
    /// Parsed payload, present only on success
    pub payload: Option<Value>,
    /// Everything the worker printed to stdout
    pub raw_output: String,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    /// Tail of stderr kept for diagnostics
    pub stderr_excerpt: Option<String>,
    pub duration_ms: u64,
}

impl WorkerResult {
    /// A result that has not finished yet
    pub fn running(kind: WorkerKind) -> Self {
        Self {
            worker_name: kind.name().to_string(),
            kind,
            status: WorkerStatus::Running,
            payload: None,
            raw_output: String::new(),
            error: None,
            exit_code: None,
            stderr_excerpt: None,
            duration_ms: 0,
        }
    }

    /// Failed result with a reason
    pub fn failed(kind: WorkerKind, error: impl Into<String>) -> Self {
        let mut result = Self::running(kind);
        result.complete(WorkerStatus::Failed, None, Some(error.into()));
        result
    }

    /// Timed-out result
    pub fn timed_out(kind: WorkerKind, after_ms: u64) -> Self {
        let mut result = Self::running(kind);
        result.complete(
            WorkerStatus::TimedOut,
            None,
            Some(WorkerError::TimedOut { after_ms }.to_string()),
        );
        result.duration_ms = after_ms;
        result
    }

    /// Successful result carrying a payload
    pub fn succeeded(kind: WorkerKind, payload: Value) -> Self {
        let mut result = Self::running(kind);
        result.complete(WorkerStatus::Success, Some(payload), None);
        result
    }

    /// Move to a terminal status
    ///
    /// Returns `false` and leaves the result untouched if it is already
    /// terminal or if `status` is `Running`.
    pub fn complete(
        &mut self,
        status: WorkerStatus,
        payload: Option<Value>,
        error: Option<String>,
    ) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.payload = payload;
        self.error = error;
        true
    }

    pub fn is_success(&self) -> bool {
        self.status == WorkerStatus::Success
    }

    /// Payload of a successful run that did not report an error inside it
    ///
    /// Workers may exit 0 with `{"error": ...}` when their model failed; such
    /// a payload counts as missing.
    pub fn usable_payload(&self) -> Option<&Value> {
        self.payload
            .as_ref()
            .filter(|payload| self.is_success() && payload.get("error").is_none_or(Value::is_null))
    }

    /// Error text carried inside an otherwise successful payload
    pub fn reported_error(&self) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|payload| payload.get("error"))
            .filter(|error| !error.is_null())
            .map(|error| error.as_str().unwrap_or("worker reported an error"))
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn with_raw_output(mut self, raw_output: String) -> Self {
        self.raw_output = raw_output;
        self
    }

    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn with_stderr_excerpt(mut self, stderr: &str) -> Self {
        let excerpt = excerpt(stderr, 2048);
        self.stderr_excerpt = (!excerpt.is_empty()).then_some(excerpt);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// Last `max_chars` characters of `text`, trimmed
fn excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_complete_only_once() {
        let mut result = WorkerResult::running(WorkerKind::Rsi);
        assert!(result.complete(
            WorkerStatus::Success,
            Some(json!({"traffic_light": "green"})),
            None
        ));
        assert!(!result.complete(WorkerStatus::Failed, None, Some("late".to_string())));

        assert_eq!(result.status, WorkerStatus::Success);
        assert!(result.error.is_none());
        assert_eq!(result.payload.unwrap()["traffic_light"], "green");
    }

    #[test]
    fn test_complete_rejects_running() {
        let mut result = WorkerResult::running(WorkerKind::Mfi);
        assert!(!result.complete(WorkerStatus::Running, None, None));
        assert!(!result.is_terminal());
    }

    #[test]
    fn test_constructors() {
        let result = WorkerResult::timed_out(WorkerKind::Lstm, 120_000);
        assert_eq!(result.status, WorkerStatus::TimedOut);
        assert_eq!(result.worker_name, "lstm");
        assert_eq!(result.duration_ms, 120_000);
        assert_eq!(result.error.as_deref(), Some("Worker timed out after 120000ms"));

        let result = WorkerResult::failed(WorkerKind::Garch, "exit 1");
        assert_eq!(result.status, WorkerStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("exit 1"));
        assert!(!result.is_success());
    }

    #[test]
    fn test_stderr_excerpt_keeps_tail() {
        let long = format!("{}END", "x".repeat(5000));
        let result = WorkerResult::failed(WorkerKind::Capm, "boom").with_stderr_excerpt(&long);
        let excerpt = result.stderr_excerpt.unwrap();
        assert_eq!(excerpt.chars().count(), 2048);
        assert!(excerpt.ends_with("END"));

        let result = WorkerResult::failed(WorkerKind::Capm, "boom").with_stderr_excerpt("  \n");
        assert!(result.stderr_excerpt.is_none());
    }

    #[test]
    fn test_error_payload_is_not_usable() {
        let result = WorkerResult::succeeded(
            WorkerKind::Garch,
            json!({"error": "GARCH model fitting failed", "traffic_light": "red"}),
        );
        assert!(result.is_success());
        assert!(result.usable_payload().is_none());
        assert_eq!(result.reported_error(), Some("GARCH model fitting failed"));

        let result = WorkerResult::succeeded(
            WorkerKind::Garch,
            json!({"error": null, "traffic_light": "yellow"}),
        );
        assert_eq!(result.usable_payload().unwrap()["traffic_light"], "yellow");
        assert!(result.reported_error().is_none());

        let result = WorkerResult::failed(WorkerKind::Capm, "exit 1");
        assert!(result.usable_payload().is_none());
    }
}
