//! Progress channel between a running analysis and its caller
//!
//! Events are pushed through an unbounded channel so a slow consumer never
//! stalls the orchestrator. The sender is consumed by the terminal event, so
//! a request can emit at most one `Done`, `Error` or `Timeout`.

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use traffic_worker::{Category, WorkerKind, WorkerStatus};

use crate::aggregator::AnalysisRecord;
use crate::signal::Signal;

/// Why a request ended with an error event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// A required worker produced no payload
    TotalFailure,
    /// The coupled deadline fired before all workers finished
    GlobalTimeout,
}

/// One lifecycle event of an analysis request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The named worker is still running
    Heartbeat { source: String },

    /// A worker reached a terminal state
    WorkerCompleted {
        worker: WorkerKind,
        category: Category,
        status: WorkerStatus,
        signal: Signal,
    },

    /// Aggregation finished
    Done { record: Box<AnalysisRecord> },

    /// The request failed
    Error {
        reason: ErrorReason,
        detail: String,
        failed_workers: Vec<String>,
    },

    /// A staged phase exceeded its deadline
    Timeout { after_ms: u64 },
}

impl ProgressEvent {
    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Done { .. } | ProgressEvent::Error { .. } | ProgressEvent::Timeout { .. }
        )
    }

    /// Event name as used in the serialized form
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::Heartbeat { .. } => "heartbeat",
            ProgressEvent::WorkerCompleted { .. } => "worker_completed",
            ProgressEvent::Done { .. } => "done",
            ProgressEvent::Error { .. } => "error",
            ProgressEvent::Timeout { .. } => "timeout",
        }
    }
}

/// Create a connected sender/stream pair
pub fn channel() -> (ProgressSender, ProgressStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProgressSender { tx }, ProgressStream { rx })
}

/// Producer half, owned by the orchestration task
#[derive(Debug)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSender {
    /// Push a non-terminal event
    ///
    /// Returns `false` once the caller has gone away.
    pub fn send(&self, event: ProgressEvent) -> bool {
        debug_assert!(!event.is_terminal(), "terminal events go through finish()");
        self.tx.send(event).is_ok()
    }

    /// Push the terminal event and close the channel
    pub fn finish(self, event: ProgressEvent) -> bool {
        debug_assert!(event.is_terminal(), "finish() requires a terminal event");
        self.tx.send(event).is_ok()
    }

    /// Resolves when the consumer is dropped
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half handed to the caller
///
/// Dropping the stream tells the orchestrator the caller disconnected.
#[derive(Debug)]
pub struct ProgressStream {
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl ProgressStream {
    /// Next event, or `None` once the request is over
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Drain the stream, returning every event in order
    pub async fn collect_all(mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            events.push(event);
        }
        events
    }
}

impl Stream for ProgressStream {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_events_arrive_in_order_and_stream_ends() {
        let (sender, stream) = channel();

        assert!(sender.send(ProgressEvent::Heartbeat {
            source: "lstm".to_string()
        }));
        assert!(sender.send(ProgressEvent::WorkerCompleted {
            worker: WorkerKind::Mfi,
            category: Category::Technical,
            status: WorkerStatus::Success,
            signal: Signal::Green,
        }));
        assert!(sender.finish(ProgressEvent::Timeout { after_ms: 120_000 }));

        let events: Vec<_> = stream.collect().await;
        let names: Vec<_> = events.iter().map(ProgressEvent::name).collect();
        assert_eq!(names, vec!["heartbeat", "worker_completed", "timeout"]);
        assert!(events[2].is_terminal());
    }

    #[tokio::test]
    async fn test_closed_when_stream_dropped() {
        let (sender, stream) = channel();
        assert!(!sender.is_closed());

        drop(stream);
        tokio::time::timeout(std::time::Duration::from_secs(1), sender.closed())
            .await
            .unwrap();
        assert!(!sender.send(ProgressEvent::Heartbeat {
            source: "mfi".to_string()
        }));
    }

    #[test]
    fn test_event_serialization() {
        let event = ProgressEvent::Error {
            reason: ErrorReason::GlobalTimeout,
            detail: "deadline exceeded".to_string(),
            failed_workers: vec!["lstm".to_string()],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["reason"], "global_timeout");

        let event = ProgressEvent::WorkerCompleted {
            worker: WorkerKind::Garch,
            category: Category::Risk,
            status: WorkerStatus::TimedOut,
            signal: Signal::Inactive,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "worker_completed");
        assert_eq!(json["worker"], "garch");
        assert_eq!(json["category"], "risk");
        assert_eq!(json["status"], "timed_out");
        assert_eq!(json["signal"], "inactive");

        let back: ProgressEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
