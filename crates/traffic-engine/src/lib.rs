//! SpeedTraffic analysis orchestration
//!
//! This crate runs the external analysis workers for a stock symbol and turns
//! their output into one traffic-light record. It includes:
//!
//! - Per-symbol admission with a single-flight mutex and a circuit breaker
//! - Concurrent worker execution with per-request deadlines
//! - Completion tracking and signal derivation per category
//! - A progress stream of heartbeats, worker completions and one terminal event
//!
//! # Modes
//!
//! Streaming mode runs the neural worker together with MFI and needs both to
//! produce a record. Staged mode runs phase 1 (technical, industry, market and
//! risk workers) or phase 2 (neural) and always produces a record, leaving the
//! categories of failed workers inactive.
//!
//! # Example
//!
//! ```rust,ignore
//! use traffic_engine::{AnalysisMode, EngineConfig, Orchestrator, ProgressEvent};
//! use traffic_engine::traffic_worker::WorkerConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let catalog = WorkerConfig::load(None, "services")?.to_catalog()?;
//!     let orchestrator = Orchestrator::with_processes(EngineConfig::default(), catalog)?;
//!
//!     let mut stream = orchestrator.analyze("AAPL", AnalysisMode::Streaming)?;
//!     while let Some(event) = stream.recv().await {
//!         if let ProgressEvent::Done { record } = event {
//!             println!("{:?}", record.traffic_lights);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod aggregator;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod signal;

pub use admission::{AdmissionController, AdmissionPermit};
pub use aggregator::{
    AnalysisMode, AnalysisRecord, AnalysisStats, CompletionTracker, CoupledOutcome, ModeKind,
    Phase, Transition,
};
pub use config::{EngineConfig, EngineConfigBuilder};
pub use error::{EngineError, Rejection, Result};
pub use orchestrator::{Orchestrator, normalize_symbol};
pub use progress::{ErrorReason, ProgressEvent, ProgressSender, ProgressStream};
pub use signal::{CompositeSignals, NeuralEvidence, Signal};

pub use traffic_worker;
