//! Worker runner for traffic-light analysis
//!
//! Each analysis indicator is computed by an external worker process that is
//! given a symbol, prints progress freely and ends with one payload line.
//! This crate describes those workers ([`WorkerSpec`], [`WorkerCatalog`]),
//! launches them ([`ProcessLauncher`]) and turns every way a run can end into
//! exactly one terminal [`WorkerResult`].
//!
//! # Example
//!
//! ```no_run
//! use traffic_worker::{Invocation, ProcessLauncher, WorkerConfig, WorkerKind, WorkerLauncher};
//!
//! # async fn example() -> traffic_worker::Result<()> {
//! let catalog = WorkerConfig::default_python("./services").to_catalog()?;
//! let spec = catalog.get(WorkerKind::Rsi)?;
//!
//! let result = ProcessLauncher::new().run(spec, &Invocation::new("AAPL")).await;
//! println!("{}: {:?}", result.worker_name, result.status);
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod kind;
pub mod parser;
pub mod result;
pub mod runner;
pub mod spec;

// Re-export commonly used types
pub use catalog::WorkerCatalog;
pub use config::{WorkerConfig, WorkerEntry};
pub use error::WorkerError;
pub use kind::{Category, WorkerKind};
pub use parser::{ArcOutputParser, LastJsonLineParser, OutputParser, ParserKind, SummaryLineParser};
pub use result::{WorkerResult, WorkerStatus};
pub use runner::{
    ArcWorkerLauncher, ProcessLauncher, ProgressLine, ProgressLineSender, WorkerLauncher,
};
pub use spec::{Invocation, WorkerSpec};

/// Result type for worker operations
pub type Result<T> = std::result::Result<T, WorkerError>;
