//! Analysis orchestrator
//!
//! Wires admission, concurrent worker execution, completion tracking and the
//! progress channel together. [`Orchestrator::analyze`] returns as soon as the
//! request is admitted; everything else happens in one spawned task per
//! request that owns the worker tasks, the deadline and the heartbeat timer.

use chrono::{NaiveDate, Utc};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use traffic_worker::{
    ArcWorkerLauncher, Invocation, ProcessLauncher, WorkerCatalog, WorkerResult, WorkerSpec,
};

use crate::admission::{AdmissionController, AdmissionPermit};
use crate::aggregator::{AnalysisMode, AnalysisRecord, CompletionTracker, CoupledOutcome, Transition};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::progress::{self, ErrorReason, ProgressEvent, ProgressSender, ProgressStream};
use crate::signal::worker_signal;

/// Entry point for analysis requests
///
/// Holds the admission state shared by all requests. Construct one per
/// process (or per test) inside a Tokio runtime.
pub struct Orchestrator {
    config: EngineConfig,
    admission: Arc<AdmissionController>,
    catalog: Arc<WorkerCatalog>,
    launcher: ArcWorkerLauncher,
    sweeper: Option<JoinHandle<()>>,
}

impl Orchestrator {
    /// Create an orchestrator with a custom launcher
    pub fn new(
        config: EngineConfig,
        catalog: WorkerCatalog,
        launcher: ArcWorkerLauncher,
    ) -> Result<Self> {
        config.validate()?;

        let admission = Arc::new(AdmissionController::new(&config));
        let sweeper = match tokio::runtime::Handle::try_current() {
            Ok(_) => Some(admission.spawn_sweeper(config.sweep_interval)),
            Err(_) => {
                warn!("No Tokio runtime; stale entry sweeping disabled");
                None
            }
        };

        Ok(Self {
            config,
            admission,
            catalog: Arc::new(catalog),
            launcher,
            sweeper,
        })
    }

    /// Create an orchestrator that runs workers as OS processes
    pub fn with_processes(config: EngineConfig, catalog: WorkerCatalog) -> Result<Self> {
        Self::new(config, catalog, Arc::new(ProcessLauncher::new()))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// Start an analysis dated today
    pub fn analyze(&self, symbol: &str, mode: AnalysisMode) -> Result<ProgressStream> {
        self.analyze_as_of(symbol, mode, Utc::now().date_naive())
    }

    /// Start an analysis with an explicit as-of date
    ///
    /// Returns the progress stream once the request is admitted. The stream
    /// ends after exactly one terminal event. Dropping it cancels the request
    /// and stops its workers.
    pub fn analyze_as_of(
        &self,
        symbol: &str,
        mode: AnalysisMode,
        as_of: NaiveDate,
    ) -> Result<ProgressStream> {
        let symbol = normalize_symbol(symbol)?;
        let specs = self.catalog.get_all(mode.workers())?;
        let permit = self.admission.try_admit(&symbol)?;

        let (sender, stream) = progress::channel();
        let run = RequestRun {
            invocation: Invocation::new(symbol.clone()).with_as_of(as_of),
            symbol,
            mode,
            as_of,
            specs,
            launcher: Arc::clone(&self.launcher),
            deadline: if mode.is_coupled() {
                self.config.global_timeout
            } else {
                self.config.phase_timeout
            },
            heartbeat: self.config.heartbeat_interval,
        };

        info!("Starting {} analysis for {}", mode, run.symbol);
        tokio::spawn(run.drive(permit, sender));

        Ok(stream)
    }

    /// Run an analysis and wait for its outcome
    pub async fn run_to_completion(
        &self,
        symbol: &str,
        mode: AnalysisMode,
    ) -> Result<AnalysisRecord> {
        let mut stream = self.analyze(symbol, mode)?;

        while let Some(event) = stream.recv().await {
            match event {
                ProgressEvent::Done { record } => return Ok(*record),
                ProgressEvent::Error {
                    reason: ErrorReason::TotalFailure,
                    failed_workers,
                    ..
                } => {
                    return Err(EngineError::TotalFailure {
                        failed: failed_workers,
                    });
                }
                ProgressEvent::Error {
                    reason: ErrorReason::GlobalTimeout,
                    ..
                } => {
                    return Err(EngineError::GlobalTimeout {
                        after_ms: self.config.global_timeout.as_millis() as u64,
                    });
                }
                ProgressEvent::Timeout { after_ms } => {
                    return Err(EngineError::GlobalTimeout { after_ms });
                }
                ProgressEvent::Heartbeat { .. } | ProgressEvent::WorkerCompleted { .. } => {}
            }
        }

        Err(EngineError::Disconnected)
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

/// Trim and upper-case a symbol
pub fn normalize_symbol(symbol: &str) -> Result<String> {
    let symbol = symbol.trim();
    if symbol.is_empty() || symbol.chars().any(char::is_whitespace) {
        return Err(EngineError::InvalidSymbol(symbol.to_string()));
    }
    Ok(symbol.to_ascii_uppercase())
}

/// How the request loop ended
enum RunEnd {
    /// Every worker is terminal, or no worker task is left
    Settled,
    /// The request deadline fired first
    TimedOut,
    /// The caller dropped the progress stream
    Disconnected,
}

/// Everything one request task needs
struct RequestRun {
    symbol: String,
    mode: AnalysisMode,
    as_of: NaiveDate,
    invocation: Invocation,
    specs: Vec<WorkerSpec>,
    launcher: ArcWorkerLauncher,
    deadline: Duration,
    heartbeat: Duration,
}

impl RequestRun {
    async fn drive(self, permit: AdmissionPermit, progress: ProgressSender) {
        let mut tracker = CompletionTracker::new(&self.symbol, self.mode, Utc::now())
            .with_analysis_date(self.as_of);

        let (line_tx, mut lines) = mpsc::unbounded_channel();
        let mut workers = JoinSet::new();
        for spec in self.specs.iter().cloned() {
            let launcher = Arc::clone(&self.launcher);
            let invocation = self.invocation.clone();
            let line_tx = line_tx.clone();
            workers.spawn(async move {
                let kind = spec.kind;
                AssertUnwindSafe(async {
                    launcher.run_with_progress(&spec, &invocation, line_tx).await
                })
                .catch_unwind()
                .await
                .unwrap_or_else(|_| WorkerResult::failed(kind, "worker task panicked"))
            });
        }
        drop(line_tx);

        let deadline = tokio::time::sleep(self.deadline);
        tokio::pin!(deadline);

        let mut heartbeat =
            tokio::time::interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let end = loop {
            tokio::select! {
                biased;

                () = progress.closed() => break RunEnd::Disconnected,

                // a worker's lines go out before its completion
                Some(line) = lines.recv() => {
                    progress.send(ProgressEvent::Heartbeat {
                        source: format!("{}:{}", line.kind, line.line),
                    });
                }

                joined = workers.join_next() => match joined {
                    Some(Ok(result)) => {
                        self.record(&mut tracker, &progress, result);
                        if tracker.is_complete() {
                            break RunEnd::Settled;
                        }
                    }
                    Some(Err(e)) => warn!("Worker task for {} ended abnormally: {}", self.symbol, e),
                    None => break RunEnd::Settled,
                },

                () = &mut deadline => break RunEnd::TimedOut,

                _ = heartbeat.tick() => {
                    for kind in tracker.pending() {
                        progress.send(ProgressEvent::Heartbeat {
                            source: kind.name().to_string(),
                        });
                    }
                }
            }
        };

        // aborting the tasks drops the launcher futures, which kills the processes
        workers.shutdown().await;

        match end {
            RunEnd::Disconnected => {
                info!("Caller disconnected from {} analysis, stopping workers", self.symbol);
                permit.abandon();
            }
            RunEnd::TimedOut => self.finish_timed_out(tracker, permit, progress),
            RunEnd::Settled => self.finish_settled(&tracker, permit, progress),
        }
    }

    fn record(&self, tracker: &mut CompletionTracker, progress: &ProgressSender, result: WorkerResult) {
        let kind = result.kind;
        let status = result.status;
        let signal = worker_signal(&result);

        match tracker.mark_terminal(result) {
            Transition::Recorded => {
                info!(
                    "Worker {} for {} finished: {} ({})",
                    kind,
                    self.symbol,
                    status.as_str(),
                    signal
                );
                progress.send(ProgressEvent::WorkerCompleted {
                    worker: kind,
                    category: kind.category(),
                    status,
                    signal,
                });
            }
            Transition::Duplicate | Transition::Ignored => {
                debug!("Ignoring extra result from {} for {}", kind, self.symbol);
            }
        }
    }

    fn finish_timed_out(
        &self,
        mut tracker: CompletionTracker,
        permit: AdmissionPermit,
        progress: ProgressSender,
    ) {
        let after_ms = self.deadline.as_millis() as u64;
        for kind in tracker.pending() {
            tracker.mark_terminal(WorkerResult::timed_out(kind, after_ms));
        }
        let failed_workers = tracker.missing_payloads();

        warn!(
            "{} analysis for {} timed out after {}ms",
            self.mode, self.symbol, after_ms
        );
        permit.complete(false);

        if self.mode.is_coupled() {
            progress.finish(ProgressEvent::Error {
                reason: ErrorReason::GlobalTimeout,
                detail: format!("analysis exceeded {}s", self.deadline.as_secs()),
                failed_workers,
            });
        } else {
            progress.finish(ProgressEvent::Timeout { after_ms });
        }
    }

    fn finish_settled(
        &self,
        tracker: &CompletionTracker,
        permit: AdmissionPermit,
        progress: ProgressSender,
    ) {
        if !self.mode.is_coupled() {
            let record = tracker.finalize_staged();
            info!(
                "{} analysis for {} done: {}/{} services",
                self.mode,
                self.symbol,
                record.stats.successful_services,
                record.stats.total_services
            );
            permit.complete(true);
            progress.finish(ProgressEvent::Done {
                record: Box::new(record),
            });
            return;
        }

        match tracker.finalize_coupled() {
            CoupledOutcome::Success(record) => {
                info!("Streaming analysis for {} done", self.symbol);
                permit.complete(true);
                progress.finish(ProgressEvent::Done { record });
            }
            CoupledOutcome::TotalFailure { failed } => {
                warn!(
                    "Streaming analysis for {} failed: {}",
                    self.symbol,
                    failed.join(", ")
                );
                permit.complete(false);
                progress.finish(ProgressEvent::Error {
                    reason: ErrorReason::TotalFailure,
                    detail: format!("no payload from {}", failed.join(", ")),
                    failed_workers: failed,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Phase;
    use crate::signal::Signal;
    use async_trait::async_trait;
    use mockall::mock;
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use traffic_worker::{
        ProgressLine, ProgressLineSender, WorkerKind, WorkerLauncher, WorkerStatus,
    };

    mock! {
        pub Launcher {}

        #[async_trait]
        impl WorkerLauncher for Launcher {
            async fn run(&self, spec: &WorkerSpec, invocation: &Invocation) -> WorkerResult;
        }
    }

    /// Launcher whose workers sleep for a scripted time before answering
    #[derive(Default)]
    struct ScriptedLauncher {
        script: HashMap<WorkerKind, (Duration, Option<Value>)>,
        finished: Mutex<Vec<WorkerKind>>,
    }

    impl ScriptedLauncher {
        fn worker(mut self, kind: WorkerKind, after: Duration, payload: Option<Value>) -> Self {
            self.script.insert(kind, (after, payload));
            self
        }
    }

    #[async_trait]
    impl WorkerLauncher for ScriptedLauncher {
        async fn run(&self, spec: &WorkerSpec, _invocation: &Invocation) -> WorkerResult {
            let (after, payload) = self
                .script
                .get(&spec.kind)
                .cloned()
                .unwrap_or((Duration::ZERO, None));
            tokio::time::sleep(after).await;
            self.finished.lock().unwrap().push(spec.kind);
            match payload {
                Some(payload) => WorkerResult::succeeded(spec.kind, payload),
                None => WorkerResult::failed(spec.kind, "scripted failure"),
            }
        }
    }

    fn catalog() -> WorkerCatalog {
        WorkerKind::ALL
            .into_iter()
            .fold(WorkerCatalog::new(), |catalog, kind| {
                catalog.with_spec(WorkerSpec::new(kind, "unused"))
            })
    }

    fn orchestrator(launcher: ArcWorkerLauncher) -> Orchestrator {
        Orchestrator::new(EngineConfig::default(), catalog(), launcher).unwrap()
    }

    fn light(color: &str) -> Option<Value> {
        Some(json!({"traffic_light": color}))
    }

    fn neural(count: u64, color: &str) -> Option<Value> {
        Some(json!({"correct_count": count, "pred_prob_up": 0.58, "traffic_light": color}))
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol("  aapl ").unwrap(), "AAPL");
        assert_eq!(normalize_symbol("brk.b").unwrap(), "BRK.B");
        assert!(matches!(
            normalize_symbol("   "),
            Err(EngineError::InvalidSymbol(_))
        ));
        assert!(normalize_symbol("AA PL").is_err());
    }

    #[tokio::test]
    async fn test_staged_phase_one_with_mock() {
        let mut launcher = MockLauncher::new();
        launcher
            .expect_run()
            .times(6)
            .returning(|spec, invocation| {
                assert_eq!(invocation.symbol, "MSFT");
                match spec.kind {
                    WorkerKind::Industry | WorkerKind::Garch => {
                        WorkerResult::failed(spec.kind, "exit 1")
                    }
                    _ => WorkerResult::succeeded(spec.kind, json!({"traffic_light": "green"})),
                }
            });

        let orchestrator = orchestrator(Arc::new(launcher));
        let record = orchestrator
            .run_to_completion("msft", AnalysisMode::Staged(Phase::One))
            .await
            .unwrap();

        assert_eq!(record.symbol, "MSFT");
        assert_eq!(record.traffic_lights.technical, Signal::Green);
        assert_eq!(record.traffic_lights.market, Signal::Green);
        assert_eq!(record.traffic_lights.industry, Signal::Inactive);
        assert_eq!(record.traffic_lights.risk, Signal::Inactive);
        assert_eq!(record.stats.successful_services, 4);
        assert_eq!(record.failed_workers, vec!["industry", "garch"]);

        assert!(!orchestrator.admission().in_flight("MSFT"));
        assert_eq!(orchestrator.admission().failure_count("MSFT"), 0);
    }

    #[tokio::test]
    async fn test_missing_spec_rejected_before_admission() {
        let launcher = MockLauncher::new();
        let catalog = WorkerCatalog::new().with_spec(WorkerSpec::new(WorkerKind::Mfi, "unused"));
        let orchestrator =
            Orchestrator::new(EngineConfig::default(), catalog, Arc::new(launcher)).unwrap();

        let err = orchestrator
            .analyze("AAPL", AnalysisMode::Streaming)
            .unwrap_err();
        assert!(matches!(err, EngineError::Worker(_)));
        assert!(!orchestrator.admission().in_flight("AAPL"));
    }

    #[tokio::test]
    async fn test_as_of_date_reaches_invocation() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let mut launcher = MockLauncher::new();
        launcher.expect_run().times(1).returning(move |spec, invocation| {
            assert_eq!(invocation.as_of, Some(date));
            WorkerResult::succeeded(spec.kind, json!({"correct_count": 3}))
        });

        let orchestrator = orchestrator(Arc::new(launcher));
        let events = orchestrator
            .analyze_as_of("nvda", AnalysisMode::Staged(Phase::Two), date)
            .unwrap()
            .collect_all()
            .await;

        let Some(ProgressEvent::Done { record }) = events.last() else {
            panic!("expected done, got {events:?}");
        };
        assert_eq!(record.analysis_date, date);
        assert_eq!(record.traffic_lights.neural, Signal::Yellow);
        assert_eq!(record.neural_accuracy, Some(0.6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_success_event_order() {
        let launcher = ScriptedLauncher::default()
            .worker(WorkerKind::Mfi, secs(3), light("yellow"))
            .worker(WorkerKind::Lstm, secs(12), neural(4, "green"));
        let orchestrator = orchestrator(Arc::new(launcher));

        let events = orchestrator
            .analyze("AAPL", AnalysisMode::Streaming)
            .unwrap()
            .collect_all()
            .await;
        let names: Vec<_> = events.iter().map(ProgressEvent::name).collect();

        // heartbeat at 5s comes from lstm only; mfi already finished at 3s
        assert_eq!(
            names,
            vec![
                "worker_completed",
                "heartbeat",
                "heartbeat",
                "worker_completed",
                "done"
            ]
        );
        assert_eq!(
            events[1],
            ProgressEvent::Heartbeat {
                source: "lstm".to_string()
            }
        );

        let ProgressEvent::Done { record } = &events[4] else {
            panic!("expected done");
        };
        assert_eq!(record.payloads.len(), 2);
        assert_eq!(record.traffic_lights.neural, Signal::Green);
        assert_eq!(record.traffic_lights.technical, Signal::Yellow);
        assert!(!orchestrator.admission().in_flight("AAPL"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_one_side_failed_is_total_failure() {
        let launcher = ScriptedLauncher::default()
            .worker(WorkerKind::Mfi, secs(1), light("green"))
            .worker(WorkerKind::Lstm, secs(2), None);
        let orchestrator = orchestrator(Arc::new(launcher));

        let err = orchestrator
            .run_to_completion("TSLA", AnalysisMode::Streaming)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TotalFailure { ref failed } if failed == &["lstm"]));
        assert_eq!(orchestrator.admission().failure_count("TSLA"), 1);
        assert!(!orchestrator.admission().in_flight("TSLA"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_global_timeout() {
        let launcher = Arc::new(
            ScriptedLauncher::default()
                .worker(WorkerKind::Mfi, secs(1), light("green"))
                .worker(WorkerKind::Lstm, secs(600), neural(5, "green")),
        );
        let orchestrator = orchestrator(launcher.clone());

        let started = Instant::now();
        let events = orchestrator
            .analyze("AMZN", AnalysisMode::Streaming)
            .unwrap()
            .collect_all()
            .await;
        assert!(started.elapsed() >= secs(120));

        let terminal = events.last().unwrap();
        assert_eq!(
            terminal,
            &ProgressEvent::Error {
                reason: ErrorReason::GlobalTimeout,
                detail: "analysis exceeded 120s".to_string(),
                failed_workers: vec!["lstm".to_string()],
            }
        );
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

        // the neural worker was cancelled, not left running
        tokio::time::sleep(secs(1000)).await;
        assert_eq!(*launcher.finished.lock().unwrap(), vec![WorkerKind::Mfi]);

        assert_eq!(orchestrator.admission().failure_count("AMZN"), 1);
        assert!(!orchestrator.admission().in_flight("AMZN"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_staged_phase_timeout() {
        let launcher = ScriptedLauncher::default()
            .worker(WorkerKind::Lstm, secs(500), neural(5, "green"));
        let config = EngineConfig::builder()
            .phase_timeout(secs(30))
            .build()
            .unwrap();
        let orchestrator = Orchestrator::new(config, catalog(), Arc::new(launcher)).unwrap();

        let err = orchestrator
            .run_to_completion("INTC", AnalysisMode::Staged(Phase::Two))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::GlobalTimeout { after_ms: 30_000 }));
        assert_eq!(orchestrator.admission().failure_count("INTC"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_after_three_failures() {
        let launcher = Arc::new(
            ScriptedLauncher::default()
                .worker(WorkerKind::Mfi, secs(1), None)
                .worker(WorkerKind::Lstm, secs(1), None),
        );
        let orchestrator = orchestrator(launcher);

        for _ in 0..3 {
            assert!(orchestrator
                .run_to_completion("COIN", AnalysisMode::Streaming)
                .await
                .is_err());
        }

        let err = orchestrator
            .analyze("COIN", AnalysisMode::Streaming)
            .unwrap_err();
        let EngineError::AdmissionRejected(rejection) = err else {
            panic!("expected rejection");
        };
        assert!(matches!(rejection, crate::error::Rejection::CircuitOpen { failures: 3, .. }));

        tokio::time::advance(secs(301)).await;
        tokio_test::assert_ok!(orchestrator.analyze("COIN", AnalysisMode::Streaming));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_request_rejected_while_in_flight() {
        let launcher = ScriptedLauncher::default()
            .worker(WorkerKind::Lstm, secs(10), neural(3, "yellow"));
        let orchestrator = orchestrator(Arc::new(launcher));

        let stream = orchestrator
            .analyze("AAPL", AnalysisMode::Staged(Phase::Two))
            .unwrap();
        let err = orchestrator
            .analyze(" aapl", AnalysisMode::Staged(Phase::Two))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::AdmissionRejected(crate::error::Rejection::AlreadyInFlight { .. })
        ));

        let events = stream.collect_all().await;
        assert!(matches!(events.last(), Some(ProgressEvent::Done { .. })));
        tokio_test::assert_ok!(orchestrator.analyze("AAPL", AnalysisMode::Staged(Phase::Two)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_releases_and_stops_workers() {
        let launcher = Arc::new(
            ScriptedLauncher::default()
                .worker(WorkerKind::Mfi, secs(60), light("green"))
                .worker(WorkerKind::Lstm, secs(60), neural(5, "green")),
        );
        let orchestrator = orchestrator(launcher.clone());

        let mut stream = orchestrator.analyze("NFLX", AnalysisMode::Streaming).unwrap();
        let first = stream.recv().await.unwrap();
        assert!(matches!(first, ProgressEvent::Heartbeat { .. }));
        drop(stream);

        tokio::time::sleep(secs(1)).await;
        assert!(!orchestrator.admission().in_flight("NFLX"));
        assert_eq!(orchestrator.admission().failure_count("NFLX"), 0);

        tokio::time::sleep(secs(120)).await;
        assert!(launcher.finished.lock().unwrap().is_empty());
    }

    struct PanickingLauncher;

    #[async_trait]
    impl WorkerLauncher for PanickingLauncher {
        async fn run(&self, spec: &WorkerSpec, _invocation: &Invocation) -> WorkerResult {
            if spec.kind == WorkerKind::Rsi {
                panic!("indicator blew up");
            }
            WorkerResult::succeeded(spec.kind, json!({"traffic_light": "red"}))
        }
    }

    #[tokio::test]
    async fn test_panicking_worker_becomes_failed_result() {
        let orchestrator = orchestrator(Arc::new(PanickingLauncher));
        let events = orchestrator
            .analyze("ORCL", AnalysisMode::Staged(Phase::One))
            .unwrap()
            .collect_all()
            .await;

        let rsi_status = events.iter().find_map(|event| match event {
            ProgressEvent::WorkerCompleted {
                worker: WorkerKind::Rsi,
                status,
                ..
            } => Some(*status),
            _ => None,
        });
        assert_eq!(rsi_status, Some(WorkerStatus::Failed));

        let Some(ProgressEvent::Done { record }) = events.last() else {
            panic!("expected done");
        };
        // two red ballots plus the failed one
        assert_eq!(record.traffic_lights.technical, Signal::Red);
        assert!(!orchestrator.admission().in_flight("ORCL"));
    }

    /// Neural worker that reports its epochs before answering
    struct EpochLauncher;

    #[async_trait]
    impl WorkerLauncher for EpochLauncher {
        async fn run(&self, spec: &WorkerSpec, _invocation: &Invocation) -> WorkerResult {
            WorkerResult::succeeded(spec.kind, json!({"traffic_light": "green"}))
        }

        async fn run_with_progress(
            &self,
            spec: &WorkerSpec,
            invocation: &Invocation,
            progress: ProgressLineSender,
        ) -> WorkerResult {
            if spec.kind == WorkerKind::Lstm {
                for line in ["Epoch 1/2", "Epoch 2/2"] {
                    let _ = progress.send(ProgressLine {
                        kind: spec.kind,
                        line: line.to_string(),
                    });
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                return WorkerResult::succeeded(
                    spec.kind,
                    json!({"correct_count": 4, "traffic_light": "green"}),
                );
            }
            self.run(spec, invocation).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_progress_lines_become_heartbeats() {
        let orchestrator = orchestrator(Arc::new(EpochLauncher));
        let events = orchestrator
            .analyze("TSLA", AnalysisMode::Staged(Phase::Two))
            .unwrap()
            .collect_all()
            .await;

        let position = |wanted: &ProgressEvent| events.iter().position(|event| event == wanted);
        let first = position(&ProgressEvent::Heartbeat {
            source: "lstm:Epoch 1/2".to_string(),
        })
        .unwrap();
        let second = position(&ProgressEvent::Heartbeat {
            source: "lstm:Epoch 2/2".to_string(),
        })
        .unwrap();
        let completed = events
            .iter()
            .position(|event| matches!(event, ProgressEvent::WorkerCompleted { .. }))
            .unwrap();

        assert!(first < second);
        assert!(second < completed);
        assert!(matches!(events.last(), Some(ProgressEvent::Done { .. })));
    }
}
