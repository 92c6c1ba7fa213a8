//! Completion tracking and result aggregation
//!
//! A [`CompletionTracker`] is the single authority on which workers of a
//! request have finished. Results enter through one transition,
//! [`CompletionTracker::mark_terminal`], which ignores duplicates, and the
//! request is finalized once from the collected results.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use traffic_worker::{WorkerKind, WorkerResult};

use crate::error::EngineError;
use crate::signal::{CompositeSignals, NeuralEvidence, derive_composites};

/// Staged execution phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Fast indicator, market and risk workers
    #[serde(rename = "1")]
    One,
    /// Neural forecast alone
    #[serde(rename = "2")]
    Two,
}

impl Phase {
    pub fn workers(&self) -> &'static [WorkerKind] {
        match self {
            Phase::One => &WorkerKind::PHASE_ONE,
            Phase::Two => &WorkerKind::PHASE_TWO,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::One => f.write_str("1"),
            Phase::Two => f.write_str("2"),
        }
    }
}

/// How a request runs and is aggregated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisMode {
    /// Neural forecast plus one fast indicator, both required
    Streaming,
    /// Independent workers, individual failures tolerated
    Staged(Phase),
}

impl AnalysisMode {
    /// Workers the mode launches
    pub fn workers(&self) -> &'static [WorkerKind] {
        match self {
            AnalysisMode::Streaming => &WorkerKind::COUPLED,
            AnalysisMode::Staged(phase) => phase.workers(),
        }
    }

    /// Whether every worker must succeed
    pub fn is_coupled(&self) -> bool {
        matches!(self, AnalysisMode::Streaming)
    }

    pub fn kind(&self) -> ModeKind {
        match self {
            AnalysisMode::Streaming => ModeKind::Streaming,
            AnalysisMode::Staged(_) => ModeKind::Staged,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            AnalysisMode::Streaming => None,
            AnalysisMode::Staged(phase) => Some(*phase),
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisMode::Streaming => f.write_str("streaming"),
            AnalysisMode::Staged(phase) => write!(f, "staged phase {phase}"),
        }
    }
}

/// Serialized name of an [`AnalysisMode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeKind {
    Streaming,
    Staged,
}

/// Service success counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisStats {
    pub total_services: usize,
    pub successful_services: usize,
    /// Rounded percentage of successful services
    pub success_rate: u32,
}

impl AnalysisStats {
    pub fn new(total_services: usize, successful_services: usize) -> Self {
        let success_rate = if total_services == 0 {
            0
        } else {
            (successful_services as f64 * 100.0 / total_services as f64).round() as u32
        };
        Self {
            total_services,
            successful_services,
            success_rate,
        }
    }
}

/// Merged outcome of one analysis request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub symbol: String,
    pub mode: ModeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    pub requested_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub analysis_date: NaiveDate,
    /// Successful payloads by worker name
    pub payloads: BTreeMap<String, Value>,
    pub traffic_lights: CompositeSignals,
    pub stats: AnalysisStats,
    pub failed_workers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neural_accuracy: Option<f64>,
}

impl AnalysisRecord {
    /// Non-fatal error describing failed workers, if any
    pub fn partial_failure(&self) -> Option<EngineError> {
        (!self.failed_workers.is_empty()).then(|| EngineError::PartialFailure {
            failed: self.failed_workers.clone(),
        })
    }
}

/// Result of recording a worker outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// First terminal result for this worker
    Recorded,
    /// The worker already had a terminal result; the new one was dropped
    Duplicate,
    /// The worker is not part of this request, or the result is not terminal
    Ignored,
}

/// Outcome of a coupled request
#[derive(Debug, Clone, PartialEq)]
pub enum CoupledOutcome {
    Success(Box<AnalysisRecord>),
    TotalFailure { failed: Vec<String> },
}

/// Per-request completion state machine
#[derive(Debug, Clone)]
pub struct CompletionTracker {
    symbol: String,
    mode: AnalysisMode,
    requested_at: DateTime<Utc>,
    analysis_date: NaiveDate,
    results: BTreeMap<WorkerKind, WorkerResult>,
}

impl CompletionTracker {
    pub fn new(symbol: impl Into<String>, mode: AnalysisMode, requested_at: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            mode,
            requested_at,
            analysis_date: requested_at.date_naive(),
            results: BTreeMap::new(),
        }
    }

    /// Override the reference date stamped on the record
    pub fn with_analysis_date(mut self, date: NaiveDate) -> Self {
        self.analysis_date = date;
        self
    }

    /// The one transition into a worker's terminal state
    pub fn mark_terminal(&mut self, result: WorkerResult) -> Transition {
        if !result.is_terminal() || !self.mode.workers().contains(&result.kind) {
            return Transition::Ignored;
        }
        if self.results.contains_key(&result.kind) {
            return Transition::Duplicate;
        }
        self.results.insert(result.kind, result);
        Transition::Recorded
    }

    /// Whether every expected worker is terminal
    pub fn is_complete(&self) -> bool {
        self.pending().is_empty()
    }

    /// Workers still running
    pub fn pending(&self) -> Vec<WorkerKind> {
        self.mode
            .workers()
            .iter()
            .copied()
            .filter(|kind| !self.results.contains_key(kind))
            .collect()
    }

    /// Workers that finished without a payload, plus those still pending
    pub fn missing_payloads(&self) -> Vec<String> {
        self.mode
            .workers()
            .iter()
            .filter(|kind| {
                self.results
                    .get(*kind)
                    .is_none_or(|result| result.usable_payload().is_none())
            })
            .map(|kind| kind.name().to_string())
            .collect()
    }

    pub fn results(&self) -> &BTreeMap<WorkerKind, WorkerResult> {
        &self.results
    }

    /// Decide a coupled request; every worker must have a payload
    pub fn finalize_coupled(&self) -> CoupledOutcome {
        let failed = self.missing_payloads();
        if failed.is_empty() {
            CoupledOutcome::Success(Box::new(self.build_record()))
        } else {
            CoupledOutcome::TotalFailure { failed }
        }
    }

    /// Build a staged record; failed workers leave their category inactive
    pub fn finalize_staged(&self) -> AnalysisRecord {
        self.build_record()
    }

    fn build_record(&self) -> AnalysisRecord {
        let payloads: BTreeMap<String, Value> = self
            .results
            .values()
            .filter_map(|result| {
                result
                    .usable_payload()
                    .map(|payload| (result.worker_name.clone(), payload.clone()))
            })
            .collect();

        let neural_accuracy = self
            .results
            .get(&WorkerKind::Lstm)
            .and_then(WorkerResult::usable_payload)
            .and_then(|payload| NeuralEvidence::from_payload(payload).accuracy());

        let total = self.mode.workers().len();
        AnalysisRecord {
            symbol: self.symbol.clone(),
            mode: self.mode.kind(),
            phase: self.mode.phase(),
            requested_at: self.requested_at,
            completed_at: Utc::now(),
            analysis_date: self.analysis_date,
            stats: AnalysisStats::new(total, payloads.len()),
            payloads,
            traffic_lights: derive_composites(&self.results),
            failed_workers: self.missing_payloads(),
            neural_accuracy,
        }
    }
}
