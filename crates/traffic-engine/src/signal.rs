//! Traffic-light signal derivation
//!
//! Raw worker payloads are reduced to one of four discrete levels per
//! category. Every rule here is a pure function of worker results so it can
//! be tested without running processes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use traffic_worker::{Category, WorkerKind, WorkerResult};

/// Size of the neural worker's evaluation sample
pub const NEURAL_SAMPLE_SIZE: u64 = 5;

/// Discrete verdict for one category
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    #[default]
    Inactive,
    Red,
    Yellow,
    Green,
}

impl Signal {
    /// Parse a reported color, case-insensitively, including aliases
    pub fn from_color(color: &str) -> Option<Self> {
        match color.trim().to_ascii_lowercase().as_str() {
            "green" | "good" => Some(Signal::Green),
            "yellow" | "warning" => Some(Signal::Yellow),
            "red" | "danger" => Some(Signal::Red),
            "inactive" | "grey" | "gray" => Some(Signal::Inactive),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Inactive => "inactive",
            Signal::Red => "red",
            Signal::Yellow => "yellow",
            Signal::Green => "green",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Color a payload reports, as `traffic_light` or `traffic_light.color`
pub fn reported_color(payload: &Value) -> Option<Signal> {
    let light = payload.get("traffic_light")?;
    let color = match light {
        Value::String(color) => color.as_str(),
        Value::Object(fields) => fields.get("color")?.as_str()?,
        _ => return None,
    };
    Signal::from_color(color)
}

/// Majority vote over the technical workers' own colors
///
/// `None` stands for a participating worker that produced no usable color
/// and votes red. Green or red wins with a strict majority of the ballots;
/// anything else is yellow. No ballots at all means inactive.
pub fn technical_vote(ballots: &[Option<Signal>]) -> Signal {
    if ballots.is_empty() {
        return Signal::Inactive;
    }

    let votes = ballots.iter().map(|ballot| ballot.unwrap_or(Signal::Red));
    let (greens, reds) = votes.fold((0, 0), |(greens, reds), vote| match vote {
        Signal::Green => (greens + 1, reds),
        Signal::Red => (greens, reds + 1),
        _ => (greens, reds),
    });

    let majority = ballots.len() / 2 + 1;
    if greens >= majority {
        Signal::Green
    } else if reds >= majority {
        Signal::Red
    } else {
        Signal::Yellow
    }
}

/// Industry, market and risk: the worker's own color, or inactive
pub fn pass_through(result: Option<&WorkerResult>) -> Signal {
    successful_payload(result)
        .and_then(reported_color)
        .unwrap_or(Signal::Inactive)
}

fn successful_payload(result: Option<&WorkerResult>) -> Option<&Value> {
    result.and_then(WorkerResult::usable_payload)
}

/// Facts extracted from a neural payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeuralEvidence {
    /// Correct predictions over the evaluation sample
    pub correct_count: Option<u64>,
    /// Probability that the price goes up next
    pub probability_up: Option<f64>,
    /// Color the worker reported
    pub reported: Option<Signal>,
}

impl NeuralEvidence {
    /// Read the evidence from a payload, tolerating missing fields
    pub fn from_payload(payload: &Value) -> Self {
        let light = payload.get("traffic_light");

        let correct_count = payload
            .get("correct_count")
            .or_else(|| payload.get("accuracy_hits"))
            .and_then(Value::as_u64)
            .or_else(|| evaluation_hits(payload));

        let probability_up = payload
            .get("pred_prob_up")
            .and_then(Value::as_f64)
            .or_else(|| light?.get("probability_up")?.as_f64());

        Self {
            correct_count,
            probability_up,
            reported: reported_color(payload),
        }
    }

    /// Correct count normalized to `[0, 1]`
    pub fn accuracy(&self) -> Option<f64> {
        self.correct_count
            .map(|count| (count as f64 / NEURAL_SAMPLE_SIZE as f64).min(1.0))
    }
}

/// Count of matching `evaluation.predictions` / `evaluation.actuals` pairs
fn evaluation_hits(payload: &Value) -> Option<u64> {
    let evaluation = payload.get("evaluation")?;
    let predictions = evaluation.get("predictions")?.as_array()?;
    let actuals = evaluation.get("actuals")?.as_array()?;

    let hits = predictions
        .iter()
        .zip(actuals)
        .filter(|(predicted, actual)| !actual.is_null() && predicted == actual)
        .count();
    Some(hits as u64)
}

type NeuralRule = fn(&NeuralEvidence) -> Option<Signal>;

/// Neural rules, first match wins
const NEURAL_RULES: &[(&str, NeuralRule)] = &[
    ("unreliable_model", |evidence| match evidence.correct_count {
        Some(count) if count >= 2 => None,
        _ => Some(Signal::Inactive),
    }),
    ("reported_color", |evidence| evidence.reported),
    ("accuracy_fallback", |evidence| {
        evidence.accuracy().map(|accuracy| {
            if accuracy >= 0.8 {
                Signal::Green
            } else if accuracy >= 0.6 {
                Signal::Yellow
            } else {
                Signal::Red
            }
        })
    }),
];

/// Neural composite from the evidence
pub fn neural_signal(evidence: &NeuralEvidence) -> Signal {
    NEURAL_RULES
        .iter()
        .find_map(|(_, rule)| rule(evidence))
        .unwrap_or(Signal::Inactive)
}

/// Neural composite from a worker result
pub fn neural_from_result(result: Option<&WorkerResult>) -> Signal {
    successful_payload(result)
        .map(NeuralEvidence::from_payload)
        .map_or(Signal::Inactive, |evidence| neural_signal(&evidence))
}

/// Signal a single worker contributes, used for per-worker progress events
pub fn worker_signal(result: &WorkerResult) -> Signal {
    match result.kind {
        WorkerKind::Lstm => neural_from_result(Some(result)),
        _ => pass_through(Some(result)),
    }
}

/// The five composite traffic lights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompositeSignals {
    pub technical: Signal,
    pub industry: Signal,
    pub market: Signal,
    pub risk: Signal,
    pub neural: Signal,
}

impl CompositeSignals {
    pub fn get(&self, category: Category) -> Signal {
        match category {
            Category::Technical => self.technical,
            Category::Industry => self.industry,
            Category::Market => self.market,
            Category::Risk => self.risk,
            Category::Neural => self.neural,
        }
    }

    /// `(category, signal)` pairs in display order
    pub fn iter(&self) -> impl Iterator<Item = (Category, Signal)> + '_ {
        Category::ALL
            .into_iter()
            .map(move |category| (category, self.get(category)))
    }
}

/// Derive every composite from the results of the workers that ran
///
/// Categories whose workers did not take part stay inactive. The technical
/// vote only counts technical workers that took part.
pub fn derive_composites(results: &BTreeMap<WorkerKind, WorkerResult>) -> CompositeSignals {
    let ballots: Vec<Option<Signal>> = WorkerKind::TECHNICAL
        .iter()
        .filter_map(|kind| results.get(kind))
        .map(|result| successful_payload(Some(result)).and_then(reported_color))
        .collect();

    CompositeSignals {
        technical: technical_vote(&ballots),
        industry: pass_through(results.get(&WorkerKind::Industry)),
        market: pass_through(results.get(&WorkerKind::Capm)),
        risk: pass_through(results.get(&WorkerKind::Garch)),
        neural: neural_from_result(results.get(&WorkerKind::Lstm)),
    }
}
