//! Output parsing strategies
//!
//! Workers print free-form progress lines and finish with one self-delimited
//! payload line. Only the last well-formed record is authoritative, so every
//! parser scans the captured stdout from the last line backward.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;

use crate::Result;
use crate::error::WorkerError;

/// Strategy that extracts a structured payload from a worker's stdout
pub trait OutputParser: Send + Sync + fmt::Debug {
    /// Short name used in logs and config files
    fn name(&self) -> &'static str;

    /// Parse the accumulated stdout of a successfully exited worker
    fn parse(&self, stdout: &str) -> Result<Value>;
}

/// Shared handle to a parser
pub type ArcOutputParser = Arc<dyn OutputParser>;

/// Parser selection as written in worker config files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    /// Last line that is a `{...}` JSON object
    #[default]
    JsonLine,
    /// Last `[LSTM accuracy: ..]` summary line
    SummaryLine,
}

impl ParserKind {
    /// Instantiate the parser
    pub fn build(self) -> Result<ArcOutputParser> {
        Ok(match self {
            ParserKind::JsonLine => Arc::new(LastJsonLineParser),
            ParserKind::SummaryLine => Arc::new(SummaryLineParser::new()?),
        })
    }
}

/// Non-empty, trimmed lines from last to first
fn lines_backward(stdout: &str) -> impl Iterator<Item = &str> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| !line.is_empty())
}

fn preview(line: &str) -> String {
    line.chars().take(80).collect()
}

/// Takes the last line that looks like a JSON object and parses it
#[derive(Debug, Clone, Copy, Default)]
pub struct LastJsonLineParser;

impl OutputParser for LastJsonLineParser {
    fn name(&self) -> &'static str {
        "json_line"
    }

    fn parse(&self, stdout: &str) -> Result<Value> {
        let line = lines_backward(stdout)
            .find(|line| line.starts_with('{') && line.ends_with('}'))
            .ok_or_else(|| {
                WorkerError::OutputUnparsable("no JSON line found in worker stdout".to_string())
            })?;

        let value: Value = serde_json::from_str(line).map_err(|e| {
            WorkerError::OutputUnparsable(format!("invalid JSON line '{}': {e}", preview(line)))
        })?;

        if !value.is_object() {
            return Err(WorkerError::OutputUnparsable(
                "payload line is not a JSON object".to_string(),
            ));
        }

        Ok(value)
    }
}

/// Parses the neural worker's plain-text summary framing
///
/// `[LSTM accuracy: 3, Prediction probability up: 0.423, Traffic light: RED]`
/// becomes `{"correct_count": 3, "pred_prob_up": 0.423, "traffic_light": "red"}`.
#[derive(Debug, Clone)]
pub struct SummaryLineParser {
    pattern: Regex,
}

impl SummaryLineParser {
    const PREFIX: &'static str = "[LSTM accuracy:";

    /// Create the parser
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(
            r"^\[LSTM accuracy: (\d+), Prediction probability up: ([0-9]*\.?[0-9]+), Traffic light: (\w+)\]$",
        )
        .map_err(|e| WorkerError::InvalidPattern(e.to_string()))?;

        Ok(Self { pattern })
    }
}

impl OutputParser for SummaryLineParser {
    fn name(&self) -> &'static str {
        "summary_line"
    }

    fn parse(&self, stdout: &str) -> Result<Value> {
        let line = lines_backward(stdout)
            .find(|line| line.starts_with(Self::PREFIX))
            .ok_or_else(|| {
                WorkerError::OutputUnparsable("no summary line found in worker stdout".to_string())
            })?;

        let caps = self.pattern.captures(line).ok_or_else(|| {
            WorkerError::OutputUnparsable(format!("malformed summary line '{}'", preview(line)))
        })?;

        let correct_count: u64 = caps[1]
            .parse()
            .map_err(|e| WorkerError::OutputUnparsable(format!("bad accuracy count: {e}")))?;
        let prob_up: f64 = caps[2]
            .parse()
            .map_err(|e| WorkerError::OutputUnparsable(format!("bad probability: {e}")))?;

        Ok(json!({
            "correct_count": correct_count,
            "pred_prob_up": prob_up,
            "traffic_light": caps[3].to_ascii_lowercase(),
        }))
    }
}
