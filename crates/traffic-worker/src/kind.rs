//! Worker kinds and the signal category each one feeds

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::WorkerError;

/// Analysis category that owns one composite traffic light
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Momentum/flow, volatility bands and relative strength, combined by vote
    Technical,
    /// Sensitivity to the symbol's industry
    Industry,
    /// Sensitivity to the broad market
    Market,
    /// Volatility risk
    Risk,
    /// Neural price-direction forecast
    Neural,
}

impl Category {
    /// All categories in display order
    pub const ALL: [Category; 5] = [
        Category::Technical,
        Category::Industry,
        Category::Market,
        Category::Risk,
        Category::Neural,
    ];

    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Technical => "technical",
            Category::Industry => "industry",
            Category::Market => "market",
            Category::Risk => "risk",
            Category::Neural => "neural",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One kind of external analysis worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerKind {
    /// Money flow index (momentum/flow)
    Mfi,
    /// Bollinger bands (volatility bands)
    Bollinger,
    /// Relative strength index
    Rsi,
    /// Industry regression (industry sensitivity)
    Industry,
    /// CAPM beta (market sensitivity)
    Capm,
    /// GARCH volatility (volatility risk)
    Garch,
    /// LSTM price-direction forecast
    Lstm,
}

impl WorkerKind {
    /// Every worker kind
    pub const ALL: [WorkerKind; 7] = [
        WorkerKind::Mfi,
        WorkerKind::Bollinger,
        WorkerKind::Rsi,
        WorkerKind::Industry,
        WorkerKind::Capm,
        WorkerKind::Garch,
        WorkerKind::Lstm,
    ];

    /// The three technical voters, in vote order
    pub const TECHNICAL: [WorkerKind; 3] = [WorkerKind::Mfi, WorkerKind::Bollinger, WorkerKind::Rsi];

    /// Fast workers run together in staged phase 1
    pub const PHASE_ONE: [WorkerKind; 6] = [
        WorkerKind::Mfi,
        WorkerKind::Bollinger,
        WorkerKind::Rsi,
        WorkerKind::Industry,
        WorkerKind::Capm,
        WorkerKind::Garch,
    ];

    /// Slow worker run alone in staged phase 2
    pub const PHASE_TWO: [WorkerKind; 1] = [WorkerKind::Lstm];

    /// Mutually required pair in coupled (streaming) mode
    pub const COUPLED: [WorkerKind; 2] = [WorkerKind::Lstm, WorkerKind::Mfi];

    /// Stable worker name used in config files, payload maps and events
    pub fn name(&self) -> &'static str {
        match self {
            WorkerKind::Mfi => "mfi",
            WorkerKind::Bollinger => "bollinger",
            WorkerKind::Rsi => "rsi",
            WorkerKind::Industry => "industry",
            WorkerKind::Capm => "capm",
            WorkerKind::Garch => "garch",
            WorkerKind::Lstm => "lstm",
        }
    }

    /// Category whose composite this worker contributes to
    pub fn category(&self) -> Category {
        match self {
            WorkerKind::Mfi | WorkerKind::Bollinger | WorkerKind::Rsi => Category::Technical,
            WorkerKind::Industry => Category::Industry,
            WorkerKind::Capm => Category::Market,
            WorkerKind::Garch => Category::Risk,
            WorkerKind::Lstm => Category::Neural,
        }
    }

    /// Default script file name under the services directory
    pub fn default_script(&self) -> &'static str {
        match self {
            WorkerKind::Mfi => "mfi_service.py",
            WorkerKind::Bollinger => "bollinger_service.py",
            WorkerKind::Rsi => "rsi_service.py",
            WorkerKind::Industry => "industry_regression_service.py",
            WorkerKind::Capm => "capm_service.py",
            WorkerKind::Garch => "garch_service.py",
            WorkerKind::Lstm => "lstm_service.py",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WorkerKind {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        WorkerKind::ALL
            .into_iter()
            .find(|kind| kind.name() == needle)
            .ok_or_else(|| WorkerError::UnknownWorker(s.to_string()))
    }
}
