//! Static description of how to launch one worker kind

use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::kind::WorkerKind;
use crate::parser::{ArcOutputParser, LastJsonLineParser};

/// How to launch and interpret one kind of worker
///
/// Specs are static per worker kind, never per request. The per-request part
/// (symbol, as-of date) travels separately in an [`Invocation`].
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    /// Which worker this is
    pub kind: WorkerKind,
    /// Program to execute
    pub command: String,
    /// Arguments placed before the symbol
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: HashMap<String, String>,
    /// Working directory (optional)
    pub cwd: Option<PathBuf>,
    /// Hard limit on the worker's run time
    pub timeout: Duration,
    /// Payload extraction strategy
    pub parser: ArcOutputParser,
    /// Append the invocation's as-of date after the symbol
    pub pass_as_of: bool,
    /// Stdout lines starting with one of these are forwarded as live progress
    pub progress_prefixes: Vec<String>,
}

impl WorkerSpec {
    /// Create a spec with no arguments, the JSON-line parser and a 60s timeout
    pub fn new(kind: WorkerKind, command: impl Into<String>) -> Self {
        Self {
            kind,
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            timeout: Duration::from_secs(60),
            parser: std::sync::Arc::new(LastJsonLineParser),
            pass_as_of: false,
            progress_prefixes: Vec::new(),
        }
    }

    /// Worker name
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Set the leading arguments
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add one environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the output parser
    pub fn with_parser(mut self, parser: ArcOutputParser) -> Self {
        self.parser = parser;
        self
    }

    /// Pass the as-of date as a trailing argument
    pub fn with_as_of(mut self, enabled: bool) -> Self {
        self.pass_as_of = enabled;
        self
    }

    /// Forward stdout lines with any of these prefixes
    pub fn with_progress_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.progress_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Whether a stdout line should be forwarded
    pub fn is_progress_line(&self, line: &str) -> bool {
        self.progress_prefixes
            .iter()
            .any(|prefix| line.starts_with(prefix.as_str()))
    }

    /// Full argument vector for one invocation
    pub fn command_args(&self, invocation: &Invocation) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(invocation.symbol.clone());
        if self.pass_as_of {
            if let Some(as_of) = invocation.as_of {
                args.push(as_of.format("%Y-%m-%d").to_string());
            }
        }
        args
    }
}

/// Per-request input handed to a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Upper-cased market symbol
    pub symbol: String,
    /// Reference date for workers that evaluate as of a given day
    pub as_of: Option<NaiveDate>,
}

impl Invocation {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            as_of: None,
        }
    }

    pub fn with_as_of(mut self, as_of: NaiveDate) -> Self {
        self.as_of = Some(as_of);
        self
    }
}
