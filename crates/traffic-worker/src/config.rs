//! Worker configuration file
//!
//! Maps worker names to launch settings. Any kind missing from a file keeps
//! the built-in default, which runs `python -u <services_dir>/<script>`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::Result;
use crate::catalog::WorkerCatalog;
use crate::error::WorkerError;
use crate::kind::WorkerKind;
use crate::parser::ParserKind;
use crate::spec::WorkerSpec;

/// Root worker configuration
///
/// # Example
///
/// ```json
/// {
///   "workers": {
///     "lstm": {
///       "command": "python",
///       "args": ["-u", "${SERVICES_DIR}/lstm_service.py"],
///       "timeoutSecs": 120,
///       "parser": "summary_line",
///       "passAsOf": true,
///       "progressPrefixes": ["Epoch"]
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    /// Launch settings keyed by worker name
    #[serde(default)]
    pub workers: BTreeMap<WorkerKind, WorkerEntry>,
}

/// Launch settings for one worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerEntry {
    /// Command to execute
    pub command: String,

    /// Arguments placed before the symbol
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Output parser
    #[serde(default)]
    pub parser: ParserKind,

    /// Append the as-of date after the symbol
    #[serde(default)]
    pub pass_as_of: bool,

    /// Stdout line prefixes forwarded as live progress
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub progress_prefixes: Vec<String>,
}

fn default_timeout_secs() -> u64 {
    60
}

impl WorkerEntry {
    /// Turn the entry into a launch spec for `kind`
    pub fn to_spec(&self, kind: WorkerKind) -> Result<WorkerSpec> {
        if self.command.trim().is_empty() {
            return Err(WorkerError::ConfigError(format!(
                "worker '{kind}' has an empty command"
            )));
        }
        if self.timeout_secs == 0 {
            return Err(WorkerError::ConfigError(format!(
                "worker '{kind}' timeout must be greater than 0"
            )));
        }

        let mut spec = WorkerSpec::new(kind, self.command.clone())
            .with_args(self.args.iter().cloned())
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_parser(self.parser.build()?)
            .with_as_of(self.pass_as_of)
            .with_progress_prefixes(self.progress_prefixes.iter().cloned());
        spec.env.clone_from(&self.env);
        spec.cwd.clone_from(&self.cwd);

        Ok(spec)
    }

    fn resolve_env_vars(&mut self) -> Result<()> {
        self.command = resolve_env_string(&self.command)?;

        for arg in &mut self.args {
            *arg = resolve_env_string(arg)?;
        }

        for value in self.env.values_mut() {
            *value = resolve_env_string(value)?;
        }

        if let Some(path) = &mut self.cwd {
            let resolved = resolve_env_string(&path.to_string_lossy())?;
            *path = PathBuf::from(resolved);
        }

        Ok(())
    }
}

impl WorkerConfig {
    /// Built-in configuration running every worker script under `services_dir`
    pub fn default_python(services_dir: impl AsRef<Path>) -> Self {
        let services_dir = services_dir.as_ref();
        let workers = WorkerKind::ALL
            .into_iter()
            .map(|kind| {
                let script = services_dir.join(kind.default_script());
                let entry = WorkerEntry {
                    command: "python".to_string(),
                    args: vec!["-u".to_string(), script.to_string_lossy().into_owned()],
                    env: HashMap::new(),
                    cwd: None,
                    timeout_secs: if kind == WorkerKind::Lstm {
                        120
                    } else {
                        default_timeout_secs()
                    },
                    parser: ParserKind::JsonLine,
                    pass_as_of: kind == WorkerKind::Lstm,
                    progress_prefixes: if kind == WorkerKind::Lstm {
                        vec!["Epoch".to_string(), "💡".to_string()]
                    } else {
                        Vec::new()
                    },
                };
                (kind, entry)
            })
            .collect();

        Self { workers }
    }

    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| WorkerError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let mut config: WorkerConfig = serde_json::from_str(&content)
            .map_err(|e| WorkerError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.resolve_env_vars()?;

        Ok(config)
    }

    /// Defaults for `services_dir`, overridden by `path` when given
    pub fn load(path: Option<&Path>, services_dir: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default_python(services_dir);
        if let Some(path) = path {
            config.merge(Self::from_file(path)?);
        }
        Ok(config)
    }

    /// Merge another config into this one
    ///
    /// Entries from `other` replace entries for the same worker.
    pub fn merge(&mut self, other: WorkerConfig) {
        self.workers.extend(other.workers);
    }

    /// Resolve `${VAR}` and `$VAR` references in every entry
    pub fn resolve_env_vars(&mut self) -> Result<()> {
        for entry in self.workers.values_mut() {
            entry.resolve_env_vars()?;
        }
        Ok(())
    }

    /// Save configuration to a file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    /// Build the runtime catalog
    pub fn to_catalog(&self) -> Result<WorkerCatalog> {
        let mut catalog = WorkerCatalog::new();
        for (kind, entry) in &self.workers {
            catalog.insert(entry.to_spec(*kind)?);
        }
        Ok(catalog)
    }
}

/// Resolve environment variable references in strings
///
/// Supports `${VAR}` and `$VAR` syntax. A reference to an unset variable is
/// an error rather than an empty expansion.
pub fn resolve_env_string(s: &str) -> Result<String> {
    let pattern = regex::Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
        .map_err(|e| WorkerError::InvalidPattern(e.to_string()))?;

    let mut result = String::with_capacity(s.len());
    let mut last = 0;

    for cap in pattern.captures_iter(s) {
        let (Some(whole), Some(name)) = (cap.get(0), cap.get(1).or_else(|| cap.get(2))) else {
            continue;
        };
        let value = std::env::var(name.as_str())
            .map_err(|_| WorkerError::EnvVarNotFound(name.as_str().to_string()))?;
        result.push_str(&s[last..whole.start()]);
        result.push_str(&value);
        last = whole.end();
    }
    result.push_str(&s[last..]);

    Ok(result)
}
