use crate::error::{TendError, Result};
use crate::process::signal::parse_signal;
use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod size;

pub use size::parse_size;

/// Description of one supervised process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessSpec {
    /// Process name (unique key, taken from the document's map key)
    #[serde(skip)]
    pub name: String,

    /// Executable to run (absolute, relative, or looked up on PATH)
    pub command: String,

    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Resident memory limit; exceeding it triggers a restart
    #[serde(
        default,
        deserialize_with = "size::deserialize_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub memory_limit_bytes: Option<u64>,

    /// chrono strftime format used for log line timestamps
    #[serde(default = "default_log_date_format")]
    pub log_date_format: String,

    /// File receiving the child's stdout
    pub stdout_path: PathBuf,

    /// File receiving the child's stderr
    pub stderr_path: PathBuf,

    /// Signal to send on stop (default: SIGTERM)
    #[serde(default = "default_stop_signal")]
    pub stop_signal: String,

    /// Grace period before force kill (in milliseconds)
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,

    /// Environment variables added to the inherited environment
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Supervisor-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorSettings {
    /// How often each watcher samples resident memory
    #[serde(default = "default_memory_sample_interval")]
    pub memory_sample_interval_ms: u64,

    #[serde(default)]
    pub restart: RestartSettings,
}

/// Restart policy tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RestartSettings {
    /// An exit within this window of the start counts as a rapid failure
    #[serde(default = "default_min_uptime")]
    pub min_uptime_ms: u64,

    /// Backoff applied to the first rapid failure
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound on the backoff delay
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Give up after this many restarts (unlimited when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_restarts: Option<u32>,
}

/// A complete configuration document: settings plus the process table
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigDocument {
    #[serde(default)]
    pub supervisor: SupervisorSettings,

    #[serde(default)]
    pub processes: BTreeMap<String, ProcessSpec>,
}

// Default value functions for serde
fn default_log_date_format() -> String {
    "%Y-%m-%d %H:%M:%S%.3f %z".to_string()
}

fn default_stop_signal() -> String {
    "SIGTERM".to_string()
}

fn default_stop_timeout() -> u64 {
    5000
}

fn default_memory_sample_interval() -> u64 {
    1000
}

fn default_min_uptime() -> u64 {
    1000
}

fn default_initial_backoff() -> u64 {
    100
}

fn default_max_backoff() -> u64 {
    30_000
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            memory_sample_interval_ms: default_memory_sample_interval(),
            restart: RestartSettings::default(),
        }
    }
}

impl Default for RestartSettings {
    fn default() -> Self {
        Self {
            min_uptime_ms: default_min_uptime(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            max_restarts: None,
        }
    }
}

impl SupervisorSettings {
    pub fn memory_sample_interval(&self) -> Duration {
        Duration::from_millis(self.memory_sample_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.memory_sample_interval_ms == 0 {
            return Err(TendError::ConfigValidationError(
                "supervisor.memory_sample_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.restart.initial_backoff_ms == 0 {
            return Err(TendError::ConfigValidationError(
                "supervisor.restart.initial_backoff_ms must be at least 1".to_string(),
            ));
        }
        if self.restart.max_backoff_ms < self.restart.initial_backoff_ms {
            return Err(TendError::ConfigValidationError(
                "supervisor.restart.max_backoff_ms must not be below initial_backoff_ms"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

impl ProcessSpec {
    /// Create a spec with default log format, stop signal and grace period
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        stdout_path: impl Into<PathBuf>,
        stderr_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            memory_limit_bytes: None,
            log_date_format: default_log_date_format(),
            stdout_path: stdout_path.into(),
            stderr_path: stderr_path.into(),
            stop_signal: default_stop_signal(),
            stop_timeout_ms: default_stop_timeout(),
            env: BTreeMap::new(),
        }
    }

    /// Get the grace period as Duration
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Resolve a log path against the working directory when relative
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.working_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Validate the process spec, naming the offending field on failure
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(TendError::MissingConfigField("name".to_string()));
        }
        if self
            .name
            .chars()
            .any(|c| c.is_whitespace() || c == '/' || c == '\\')
        {
            return Err(self.invalid("name", "must not contain whitespace or path separators"));
        }

        if self.command.trim().is_empty() {
            return Err(TendError::MissingConfigField(format!(
                "processes.{}.command",
                self.name
            )));
        }
        if self.stdout_path.as_os_str().is_empty() {
            return Err(TendError::MissingConfigField(format!(
                "processes.{}.stdout_path",
                self.name
            )));
        }
        if self.stderr_path.as_os_str().is_empty() {
            return Err(TendError::MissingConfigField(format!(
                "processes.{}.stderr_path",
                self.name
            )));
        }

        if self.memory_limit_bytes == Some(0) {
            return Err(self.invalid("memory_limit_bytes", "must be greater than zero"));
        }

        if parse_signal(&self.stop_signal).is_err() {
            return Err(self.invalid(
                "stop_signal",
                &format!("unsupported signal {}", self.stop_signal),
            ));
        }

        if self.log_date_format.is_empty()
            || StrftimeItems::new(&self.log_date_format).any(|item| matches!(item, Item::Error))
        {
            return Err(self.invalid(
                "log_date_format",
                &format!("invalid strftime format '{}'", self.log_date_format),
            ));
        }

        if let Some(ref dir) = self.working_dir {
            if !dir.exists() {
                return Err(self.invalid(
                    "working_dir",
                    &format!("does not exist: {}", dir.display()),
                ));
            }
            if !dir.is_dir() {
                return Err(self.invalid(
                    "working_dir",
                    &format!("is not a directory: {}", dir.display()),
                ));
            }
        }

        Ok(())
    }

    fn invalid(&self, field: &str, message: &str) -> TendError {
        TendError::ConfigValidationError(format!(
            "processes.{}.{}: {}",
            self.name, field, message
        ))
    }

    /// Expand $VAR and ${VAR} references from the supervisor's environment
    fn expand_env_vars(&mut self) {
        self.command = expand_env_in_string(&self.command);
        self.args = self.args.iter().map(|arg| expand_env_in_string(arg)).collect();
        self.working_dir = self.working_dir.as_deref().map(expand_env_in_path);
        self.stdout_path = expand_env_in_path(&self.stdout_path);
        self.stderr_path = expand_env_in_path(&self.stderr_path);
        self.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_in_string(v)))
            .collect();
    }
}

impl ConfigDocument {
    /// Load a configuration document from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TendError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        match extension {
            "toml" => Self::from_toml_str(&contents),
            "json" => Self::from_json_str(&contents),
            _ => Err(TendError::InvalidConfig(format!(
                "Unsupported file format: {}. Use .toml or .json",
                extension
            ))),
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let document: ConfigDocument = toml::from_str(contents)
            .map_err(|e| TendError::InvalidConfig(format!("Failed to parse TOML: {}", e)))?;
        document.finish()
    }

    pub fn from_json_str(contents: &str) -> Result<Self> {
        let document: ConfigDocument = serde_json::from_str(contents)
            .map_err(|e| TendError::InvalidConfig(format!("Failed to parse JSON: {}", e)))?;
        document.finish()
    }

    /// Build a document from an existing spec table
    pub fn from_specs<I>(supervisor: SupervisorSettings, specs: I) -> Self
    where
        I: IntoIterator<Item = ProcessSpec>,
    {
        let processes = specs
            .into_iter()
            .map(|spec| (spec.name.clone(), spec))
            .collect();
        Self {
            supervisor,
            processes,
        }
    }

    /// The spec table in name order
    pub fn specs(&self) -> Vec<ProcessSpec> {
        self.processes.values().cloned().collect()
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self)
            .map_err(|e| TendError::ConfigError(format!("Failed to serialize TOML: {}", e)))
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| TendError::ConfigError(format!("Failed to serialize JSON: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        self.supervisor.validate()?;

        if self.processes.is_empty() {
            return Err(TendError::InvalidConfig(
                "No process configuration found in file".to_string(),
            ));
        }

        for (key, spec) in &self.processes {
            if key != &spec.name {
                return Err(TendError::ConfigValidationError(format!(
                    "processes.{}: table key does not match spec name '{}'",
                    key, spec.name
                )));
            }
            spec.validate()?;
        }

        Ok(())
    }

    fn finish(mut self) -> Result<Self> {
        for (name, spec) in self.processes.iter_mut() {
            spec.name = name.clone();
            spec.expand_env_vars();
        }
        self.validate()?;
        Ok(self)
    }
}

/// Expand environment variables in a string; unknown variables are left as-is
fn expand_env_in_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        let value = if name.is_empty() || name.contains(['=', '\0']) {
            None
        } else {
            std::env::var(name).ok()
        };
        match value {
            Some(value) => result.push_str(&value),
            None => result.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &after[consumed..];
    }

    result.push_str(rest);
    result
}

fn expand_env_in_path(path: &Path) -> PathBuf {
    PathBuf::from(expand_env_in_string(&path.to_string_lossy()))
}
