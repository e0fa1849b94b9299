use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Agent configuration loaded from `~/.gantry/config.toml`.
///
/// Every section and field has a default, so a missing or partial file is
/// always usable. Credentials are never stored here.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub setup: SetupConfig,
}

impl Config {
    /// Load config from `~/.gantry/config.toml`, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings not expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.execution.validate()?;
        self.setup.validate()?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".gantry")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the resolution service.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Deadline for the specification resolution call. Zero disables it.
    #[serde(default = "default_resolve_timeout_secs")]
    pub resolve_timeout_secs: u64,
}

impl ServerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "server.base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            resolve_timeout_secs: default_resolve_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8080".into()
}
fn default_resolve_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Directory under which per-job working directories are created.
    /// A leading `~` is expanded by the binary.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,
    /// Default wall-clock limit for the job process. A specification-level
    /// timeout takes precedence. `None` means unbounded.
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,
    /// Keep the job directory (logs, staged dependencies) after the run.
    #[serde(default = "default_keep_workspace")]
    pub keep_workspace: bool,
}

impl ExecutionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.workspace_root.trim().is_empty() {
            return Err(ConfigError::Validation(
                "execution.workspace_root must not be empty".into(),
            ));
        }
        if self.job_timeout_secs == Some(0) {
            return Err(ConfigError::Validation(
                "execution.job_timeout_secs must be positive when set".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            job_timeout_secs: None,
            keep_workspace: default_keep_workspace(),
        }
    }
}

fn default_workspace_root() -> String {
    "~/.gantry/jobs".into()
}
fn default_keep_workspace() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupConfig {
    /// Attempt budget for staging job dependencies (first try included).
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// Base delay for the exponential backoff between setup attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Per-request timeout for dependency downloads.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl SetupConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_limit == 0 || self.retry_limit > 10 {
            return Err(ConfigError::Validation(format!(
                "setup.retry_limit must be between 1 and 10, got {}",
                self.retry_limit
            )));
        }
        if self.retry_delay_ms > 60_000 {
            return Err(ConfigError::Validation(format!(
                "setup.retry_delay_ms must be at most 60000, got {}",
                self.retry_delay_ms
            )));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "setup.fetch_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
            retry_delay_ms: default_retry_delay_ms(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

fn default_retry_limit() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    500
}
fn default_fetch_timeout_secs() -> u64 {
    60
}
