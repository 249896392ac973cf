use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::WardenError;
use crate::types::Category;

/// Top-level configuration loaded from `.warden.toml`.
///
/// Supports layered resolution: CLI flags > env vars > local config > defaults.
///
/// # Examples
///
/// ```
/// use warden_core::WardenConfig;
///
/// let config = WardenConfig::default();
/// assert_eq!(config.pipeline.concurrency, 16);
/// assert_eq!(config.pipeline.max_retries, 5);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Oracle (LLM provider) settings.
    #[serde(default)]
    pub oracle: OracleConfig,
    /// Scheduling and retry settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Audit log settings.
    #[serde(default)]
    pub audit_log: AuditLogConfig,
}

impl WardenConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::FileNotFound`] if `path` does not exist,
    /// [`WardenError::Io`] if the file cannot be read, or
    /// [`WardenError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use warden_core::WardenConfig;
    /// use std::path::Path;
    ///
    /// let config = WardenConfig::from_file(Path::new(".warden.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, WardenError> {
        if !path.exists() {
            return Err(WardenError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use warden_core::WardenConfig;
    ///
    /// let toml = r#"
    /// [pipeline]
    /// concurrency = 4
    /// "#;
    /// let config = WardenConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.pipeline.concurrency, 4);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, WardenError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Overlay environment variables on top of the file configuration.
    ///
    /// `lookup` is usually `|k| std::env::var(k).ok()`; tests pass a map.
    /// Recognized keys: `WARDEN_API_KEY` (falling back to `OPENAI_API_KEY`),
    /// `WARDEN_BASE_URL`, `WARDEN_MODEL`.
    ///
    /// # Examples
    ///
    /// ```
    /// use warden_core::WardenConfig;
    ///
    /// let config = WardenConfig::default().with_env(|key| match key {
    ///     "WARDEN_MODEL" => Some("gpt-4o-mini".to_string()),
    ///     _ => None,
    /// });
    /// assert_eq!(config.oracle.model, "gpt-4o-mini");
    /// ```
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(key) = lookup("WARDEN_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.oracle.api_key = Some(key);
        }
        if let Some(url) = lookup("WARDEN_BASE_URL") {
            self.oracle.base_url = Some(url);
        }
        if let Some(model) = lookup("WARDEN_MODEL") {
            self.oracle.model = model;
        }
        self
    }

    /// Reject configurations the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Config`] naming the first offending value.
    pub fn validate(&self) -> Result<(), WardenError> {
        if self.pipeline.concurrency == 0 {
            return Err(WardenError::Config(
                "pipeline.concurrency must be at least 1".into(),
            ));
        }
        if self.pipeline.max_retries == 0 {
            return Err(WardenError::Config(
                "pipeline.max_retries must be at least 1".into(),
            ));
        }
        if self.pipeline.categories.is_empty() {
            return Err(WardenError::Config(
                "pipeline.categories must name at least one category".into(),
            ));
        }
        for (i, category) in self.pipeline.categories.iter().enumerate() {
            if self.pipeline.categories[..i].contains(category) {
                return Err(WardenError::Config(format!(
                    "pipeline.categories lists \"{category}\" more than once"
                )));
            }
        }
        if self.oracle.timeout_secs == 0 {
            return Err(WardenError::Config(
                "oracle.timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Oracle provider configuration.
///
/// The oracle is any OpenAI-compatible chat completions endpoint.
///
/// # Examples
///
/// ```
/// use warden_core::OracleConfig;
///
/// let config = OracleConfig::default();
/// assert_eq!(config.model, "gpt-4o");
/// assert_eq!(config.timeout_secs, 120);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Provider name (e.g. `"openai"`, `"ollama"`).
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,
    /// API key for the provider.
    pub api_key: Option<String>,
    /// Custom base URL for API requests.
    pub base_url: Option<String>,
    /// Upper bound for a single oracle call, in seconds (default: 120).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Sampling temperature for the proposer pass (default: 0.7).
    #[serde(default = "default_proposer_temperature")]
    pub proposer_temperature: f32,
    /// Sampling temperature for the validator pass (default: 0.4).
    #[serde(default = "default_validator_temperature")]
    pub validator_temperature: f32,
    /// Optional completion token cap.
    pub max_tokens: Option<u32>,
}

fn default_provider() -> String {
    "openai".into()
}

fn default_model() -> String {
    "gpt-4o".into()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_proposer_temperature() -> f32 {
    0.7
}

fn default_validator_temperature() -> f32 {
    0.4
}

impl OracleConfig {
    /// The per-call timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            base_url: None,
            timeout_secs: default_timeout_secs(),
            proposer_temperature: default_proposer_temperature(),
            validator_temperature: default_validator_temperature(),
            max_tokens: None,
        }
    }
}

/// Scheduling and retry configuration.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use warden_core::PipelineConfig;
///
/// let config = PipelineConfig::default();
/// assert_eq!(config.backoff_unit(), Duration::from_secs(1));
/// assert!(config.task_deadline().is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of tasks in flight at once (default: 16).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Attempts per stage before a task is finalized as an error (default: 5).
    ///
    /// Oracle failures and malformed responses share this budget.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff unit in milliseconds; retry `n` waits `2^n` units (default: 1000).
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
    /// Optional wall-clock limit for one task, both stages included.
    pub task_deadline_secs: Option<u64>,
    /// Prompt categories to run against every document.
    #[serde(default = "default_categories")]
    pub categories: Vec<Category>,
}

fn default_concurrency() -> usize {
    16
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_unit_ms() -> u64 {
    1000
}

fn default_categories() -> Vec<Category> {
    vec![Category::Common]
}

impl PipelineConfig {
    /// The backoff unit as a [`Duration`].
    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }

    /// The per-task deadline, if configured.
    pub fn task_deadline(&self) -> Option<Duration> {
        self.task_deadline_secs.map(Duration::from_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            backoff_unit_ms: default_backoff_unit_ms(),
            task_deadline_secs: None,
            categories: default_categories(),
        }
    }
}

/// Audit log configuration.
///
/// # Examples
///
/// ```
/// use warden_core::AuditLogConfig;
///
/// let config = AuditLogConfig::default();
/// assert!(config.enabled);
/// assert_eq!(config.dir.to_str(), Some("logs"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogConfig {
    /// Write prompt/response records for every accepted oracle answer.
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
    /// Directory receiving one file per (reference id, stage).
    #[serde(default = "default_audit_dir")]
    pub dir: PathBuf,
}

fn default_audit_enabled() -> bool {
    true
}

fn default_audit_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            enabled: default_audit_enabled(),
            dir: default_audit_dir(),
        }
    }
}
