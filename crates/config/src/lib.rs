//! Configuration loading, validation, and management for Switchboard.
//!
//! Loads configuration from `~/.switchboard/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use switchboard_core::AgentType;

/// The root configuration structure.
///
/// Maps directly to `~/.switchboard/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM backend settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Per-identity rate limiting and blacklisting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// History cache and long-term memory
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Intent classification and the tool-calling loop
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Approved outbound templates
    #[serde(default)]
    pub templates: TemplatesConfig,

    /// Metrics aggregation and alert thresholds
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Custom model pricing: model name → per-1M-token pricing.
    /// Overrides built-in defaults for cost calculation.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub pricing: HashMap<String, PricingOverrideConfig>,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

/// LLM backend settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// OpenAI-compatible base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Model used for agent responses
    #[serde(default = "default_model")]
    pub model: String,

    /// Model used for closed-label intent classification
    #[serde(default = "default_model")]
    pub classifier_model: String,

    /// Embedding model for long-term memory. Unset uses the offline hashing embedder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,

    /// Per-call timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Attempts after the first for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff between retries
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Use server-sent-event streaming for agent calls
    #[serde(default)]
    pub streaming: bool,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_base_delay() -> u64 {
    500
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            classifier_model: default_model(),
            embedding_model: None,
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            streaming: false,
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("classifier_model", &self.classifier_model)
            .field("embedding_model", &self.embedding_model)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("streaming", &self.streaming)
            .finish()
    }
}

/// Fixed-window limiter with progressive blacklisting.
/// Upper bound for any configured window or blacklist duration (ten years).
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Requests allowed per identity per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Violations that trigger a blacklist entry
    #[serde(default = "default_blacklist_threshold")]
    pub blacklist_threshold: u32,

    #[serde(default = "default_blacklist_duration")]
    pub blacklist_duration_secs: u64,

    /// How often the background sweep runs
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_window_secs() -> u64 {
    60
}
fn default_max_requests() -> u32 {
    10
}
fn default_blacklist_threshold() -> u32 {
    5
}
fn default_blacklist_duration() -> u64 {
    3600
}
fn default_sweep_interval() -> u64 {
    300
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_requests: default_max_requests(),
            blacklist_threshold: default_blacklist_threshold(),
            blacklist_duration_secs: default_blacklist_duration(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// Memory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: u64,

    /// Turns fetched when building a conversation context
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Minimum cosine similarity for long-term retrieval
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f32,

    #[serde(default = "default_relevance_limit")]
    pub relevance_limit: usize,

    /// Conversations longer than this many turns are summarized
    #[serde(default = "default_summary_turns")]
    pub summary_turns: usize,

    /// Ask the LLM for facts, preferences and decisions after each exchange
    #[serde(default)]
    pub extract_key_facts: bool,
}

fn default_true() -> bool {
    true
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_cache_max_entries() -> u64 {
    1000
}
fn default_history_limit() -> usize {
    20
}
fn default_relevance_threshold() -> f32 {
    0.7
}
fn default_relevance_limit() -> usize {
    5
}
fn default_summary_turns() -> usize {
    20
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl_secs: default_cache_ttl(),
            cache_max_entries: default_cache_max_entries(),
            history_limit: default_history_limit(),
            relevance_threshold: default_relevance_threshold(),
            relevance_limit: default_relevance_limit(),
            summary_turns: default_summary_turns(),
            extract_key_facts: false,
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on tool-calling rounds per request
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,

    /// History turns sent to the LLM with each request
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Agent used when classification fails
    #[serde(default = "default_fallback_agent")]
    pub fallback_agent: AgentType,
}

fn default_max_tool_iterations() -> u32 {
    5
}
fn default_history_window() -> usize {
    5
}
fn default_fallback_agent() -> AgentType {
    AgentType::General
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            history_window: default_history_window(),
            fallback_agent: default_fallback_agent(),
        }
    }
}

/// Approved template configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesConfig {
    /// Character cap for a sanitized message body placeholder
    #[serde(default = "default_max_body_chars")]
    pub max_body_chars: usize,

    /// Locale used when neither the exact nor the base locale has a template
    #[serde(default = "default_locale")]
    pub default_locale: String,

    /// How long an answer from the external template registry is reused
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_template_cache_entries")]
    pub cache_max_entries: u64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<TemplateEntryConfig>,
}

fn default_max_body_chars() -> usize {
    1024
}
fn default_locale() -> String {
    "en".into()
}
fn default_template_cache_entries() -> u64 {
    500
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            max_body_chars: default_max_body_chars(),
            default_locale: default_locale(),
            cache_ttl_secs: default_cache_ttl(),
            cache_max_entries: default_template_cache_entries(),
            entries: Vec::new(),
        }
    }
}

/// One approved template declared in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateEntryConfig {
    pub agent_type: AgentType,
    pub locale: String,
    pub template_key: String,
    #[serde(default)]
    pub placeholders: Vec<String>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Minute buckets kept before pruning
    #[serde(default = "default_retention_minutes")]
    pub retention_minutes: u32,

    #[serde(default = "default_alert_latency")]
    pub alert_latency_ms: u64,

    #[serde(default = "default_alert_cost")]
    pub alert_cost_usd: f64,
}

fn default_retention_minutes() -> u32 {
    60
}
fn default_alert_latency() -> u64 {
    3000
}
fn default_alert_cost() -> f64 {
    0.10
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            retention_minutes: default_retention_minutes(),
            alert_latency_ms: default_alert_latency(),
            alert_cost_usd: default_alert_cost(),
        }
    }
}

/// Custom per-million-token pricing for a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingOverrideConfig {
    /// Price per 1M input tokens in USD
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD
    pub output_per_m: f64,
}

impl AppConfig {
    /// Load configuration from the default path (~/.switchboard/config.toml).
    ///
    /// Also checks environment variables:
    /// - `SWITCHBOARD_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `SWITCHBOARD_MODEL`
    /// - `SWITCHBOARD_API_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if self.llm.api_key.is_none() {
            self.llm.api_key = std::env::var("SWITCHBOARD_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("SWITCHBOARD_MODEL") {
            self.llm.model = model;
        }

        if let Ok(url) = std::env::var("SWITCHBOARD_API_URL") {
            self.llm.api_url = url;
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".switchboard")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rl = &self.rate_limit;
        if rl.window_secs == 0 || rl.max_requests == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.window_secs and rate_limit.max_requests must be > 0".into(),
            ));
        }
        if rl.window_secs > MAX_DURATION_SECS || rl.blacklist_duration_secs > MAX_DURATION_SECS {
            return Err(ConfigError::ValidationError(format!(
                "rate_limit.window_secs and rate_limit.blacklist_duration_secs must be <= {MAX_DURATION_SECS}"
            )));
        }
        if rl.blacklist_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.blacklist_threshold must be > 0".into(),
            ));
        }

        if self.orchestrator.max_tool_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_tool_iterations must be >= 1".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.memory.relevance_threshold) {
            return Err(ConfigError::ValidationError(
                "memory.relevance_threshold must be between 0.0 and 1.0".into(),
            ));
        }

        if self.llm.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "llm.request_timeout_secs must be > 0".into(),
            ));
        }

        if self.templates.max_body_chars == 0 {
            return Err(ConfigError::ValidationError(
                "templates.max_body_chars must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.llm.api_key.is_some()
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.orchestrator.max_tool_iterations, 5);
        assert_eq!(config.memory.cache_ttl_secs, 300);
        assert_eq!(config.orchestrator.fallback_agent, AgentType::General);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.llm.model, config.llm.model);
        assert_eq!(parsed.rate_limit.max_requests, config.rate_limit.max_requests);
    }

    #[test]
    fn zero_tool_bound_rejected() {
        let mut config = AppConfig::default();
        config.orchestrator.max_tool_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_rate_limit_durations_rejected() {
        let mut config = AppConfig::default();
        config.rate_limit.blacklist_duration_secs = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rate_limit.window_secs = MAX_DURATION_SECS + 1;
        assert!(config.validate().is_err());

        config.rate_limit.window_secs = MAX_DURATION_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn embedding_model_is_optional() {
        let config: AppConfig =
            toml::from_str("[llm]\nembedding_model = \"text-embedding-3-small\"\n").unwrap();

        assert_eq!(config.llm.embedding_model.as_deref(), Some("text-embedding-3-small"));
        assert!(AppConfig::default().llm.embedding_model.is_none());
        assert!(!AppConfig::default().memory.extract_key_facts);
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let mut config = AppConfig::default();
        config.memory.relevance_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn load_from_file_reports_path_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[rate_limit\nwindow_secs = 1").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let config = AppConfig::from_toml(
            r#"
[rate_limit]
max_requests = 5

[orchestrator]
fallback_agent = "support"

[[templates.entries]]
agent_type = "booking"
locale = "en"
template_key = "booking_update_v2"
placeholders = ["name", "message"]
"#,
        )
        .unwrap();
        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.orchestrator.fallback_agent, AgentType::Support);
        assert_eq!(config.templates.entries.len(), 1);
        assert_eq!(config.templates.entries[0].agent_type, AgentType::Booking);
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = AppConfig::default();
        config.llm.api_key = Some("sk-live-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-live-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gpt-4o-mini"));
        assert!(toml_str.contains("max_tool_iterations"));
    }
}
