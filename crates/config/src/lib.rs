//! Configuration loading, validation, and management for Temple.
//!
//! Loads configuration from `~/.temple/config.toml` with `TEMPLE_*`
//! environment variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.temple/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root for every file Temple writes (vectors, graph, ingest state, audit)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Tenant used when a caller does not name one
    #[serde(default = "default_tenant")]
    pub default_tenant: String,

    /// Session lease lifetime in seconds; 0 disables expiry
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub graph: GraphConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub audit: AuditConfig,
}

fn default_data_dir() -> PathBuf {
    AppConfig::config_dir().join("data")
}
fn default_tenant() -> String {
    "default".into()
}
fn default_session_ttl() -> u64 {
    86_400
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "file" or "memory"
    #[serde(default = "default_vector_backend")]
    pub backend: String,

    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,

    /// Default number of results for retrieval
    #[serde(default = "default_k")]
    pub default_k: usize,

    /// Multiplier applied to `k` when a tag filter runs after semantic search
    #[serde(default = "default_overfetch")]
    pub tag_overfetch: usize,
}

fn default_vector_backend() -> String {
    "file".into()
}
fn default_embedding_dimension() -> usize {
    256
}
fn default_k() -> usize {
    5
}
fn default_overfetch() -> usize {
    5
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_vector_backend(),
            embedding_dimension: default_embedding_dimension(),
            default_k: default_k(),
            tag_overfetch: default_overfetch(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_graph_backend")]
    pub backend: String,

    /// Database path; defaults to `<data_dir>/graph.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Default hop limit for path queries
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
}

fn default_graph_backend() -> String {
    "sqlite".into()
}
fn default_max_hops() -> usize {
    5
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            backend: default_graph_backend(),
            path: None,
            max_hops: default_max_hops(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Candidates at or above this are applied automatically
    #[serde(default = "default_high_confidence")]
    pub high_confidence: f32,

    /// Candidates at or above this (and below `high_confidence`) go to review
    #[serde(default = "default_review_confidence")]
    pub review_confidence: f32,

    /// Extraction attempts before an item is discarded
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Sleep between worker passes
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// How often the daemon sweeps expired sessions
    #[serde(default = "default_sweep_interval")]
    pub session_sweep_interval_secs: u64,
}

fn default_high_confidence() -> f32 {
    0.80
}
fn default_review_confidence() -> f32 {
    0.60
}
fn default_max_attempts() -> u32 {
    3
}
fn default_poll_interval() -> u64 {
    2_000
}
fn default_sweep_interval() -> u64 {
    300
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            high_confidence: default_high_confidence(),
            review_confidence: default_review_confidence(),
            max_attempts: default_max_attempts(),
            poll_interval_ms: default_poll_interval(),
            session_sweep_interval_secs: default_sweep_interval(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Backends tried in order: "anthropic", "heuristic"
    #[serde(default = "default_backends")]
    pub backends: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub temperature: f32,

    /// Per-backend timeout
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_entities")]
    pub max_entities: usize,
}

fn default_backends() -> Vec<String> {
    vec!["anthropic".into(), "heuristic".into()]
}
fn default_api_url() -> String {
    "https://api.anthropic.com".into()
}
fn default_llm_model() -> String {
    "claude-3-5-haiku-latest".into()
}
fn default_llm_max_tokens() -> u32 {
    2048
}
fn default_timeout() -> u64 {
    60
}
fn default_max_entities() -> usize {
    25
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            backends: default_backends(),
            api_key: None,
            api_url: default_api_url(),
            model: default_llm_model(),
            max_tokens: default_llm_max_tokens(),
            temperature: 0.0,
            timeout_secs: default_timeout(),
            max_entities: default_max_entities(),
        }
    }
}

impl std::fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("backends", &self.backends)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_entities", &self.max_entities)
            .finish()
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Audit directory; defaults to `<data_dir>/audit`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// Entries kept per scope by `audit compact`
    #[serde(default = "default_compact_keep")]
    pub compact_keep: usize,
}

fn default_true() -> bool {
    true
}
fn default_compact_keep() -> usize {
    10_000
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            compact_keep: default_compact_keep(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location with environment overrides.
    ///
    /// Priority: environment variables > config file > defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
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

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `TEMPLE_*` overrides read through `lookup`, then re-validate.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("TEMPLE_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(tenant) = lookup("TEMPLE_TENANT") {
            self.default_tenant = tenant;
        }
        if let Some(ttl) = lookup("TEMPLE_SESSION_TTL") {
            self.session_ttl_secs = ttl.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("TEMPLE_SESSION_TTL is not a number: {ttl}"))
            })?;
        }
        if self.extraction.api_key.is_none() {
            self.extraction.api_key =
                lookup("TEMPLE_LLM_API_KEY").or_else(|| lookup("ANTHROPIC_API_KEY"));
        }
        if let Some(model) = lookup("TEMPLE_LLM_MODEL") {
            self.extraction.model = model;
        }
        if let Some(backend) = lookup("TEMPLE_GRAPH_BACKEND") {
            self.graph.backend = backend;
        }
        if let Some(backend) = lookup("TEMPLE_VECTOR_BACKEND") {
            self.memory.backend = backend;
        }
        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".temple")
    }

    pub fn graph_path(&self) -> PathBuf {
        self.graph
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("graph.db"))
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.audit
            .dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("audit"))
    }

    pub fn vectors_dir(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }

    pub fn ingest_dir(&self) -> PathBuf {
        self.data_dir.join("ingest")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ingest = &self.ingest;
        for (name, value) in [
            ("high_confidence", ingest.high_confidence),
            ("review_confidence", ingest.review_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "ingest.{name} must be between 0.0 and 1.0"
                )));
            }
        }
        if ingest.review_confidence >= ingest.high_confidence {
            return Err(ConfigError::ValidationError(
                "ingest.review_confidence must be below ingest.high_confidence".into(),
            ));
        }
        if ingest.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "ingest.max_attempts must be at least 1".into(),
            ));
        }
        if self.memory.embedding_dimension == 0 {
            return Err(ConfigError::ValidationError(
                "memory.embedding_dimension must be > 0".into(),
            ));
        }
        if !matches!(self.memory.backend.as_str(), "file" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "unknown memory.backend '{}'",
                self.memory.backend
            )));
        }
        if !matches!(self.graph.backend.as_str(), "sqlite" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "unknown graph.backend '{}'",
                self.graph.backend
            )));
        }
        if self.extraction.temperature < 0.0 || self.extraction.temperature > 1.0 {
            return Err(ConfigError::ValidationError(
                "extraction.temperature must be between 0.0 and 1.0".into(),
            ));
        }
        if self.default_tenant.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "default_tenant must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            default_tenant: default_tenant(),
            session_ttl_secs: default_session_ttl(),
            memory: MemoryConfig::default(),
            graph: GraphConfig::default(),
            ingest: IngestConfig::default(),
            extraction: ExtractionConfig::default(),
            audit: AuditConfig::default(),
        }
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
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session_ttl_secs, 86_400);
        assert_eq!(config.ingest.high_confidence, 0.80);
        assert_eq!(config.ingest.review_confidence, 0.60);
        assert_eq!(config.extraction.backends, vec!["anthropic", "heuristic"]);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.graph.backend, config.graph.backend);
        assert_eq!(parsed.ingest.max_attempts, config.ingest.max_attempts);
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let mut config = AppConfig::default();
        config.ingest.review_confidence = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut config = AppConfig::default();
        config.ingest.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_backend_rejected() {
        let mut config = AppConfig::default();
        config.graph.backend = "neo4j".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.memory.backend, "file");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "/var/lib/temple"
session_ttl_secs = 60

[ingest]
max_attempts = 5
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/temple"));
        assert_eq!(config.session_ttl_secs, 60);
        assert_eq!(config.ingest.max_attempts, 5);
        assert_eq!(config.ingest.high_confidence, 0.80);
        assert_eq!(config.graph_path(), PathBuf::from("/var/lib/temple/graph.db"));
        assert_eq!(config.audit_dir(), PathBuf::from("/var/lib/temple/audit"));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "session_ttl_secs = \"soon\"").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("TEMPLE_DATA_DIR", "/tmp/temple-test"),
            ("TEMPLE_SESSION_TTL", "120"),
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("TEMPLE_GRAPH_BACKEND", "memory"),
        ]);
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/temple-test"));
        assert_eq!(config.session_ttl_secs, 120);
        assert_eq!(config.extraction.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.graph.backend, "memory");
    }

    #[test]
    fn bad_ttl_override_rejected() {
        let mut config = AppConfig::default();
        let result = config.apply_env_overrides(|k| {
            (k == "TEMPLE_SESSION_TTL").then(|| "forever".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = AppConfig::default();
        config.extraction.api_key = Some("sk-very-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("high_confidence"));
        assert!(toml_str.contains("heuristic"));
    }
}
