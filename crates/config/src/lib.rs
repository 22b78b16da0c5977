//! Configuration loading, validation, and management for Parley.
//!
//! Loads configuration from `~/.parley/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.parley/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Which generation backend to talk to
    #[serde(default)]
    pub engine: EngineConfig,

    /// Generation parameters
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Relevance selection settings
    #[serde(default)]
    pub context: ContextConfig,

    /// Prompt template settings
    #[serde(default)]
    pub prompt: PromptConfig,

    /// Where the transcript lives
    #[serde(default)]
    pub history: HistoryConfig,

    /// What to do when the transcript cannot be saved
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// HTTP gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Engine backend kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Any server exposing an OpenAI-style `/completions` endpoint
    #[default]
    OpenaiCompat,
    /// In-process GGUF model (requires the `local` feature)
    Local,
}

/// How the local engine wraps the assembled prompt before tokenizing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatTemplate {
    /// Feed the prompt as-is
    Raw,
    /// `<|begin_of_text|><|start_header_id|>user<|end_header_id|>...`
    #[default]
    Llama3,
    /// `<|im_start|>user\n...<|im_end|>\n<|im_start|>assistant\n`
    Chatml,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub kind: EngineKind,

    /// Base URL of the OpenAI-compatible server
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model name sent to the server
    #[serde(default = "default_model")]
    pub model: String,

    /// Optional bearer token for the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// GGUF file loaded by the local engine
    #[serde(default = "default_local_model")]
    pub local_model: String,

    #[serde(default)]
    pub chat_template: ChatTemplate,
}

fn default_base_url() -> String {
    "http://localhost:11434/v1".into()
}
fn default_model() -> String {
    "llama3.2:3b".into()
}
fn default_local_model() -> String {
    "Llama-3.2-3B-Instruct-Q4_0.gguf".into()
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("local_model", &self.local_model)
            .field("chat_template", &self.chat_template)
            .finish()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::default(),
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            local_model: default_local_model(),
            chat_template: ChatTemplate::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_true")]
    pub streaming: bool,

    /// Give up on a generation after this many seconds (unset = wait forever)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    800
}
fn default_true() -> bool {
    true
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            streaming: true,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Maximum number of past turns included in a prompt
    #[serde(default = "default_context_limit")]
    pub limit: usize,
}

fn default_context_limit() -> usize {
    6
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            limit: default_context_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Replace the instruction line at the top of every prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_path")]
    pub path: PathBuf,
}

fn default_history_path() -> PathBuf {
    PathBuf::from("chat_history.json")
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Fail the request when the transcript cannot be saved.
    /// When false the reply is still returned and a warning is attached.
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    5000
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.parley/config.toml).
    ///
    /// Environment variables override file settings:
    /// - `PARLEY_MODEL`
    /// - `PARLEY_ENGINE_URL`
    /// - `PARLEY_HISTORY_FILE`
    /// - `PARLEY_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_at(&Self::default_path())
    }

    /// Like [`AppConfig::load`], but reading `path` instead of the default file.
    pub fn load_at(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// `~/.parley/config.toml`
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
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

    /// Apply `PARLEY_*` environment overrides on top of file settings.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(model) = std::env::var("PARLEY_MODEL") {
            self.engine.model = model;
        }
        if let Ok(url) = std::env::var("PARLEY_ENGINE_URL") {
            self.engine.base_url = url;
        }
        if let Ok(path) = std::env::var("PARLEY_HISTORY_FILE") {
            self.history.path = PathBuf::from(path);
        }
        if self.engine.api_key.is_none() {
            self.engine.api_key = std::env::var("PARLEY_API_KEY").ok();
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".parley")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let temperature = self.generation.temperature;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::ValidationError(
                "generation.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.generation.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "generation.max_tokens must be > 0".into(),
            ));
        }

        if self.generation.timeout_secs == Some(0) {
            return Err(ConfigError::ValidationError(
                "generation.timeout_secs must be > 0 when set".into(),
            ));
        }

        if self.engine.kind == EngineKind::OpenaiCompat && self.engine.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "engine.base_url is required for the openai_compat engine".into(),
            ));
        }

        if self.history.path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "history.path must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `init` command).
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
