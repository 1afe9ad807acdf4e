//! Configuration management for refdesk services.
//!
//! Services share one configuration file at `~/.refdesk/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (see below)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `REFDESK_PORT` → server.port
//! - `REFDESK_BIND_ADDRESS` → network.bind
//! - `REFDESK_LOG_LEVEL` → observability.log_level
//! - `REFDESK_SESSION_MAX_AGE_SECS` → sessions.max_age_secs
//! - `OPENAI_API_KEY` → provider.api_key
//! - `OPENAI_BASE_URL` → provider.base_url
//! - `ASSISTANT_ID` → provider.assistant_id

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".refdesk"),
        |dirs| dirs.home_dir().join(".refdesk"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Network / Server
// ============================================================================

/// Global network configuration.
///
/// Default bind is `127.0.0.1` (local only). Set to `0.0.0.0` for remote access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_bind_address")]
    pub bind: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum request body size in megabytes.
    ///
    /// Documents arrive base64-encoded, so this must comfortably exceed
    /// the largest accepted document.
    #[serde(default = "default_max_body_mb")]
    pub max_body_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            max_body_mb: default_max_body_mb(),
        }
    }
}

// ============================================================================
// Provider
// ============================================================================

/// Remote analysis provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key for the provider
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL of the provider API
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,

    /// Previously created assistant profile to reuse.
    ///
    /// Newly created profile ids are logged at startup; copying one here
    /// is an operator action, nothing writes it back automatically.
    #[serde(default)]
    pub assistant_id: Option<String>,

    /// Display name used when a new profile has to be created
    #[serde(default = "default_assistant_name")]
    pub assistant_name: String,

    /// Model used when a new profile has to be created
    #[serde(default = "default_model")]
    pub model: String,

    /// Profile instructions used when a new profile has to be created
    #[serde(default = "default_instructions")]
    pub instructions: String,

    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_provider_base_url(),
            assistant_id: None,
            assistant_name: default_assistant_name(),
            model: default_model(),
            instructions: default_instructions(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ============================================================================
// Sessions / Runs
// ============================================================================

/// Session lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Sessions older than this are evicted by the janitor
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// Period between janitor sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Accepted document extensions (lowercase, without dot)
    #[serde(default = "default_accepted_extensions")]
    pub accepted_extensions: Vec<String>,

    /// Context message posted into every new session
    #[serde(default = "default_seed_message")]
    pub seed_message: String,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_age_secs: default_max_age_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            accepted_extensions: default_accepted_extensions(),
            seed_message: default_seed_message(),
        }
    }
}

impl SessionsConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Run polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Fixed delay between polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Wall-clock budget for one run, measured from submission
    #[serde(default = "default_run_timeout_secs")]
    pub timeout_secs: u64,

    /// Instruction sent with an image when the caller gives none
    #[serde(default = "default_instruction")]
    pub default_instruction: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: default_run_timeout_secs(),
            default_instruction: default_instruction(),
        }
    }
}

impl RunConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ============================================================================
// Observability
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to pin at `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// JSON Schema reference
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub sessions: SessionsConfig,

    #[serde(default)]
    pub runs: RunConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("REFDESK_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(bind) = lookup("REFDESK_BIND_ADDRESS") {
            self.network.bind = bind;
        }
        if let Some(level) = lookup("REFDESK_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(secs) = lookup("REFDESK_SESSION_MAX_AGE_SECS").and_then(|s| s.parse().ok()) {
            self.sessions.max_age_secs = secs;
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Some(url) = lookup("OPENAI_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Some(id) = lookup("ASSISTANT_ID").filter(|id| !id.trim().is_empty()) {
            self.provider.assistant_id = Some(id);
        }
    }

    /// Reject settings that would make the service misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.runs.poll_interval_ms > 0, "runs.poll_interval_ms must be positive");
        ensure!(self.runs.timeout_secs > 0, "runs.timeout_secs must be positive");
        ensure!(self.sessions.max_age_secs > 0, "sessions.max_age_secs must be positive");
        ensure!(
            self.sessions.sweep_interval_secs > 0,
            "sessions.sweep_interval_secs must be positive"
        );
        ensure!(
            !self.sessions.accepted_extensions.is_empty(),
            "sessions.accepted_extensions must not be empty"
        );
        ensure!(self.server.max_body_mb > 0, "server.max_body_mb must be positive");
        Ok(())
    }

    /// Socket address string for the HTTP listener.
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.network.bind, self.server.port)
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    4480
}
fn default_max_body_mb() -> usize {
    64
}
fn default_provider_base_url() -> String {
    "https://api.openai.com".into()
}
fn default_assistant_name() -> String {
    "Reference Answer Assistant".into()
}
fn default_model() -> String {
    "gpt-4-turbo-preview".into()
}
fn default_instructions() -> String {
    "Answer the questions shown in each image using the attached reference document. \
     Return ONLY a JSON array with one object per question."
        .into()
}
fn default_request_timeout() -> u64 {
    300
}
fn default_max_age_secs() -> u64 {
    24 * 60 * 60
}
fn default_sweep_interval_secs() -> u64 {
    60 * 60
}
fn default_accepted_extensions() -> Vec<String> {
    vec!["pdf".into()]
}
fn default_seed_message() -> String {
    "This is the reference document for this session. Use it to answer questions.".into()
}
fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_run_timeout_secs() -> u64 {
    120
}
fn default_instruction() -> String {
    "Extract every question from this image in order and answer each one using the \
     reference document. Return a JSON array."
        .into()
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}
