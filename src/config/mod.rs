//! Configuration management
//!
//! This module handles loading and parsing configuration for the check-in station.
//! Configuration can be loaded from:
//! - checkin.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Attendance backend configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Scan session configuration
    #[serde(default)]
    pub scanner: ScannerConfig,
    /// QR rendering configuration
    #[serde(default)]
    pub render: RenderConfig,
}

/// Attendance backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the backend, without the `/api` suffix
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token, takes precedence over `token_file`
    #[serde(default)]
    pub token: Option<String>,
    /// File holding the persisted bearer token
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    /// Network submission timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            token_file: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

/// Scan session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Cooldown after each submission, in milliseconds
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Number of scan outcomes kept for the operator
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// How long to wait for the decoder device to come up
    #[serde(default = "default_camera_start_timeout_ms")]
    pub camera_start_timeout_ms: u64,
    /// Delay before the single retry after a network failure (0 = immediate)
    #[serde(default)]
    pub retry_backoff_ms: u64,
    /// Group that scans are recorded against
    #[serde(default)]
    pub target_group: Option<String>,
    /// Accepted shape of a subject identifier
    #[serde(default = "default_subject_pattern")]
    pub subject_pattern: String,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: default_cooldown_ms(),
            history_capacity: default_history_capacity(),
            camera_start_timeout_ms: default_camera_start_timeout_ms(),
            retry_backoff_ms: 0,
            target_group: None,
            subject_pattern: default_subject_pattern(),
        }
    }
}

impl ScannerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn camera_start_timeout(&self) -> Duration {
        Duration::from_millis(self.camera_start_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn default_cooldown_ms() -> u64 {
    1500
}

fn default_history_capacity() -> usize {
    30
}

fn default_camera_start_timeout_ms() -> u64 {
    5000
}

pub(crate) fn default_subject_pattern() -> String {
    "^[A-Za-z0-9][A-Za-z0-9._:-]{0,127}$".to_string()
}

/// QR rendering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Default image edge length in pixels
    #[serde(default = "default_render_size")]
    pub size: u32,
    /// Light border around the symbol, in modules
    #[serde(default = "default_quiet_zone")]
    pub quiet_zone: u32,
    /// Number of rendered images kept in memory
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            size: default_render_size(),
            quiet_zone: default_quiet_zone(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

fn default_render_size() -> u32 {
    300
}

fn default_quiet_zone() -> u32 {
    4
}

fn default_cache_capacity() -> u64 {
    256
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError {
        path: String,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            }
        })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern:
    /// - CHECKIN_API_BASE_URL
    /// - CHECKIN_API_TOKEN
    /// - CHECKIN_API_TOKEN_FILE
    /// - CHECKIN_API_TIMEOUT_SECS
    /// - CHECKIN_SCANNER_COOLDOWN_MS
    /// - CHECKIN_SCANNER_HISTORY_CAPACITY
    /// - CHECKIN_SCANNER_CAMERA_START_TIMEOUT_MS
    /// - CHECKIN_SCANNER_RETRY_BACKOFF_MS
    /// - CHECKIN_SCANNER_TARGET_GROUP
    /// - CHECKIN_RENDER_SIZE
    ///
    /// The merged result is validated before it is returned.
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        // API configuration
        if let Ok(base_url) = std::env::var("CHECKIN_API_BASE_URL") {
            self.api.base_url = base_url;
        }
        if let Ok(token) = std::env::var("CHECKIN_API_TOKEN") {
            self.api.token = Some(token);
        }
        if let Ok(token_file) = std::env::var("CHECKIN_API_TOKEN_FILE") {
            self.api.token_file = Some(PathBuf::from(token_file));
        }
        if let Some(secs) = env_number("CHECKIN_API_TIMEOUT_SECS") {
            self.api.timeout_secs = secs;
        }

        // Scanner configuration
        if let Some(ms) = env_number("CHECKIN_SCANNER_COOLDOWN_MS") {
            self.scanner.cooldown_ms = ms;
        }
        if let Some(capacity) = env_number("CHECKIN_SCANNER_HISTORY_CAPACITY") {
            self.scanner.history_capacity = capacity;
        }
        if let Some(ms) = env_number("CHECKIN_SCANNER_CAMERA_START_TIMEOUT_MS") {
            self.scanner.camera_start_timeout_ms = ms;
        }
        if let Some(ms) = env_number("CHECKIN_SCANNER_RETRY_BACKOFF_MS") {
            self.scanner.retry_backoff_ms = ms;
        }
        if let Ok(group) = std::env::var("CHECKIN_SCANNER_TARGET_GROUP") {
            let group = group.trim().to_string();
            self.scanner.target_group = (!group.is_empty()).then_some(group);
        }

        // Render configuration
        if let Some(size) = env_number("CHECKIN_RENDER_SIZE") {
            self.render.size = size;
        }
    }

    /// Reject values the scanner cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError("api.base_url must not be empty".into()));
        }
        if self.api.timeout_secs == 0 {
            return Err(ConfigError::ValidationError("api.timeout_secs must be greater than zero".into()));
        }
        if self.scanner.cooldown_ms == 0 {
            return Err(ConfigError::ValidationError("scanner.cooldown_ms must be greater than zero".into()));
        }
        if !(1..=1000).contains(&self.scanner.history_capacity) {
            return Err(ConfigError::ValidationError(format!(
                "scanner.history_capacity must be between 1 and 1000, got {}",
                self.scanner.history_capacity
            )));
        }
        if self.render.size == 0 {
            return Err(ConfigError::ValidationError("render.size must be greater than zero".into()));
        }
        if self.render.quiet_zone > crate::services::render::MAX_QUIET_ZONE {
            return Err(ConfigError::ValidationError(format!(
                "render.quiet_zone must be at most {}, got {}",
                crate::services::render::MAX_QUIET_ZONE,
                self.render.quiet_zone
            )));
        }
        if let Err(e) = regex::Regex::new(&self.scanner.subject_pattern) {
            return Err(ConfigError::ValidationError(format!(
                "scanner.subject_pattern is not a valid regex: {}",
                e
            )));
        }
        Ok(())
    }
}

/// Parse a numeric environment override, ignoring unparseable values
fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared mutex for all config tests that modify environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
