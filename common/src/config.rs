// Configuration management with layered configuration (file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    pub limits: LimitsConfig,
    pub storage: StorageConfig,
    pub notifier: NotifierConfig,
    pub auth: AuthConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Reconciliation cadence and drift tolerance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_ms: u64,
    pub drift_tolerance_ms: u64,
    /// How long shutdown waits for in-flight deliveries
    pub shutdown_grace_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5000,
            drift_tolerance_ms: 100,
            shutdown_grace_ms: 2000,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn drift_tolerance(&self) -> Duration {
        Duration::from_millis(self.drift_tolerance_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Field-length limits, counted in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub key_max_len: usize,
    pub title_max_len: usize,
    pub message_max_len: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            key_max_len: 64,
            title_max_len: 250,
            message_max_len: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON snapshot file of pending messages
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "data/messages.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    #[default]
    Log,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub kind: NotifierKind,
    pub api_url: String,
    pub token: Option<String>,
    pub user: Option<String>,
    pub timeout_seconds: u64,
    /// Extra attempts after a failed delivery; 0 disables retrying
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            kind: NotifierKind::Log,
            api_url: "https://api.pushover.net/1/messages.json".to_string(),
            token: None,
            user: None,
            timeout_seconds: 10,
            max_retries: 0,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Bearer token required on `/api/*` when set
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub tracing_endpoint: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            tracing_endpoint: None,
        }
    }
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Local overrides (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port must be greater than 0".to_string());
        }

        if self.scheduler.tick_interval_ms == 0 {
            return Err("Scheduler tick_interval_ms must be greater than 0".to_string());
        }

        if self.limits.key_max_len == 0 || self.limits.message_max_len == 0 {
            return Err("Key and message length limits must be greater than 0".to_string());
        }

        if self.storage.path.trim().is_empty() {
            return Err("Storage path cannot be empty".to_string());
        }

        if self.notifier.kind == NotifierKind::Http {
            if self.notifier.api_url.is_empty() {
                return Err("Notifier api_url cannot be empty for the http notifier".to_string());
            }
            if self.notifier.token.as_deref().map_or(true, str::is_empty) {
                return Err("Notifier token is required for the http notifier".to_string());
            }
            if self.notifier.user.as_deref().map_or(true, str::is_empty) {
                return Err("Notifier user is required for the http notifier".to_string());
            }
        }

        if matches!(self.auth.api_token.as_deref(), Some("")) {
            return Err("auth.api_token cannot be empty when set".to_string());
        }

        Ok(())
    }
}
