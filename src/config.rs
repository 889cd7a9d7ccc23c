//! Configuration management with validation and defaults
//!
//! Values come from (in order) built-in defaults, an optional TOML file, and
//! `TAIXIU_*` environment variables. The result is validated before use.

use crate::errors::{ConfigurationError, TaixiuResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Starting balance handed to new accounts (100,000 minor units)
pub const DEFAULT_BALANCE: u64 = 100_000;

/// Complete service configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaixiuConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub ledger: LedgerConfig,
    pub hub: HubConfig,
    pub monitoring: MonitoringConfig,
    /// Accounts created at startup when missing
    pub accounts: Vec<SeedAccount>,
}

/// HTTP / WebSocket listener settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    RocksDb,
    Memory,
}

/// Account store settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_directory: String,
    pub write_buffer_size_mb: usize,
    pub max_write_buffer_number: i32,
    /// Whether to clear database on startup (testing only!)
    pub clear_on_start: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::RocksDb,
            data_directory: "./DB/taixiu_data".to_string(),
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            clear_on_start: false, // Production default: preserve data
        }
    }
}

/// Settlement engine settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Upper bound on waiting for an account's exclusive lock
    pub lock_timeout_ms: u64,
    pub default_balance: u64,
    /// Number of wagers returned by the history endpoint
    pub history_limit: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 2_000,
            default_balance: DEFAULT_BALANCE,
            history_limit: 10,
        }
    }
}

/// Session hub settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Per-connection outbound queue depth; events beyond it are dropped
    pub outbound_buffer: usize,
    pub max_username_length: usize,
    pub max_chat_length: usize,
    /// Broadcast a `game_result` event after each successful settlement
    pub announce_settlements: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 256,
            max_username_length: 32,
            max_chat_length: 500,
            announce_settlements: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enable_metrics: bool,
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: true,
            log_filter: "taixiu=info,tower_http=info".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedAccount {
    pub username: String,
    #[serde(default)]
    pub balance: Option<u64>,
}

impl TaixiuConfig {
    /// Configuration for a persistent deployment
    pub fn production() -> Self {
        Self {
            storage: StorageConfig {
                write_buffer_size_mb: 128,
                clear_on_start: false,
                ..Default::default()
            },
            monitoring: MonitoringConfig {
                log_filter: "taixiu=info,tower_http=warn".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// In-memory configuration for tests and local play
    pub fn testing() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                ..Default::default()
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                clear_on_start: true,
                ..Default::default()
            },
            ledger: LedgerConfig {
                lock_timeout_ms: 500,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.ledger.lock_timeout_ms == 0 {
            return Err(invalid("ledger.lock_timeout_ms", "0", "lock timeout must be > 0"));
        }
        if self.ledger.history_limit == 0 {
            return Err(invalid("ledger.history_limit", "0", "history limit must be > 0"));
        }
        if self.hub.outbound_buffer == 0 {
            return Err(invalid("hub.outbound_buffer", "0", "outbound buffer must be > 0"));
        }
        if self.hub.max_username_length == 0 {
            return Err(invalid("hub.max_username_length", "0", "must be > 0"));
        }
        if self.storage.backend == StorageBackend::RocksDb && self.storage.data_directory.trim().is_empty() {
            return Err(ConfigurationError::MissingRequired("storage.data_directory".to_string()));
        }
        for seed in &self.accounts {
            if seed.username.trim().is_empty() {
                return Err(invalid("accounts.username", &seed.username, "username cannot be empty"));
            }
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger.lock_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Configuration loader with environment variable support
#[derive(Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
    preset: Option<TaixiuConfig>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from `preset` instead of the defaults when no file is given
    pub fn with_preset(mut self, preset: TaixiuConfig) -> Self {
        self.preset = Some(preset);
        self
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> TaixiuResult<TaixiuConfig> {
        let mut config = match &self.config_path {
            Some(path) => Self::load_from_file(path)?,
            None => self.preset.clone().unwrap_or_default(),
        };

        Self::apply_env_overrides(&mut config, |key| env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    fn load_from_file(path: &str) -> TaixiuResult<TaixiuConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        Self::parse(&content)
    }

    /// Parse a TOML document into a configuration
    pub fn parse(content: &str) -> TaixiuResult<TaixiuConfig> {
        toml::from_str(content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }

    /// Apply `TAIXIU_*` overrides read through `lookup`
    pub fn apply_env_overrides<F>(config: &mut TaixiuConfig, lookup: F) -> TaixiuResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("TAIXIU_HOST") {
            config.server.host = host;
        }
        if let Some(port) = lookup("TAIXIU_PORT") {
            config.server.port = port.parse().map_err(|_| invalid("TAIXIU_PORT", &port, "Invalid port number"))?;
        }
        if let Some(dir) = lookup("TAIXIU_DATA_DIR") {
            config.storage.data_directory = dir;
        }
        if let Some(timeout) = lookup("TAIXIU_LOCK_TIMEOUT_MS") {
            config.ledger.lock_timeout_ms = timeout
                .parse()
                .map_err(|_| invalid("TAIXIU_LOCK_TIMEOUT_MS", &timeout, "Invalid timeout value"))?;
        }
        if let Some(filter) = lookup("TAIXIU_LOG") {
            config.monitoring.log_filter = filter;
        }
        Ok(())
    }
}
