//! Configuration management for croptag.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::registration::http::endpoint_url;
use crate::registration::Operator;
use crate::session::ScanSettings;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "croptag";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "registrations.db";

/// Environment variable prefix.
const ENV_PREFIX: &str = "CROPTAG_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `CROPTAG_`, sections separated by
///    `__`, e.g. `CROPTAG_SCANNER__DEBOUNCE_MS=60`)
/// 2. TOML config file at `~/.config/croptag/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scanner timing.
    pub scanner: ScannerConfig,
    /// Registration backend.
    pub backend: BackendConfig,
    /// Operator identity.
    pub operator: OperatorConfig,
    /// Local registration log.
    pub storage: StorageConfig,
}

/// Scanner timing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Delay after the buffer fills before it is committed, in milliseconds.
    pub debounce_ms: u64,
    /// Window for dropping repeats of the last accepted tag, in milliseconds.
    /// Set to 0 to disable.
    pub duplicate_window_ms: u64,
}

/// Registration backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the marketplace backend.
    pub base_url: String,
    /// Path of the registration endpoint.
    pub register_path: String,
    /// Request timeout in seconds. Set to 0 to wait indefinitely.
    pub timeout_secs: u64,
}

/// Operator identity sent with each registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// Logged-in user id.
    pub user_id: Option<String>,
    /// Station session id. Generated per run when unset.
    pub session_id: Option<String>,
}

/// Registration log configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Record submissions in the local log.
    pub enabled: bool,
    /// Path to the database file.
    /// Defaults to `~/.local/share/croptag/registrations.db`
    pub database_path: Option<PathBuf>,
    /// Maximum number of log entries to retain.
    /// Set to 0 for unlimited.
    pub max_records: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 40,
            duplicate_window_ms: 1200,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            register_path: "/api/rfid/register".to_string(),
            timeout_secs: 0,
        }
    }
}

impl BackendConfig {
    /// Get the request timeout, `None` when unlimited.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database_path: None, // Will be resolved to default at runtime
            max_records: 10_000,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `CROPTAG_`)
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);
        Self::from_figment(
            Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(Toml::file(&config_file))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Extract and validate configuration from a prepared figment.
    ///
    /// # Errors
    ///
    /// Returns an error if extraction or validation fails.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.scanner.debounce_ms == 0 {
            return Err(Error::config_validation(
                "scanner.debounce_ms must be greater than 0",
            ));
        }

        if self.scanner.debounce_ms >= self.scanner.duplicate_window_ms
            && self.scanner.duplicate_window_ms > 0
        {
            return Err(Error::config_validation(format!(
                "scanner.debounce_ms ({}) must be shorter than scanner.duplicate_window_ms ({})",
                self.scanner.debounce_ms, self.scanner.duplicate_window_ms
            )));
        }

        if !self.backend.register_path.starts_with('/') {
            return Err(Error::config_validation(format!(
                "backend.register_path must start with '/': {}",
                self.backend.register_path
            )));
        }

        endpoint_url(&self.backend.base_url, &self.backend.register_path)
            .map_err(|e| Error::config_validation(format!("backend.base_url: {e}")))?;

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the debounce delay as a Duration.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.scanner.debounce_ms)
    }

    /// Get the echo window as a Duration.
    #[must_use]
    pub fn duplicate_window(&self) -> Duration {
        Duration::from_millis(self.scanner.duplicate_window_ms)
    }

    /// Session timing derived from the scanner section.
    #[must_use]
    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            debounce: self.debounce(),
            duplicate_window: self.duplicate_window(),
        }
    }

    /// The operator identity, generating a session id if none is configured.
    #[must_use]
    pub fn operator(&self) -> Operator {
        Operator::new(
            self.operator.session_id.clone(),
            self.operator.user_id.clone(),
        )
    }
}
