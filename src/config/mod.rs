//! Configuration management
//!
//! This module provides YAML-based configuration management with support for:
//! - Environment variable overrides
//! - Multiple configuration file locations
//! - Default values for all settings

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::time::MAX_PERIOD_DAYS;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub users: UsersConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: None,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Log output target (console or file)
    #[serde(default = "default_log_target")]
    pub target: LogTarget,
    /// Directory for log files (used when target is "file")
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Log file name prefix (default: "kms")
    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,
    #[serde(default = "default_log_rotation")]
    pub daily_rotation: bool,
    /// Maximum number of log files to keep (0 = unlimited)
    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,
}

/// Log output target
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    #[default]
    Console,
    File,
    Both,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_log_target() -> LogTarget {
    LogTarget::Console
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/kms")
}

fn default_log_prefix() -> String {
    "kms".to_string()
}

fn default_log_rotation() -> bool {
    true
}

fn default_max_log_files() -> usize {
    30
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: default_log_target(),
            log_dir: default_log_dir(),
            log_prefix: default_log_prefix(),
            daily_rotation: default_log_rotation(),
            max_log_files: default_max_log_files(),
        }
    }
}

/// Quota enforcement and rollover configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuotaConfig {
    /// Deadline for every single-record store or directory call
    #[serde(default = "default_store_timeout")]
    pub store_timeout_secs: u64,
    /// Deadline for the bulk rollover write, which touches many rows
    #[serde(default = "default_rollover_timeout")]
    pub rollover_timeout_secs: u64,
    /// Quota given to advanced keys created without an explicit one
    #[serde(default = "default_quota")]
    pub default_quota: i64,
    #[serde(default = "default_period_days")]
    pub default_period_days: i64,
    /// Run the midnight rollover scheduler in this process
    #[serde(default = "default_rollover_enabled")]
    pub rollover_enabled: bool,
}

fn default_store_timeout() -> u64 {
    5
}

fn default_rollover_timeout() -> u64 {
    30
}

fn default_quota() -> i64 {
    1000
}

fn default_period_days() -> i64 {
    1
}

fn default_rollover_enabled() -> bool {
    true
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            store_timeout_secs: default_store_timeout(),
            rollover_timeout_secs: default_rollover_timeout(),
            default_quota: default_quota(),
            default_period_days: default_period_days(),
            rollover_enabled: default_rollover_enabled(),
        }
    }
}

impl QuotaConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn rollover_timeout(&self) -> Duration {
        Duration::from_secs(self.rollover_timeout_secs)
    }
}

/// Key generation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeysConfig {
    /// Length of generated secrets, in alphanumeric characters
    #[serde(default = "default_secret_length")]
    pub secret_length: usize,
}

fn default_secret_length() -> usize {
    128
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            secret_length: default_secret_length(),
        }
    }
}

/// User directory configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UsersConfig {
    /// Platform ids registered as Admins at startup when not already known.
    /// Every other role assignment needs an existing Admin.
    #[serde(default)]
    pub bootstrap_admins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: "sqlite://./data/kms.db".to_string(),
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            logging: LoggingConfig::default(),
            quota: QuotaConfig::default(),
            keys: KeysConfig::default(),
            users: UsersConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values
    /// 2. Configuration file (YAML)
    /// 3. Environment variables (prefixed with KMS_)
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let config_path = std::env::var("KMS_CONFIG")
            .map(PathBuf::from)
            .ok()
            .or_else(Self::find_config_file);

        let mut config = match config_path {
            Some(ref path) if path.exists() => {
                eprintln!("[CONFIG] Loading configuration from: {:?}", path);
                Self::from_file(path)?
            }
            Some(ref path) => {
                eprintln!("[CONFIG] Config file not found: {:?}, using defaults", path);
                AppConfig::default()
            }
            None => {
                eprintln!("[CONFIG] No config file found, using defaults");
                AppConfig::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parse a YAML configuration file without applying overrides
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_norway::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Find the configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            PathBuf::from("config.yaml"),
            PathBuf::from("config/config.yaml"),
            PathBuf::from("/etc/kms/config.yaml"),
            dirs::config_dir()
                .map(|p| p.join("kms/config.yaml"))
                .unwrap_or_default(),
        ];

        paths.into_iter().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("KMS_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("KMS_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("KMS_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => LogFormat::Pretty,
            };
        }

        if let Ok(secs) = std::env::var("KMS_STORE_TIMEOUT_SECS") {
            if let Ok(s) = secs.parse() {
                self.quota.store_timeout_secs = s;
            }
        }
        if let Ok(enabled) = std::env::var("KMS_ROLLOVER_ENABLED") {
            self.quota.rollover_enabled = matches!(
                enabled.to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }

        if let Ok(admins) = std::env::var("KMS_BOOTSTRAP_ADMINS") {
            self.users.bootstrap_admins = admins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.quota.store_timeout_secs == 0 || self.quota.rollover_timeout_secs == 0 {
            anyhow::bail!("Store timeouts must be at least 1 second");
        }

        if !(1..=MAX_PERIOD_DAYS).contains(&self.quota.default_period_days) {
            anyhow::bail!(
                "Default quota period must be between 1 and {} days",
                MAX_PERIOD_DAYS
            );
        }

        if self.quota.default_quota < 0 {
            anyhow::bail!("Default quota cannot be negative");
        }

        if self.keys.secret_length < 32 {
            anyhow::bail!("Key secret length must be at least 32 characters");
        }

        if self
            .users
            .bootstrap_admins
            .iter()
            .any(|id| id.trim().is_empty() || id.len() > 255)
        {
            anyhow::bail!("Bootstrap admin platform ids must be 1 to 255 characters");
        }

        Ok(())
    }
}
