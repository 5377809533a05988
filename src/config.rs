//! # Configuration Management
//!
//! Server settings, loaded from TOML and overridable from the environment.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` or strings via `from_toml()`
//! - Direct instantiation with defaults
//! - `MSIM_*` environment variables via `from_env()`
//!
//! Durations are written as integer milliseconds.
//!
//! ```toml
//! [server]
//! address = "0.0.0.0:1863"
//! handshake_timeout = 30000
//!
//! [[accounts]]
//! uid = 42
//! username = "demo"
//! screenname = "demo"
//! password = "pw"
//! ```

use crate::error::{ProtocolError, Result};
use crate::store::Account;
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Protocol version advertised in the login challenge and acceptance
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest frame the codec will buffer before giving up on a connection
pub const MAX_PACKET_SIZE: usize = 64 * 1024;

/// Port the stock client connects to
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:1863";

/// Top-level settings file
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ServerSettings {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Accounts seeded into the in-memory store at startup
    #[serde(default)]
    pub accounts: Vec<Account>,
}

impl ServerSettings {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults with `MSIM_*` environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Apply `MSIM_*` environment overrides on top of the current values.
    /// Unparseable values are ignored.
    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("MSIM_SERVER_ADDRESS") {
            self.server.address = addr;
        }

        if let Some(val) = env_parse::<usize>("MSIM_BACKPRESSURE_LIMIT") {
            self.server.backpressure_limit = val;
        }

        if let Some(val) = env_parse::<u64>("MSIM_HANDSHAKE_TIMEOUT_MS") {
            self.server.handshake_timeout = Duration::from_millis(val);
        }

        if let Some(val) = env_parse::<u64>("MSIM_IDLE_TIMEOUT_MS") {
            self.server.idle_timeout = Duration::from_millis(val);
        }
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        let example = Self {
            accounts: vec![Account {
                uid: 42,
                username: "demo".into(),
                screenname: "demo".into(),
                password: "change-me".into(),
                email: "demo@example.com".into(),
                avatar_url: String::new(),
                profile: Default::default(),
            }],
            ..Self::default()
        };
        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.logging.validate());
        errors.extend(validate_accounts(&self.accounts));
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}

fn validate_accounts(accounts: &[Account]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut uids = HashSet::new();
    let mut names = HashSet::new();

    for account in accounts {
        if account.uid == 0 {
            errors.push(format!("Account '{}' has uid 0", account.username));
        }
        if account.username.is_empty() {
            errors.push(format!("Account {} has an empty username", account.uid));
        }
        if !uids.insert(account.uid) {
            errors.push(format!("Duplicate account uid: {}", account.uid));
        }
        if !names.insert(account.username.to_lowercase()) {
            errors.push(format!("Duplicate account username: '{}'", account.username));
        }
    }

    errors
}

/// Listener and per-connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0:1863")
    pub address: String,

    /// Capacity of each session's outbound queue
    pub backpressure_limit: usize,

    /// Time a new connection has to answer the login challenge
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Authenticated connections silent for this long are closed
    #[serde(with = "duration_serde")]
    pub idle_timeout: Duration,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Largest accepted frame in bytes
    pub max_packet_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from(DEFAULT_ADDRESS),
            backpressure_limit: 64,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            idle_timeout: timeout::IDLE_TIMEOUT,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
            max_connections: 1000,
            max_packet_size: MAX_PACKET_SIZE,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:1863')",
                self.address
            ));
        }

        if self.backpressure_limit == 0 {
            errors.push("Backpressure limit must be greater than 0".to_string());
        } else if self.backpressure_limit > 1_000_000 {
            errors.push(format!(
                "Backpressure limit too large: {} (max recommended: 1,000,000)",
                self.backpressure_limit
            ));
        }

        if self.handshake_timeout.as_millis() < 100 {
            errors.push("Handshake timeout too short (minimum: 100ms)".to_string());
        } else if self.handshake_timeout.as_secs() > 300 {
            errors.push("Handshake timeout too long (maximum: 300s)".to_string());
        }

        if self.idle_timeout.as_secs() < 1 {
            errors.push("Idle timeout too short (minimum: 1s)".to_string());
        } else if self.idle_timeout.as_secs() > 24 * 3600 {
            errors.push("Idle timeout too long (maximum: 24 hours)".to_string());
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.max_packet_size < 1024 {
            errors.push("Max packet size too small (minimum: 1 KB)".to_string());
        } else if self.max_packet_size > 16 * 1024 * 1024 {
            errors.push(format!(
                "Max packet size too large: {} bytes (maximum: 16 MB)",
                self.max_packet_size
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("msim-server"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ServerSettings::default().validate().is_empty());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let settings = ServerSettings::from_toml(
            r#"
            [server]
            address = "0.0.0.0:1863"
            idle_timeout = 60000

            [[accounts]]
            uid = 42
            username = "demo"
            screenname = "Demo"
            password = "pw"
            "#,
        )
        .unwrap();

        assert_eq!(settings.server.address, "0.0.0.0:1863");
        assert_eq!(settings.server.idle_timeout, Duration::from_secs(60));
        assert_eq!(settings.server.handshake_timeout, timeout::HANDSHAKE_TIMEOUT);
        assert_eq!(settings.accounts.len(), 1);
        assert_eq!(settings.accounts[0].screenname, "Demo");
        assert!(settings.accounts[0].email.is_empty());
    }

    #[test]
    fn example_config_parses_back() {
        let example = ServerSettings::example_config();
        let parsed = ServerSettings::from_toml(&example).unwrap();
        assert_eq!(parsed.accounts[0].uid, 42);
        assert!(parsed.validate_strict().is_ok());
    }

    #[test]
    fn duplicate_accounts_rejected() {
        let mut settings = ServerSettings::default();
        let account = Account {
            uid: 7,
            username: "a".into(),
            screenname: "a".into(),
            password: "p".into(),
            email: String::new(),
            avatar_url: String::new(),
            profile: Default::default(),
        };
        settings.accounts = vec![account.clone(), account];
        let errors = settings.validate();
        assert_eq!(errors.len(), 2);
        assert!(settings.validate_strict().is_err());
    }
}
