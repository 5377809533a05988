//! Integration tests for configuration validation

#![allow(clippy::expect_used)]

use msim_server::config::{LoggingConfig, ServerConfig, ServerSettings};
use std::io::Write;
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = ServerSettings::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_invalid_server_address() {
    let mut config = ServerSettings::default();
    config.server.address = "invalid_address".to_string();

    let errors = config.validate();
    assert!(!errors.is_empty(), "Should have validation errors");
    assert!(errors.iter().any(|e| e.contains("Invalid server address")));
}

#[test]
fn test_empty_server_address() {
    let mut config = ServerSettings::default();
    config.server.address = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_zero_backpressure_limit() {
    let config = ServerConfig {
        backpressure_limit: 0,
        ..ServerConfig::default()
    };
    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Backpressure limit")));
}

#[test]
fn test_handshake_timeout_bounds() {
    let short = ServerConfig {
        handshake_timeout: Duration::from_millis(10),
        ..ServerConfig::default()
    };
    assert!(short.validate().iter().any(|e| e.contains("too short")));

    let long = ServerConfig {
        handshake_timeout: Duration::from_secs(301),
        ..ServerConfig::default()
    };
    assert!(long.validate().iter().any(|e| e.contains("too long")));
}

#[test]
fn test_tiny_packet_limit_rejected() {
    let config = ServerConfig {
        max_packet_size: 100,
        ..ServerConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Max packet size")));
}

#[test]
fn test_logging_requires_an_output() {
    let config = LoggingConfig {
        log_to_console: false,
        log_to_file: false,
        ..LoggingConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("At least one logging output")));
}

#[test]
fn test_file_logging_requires_path() {
    let config = LoggingConfig {
        log_to_file: true,
        log_file_path: None,
        ..LoggingConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("log_file_path")));
}

#[test]
fn test_validate_strict_collects_everything() {
    let mut config = ServerSettings::default();
    config.server.address = String::new();
    config.server.max_connections = 0;

    let err = config.validate_strict().expect_err("should fail");
    let message = err.to_string();
    assert!(message.contains("cannot be empty"));
    assert!(message.contains("Max connections"));
}

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        r#"
[server]
address = "127.0.0.1:1864"
backpressure_limit = 16
handshake_timeout = 5000

[logging]
log_level = "debug"
json_format = true

[[accounts]]
uid = 1
username = "tom"
screenname = "Tom"
password = "pw"
email = "tom@example.com"

[accounts.profile]
location = "Santa Monica"
"#
    )
    .expect("write config");

    let config = ServerSettings::from_file(file.path()).expect("config loads");
    assert_eq!(config.server.address, "127.0.0.1:1864");
    assert_eq!(config.server.backpressure_limit, 16);
    assert_eq!(config.server.handshake_timeout, Duration::from_secs(5));
    assert_eq!(config.logging.log_level, Level::DEBUG);
    assert!(config.logging.json_format);
    assert_eq!(config.accounts[0].profile.location, "Santa Monica");
    assert!(config.validate().is_empty());
}

#[test]
fn test_invalid_toml_is_config_error() {
    let err = ServerSettings::from_toml("[server\naddress = ").expect_err("should fail");
    assert!(err.to_string().contains("Failed to parse TOML"));
}

#[test]
fn test_missing_file_is_config_error() {
    let err = ServerSettings::from_file("/nonexistent/msim.toml").expect_err("should fail");
    assert!(err.to_string().contains("Failed to open config file"));
}

#[test]
fn test_unknown_log_level_rejected() {
    let result = ServerSettings::from_toml("[logging]\nlog_level = \"loud\"\n");
    assert!(result.is_err());
}
