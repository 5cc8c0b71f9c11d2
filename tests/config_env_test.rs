//! Config environment variable tests
//!
//! These tests verify that Config::from_env() correctly reads and applies
//! environment variable overrides. Note that Config::from_env() also loads
//! from .env file via dotenvy, so these tests focus on override behavior.
//!
//! Tests use #[serial] to prevent race conditions with shared env vars.

use serial_test::serial;
use std::env;

use survey_engine::config::{Config, LogFormat};

#[test]
#[serial]
fn test_config_from_env_defaults() {
    env::remove_var("DATABASE_PATH");
    env::remove_var("DATABASE_MAX_CONNECTIONS");
    env::remove_var("LOG_LEVEL");
    env::remove_var("LOG_FORMAT");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.path.to_str().unwrap(), "./data/surveys.db");
    assert_eq!(config.database.max_connections, 5);
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.format, LogFormat::Pretty);
}

#[test]
#[serial]
fn test_config_from_env_custom_database() {
    env::set_var("DATABASE_PATH", "/custom/path.db");
    env::set_var("DATABASE_MAX_CONNECTIONS", "10");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.path.to_str().unwrap(), "/custom/path.db");
    assert_eq!(config.database.max_connections, 10);

    env::remove_var("DATABASE_PATH");
    env::remove_var("DATABASE_MAX_CONNECTIONS");
}

#[test]
#[serial]
fn test_config_from_env_invalid_max_connections_falls_back() {
    env::set_var("DATABASE_MAX_CONNECTIONS", "not-a-number");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.max_connections, 5);

    env::remove_var("DATABASE_MAX_CONNECTIONS");
}

#[test]
#[serial]
fn test_config_from_env_json_log_format() {
    env::set_var("LOG_FORMAT", "json");

    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.format, LogFormat::Json);

    env::remove_var("LOG_FORMAT");
}

#[test]
#[serial]
fn test_config_from_env_unknown_log_format_falls_back_to_pretty() {
    env::set_var("LOG_FORMAT", "xml");

    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.format, LogFormat::Pretty);

    env::remove_var("LOG_FORMAT");
}

#[test]
#[serial]
fn test_config_from_env_custom_log_level() {
    env::set_var("LOG_LEVEL", "debug");

    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.level, "debug");

    env::remove_var("LOG_LEVEL");
}
