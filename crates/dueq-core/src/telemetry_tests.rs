//! Tests for tracing setup.

use super::*;
use serial_test::serial;

#[test]
#[serial]
fn test_env_filter_uses_configured_level() {
    std::env::remove_var("RUST_LOG");
    let config = LoggingConfig {
        level: "dueq_core=debug".to_string(),
        json_format: false,
    };
    let filter = env_filter(&config).unwrap();
    assert!(filter.to_string().contains("dueq_core=debug"));
}

#[test]
#[serial]
fn test_env_filter_rejects_bad_directive() {
    std::env::remove_var("RUST_LOG");
    let config = LoggingConfig {
        level: "dueq_core=loud".to_string(),
        json_format: false,
    };
    assert!(matches!(
        env_filter(&config),
        Err(ConfigurationError::Invalid { .. })
    ));
}

/// Verify a second initialisation reports the existing subscriber.
#[test]
#[serial]
fn test_init_twice() {
    let config = LoggingConfig::default();
    init_tracing(&config).unwrap();
    assert!(!init_tracing(&config).unwrap());
}
