//! Tests for configuration loading and validation.

use super::*;
use serial_test::serial;
use std::io::Write;

const ENV_VARS: [&str; 5] = [
    "DUEQ__NAMESPACE",
    "DUEQ__REALTIME",
    "DUEQ__DEFAULTS__VT",
    "DUEQ__DEFAULTS__MAXSIZE",
    "DUEQ__LOGGING__LEVEL",
];

fn clear_env() {
    for var in ENV_VARS {
        std::env::remove_var(var);
    }
}

fn config_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("create temp config file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

mod defaults {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = DueqConfig::default();
        assert_eq!(config.namespace, "dueq");
        assert!(!config.realtime);
        assert_eq!(config.defaults.vt, 30);
        assert_eq!(config.defaults.delay, 0);
        assert_eq!(config.defaults.maxsize, MaxSize::Bytes(65536));
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    /// Verify loading with no file and no environment yields the defaults.
    #[test]
    #[serial]
    fn test_load_without_sources() {
        clear_env();
        let config = DueqConfig::load(None).unwrap();
        assert_eq!(config, DueqConfig::default());
    }
}

mod sources {
    use super::*;

    /// Verify a TOML file overrides only the fields it names.
    #[test]
    #[serial]
    fn test_load_from_toml_file() {
        clear_env();
        let file = config_file(
            ".toml",
            r#"
namespace = "billing"
realtime = true

[defaults]
vt = 120
maxsize = -1
"#,
        );

        let config = DueqConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.namespace, "billing");
        assert!(config.realtime);
        assert_eq!(config.defaults.vt, 120);
        assert_eq!(config.defaults.delay, 0);
        assert_eq!(config.defaults.maxsize, MaxSize::Unlimited);
    }

    #[test]
    #[serial]
    fn test_load_from_yaml_file() {
        clear_env();
        let file = config_file(".yaml", "defaults:\n  delay: 15\nlogging:\n  json_format: true\n");

        let config = DueqConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.defaults.delay, 15);
        assert!(config.logging.json_format);
    }

    /// Verify environment variables take precedence over the file.
    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        clear_env();
        let file = config_file(".toml", "namespace = \"from_file\"\n");
        std::env::set_var("DUEQ__NAMESPACE", "from_env");
        std::env::set_var("DUEQ__DEFAULTS__VT", "45");
        std::env::set_var("DUEQ__REALTIME", "true");

        let result = DueqConfig::load(Some(file.path()));
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.namespace, "from_env");
        assert_eq!(config.defaults.vt, 45);
        assert!(config.realtime);
    }

    #[test]
    #[serial]
    fn test_missing_file_is_an_error() {
        clear_env();
        let result = DueqConfig::load(Some(Path::new("/nonexistent/dueq.toml")));
        assert!(matches!(result, Err(ConfigurationError::Parsing { .. })));
    }
}

mod validation {
    use super::*;

    /// Verify out-of-range values from the environment are rejected.
    #[test]
    #[serial]
    fn test_load_rejects_out_of_range_maxsize() {
        clear_env();
        std::env::set_var("DUEQ__DEFAULTS__MAXSIZE", "100");

        let result = DueqConfig::load(None);
        clear_env();

        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_namespace() {
        let config = DueqConfig {
            namespace: "has:colon".to_string(),
            ..DueqConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::Invalid { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_vt_out_of_range() {
        let mut config = DueqConfig::default();
        config.defaults.vt = 10_000_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("vt"));
    }

    #[test]
    fn test_validate_rejects_empty_log_level() {
        let mut config = DueqConfig::default();
        config.logging.level = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_to_record() {
        let defaults = QueueDefaults {
            vt: 5,
            delay: 2,
            maxsize: MaxSize::Bytes(2048),
        };
        let record = defaults.to_record().unwrap();
        assert_eq!(record.vt, 5);
        assert_eq!(record.delay, 2);
        assert_eq!(record.maxsize, MaxSize::Bytes(2048));
    }
}
