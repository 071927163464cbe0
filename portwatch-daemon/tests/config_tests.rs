//! Configuration loading tests: full TOML, environment overrides, validation.

use std::io::Write;

use portwatch_core::config::PortwatchConfig;
use serial_test::serial;

const FULL_CONFIG: &str = r#"
[general]
log_level = "debug"
log_format = "pretty"
pid_file = "/tmp/portwatch-test.pid"

[engine]
enabled = true
mode = "enforce"
interface = "lo"
program_path = "/opt/portwatch/portwatch-ebpf"
stats_interval_secs = 5
watch_list_max_entries = 64

[filter]
ports = [22, 8000, 8443]
rules_path = "/etc/portwatch/rules.toml"

[capture]
ring_buffer_size = 65536
max_capture = 128

[metrics]
enabled = true
listen_addr = "0.0.0.0"
port = 9200
endpoint = "/metrics"
"#;

#[test]
fn test_parse_full_config() {
    // Given: every section set explicitly
    // When
    let config = PortwatchConfig::parse(FULL_CONFIG).expect("full config should parse");

    // Then
    assert_eq!(config.general.log_level, "debug");
    assert_eq!(config.general.log_format, "pretty");
    assert!(config.engine.enabled);
    assert_eq!(config.engine.mode, "enforce");
    assert_eq!(config.engine.interface, "lo");
    assert_eq!(config.engine.stats_interval_secs, 5);
    assert_eq!(config.engine.watch_list_max_entries, 64);
    assert_eq!(config.filter.ports, vec![22, 8000, 8443]);
    assert_eq!(config.filter.rules_path, "/etc/portwatch/rules.toml");
    assert_eq!(config.capture.ring_buffer_size, 65536);
    assert_eq!(config.capture.max_capture, 128);
    assert_eq!(config.metrics.port, 9200);
    config.validate().expect("full config should validate");
}

#[test]
fn test_partial_config_fills_defaults() {
    // Given: only the filter section
    let config = PortwatchConfig::parse("[filter]\nports = [443]\n").expect("should parse");

    // Then: everything else keeps its default
    assert_eq!(config.filter.ports, vec![443]);
    assert_eq!(config.engine.mode, "capture");
    assert_eq!(config.general.log_format, "json");
    assert!(!config.metrics.enabled);
}

#[test]
fn test_malformed_toml_is_a_parse_error() {
    let err = PortwatchConfig::parse("[filter\nports = ").unwrap_err();
    assert!(err.to_string().contains("parse"), "unexpected error: {err}");
}

#[test]
fn test_validation_failures() {
    let cases: &[(&str, &str)] = &[
        ("[general]\nlog_level = \"verbose\"\n", "general.log_level"),
        ("[general]\nlog_format = \"xml\"\n", "general.log_format"),
        ("[engine]\nenabled = true\nmode = \"block\"\n", "engine.mode"),
        ("[engine]\nenabled = true\ninterface = \"\"\n", "engine.interface"),
        ("[engine]\nstats_interval_secs = 0\n", "engine.stats_interval_secs"),
        ("[filter]\nports = []\n", "filter.ports"),
        ("[filter]\nports = [0]\n", "filter.ports"),
        (
            "[engine]\nwatch_list_max_entries = 1\n[filter]\nports = [1, 2]\n",
            "filter.ports",
        ),
        ("[capture]\nring_buffer_size = 0\n", "capture.ring_buffer_size"),
        ("[capture]\nmax_capture = 0\n", "capture.max_capture"),
        ("[capture]\nmax_capture = 70000\n", "capture.max_capture"),
    ];

    for (toml, field) in cases {
        // Given
        let config = PortwatchConfig::parse(toml).expect("should parse");

        // When
        let err = config.validate().expect_err(toml);

        // Then
        assert!(
            err.to_string().contains(field),
            "expected error on {field}, got: {err}"
        );
    }
}

#[tokio::test]
async fn test_from_file_missing_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = PortwatchConfig::from_file(dir.path().join("absent.toml"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("absent.toml"));
}

#[tokio::test]
#[serial]
async fn test_load_applies_env_overrides() {
    // Given
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    write!(file, "[filter]\nports = [8000]\n").expect("write config");

    // SAFETY: serialized with other env-mutating tests via #[serial].
    unsafe {
        std::env::set_var("PORTWATCH_FILTER_PORTS", "53, 443");
        std::env::set_var("PORTWATCH_ENGINE_MODE", "enforce");
        std::env::set_var("PORTWATCH_METRICS_PORT", "not-a-port");
    }

    // When
    let result = PortwatchConfig::load(file.path()).await;

    // SAFETY: see above.
    unsafe {
        std::env::remove_var("PORTWATCH_FILTER_PORTS");
        std::env::remove_var("PORTWATCH_ENGINE_MODE");
        std::env::remove_var("PORTWATCH_METRICS_PORT");
    }

    // Then: valid overrides apply, unparsable ones are ignored
    let config = result.expect("load should succeed");
    assert_eq!(config.filter.ports, vec![53, 443]);
    assert_eq!(config.engine.mode, "enforce");
    assert_eq!(config.metrics.port, 9100);
}

#[tokio::test]
#[serial]
async fn test_load_rejects_invalid_env_override() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    write!(file, "[general]\nlog_level = \"info\"\n").expect("write config");

    // SAFETY: serialized with other env-mutating tests via #[serial].
    unsafe { std::env::set_var("PORTWATCH_GENERAL_LOG_LEVEL", "loud") };
    let result = PortwatchConfig::load(file.path()).await;
    // SAFETY: see above.
    unsafe { std::env::remove_var("PORTWATCH_GENERAL_LOG_LEVEL") };

    assert!(result.is_err(), "invalid override must fail validation");
}
