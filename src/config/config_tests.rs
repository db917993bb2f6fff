use super::*;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.environment.java_path, None);
    assert_eq!(config.environment.backend_dir, DEFAULT_BACKEND_DIR);
    assert_eq!(config.console.host, DEFAULT_CONSOLE_HOST);
    assert_eq!(config.console.port, 1918);
    assert_eq!(config.console.max_read_timeouts, DEFAULT_MAX_READ_TIMEOUTS);
    assert_eq!(config.worker.reply_exit_grace_ms, DEFAULT_REPLY_EXIT_GRACE_MS);
}

#[test]
fn test_console_durations() {
    let console = ConsoleConfig::default();
    assert_eq!(
        console.connect_timeout(),
        Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS)
    );
    assert_eq!(console.read_timeout(), Duration::from_millis(DEFAULT_READ_TIMEOUT_MS));
    assert_eq!(console.poll_interval(), Duration::from_millis(DEFAULT_POLL_INTERVAL_MS));
    assert_eq!(console.flush_interval(), Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS));
}

#[test]
fn test_zero_durations_are_clamped() {
    // A zero read timeout would make the socket block forever
    let console = ConsoleConfig {
        read_timeout_ms: 0,
        poll_interval_ms: 0,
        ..ConsoleConfig::default()
    };
    assert_eq!(console.read_timeout(), Duration::from_millis(1));
    assert_eq!(console.poll_interval(), Duration::from_millis(1));
}

#[test]
fn test_partial_json_uses_field_defaults() {
    let json = r#"{"environment": {"javaPath": "/opt/jdk/bin/java"}, "console": {"port": 8080}}"#;
    let config: Config = serde_json::from_str(json).unwrap();
    assert_eq!(config.environment.java_path.as_deref(), Some("/opt/jdk/bin/java"));
    assert_eq!(config.environment.backend_dir, DEFAULT_BACKEND_DIR);
    assert_eq!(config.console.port, 8080);
    assert_eq!(config.console.read_timeout_ms, DEFAULT_READ_TIMEOUT_MS);
}

#[test]
fn test_config_serialization_roundtrip_skips_unset_java_path() {
    let config = Config::default();
    let json = serde_json::to_string(&config).unwrap();
    assert!(!json.contains("javaPath"));
    assert!(json.contains("\"port\":1918"));
}

#[test]
fn test_load_config_missing_file_returns_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(&dir.path().join("nope.json"));
    assert_eq!(config.console.port, DEFAULT_CONSOLE_PORT);
}

#[test]
fn test_load_config_reads_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"{{"console": {{"host": "localhost", "maxReadTimeouts": 2}}, "worker": {{"replyExitGraceMs": 50}}}}"#
    )
    .unwrap();

    let config = load_config(file.path());
    assert_eq!(config.console.host, "localhost");
    assert_eq!(config.console.max_read_timeouts, 2);
    assert_eq!(config.worker.reply_exit_grace(), Duration::from_millis(50));
}

#[test]
fn test_load_config_malformed_returns_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, r#"{{"console": {{"port": "not a number"}}}}"#).unwrap();

    let config = load_config(file.path());
    assert_eq!(config.console.port, DEFAULT_CONSOLE_PORT);
}

#[test]
fn test_read_config_reports_malformed_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, r#"{{"console": {{"port": "not a number"}}}}"#).unwrap();

    match read_config(file.path()) {
        Err(crate::error::BridgeError::Config(msg)) => assert!(msg.contains("Hint")),
        other => panic!("Expected Config error, got {:?}", other),
    }
}

#[test]
fn test_read_config_reports_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = read_config(&dir.path().join("nope.json")).unwrap_err();
    assert!(matches!(err, crate::error::BridgeError::Config(_)));
}

#[test]
fn test_backend_path_expands_tilde() {
    let env = EnvironmentConfig {
        java_path: None,
        backend_dir: "~/bridge/backend".to_string(),
    };
    let path = env.backend_path();
    assert!(!path.to_string_lossy().starts_with('~'));
    assert!(path.ends_with("bridge/backend"));
}
