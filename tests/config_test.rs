//! Integration tests for configuration loading

use std::io::Write;
use tag_node::domain::MifareKey;
use tag_node::infra::Config;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[node]
id = "lobby"
poll_interval_ms = 25

[mqtt]
host = "test-host"
port = 1884
topic = "lab/tags"
username = "reader"
password = "secret"
reconnect_backoff_ms = 2000

[reader]
scenario = "/tmp/lobby.toml"
auth_block = 8
auth_key = "a0a1a2a3a4a5"

[metrics]
interval_secs = 5

[broker]
enabled = true
port = 1999
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.node_id(), "lobby");
    assert_eq!(config.poll_interval_ms(), 25);
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_topic(), "lab/tags");
    assert_eq!(config.mqtt_username(), Some("reader"));
    assert_eq!(config.mqtt_password(), Some("secret"));
    assert_eq!(config.reconnect_backoff_ms(), 2000);
    assert_eq!(config.scenario(), "/tmp/lobby.toml");
    assert_eq!(config.auth_block(), 8);
    assert_eq!(config.auth_key(), MifareKey([0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5]));
    assert_eq!(config.metrics_interval_secs(), 5);
    assert!(config.broker_enabled());
    assert_eq!(config.broker_port(), 1999);
    assert_eq!(config.config_file(), temp_file.path().display().to_string());
}

#[test]
fn test_empty_file_uses_defaults() {
    let temp_file = NamedTempFile::new().unwrap();
    let config = Config::from_file(temp_file.path()).unwrap();
    assert_eq!(config.mqtt_topic(), "rfid/tags");
    assert_eq!(config.auth_block(), 4);
    assert_eq!(config.reconnect_backoff_ms(), 5000);
}

#[test]
fn test_invalid_key_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[reader]\nauth_key = \"ffff\"\n").unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("auth_key"));
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml").unwrap();
    assert_eq!(config.mqtt_host(), "broker.mqttdashboard.com");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_load_from_path_bad_key_does_not_fall_back() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(b"[mqtt]\nhost = \"10.0.0.9\"\ntopic = \"lab/tags\"\n\n[reader]\nauth_key = \"ffff\"\n")
        .unwrap();
    temp_file.flush().unwrap();

    let path = temp_file.path().display().to_string();
    let err = Config::load_from_path(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("auth_key"));
}

#[test]
fn test_load_from_path_reads_existing_file() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[mqtt]\nhost = \"10.0.0.9\"\ntopic = \"lab/tags\"\n").unwrap();
    temp_file.flush().unwrap();

    let path = temp_file.path().display().to_string();
    let config = Config::load_from_path(&path).unwrap();
    assert_eq!(config.mqtt_host(), "10.0.0.9");
    assert_eq!(config.mqtt_topic(), "lab/tags");
    assert_eq!(config.config_file(), path);
}

#[test]
fn test_zero_poll_interval_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[node]\npoll_interval_ms = 0\n").unwrap();
    temp_file.flush().unwrap();

    let path = temp_file.path().display().to_string();
    let err = Config::load_from_path(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("poll_interval_ms"));
}
