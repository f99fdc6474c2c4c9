//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! A missing file means defaults. A file that is present but invalid stops
//! startup instead of silently running against the public broker.

use crate::domain::types::MifareKey;
use anyhow::{bail, Context};
use serde::Deserialize;
use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::warn;

/// Sector block read from MIFARE Classic tags (first data block of sector 1)
pub const DEFAULT_AUTH_BLOCK: u8 = 4;

const DEFAULT_CONFIG_PATH: &str = "config/dev.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Node identifier, used in logs only
    #[serde(default = "default_node_id")]
    pub id: String,
    /// Delay between reader polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self { id: default_node_id(), poll_interval_ms: default_poll_interval_ms() }
    }
}

fn default_node_id() -> String {
    "reader-node".to_string()
}

fn default_poll_interval_ms() -> u64 {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Topic tag events are published to
    #[serde(default = "default_mqtt_topic")]
    pub topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Client id prefix, a random hex suffix is appended per connection
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Fixed delay between reconnect attempts
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            topic: default_mqtt_topic(),
            username: None,
            password: None,
            client_id_prefix: default_client_id_prefix(),
            keep_alive_secs: default_keep_alive_secs(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
        }
    }
}

fn default_mqtt_host() -> String {
    "broker.mqttdashboard.com".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_topic() -> String {
    "rfid/tags".to_string()
}

fn default_client_id_prefix() -> String {
    "ESP32Client".to_string()
}

fn default_keep_alive_secs() -> u64 {
    15
}

fn default_reconnect_backoff_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReaderConfig {
    /// Presentation scenario replayed by the simulated reader
    #[serde(default = "default_scenario")]
    pub scenario: String,
    /// Block read from sector-memory tags
    #[serde(default = "default_auth_block")]
    pub auth_block: u8,
    /// Key A for that block's sector, 12 hex digits
    #[serde(default = "default_auth_key")]
    pub auth_key: String,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            scenario: default_scenario(),
            auth_block: default_auth_block(),
            auth_key: default_auth_key(),
        }
    }
}

fn default_scenario() -> String {
    "config/scenario.toml".to_string()
}

fn default_auth_block() -> u8 {
    DEFAULT_AUTH_BLOCK
}

fn default_auth_key() -> String {
    "ffffffffffff".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

fn default_metrics_interval_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Run an embedded broker in-process (bench setups)
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
}

fn default_broker_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_broker_bind_address(),
            port: default_broker_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    node_id: String,
    poll_interval_ms: u64,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    mqtt_client_id_prefix: String,
    mqtt_keep_alive_secs: u64,
    reconnect_backoff_ms: u64,
    scenario: String,
    auth_block: u8,
    auth_key: MifareKey,
    metrics_interval_secs: u64,
    broker_enabled: bool,
    broker_bind_address: String,
    broker_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), MifareKey::DEFAULT, "default".to_string())
    }
}

impl Config {
    fn from_toml(toml: TomlConfig, auth_key: MifareKey, config_file: String) -> Self {
        Self {
            node_id: toml.node.id,
            poll_interval_ms: toml.node.poll_interval_ms,
            mqtt_host: toml.mqtt.host,
            mqtt_port: toml.mqtt.port,
            mqtt_topic: toml.mqtt.topic,
            mqtt_username: toml.mqtt.username,
            mqtt_password: toml.mqtt.password,
            mqtt_client_id_prefix: toml.mqtt.client_id_prefix,
            mqtt_keep_alive_secs: toml.mqtt.keep_alive_secs,
            reconnect_backoff_ms: toml.mqtt.reconnect_backoff_ms,
            scenario: toml.reader.scenario,
            auth_block: toml.reader.auth_block,
            auth_key,
            metrics_interval_secs: toml.metrics.interval_secs,
            broker_enabled: toml.broker.enabled,
            broker_bind_address: toml.broker.bind_address,
            broker_port: toml.broker.port,
            config_file,
        }
    }

    /// Config path when none is given on the command line:
    /// `CONFIG_FILE` from the environment, else `config/dev.toml`
    pub fn default_path() -> String {
        env::var("CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    fn from_toml_str(content: &str, origin: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)
            .with_context(|| format!("Failed to parse config file {}", origin))?;

        if toml_config.node.poll_interval_ms == 0 {
            bail!("Invalid node.poll_interval_ms in {}: must be at least 1", origin);
        }

        let auth_key = MifareKey::from_hex(&toml_config.reader.auth_key)
            .with_context(|| format!("Invalid reader.auth_key in {}", origin))?;

        Ok(Self::from_toml(toml_config, auth_key, origin.to_string()))
    }

    /// Load configuration from a path. Only a missing file falls back to
    /// defaults; a file that exists but does not parse or validate is an error.
    pub fn load_from_path(path: &str) -> anyhow::Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content, path),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %path, "config_not_found_using_defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read config file {}", path)),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn poll_interval_ms(&self) -> u64 {
        self.poll_interval_ms
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_topic(&self) -> &str {
        &self.mqtt_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn mqtt_client_id_prefix(&self) -> &str {
        &self.mqtt_client_id_prefix
    }

    pub fn mqtt_keep_alive_secs(&self) -> u64 {
        self.mqtt_keep_alive_secs
    }

    pub fn reconnect_backoff_ms(&self) -> u64 {
        self.reconnect_backoff_ms
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub fn auth_block(&self) -> u8 {
        self.auth_block
    }

    pub fn auth_key(&self) -> MifareKey {
        self.auth_key
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn broker_enabled(&self) -> bool {
        self.broker_enabled
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker_bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Point the node at a different scenario file (CLI override)
    pub fn with_scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = scenario.into();
        self
    }
}
