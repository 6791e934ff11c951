use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// MQTT broker connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host name or IP address.
    pub host: String,

    /// Broker TCP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Client identifier presented to the broker.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Username for broker authentication.
    #[serde(default)]
    pub username: Option<String>,

    /// Password for broker authentication. Never serialized back out.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Keep-alive interval in seconds (minimum 5).
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// How long a single connect attempt may wait for the broker's CONNACK.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Capacity of the client request queue.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "solarsight-inverter".to_string()
}

fn default_keep_alive_secs() -> u64 {
    15
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_channel_capacity() -> usize {
    64
}

impl MqttConfig {
    /// Create a configuration for `host` with every other field defaulted.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }

    /// Check broker settings that rumqttc would otherwise reject at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("mqtt.host cannot be empty".to_string()));
        }
        if self.client_id.is_empty() {
            return Err(Error::Config("mqtt.client_id cannot be empty".to_string()));
        }
        if self.keep_alive_secs < 5 {
            return Err(Error::Config(format!(
                "mqtt.keep_alive_secs must be at least 5 (got {})",
                self.keep_alive_secs
            )));
        }
        if self.channel_capacity == 0 {
            return Err(Error::Config(
                "mqtt.channel_capacity must be greater than zero".to_string(),
            ));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(Error::Config(
                "mqtt.password requires mqtt.username".to_string(),
            ));
        }
        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Parse a configuration from a JSON5 string.
pub fn parse_config<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T> {
    json5::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
}
