//! Configuration for the inverter bridge.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use solarsight_bridge_framework::{
    BackoffConfig, BridgeConfig, BridgeError, LoggingConfig, MqttConfig, NetworkConfig,
    TopicBuilder,
};
use solarsight_common::{DEFAULT_TOPIC_PREFIX, validate_topic};
use thiserror::Error;

use crate::transport::FunctionCode;

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("At least one sensor must be configured")]
    NoSensors,

    #[error("Sensor #{index}: name cannot be empty")]
    EmptySensorName { index: usize },

    #[error("Duplicate sensor name '{0}'")]
    DuplicateSensor(String),

    #[error("Sensors '{first}' and '{second}' both publish to '{topic}'")]
    DuplicateTopic {
        topic: String,
        first: String,
        second: String,
    },

    #[error("Sensor '{sensor}': {reason}")]
    InvalidTopic { sensor: String, reason: String },

    #[error("Sensor '{sensor}': unsupported function code {code:#04x} (use 3 or 4)")]
    UnsupportedFunctionCode { sensor: String, code: u8 },

    #[error("Sensor '{sensor}': scale must be a finite number")]
    InvalidScale { sensor: String },

    #[error("unit_id must be 1-247 (got {0})")]
    InvalidUnitId(u8),

    #[error("Serial port: {0}")]
    Serial(String),

    #[error("Poll: {0}")]
    Poll(String),

    #[error("Reconnect: {0}")]
    Backoff(String),

    #[error("mqtt.channel_capacity is {capacity}, a cycle queues up to {needed} messages")]
    ChannelTooSmall { capacity: usize, needed: usize },
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusBridgeConfig {
    /// MQTT broker settings
    pub mqtt: MqttConfig,

    /// Network reachability probe
    #[serde(default)]
    pub network: NetworkConfig,

    /// Serial line and Modbus settings
    #[serde(default)]
    pub modbus: ModbusConfig,

    /// Sensors to read, in poll order (default: the Solis register map)
    #[serde(default = "default_sensors")]
    pub sensors: Vec<SensorConfig>,

    /// Prefix for sensor topics without an explicit topic (default: "inverter")
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// Poll loop timing
    #[serde(default)]
    pub poll: PollConfig,

    /// Backoff for both the network link and the broker session
    #[serde(default)]
    pub reconnect: BackoffConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_topic_prefix() -> String {
    DEFAULT_TOPIC_PREFIX.to_string()
}

/// Serial line and Modbus RTU settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModbusConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
    #[serde(default = "default_port")]
    pub port: String,

    /// Baud rate (default: 9600)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Data bits: 5-8 (default: 8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,

    /// Parity: "none", "even", or "odd" (default: "none")
    #[serde(default = "default_parity")]
    pub parity: String,

    /// Stop bits: 1 or 2 (default: 1)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,

    /// Modbus unit/slave ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Response timeout per transaction in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Line settle time around each transaction in milliseconds
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// How the RS485 driver direction is switched
    #[serde(default)]
    pub direction: DirectionConfig,
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_settle_ms() -> u64 {
    15
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: default_parity(),
            stop_bits: default_stop_bits(),
            unit_id: default_unit_id(),
            timeout_ms: default_timeout_ms(),
            settle_ms: default_settle_ms(),
            direction: DirectionConfig::default(),
        }
    }
}

impl ModbusConfig {
    pub fn parity(&self) -> Result<tokio_serial::Parity, ConfigError> {
        match self.parity.to_lowercase().as_str() {
            "none" => Ok(tokio_serial::Parity::None),
            "even" => Ok(tokio_serial::Parity::Even),
            "odd" => Ok(tokio_serial::Parity::Odd),
            other => Err(ConfigError::Serial(format!(
                "invalid parity '{}' (use none, even, or odd)",
                other
            ))),
        }
    }

    pub fn data_bits(&self) -> Result<tokio_serial::DataBits, ConfigError> {
        match self.data_bits {
            5 => Ok(tokio_serial::DataBits::Five),
            6 => Ok(tokio_serial::DataBits::Six),
            7 => Ok(tokio_serial::DataBits::Seven),
            8 => Ok(tokio_serial::DataBits::Eight),
            other => Err(ConfigError::Serial(format!(
                "invalid data_bits {} (use 5-8)",
                other
            ))),
        }
    }

    pub fn stop_bits(&self) -> Result<tokio_serial::StopBits, ConfigError> {
        match self.stop_bits {
            1 => Ok(tokio_serial::StopBits::One),
            2 => Ok(tokio_serial::StopBits::Two),
            other => Err(ConfigError::Serial(format!(
                "invalid stop_bits {} (use 1 or 2)",
                other
            ))),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.port.is_empty() {
            return Err(ConfigError::Serial("port cannot be empty".to_string()));
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::Serial("baud_rate must be positive".to_string()));
        }
        if !(1..=247).contains(&self.unit_id) {
            return Err(ConfigError::InvalidUnitId(self.unit_id));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Serial("timeout_ms must be positive".to_string()));
        }
        self.parity()?;
        self.data_bits()?;
        self.stop_bits()?;
        Ok(())
    }
}

/// RS485 driver direction control.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DirectionConfig {
    /// The adapter or kernel switches direction; only the settle delays apply.
    #[default]
    Auto,
    /// The RTS line drives DE/RE.
    Rts {
        /// Drive RTS low to transmit.
        #[serde(default)]
        invert: bool,
    },
}

/// One entry of the sensor table as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Sensor name (used in logs and the default topic)
    pub name: String,

    /// Output topic (default: "<topic_prefix>/<name>")
    #[serde(default)]
    pub topic: Option<String>,

    /// Register address
    pub address: u16,

    /// Read function code: 4 (input registers) or 3 (holding registers)
    #[serde(default = "default_function_code")]
    pub function_code: u8,

    /// Scaling factor (value * scale)
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Unit of measurement (logged, not published)
    #[serde(default)]
    pub unit: String,
}

fn default_function_code() -> u8 {
    FunctionCode::ReadInput.code()
}

fn default_scale() -> f64 {
    1.0
}

impl SensorConfig {
    fn input(name: &str, address: u16, scale: f64, unit: &str) -> Self {
        Self {
            name: name.to_string(),
            topic: None,
            address,
            function_code: default_function_code(),
            scale,
            unit: unit.to_string(),
        }
    }
}

/// The Solis inverter register map.
pub fn default_sensors() -> Vec<SensorConfig> {
    vec![
        SensorConfig::input("active_power", 3004, 1.0, "W"),
        SensorConfig::input("inverter_temp", 3041, 0.1, "°C"),
        SensorConfig::input("total_power", 3008, 1.0, "kWh"),
        SensorConfig::input("generation_today", 3014, 0.1, "kWh"),
        SensorConfig::input("generation_yesterday", 3015, 0.1, "kWh"),
        SensorConfig::input("total_dc_output_power", 3006, 1.0, "W"),
        SensorConfig::input("energy_this_month", 3010, 1.0, "kWh"),
        SensorConfig::input("generation_last_month", 3012, 1.0, "kWh"),
        SensorConfig::input("generation_this_year", 3016, 1.0, "kWh"),
        SensorConfig::input("generation_last_year", 3018, 1.0, "kWh"),
        SensorConfig::input("v_dc1", 3021, 0.1, "V"),
        SensorConfig::input("i_dc1", 3022, 0.1, "A"),
        SensorConfig::input("v_ac", 3035, 0.1, "V"),
        SensorConfig::input("i_ac", 3038, 0.1, "A"),
        SensorConfig::input("grid_frequency", 3042, 0.01, "Hz"),
    ]
}

/// A validated sensor, ready to poll.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorDescriptor {
    pub name: String,
    pub topic: String,
    pub address: u16,
    pub function: FunctionCode,
    pub scale: f64,
    pub unit: String,
}

/// What the poller does after a failed read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadErrorPolicy {
    /// Skip the remaining sensors for this cycle.
    #[default]
    Abort,
    /// Keep reading the remaining sensors.
    Continue,
}

/// Poll loop timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay between cycles in milliseconds (default: 2000)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Delay between successive register reads in milliseconds (default: 100)
    #[serde(default = "default_inter_read_delay_ms")]
    pub inter_read_delay_ms: u64,

    /// Behaviour after a failed read (default: abort)
    #[serde(default)]
    pub on_read_error: ReadErrorPolicy,
}

fn default_interval_ms() -> u64 {
    2000
}

fn default_inter_read_delay_ms() -> u64 {
    100
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            inter_read_delay_ms: default_inter_read_delay_ms(),
            on_read_error: ReadErrorPolicy::default(),
        }
    }
}

impl ModbusBridgeConfig {
    /// Resolve and check the sensor table.
    pub fn sensor_table(&self) -> Result<Vec<SensorDescriptor>, ConfigError> {
        if self.sensors.is_empty() {
            return Err(ConfigError::NoSensors);
        }

        let topics = TopicBuilder::new(&self.topic_prefix);
        let mut names = HashSet::new();
        let mut seen_topics: Vec<(String, String)> = Vec::new();
        let mut table = Vec::with_capacity(self.sensors.len());

        for (index, sensor) in self.sensors.iter().enumerate() {
            if sensor.name.trim().is_empty() {
                return Err(ConfigError::EmptySensorName { index });
            }
            if !names.insert(sensor.name.as_str()) {
                return Err(ConfigError::DuplicateSensor(sensor.name.clone()));
            }

            let function = FunctionCode::try_from(sensor.function_code).map_err(|code| {
                ConfigError::UnsupportedFunctionCode {
                    sensor: sensor.name.clone(),
                    code,
                }
            })?;

            if !sensor.scale.is_finite() {
                return Err(ConfigError::InvalidScale {
                    sensor: sensor.name.clone(),
                });
            }

            let topic = sensor
                .topic
                .clone()
                .unwrap_or_else(|| topics.build(&sensor.name));
            validate_topic(&topic).map_err(|e| ConfigError::InvalidTopic {
                sensor: sensor.name.clone(),
                reason: e.to_string(),
            })?;
            if let Some((_, first)) = seen_topics.iter().find(|(t, _)| *t == topic) {
                return Err(ConfigError::DuplicateTopic {
                    topic,
                    first: first.clone(),
                    second: sensor.name.clone(),
                });
            }
            seen_topics.push((topic.clone(), sensor.name.clone()));

            table.push(SensorDescriptor {
                name: sensor.name.clone(),
                topic,
                address: sensor.address,
                function,
                scale: sensor.scale,
                unit: sensor.unit.clone(),
            });
        }

        let status = topics.status_topic();
        if let Some((_, sensor)) = seen_topics.iter().find(|(t, _)| *t == status) {
            return Err(ConfigError::InvalidTopic {
                sensor: sensor.clone(),
                reason: format!("'{}' is reserved for the cycle status", status),
            });
        }

        Ok(table)
    }

    /// Check everything except the broker settings.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.modbus.validate()?;
        let table = self.sensor_table()?;

        // One message per sensor plus the status, all queued before the flush.
        let needed = table.len() + 1;
        if self.mqtt.channel_capacity < needed {
            return Err(ConfigError::ChannelTooSmall {
                capacity: self.mqtt.channel_capacity,
                needed,
            });
        }

        validate_topic(&TopicBuilder::new(&self.topic_prefix).status_topic()).map_err(|e| {
            ConfigError::InvalidTopic {
                sensor: "status".to_string(),
                reason: e.to_string(),
            }
        })?;

        if self.poll.interval_ms == 0 {
            return Err(ConfigError::Poll("interval_ms must be positive".to_string()));
        }
        self.reconnect.validate().map_err(ConfigError::Backoff)?;
        Ok(())
    }
}

impl BridgeConfig for ModbusBridgeConfig {
    fn mqtt(&self) -> &MqttConfig {
        &self.mqtt
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> solarsight_bridge_framework::Result<()> {
        self.mqtt
            .validate()
            .map_err(|e| BridgeError::validation(e.to_string()))?;
        self.check()
            .map_err(|e| BridgeError::validation(e.to_string()))
    }
}
