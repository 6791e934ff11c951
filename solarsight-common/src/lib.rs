//! Shared building blocks for SolarSight bridges.
//!
//! - [`reading`] - Scaled register readings and the per-cycle status flag
//! - [`config`] - Configuration loading (JSON5 format)
//! - [`session`] - MQTT client option construction
//! - [`topic`] - Topic builders and validation
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod reading;
pub mod session;
pub mod topic;

pub use config::{LogFormat, LoggingConfig, MqttConfig, parse_config};
pub use error::{Error, Result};
pub use reading::{CycleStatus, Reading, format_payload, scale_raw};
pub use session::mqtt_options;
pub use topic::{DEFAULT_TOPIC_PREFIX, TopicBuilder, validate_topic};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.level` when set. Fails if the level cannot be
/// parsed or a subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            Error::Config(format!("Invalid log level '{}': {}", config.level, e))
        })?,
    };

    let output = match config.format {
        LogFormat::Text => fmt::layer().boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    };

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))
}
