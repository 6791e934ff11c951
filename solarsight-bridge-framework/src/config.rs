//! Loading bridge configuration files.

use std::io::ErrorKind;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{BridgeError, Result};
use crate::{LoggingConfig, MqttConfig};

/// Configuration of a bridge binary.
///
/// A bridge's top-level config struct carries at least an `mqtt` and a
/// `logging` section. Implementors get JSON5 loading for free and can add
/// their own checks on top of the broker validation.
///
/// ```ignore
/// #[derive(Debug, Deserialize)]
/// struct InverterBridge {
///     mqtt: MqttConfig,
///     #[serde(default)]
///     logging: LoggingConfig,
///     sensors: Vec<Sensor>,
/// }
///
/// impl BridgeConfig for InverterBridge {
///     fn mqtt(&self) -> &MqttConfig { &self.mqtt }
///     fn logging(&self) -> &LoggingConfig { &self.logging }
///
///     fn validate(&self) -> Result<()> {
///         self.mqtt.validate()?;
///         if self.sensors.is_empty() {
///             return Err(BridgeError::validation("sensor list is empty"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait BridgeConfig: Sized + DeserializeOwned {
    /// Broker settings.
    fn mqtt(&self) -> &MqttConfig;

    /// Logging settings.
    fn logging(&self) -> &LoggingConfig;

    /// Check the parsed configuration. The default only checks the broker.
    fn validate(&self) -> Result<()> {
        self.mqtt()
            .validate()
            .map_err(|e| BridgeError::validation(e.to_string()))
    }

    /// Read, parse and validate a JSON5 file.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            },
            _ => BridgeError::Io(e),
        })?;

        let config = Self::parse(&content)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate JSON5 text.
    fn parse(content: &str) -> Result<Self> {
        let config: Self = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct TestConfig {
        mqtt: MqttConfig,
        #[serde(default)]
        logging: LoggingConfig,
    }

    impl BridgeConfig for TestConfig {
        fn mqtt(&self) -> &MqttConfig {
            &self.mqtt
        }

        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }
    }

    #[test]
    fn test_config_not_found() {
        let result = TestConfig::load("/nonexistent/path.json5");
        assert!(matches!(result, Err(BridgeError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!(
            "solarsight-config-{}.json5",
            std::process::id()
        ));
        std::fs::write(
            &path,
            r#"{ mqtt: { host: "10.0.0.5" }, logging: { level: "debug" } }"#,
        )
        .unwrap();

        let config = TestConfig::load(&path);
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert_eq!(config.mqtt.host, "10.0.0.5");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_parse_valid() {
        let config = TestConfig::parse(r#"{ mqtt: { host: "broker" } }"#).unwrap();
        assert_eq!(config.mqtt.host, "broker");
        assert_eq!(config.logging().level, "info");
    }

    #[test]
    fn test_parse_error() {
        let result = TestConfig::parse("{ mqtt: ");
        assert!(matches!(result, Err(BridgeError::ConfigParse(_))));
    }

    #[test]
    fn test_default_validation_checks_broker() {
        let result = TestConfig::parse(r#"{ mqtt: { host: "broker", keep_alive_secs: 1 } }"#);
        assert!(matches!(result, Err(BridgeError::ConfigValidation(_))));
    }
}
