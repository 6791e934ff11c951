use std::time::Duration;

use rumqttc::MqttOptions;

use crate::config::MqttConfig;

/// Build rumqttc client options from the broker configuration.
///
/// Call [`MqttConfig::validate`] first; rumqttc panics on a keep-alive
/// shorter than its minimum.
pub fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_clean_session(true);

    if let Some(username) = &config.username {
        let password = config.password.clone().unwrap_or_default();
        options.set_credentials(username, password);
    }

    tracing::debug!(
        host = %config.host,
        port = config.port,
        client_id = %config.client_id,
        authenticated = config.username.is_some(),
        "Built MQTT options"
    );

    options
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_config() {
        let mut config = MqttConfig::new("broker.local");
        config.client_id = "ESP32Client".to_string();
        config.username = Some("solar".to_string());
        config.password = Some("secret".to_string());

        let options = mqtt_options(&config);

        assert_eq!(options.client_id(), "ESP32Client");
        assert_eq!(
            options.broker_address(),
            ("broker.local".to_string(), 1883)
        );
        assert_eq!(options.keep_alive(), Duration::from_secs(15));
        assert_eq!(
            options.credentials(),
            Some(("solar".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn test_anonymous_options() {
        let options = mqtt_options(&MqttConfig::new("localhost"));
        assert!(options.credentials().is_none());
        assert!(options.clean_session());
    }
}
