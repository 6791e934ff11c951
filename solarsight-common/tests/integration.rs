//! Integration tests for solarsight-common library.

use solarsight_common::{
    CycleStatus, MqttConfig, Reading, TopicBuilder, mqtt_options, parse_config, validate_topic,
};

#[test]
fn test_reading_to_topic_and_payload() {
    let topics = TopicBuilder::default();

    let reading = Reading::new(
        "grid_frequency",
        topics.build("grid_frequency"),
        5001,
        0.01,
        "Hz",
    );

    assert_eq!(reading.topic, "inverter/grid_frequency");
    assert_eq!(reading.payload(), "50.01");
    assert!(validate_topic(&reading.topic).is_ok());
}

#[test]
fn test_status_topic_and_payload() {
    let topics = TopicBuilder::default();
    let status = topics.status_topic();

    assert_eq!(status, "inverter/status");
    assert_eq!(CycleStatus::Ok.as_payload(), "ok");
    assert_eq!(CycleStatus::Err.as_payload(), "err");
}

#[test]
fn test_config_to_client_options() {
    let config: MqttConfig = parse_config(
        r#"{
            host: "192.168.1.20",
            client_id: "ESP32Client",
            username: "solar",
            password: "pw",
            keep_alive_secs: 30,
        }"#,
    )
    .expect("config should parse");
    config.validate().expect("config should validate");

    let options = mqtt_options(&config);
    assert_eq!(options.client_id(), "ESP32Client");
    assert_eq!(options.broker_address().0, "192.168.1.20");
    assert_eq!(options.keep_alive().as_secs(), 30);
}
