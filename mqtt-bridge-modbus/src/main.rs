//! MQTT bridge for a Modbus RTU solar inverter.
//!
//! Polls the inverter's registers over RS485 and publishes them to MQTT.

use anyhow::{Context, Result};
use mqtt_bridge_modbus::config::ModbusBridgeConfig;
use mqtt_bridge_modbus::supervisor::Supervisor;
use mqtt_bridge_modbus::transport::open_rtu;
use solarsight_bridge_framework::{
    BridgeArgs, BridgeConfig, BridgeRunner, MqttSession, TcpProbeLink,
};
use tracing::info;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse_with_default("inverter.json5");

    let config = ModbusBridgeConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    if args.check_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let runner = BridgeRunner::new_with_args("mqtt-bridge-modbus", config, Some(&args))?;
    let config = runner.config();
    info!("Loaded configuration from {:?}", args.config);

    let transport = open_rtu(&config.modbus)
        .with_context(|| format!("Failed to open Modbus line on {}", config.modbus.port))?;
    info!(
        port = %config.modbus.port,
        unit_id = config.modbus.unit_id,
        "Modbus RTU line ready"
    );

    let network = TcpProbeLink::from_config(&config.network, &config.mqtt);
    info!(endpoint = %network.endpoint(), "Network probe configured");

    let session = MqttSession::new(&config.mqtt);
    info!(
        broker = %format!("{}:{}", config.mqtt.host, config.mqtt.port),
        client_id = %config.mqtt.client_id,
        "MQTT session configured"
    );

    let supervisor = Supervisor::from_config(network, session, transport, config)?;

    runner.run(supervisor.run()).await?;
    Ok(())
}
