//! Network reachability link.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use solarsight_common::MqttConfig;
use tokio::net::TcpStream;

use crate::link::{Link, LinkError};

/// Network link settings.
///
/// The bridge treats the network as up when a TCP connection to the probe
/// endpoint succeeds. The endpoint defaults to the MQTT broker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Host to probe (default: the MQTT broker host).
    #[serde(default)]
    pub probe_host: Option<String>,

    /// Port to probe (default: the MQTT broker port).
    #[serde(default)]
    pub probe_port: Option<u16>,

    /// Timeout for one probe, in milliseconds (default: 3000).
    #[serde(default)]
    pub probe_timeout_ms: Option<u64>,
}

const DEFAULT_PROBE_TIMEOUT_MS: u64 = 3000;

/// A [`Link`] that is up when a TCP endpoint accepts connections.
#[derive(Debug, Clone)]
pub struct TcpProbeLink {
    host: String,
    port: u16,
    timeout: Duration,
    connected: bool,
}

impl TcpProbeLink {
    /// Create a probe for `host:port`.
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            connected: false,
        }
    }

    /// Create a probe from the network settings, falling back to the broker address.
    pub fn from_config(network: &NetworkConfig, mqtt: &MqttConfig) -> Self {
        Self::new(
            network
                .probe_host
                .clone()
                .unwrap_or_else(|| mqtt.host.clone()),
            network.probe_port.unwrap_or(mqtt.port),
            Duration::from_millis(network.probe_timeout_ms.unwrap_or(DEFAULT_PROBE_TIMEOUT_MS)),
        )
    }

    /// The probed endpoint as `host:port`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Link for TcpProbeLink {
    fn name(&self) -> &str {
        "network"
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn try_connect(&mut self) -> Result<(), LinkError> {
        let endpoint = self.endpoint();
        tracing::debug!(endpoint = %endpoint, "Probing network");

        let stream = tokio::time::timeout(
            self.timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| LinkError::Timeout {
            link: self.name().to_string(),
            timeout_ms: self.timeout.as_millis() as u64,
        })?
        .map_err(|e| LinkError::attempt(self.name(), format!("{}: {}", endpoint, e)))?;

        drop(stream);
        self.connected = true;
        Ok(())
    }

    fn mark_disconnected(&mut self) {
        self.connected = false;
    }
}
