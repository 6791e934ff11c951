//! The bridge loop: keep both links up, poll the inverter, publish.

use std::time::Duration;

use solarsight_bridge_framework::{
    BridgeError, CycleStatus, Link, Publish, Reconnector, StatusPublisher, TopicBuilder,
};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, ModbusBridgeConfig};
use crate::poller::{PollReport, RegisterPoller};
use crate::transport::RegisterTransport;

/// What a completed cycle did.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub poll: PollReport,
    pub published: usize,
    pub status: CycleStatus,
}

/// Drives the network link, the broker session and the poller.
///
/// Each cycle brings the network link up, then the broker session, then
/// services inbound broker traffic, reads the sensor table and publishes one
/// message per reading followed by the cycle status. A cycle whose links
/// cannot be established is skipped without polling.
pub struct Supervisor<N, B, T> {
    network: N,
    broker: B,
    transport: T,
    network_link: Reconnector,
    broker_link: Reconnector,
    poller: RegisterPoller,
    status: StatusPublisher,
    interval: Duration,
}

impl<N, B, T> Supervisor<N, B, T>
where
    N: Link,
    B: Link + Publish,
    T: RegisterTransport,
{
    /// Build a supervisor from the bridge configuration.
    pub fn from_config(
        network: N,
        broker: B,
        transport: T,
        config: &ModbusBridgeConfig,
    ) -> Result<Self, ConfigError> {
        let poller = RegisterPoller::new(
            config.sensor_table()?,
            Duration::from_millis(config.poll.inter_read_delay_ms),
            config.poll.on_read_error,
        );

        Ok(Self {
            network,
            broker,
            transport,
            network_link: Reconnector::new(config.reconnect.clone()),
            broker_link: Reconnector::new(config.reconnect.clone()),
            poller,
            status: StatusPublisher::for_topics(&TopicBuilder::new(&config.topic_prefix)),
            interval: Duration::from_millis(config.poll.interval_ms),
        })
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run one cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, BridgeError> {
        self.network_link.ensure(&mut self.network).await?;

        if let Err(e) = self.broker_link.ensure(&mut self.broker).await {
            self.network.mark_disconnected();
            return Err(e.into());
        }

        match self.exchange().await {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!(error = %e, "Broker failure, invalidating links");
                self.broker.mark_disconnected();
                self.network.mark_disconnected();
                Err(e)
            }
        }
    }

    async fn exchange(&mut self) -> Result<CycleReport, BridgeError> {
        self.broker.service_inbound().await?;

        let poll = self.poller.poll(&mut self.transport).await;

        for reading in &poll.readings {
            self.broker
                .publish(&reading.topic, &reading.payload())
                .await?;
        }

        let status = poll.status();
        self.status.publish(&mut self.broker, status).await?;
        self.broker.flush().await?;

        Ok(CycleReport {
            published: poll.readings.len(),
            status,
            poll,
        })
    }

    /// Run cycles forever, sleeping the poll interval between them.
    pub async fn run(mut self) {
        info!(
            sensors = self.poller.sensors().len(),
            interval_ms = self.interval.as_millis() as u64,
            status_topic = %self.status.topic(),
            "Starting inverter poll loop"
        );

        loop {
            match self.run_cycle().await {
                Ok(report) => {
                    debug!(
                        published = report.published,
                        status = %report.status,
                        "Cycle complete"
                    );
                }
                Err(e) => {
                    error!(
                        error = %e,
                        network = %self.network_link.state(),
                        broker = %self.broker_link.state(),
                        "Cycle skipped"
                    );
                }
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}
