//! MQTT publishing.

use std::time::Duration;

use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Outgoing, Packet, QoS};
use solarsight_common::{MqttConfig, mqtt_options};
use thiserror::Error;
use tokio::time::timeout;

use crate::link::{Link, LinkError};

/// How long `service_inbound` waits for the next broker event before returning.
const PUMP_WINDOW: Duration = Duration::from_millis(10);

/// Upper bound on events handled by one `service_inbound` call.
const PUMP_MAX_EVENTS: usize = 64;

/// Errors raised while publishing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    /// The message could not be queued.
    #[error("Failed to queue message for {topic}: {message}")]
    Enqueue { topic: String, message: String },

    /// The broker connection failed while sending.
    #[error("Broker connection lost: {0}")]
    Connection(String),

    /// Queued messages were not written before the flush timeout.
    #[error("{pending} message(s) still queued after {timeout_ms} ms")]
    FlushTimeout { pending: usize, timeout_ms: u64 },
}

/// Sink for the bridge's outgoing messages.
#[allow(async_fn_in_trait)]
pub trait Publish {
    /// Queue `payload` for `topic`.
    async fn publish(&mut self, topic: &str, payload: &str) -> Result<(), PublishError>;

    /// Wait until every queued message has been handed to the network.
    async fn flush(&mut self) -> Result<(), PublishError>;

    /// Process whatever the broker has sent since the last call.
    async fn service_inbound(&mut self) -> Result<(), PublishError>;
}

/// Callback invoked for each inbound publish: `(topic, payload)`.
pub type InboundHandler = Box<dyn FnMut(&str, &[u8]) + Send>;

/// A broker session over rumqttc.
///
/// The session is driven explicitly: nothing reaches the network unless one
/// of [`Link::try_connect`], [`Publish::flush`] or [`Publish::service_inbound`]
/// is polling the event loop. Messages are published QoS 0, not retained.
pub struct MqttSession {
    client: AsyncClient,
    eventloop: EventLoop,
    connected: bool,
    connect_timeout: Duration,
    flush_timeout: Duration,
    pending: usize,
    inbound: InboundHandler,
}

impl std::fmt::Debug for MqttSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSession")
            .field("connected", &self.connected)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl MqttSession {
    /// Create a session from the broker configuration. Does not connect.
    pub fn new(config: &MqttConfig) -> Self {
        let (client, eventloop) = AsyncClient::new(mqtt_options(config), config.channel_capacity);
        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);

        Self {
            client,
            eventloop,
            connected: false,
            connect_timeout,
            flush_timeout: connect_timeout,
            pending: 0,
            inbound: Box::new(|topic, payload| {
                tracing::debug!(topic = %topic, bytes = payload.len(), "Ignoring inbound message");
            }),
        }
    }

    /// Replace the inbound message handler.
    pub fn with_inbound_handler(mut self, handler: InboundHandler) -> Self {
        self.inbound = handler;
        self
    }

    /// Number of queued messages not yet handed to the network.
    pub fn pending(&self) -> usize {
        self.pending
    }

    async fn wait_for_connack(&mut self) -> Result<(), LinkError> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        return Ok(());
                    }
                    return Err(LinkError::attempt(
                        self.name(),
                        format!("broker refused connection: {:?}", ack.code),
                    ));
                }
                Ok(event) => self.handle_event(event),
                Err(e) => return Err(LinkError::attempt(self.name(), e)),
            }
        }
    }

    async fn drain_pending(&mut self) -> Result<(), PublishError> {
        while self.pending > 0 {
            match self.eventloop.poll().await {
                Ok(event) => self.handle_event(event),
                Err(e) => {
                    self.mark_disconnected();
                    return Err(PublishError::Connection(e.to_string()));
                }
            }
        }
        Ok(())
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Outgoing(Outgoing::Publish(_)) => {
                self.pending = self.pending.saturating_sub(1);
            }
            Event::Incoming(Packet::Publish(publish)) => {
                (self.inbound)(publish.topic.as_str(), publish.payload.as_ref());
            }
            Event::Incoming(Packet::Disconnect) => {
                tracing::warn!("Broker sent DISCONNECT");
                self.connected = false;
            }
            other => {
                tracing::trace!(event = ?other, "MQTT event");
            }
        }
    }
}

impl Link for MqttSession {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn try_connect(&mut self) -> Result<(), LinkError> {
        let result = match timeout(self.connect_timeout, self.wait_for_connack()).await {
            Ok(result) => result,
            Err(_) => Err(LinkError::Timeout {
                link: self.name().to_string(),
                timeout_ms: self.connect_timeout.as_millis() as u64,
            }),
        };
        self.connected = result.is_ok();
        result
    }

    /// Drop the broker connection so the next attempt starts from a fresh
    /// CONNECT. Requests still queued are replayed after reconnecting.
    fn mark_disconnected(&mut self) {
        self.eventloop.clean();
        self.connected = false;
        self.pending = 0;
    }
}

impl Publish for MqttSession {
    async fn publish(&mut self, topic: &str, payload: &str) -> Result<(), PublishError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes())
            .map_err(|e| PublishError::Enqueue {
                topic: topic.to_string(),
                message: e.to_string(),
            })?;
        self.pending += 1;
        tracing::debug!(topic = %topic, payload = %payload, "Queued");
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), PublishError> {
        match timeout(self.flush_timeout, self.drain_pending()).await {
            Ok(result) => result,
            Err(_) => {
                let pending = self.pending;
                self.mark_disconnected();
                Err(PublishError::FlushTimeout {
                    pending,
                    timeout_ms: self.flush_timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn service_inbound(&mut self) -> Result<(), PublishError> {
        for _ in 0..PUMP_MAX_EVENTS {
            match timeout(PUMP_WINDOW, self.eventloop.poll()).await {
                Err(_) => break,
                Ok(Ok(event)) => self.handle_event(event),
                Ok(Err(e)) => {
                    self.mark_disconnected();
                    return Err(PublishError::Connection(e.to_string()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::Publish as PublishPacket;
    use std::sync::{Arc, Mutex};

    fn session() -> MqttSession {
        MqttSession::new(&MqttConfig::new("127.0.0.1"))
    }

    #[tokio::test]
    async fn test_publish_queues_without_connection() {
        let mut session = session();
        session.publish("inverter/v_ac", "230.10").await.unwrap();
        session.publish("inverter/status", "ok").await.unwrap();
        assert_eq!(session.pending(), 2);
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_flush_with_nothing_pending() {
        let mut session = session();
        session.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_outgoing_publish_clears_pending() {
        let mut session = session();
        session.pending = 2;

        session.handle_event(Event::Outgoing(Outgoing::Publish(0)));
        assert_eq!(session.pending(), 1);
        session.handle_event(Event::Outgoing(Outgoing::Publish(0)));
        session.handle_event(Event::Outgoing(Outgoing::Publish(0)));
        assert_eq!(session.pending(), 0);
    }

    #[tokio::test]
    async fn test_inbound_handler_receives_publishes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut session = session().with_inbound_handler(Box::new(move |topic, payload| {
            sink.lock()
                .unwrap()
                .push((topic.to_string(), payload.to_vec()));
        }));

        let packet = PublishPacket::new("inverter/cmd", QoS::AtMostOnce, "reset");
        session.handle_event(Event::Incoming(Packet::Publish(packet)));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "inverter/cmd");
        assert_eq!(seen[0].1, b"reset");
    }

    #[tokio::test]
    async fn test_disconnect_packet_marks_down() {
        let mut session = session();
        session.connected = true;
        session.handle_event(Event::Incoming(Packet::Disconnect));
        assert!(!session.is_connected());
    }
}
