//! SolarSight Bridge Framework
//!
//! Common abstractions for building bridges that publish readings to MQTT.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (startup, shutdown, signal handling)
//! - [`Link`] and [`Reconnector`] for bounded, backoff-driven reconnection
//! - [`MqttSession`] for publishing to an MQTT broker
//! - [`TcpProbeLink`] for checking that the network path to the broker is up
//! - [`StatusPublisher`] for the per-cycle `ok`/`err` status message
//! - [`BridgeArgs`] for common CLI argument parsing
//!
//! # Example
//!
//! ```ignore
//! use solarsight_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("mybridge.json5");
//!     let config = MyBridgeConfig::load(&args.config)?;
//!
//!     let runner = BridgeRunner::new_with_args("mybridge", config, Some(&args))?;
//!     let worker = my_worker(runner.config());
//!
//!     // Run until Ctrl+C
//!     runner.run(worker).await
//! }
//! ```

mod args;
mod config;
mod error;
mod link;
mod network;
mod publisher;
mod runner;
mod status;

pub use args::BridgeArgs;
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use link::{BackoffConfig, ConnectionState, Link, LinkError, Reconnector};
pub use network::{NetworkConfig, TcpProbeLink};
pub use publisher::{InboundHandler, MqttSession, Publish, PublishError};
pub use runner::BridgeRunner;
pub use status::StatusPublisher;

// Re-export commonly used types from solarsight-common
pub use solarsight_common::{CycleStatus, LoggingConfig, MqttConfig, Reading, TopicBuilder};
