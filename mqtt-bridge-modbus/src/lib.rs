//! MQTT bridge for a Modbus RTU solar inverter.
//!
//! This bridge reads a table of 16-bit registers from an inverter on an
//! RS485 line and publishes the scaled values to an MQTT broker, followed
//! by an aggregate status for each poll cycle.
//!
//! # Topics
//!
//! ```text
//! <prefix>/<sensor>    e.g. inverter/inverter_temp -> "245.30"
//! <prefix>/status      "ok" or "err"
//! ```
//!
//! Payloads are ASCII decimals with two fraction digits, published QoS 0
//! and not retained.

pub mod config;
pub mod poller;
pub mod supervisor;
pub mod transport;
