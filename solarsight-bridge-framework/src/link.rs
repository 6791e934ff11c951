//! Connection links and bounded reconnection.
//!
//! A [`Link`] is anything the bridge must have up before it can do useful
//! work (the network path, the broker session). [`Reconnector`] drives a link
//! from `Disconnected` through `Connecting` to `Connected`, sleeping an
//! exponentially growing delay between failed attempts and giving up after
//! [`BackoffConfig::max_attempts`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while bringing a link up or using it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    /// A single connect attempt failed.
    #[error("{link}: connect attempt failed: {message}")]
    Attempt { link: String, message: String },

    /// A single connect attempt did not finish in time.
    #[error("{link}: connect attempt timed out after {timeout_ms} ms")]
    Timeout { link: String, timeout_ms: u64 },

    /// The retry budget was spent without connecting.
    #[error("{link}: giving up after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        link: String,
        attempts: u32,
        last_error: String,
    },
}

impl LinkError {
    /// Create an attempt error.
    pub fn attempt(link: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Attempt {
            link: link.into(),
            message: message.to_string(),
        }
    }
}

/// Observable state of a link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying.
    #[default]
    Disconnected,
    /// A connect attempt is in progress (1-based).
    Connecting { attempt: u32 },
    /// Connected as of the last check.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting { attempt } => {
                write!(f, "connecting (attempt {})", attempt)
            }
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// A connection the bridge depends on.
///
/// `is_connected` must not block: failures are detected lazily, on the next
/// use of the link, and reported through [`Link::mark_disconnected`].
#[allow(async_fn_in_trait)]
pub trait Link {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Whether the link was up the last time it was used.
    fn is_connected(&self) -> bool;

    /// Make one connection attempt.
    async fn try_connect(&mut self) -> Result<(), LinkError>;

    /// Record that the link was found to be down.
    fn mark_disconnected(&mut self);
}

/// Exponential backoff settings for reconnecting a link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay after the first failed attempt, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound on the delay between attempts, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Factor applied to the delay after each failed attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Attempts per reconnect before giving up; `null` retries forever.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<u32>,
}

fn default_initial_delay_ms() -> u64 {
    5000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_attempts() -> Option<u32> {
    Some(10)
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl BackoffConfig {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = delay_ms.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Validate the backoff settings.
    pub fn validate(&self) -> Result<(), String> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!(
                "backoff multiplier must be >= 1.0 (got {})",
                self.multiplier
            ));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(format!(
                "max_delay_ms ({}) is below initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            ));
        }
        if self.max_attempts == Some(0) {
            return Err("max_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Drives a [`Link`] to the connected state.
#[derive(Debug)]
pub struct Reconnector {
    policy: BackoffConfig,
    state: ConnectionState,
}

impl Reconnector {
    /// Create a reconnector with the given backoff policy.
    pub fn new(policy: BackoffConfig) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
        }
    }

    /// Current state of the driven link.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Ensure `link` is connected, retrying with backoff if it is not.
    ///
    /// Returns immediately when the link already reports connected. Otherwise
    /// attempts to connect until success or until `max_attempts` attempts have
    /// failed, in which case the state goes back to `Disconnected`.
    pub async fn ensure<L: Link>(&mut self, link: &mut L) -> Result<(), LinkError> {
        if link.is_connected() {
            self.state = ConnectionState::Connected;
            return Ok(());
        }

        let mut attempt = 0u32;
        loop {
            attempt = attempt.saturating_add(1);
            self.state = ConnectionState::Connecting { attempt };
            tracing::info!(link = %link.name(), attempt, "Connecting");

            let error = match link.try_connect().await {
                Ok(()) => {
                    self.state = ConnectionState::Connected;
                    tracing::info!(link = %link.name(), attempt, "Connected");
                    return Ok(());
                }
                Err(e) => e,
            };

            if let Some(max) = self.policy.max_attempts {
                if attempt >= max {
                    self.state = ConnectionState::Disconnected;
                    tracing::error!(
                        link = %link.name(),
                        attempts = attempt,
                        error = %error,
                        "Giving up on link"
                    );
                    return Err(LinkError::RetriesExhausted {
                        link: link.name().to_string(),
                        attempts: attempt,
                        last_error: error.to_string(),
                    });
                }
            }

            let delay = self.policy.delay_for(attempt);
            tracing::warn!(
                link = %link.name(),
                attempt,
                error = %error,
                retry_in_ms = delay.as_millis() as u64,
                "Connect attempt failed"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
