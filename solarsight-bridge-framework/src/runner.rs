//! Bridge runner for lifecycle management.

use std::future::Future;

use tokio::signal;

use solarsight_common::{LoggingConfig, init_tracing};

use crate::BridgeArgs;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};

/// Bridge runner that manages the lifecycle of a bridge.
///
/// Handles:
/// - Logging initialization (with CLI override)
/// - Running the bridge worker until it ends or Ctrl+C is received
///
/// # Example
///
/// ```ignore
/// use solarsight_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() -> anyhow::Result<()> {
///     let args = BridgeArgs::parse_with_default("mybridge.json5");
///     let config = MyBridgeConfig::load(&args.config)?;
///
///     let runner = BridgeRunner::new_with_args("mybridge", config, Some(&args))?;
///     let worker = my_worker(runner.config().clone());
///     runner.run(worker).await?;
///     Ok(())
/// }
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    /// Bridge name for logging.
    name: String,
    /// The loaded configuration.
    config: C,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a bridge runner and initialize logging, letting CLI args
    /// override the configured level.
    pub fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
    ) -> Result<Self> {
        let name = name.into();

        let log_config = effective_logging(config.logging(), args);
        init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))?;

        tracing::info!(
            bridge = %name,
            version = env!("CARGO_PKG_VERSION"),
            "Starting bridge"
        );

        Ok(Self { name, config })
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Run `worker` until it finishes or Ctrl+C is received.
    ///
    /// The worker is dropped on shutdown; it runs on the caller's task, so
    /// this works on a single-threaded runtime and does not require `Send`.
    pub async fn run<F>(self, worker: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(bridge = %self.name, "Bridge running. Press Ctrl+C to stop.");

        tokio::select! {
            _ = worker => {
                tracing::warn!(bridge = %self.name, "Bridge worker exited");
            }
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                    return Err(BridgeError::Io(e));
                }
                tracing::info!(bridge = %self.name, "Received shutdown signal");
            }
        }

        tracing::info!(bridge = %self.name, "Goodbye!");
        Ok(())
    }
}

/// Resolve the logging configuration, letting `--log-level` win over the file.
fn effective_logging(config: &LoggingConfig, args: Option<&BridgeArgs>) -> LoggingConfig {
    match args.and_then(|a| a.log_level.as_ref()) {
        Some(level) => LoggingConfig {
            level: level.clone(),
            format: config.format,
        },
        None => config.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solarsight_common::LogFormat;
    use std::path::PathBuf;

    #[test]
    fn test_cli_level_overrides_config() {
        let config = LoggingConfig {
            level: "info".to_string(),
            format: LogFormat::Json,
        };
        let args = BridgeArgs {
            config: PathBuf::from("inverter.json5"),
            log_level: Some("trace".to_string()),
            check_config: false,
        };

        let resolved = effective_logging(&config, Some(&args));
        assert_eq!(resolved.level, "trace");
        assert_eq!(resolved.format, LogFormat::Json);
    }

    #[test]
    fn test_config_level_without_override() {
        let config = LoggingConfig::default();
        let resolved = effective_logging(&config, None);
        assert_eq!(resolved.level, "info");
    }
}
