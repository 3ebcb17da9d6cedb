//! Tracing subscriber initialisation.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::ClientError;

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured filter. Logs go to stderr so
/// CLI output on stdout stays machine-readable.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ClientError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| ClientError::Telemetry(format!("Invalid log filter: {}", e)))?;

    let json_layer = config
        .json
        .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!config.json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| ClientError::Telemetry(e.to_string()))?;

    tracing::debug!(filter = %config.filter, json = config.json, "Logging initialized");
    Ok(())
}
