//! Tracing subscriber setup

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;
use crate::error::FederationError;

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins when set; otherwise `fediwire=<level>` is used.
/// `format` selects a json or pretty fmt layer.
///
/// # Errors
/// Returns `Config` if a global subscriber is already installed
pub fn init(config: &LoggingConfig) -> Result<(), FederationError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fediwire={}", config.level)));

    let result = if config.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
    };

    result.map_err(|e| FederationError::Config(format!("Failed to install logger: {}", e)))
}
