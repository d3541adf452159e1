//! Logging initialization
//!
//! Provides a single place that installs the global `tracing` subscriber:
//! - `EnvFilter` driven by `RUST_LOG`, with a controller-friendly default
//! - Optional JSON structured output for log collectors
//! - Pod identity fields recorded once at startup

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter applied when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "info,tether=debug,kube=info,tower=warn,hyper=warn";

/// Errors that can occur during telemetry initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize tracing subscriber
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Configuration for telemetry initialization
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name recorded on the startup log line (e.g., "tether-operator")
    pub service_name: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "tether".to_string(),
            json: false,
        }
    }
}

/// Initialize the global tracing subscriber
///
/// Fails if a global subscriber has already been installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (json_layer, text_layer) = if config.json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_file(false)
            .with_line_number(false);
        (Some(layer), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer().with_target(true)))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::SubscriberInit(e.to_string())
        })?;

    tracing::info!(
        service = %config.service_name,
        version = env!("CARGO_PKG_VERSION"),
        pod = std::env::var("POD_NAME").unwrap_or_default(),
        namespace = std::env::var("POD_NAMESPACE").unwrap_or_default(),
        "Telemetry initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_plain_text() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "tether");
        assert!(!config.json);
    }

    #[test]
    fn default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    #[test]
    fn second_init_fails() {
        let _ = init_telemetry(TelemetryConfig::default());
        let err = init_telemetry(TelemetryConfig::default()).unwrap_err();
        assert!(matches!(err, TelemetryError::SubscriberInit(_)));
    }
}
