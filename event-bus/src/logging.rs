//! Structured logging setup
//!
//! Thin wrapper over `tracing-subscriber` so services using the client get
//! consistent log output without wiring the subscriber themselves. Filter
//! precedence: `EVENT_BUS_LOG_LEVEL`, then `RUST_LOG`, then the configured
//! default level.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{EventBusError, Result};

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    /// Human-readable format
    Pretty,
    /// JSON format for log aggregation
    Json,
    /// Compact format
    Compact,
}

pub struct LogConfig {
    pub level: &'static str,
    pub format: LogFormat,
    pub service_name: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info",
            format: LogFormat::Pretty,
            service_name: "event-bus".to_string(),
        }
    }
}

pub fn init_logging(config: LogConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_env("EVENT_BUS_LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(config.level));

    match config.format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_target(true).pretty())
                .try_init()
                .map_err(|e| EventBusError::Configuration(format!("logging setup: {e}")))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_target(true).with_current_span(true))
                .try_init()
                .map_err(|e| EventBusError::Configuration(format!("logging setup: {e}")))?;
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact().with_target(true))
                .try_init()
                .map_err(|e| EventBusError::Configuration(format!("logging setup: {e}")))?;
        }
    }

    tracing::info!(service = %config.service_name, "logging initialized");
    Ok(())
}

/// Quick setup with sensible defaults.
pub fn init_default_logging(service_name: &str) -> Result<()> {
    init_logging(LogConfig {
        service_name: service_name.to_string(),
        ..Default::default()
    })
}

/// JSON output for production log aggregation.
pub fn init_production_logging(service_name: &str) -> Result<()> {
    init_logging(LogConfig {
        service_name: service_name.to_string(),
        format: LogFormat::Json,
        level: "info",
    })
}
