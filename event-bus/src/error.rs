//! Error types for the event bus client

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Timeout waiting for {resource} to reach state: {expected}")]
    Timeout { resource: String, expected: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),
}

impl EventBusError {
    /// Transient failures worth retrying; validation and configuration
    /// errors are caller bugs and never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EventBusError::Broker(_) | EventBusError::Timeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EventBusError>;
