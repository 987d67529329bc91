//! Broker transport seam
//!
//! The producer and consumer depend on byte-level send/receive interfaces,
//! not on the broker SDK. The rdkafka implementations live in
//! [`kafka`]; tests substitute mocks.

pub mod kafka;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

pub use kafka::{KafkaSink, KafkaSource};

/// A message as read off the broker, before envelope decoding.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub key: Option<Bytes>,
    pub payload: Bytes,
}

/// Producer-side wire: keyed byte publish.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, topic: &str, key: &[u8], payload: Vec<u8>) -> Result<()>;

    /// Flush and release the producer connection.
    async fn disconnect(&self);
}

/// Consumer-side wire: cumulative subscription plus a sequential message
/// stream.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Add a topic to the subscription set.
    async fn subscribe(&self, topic: &str) -> Result<()>;

    /// Resolve once the consumer group has completed its initial setup.
    async fn wait_ready(&self, timeout: Duration) -> Result<()>;

    /// Next message, or `None` once the source is closed. Errors are
    /// transient broker conditions; the caller decides whether to retry.
    async fn next(&self) -> Result<Option<InboundMessage>>;

    async fn disconnect(&self);
}
