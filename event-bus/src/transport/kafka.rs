//! rdkafka-backed transport

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::Message;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{InboundMessage, MessageSink, MessageSource};
use crate::config::EventBusConfig;
use crate::error::{EventBusError, Result};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Keyed producer over `FutureProducer`.
pub struct KafkaSink {
    producer: FutureProducer,
}

impl KafkaSink {
    pub fn new(config: &EventBusConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("message.timeout.ms", "30000")
            .set("max.in.flight.requests.per.connection", "5")
            .create()
            .map_err(|e| EventBusError::Broker(format!("failed to create producer: {e}")))?;
        Ok(Self { producer })
    }
}

#[async_trait]
impl MessageSink for KafkaSink {
    async fn send(&self, topic: &str, key: &[u8], payload: Vec<u8>) -> Result<()> {
        let record = FutureRecord::to(topic).key(key).payload(&payload);
        self.producer
            .send(record, Timeout::After(SEND_TIMEOUT))
            .await
            .map_err(|(e, _)| {
                EventBusError::Broker(format!("failed to deliver to '{topic}': {e}"))
            })?;
        Ok(())
    }

    async fn disconnect(&self) {
        if let Err(e) = self.producer.flush(Timeout::After(FLUSH_TIMEOUT)) {
            warn!(error = %e, "producer flush failed during shutdown");
        }
    }
}

/// Group consumer over `StreamConsumer`. rdkafka replaces the subscription
/// set on every subscribe call, so the accumulated topic list is kept here
/// and re-submitted whole.
pub struct KafkaSource {
    consumer: StreamConsumer,
    group_id: String,
    topics: Mutex<Vec<String>>,
}

impl KafkaSource {
    pub fn new(config: &EventBusConfig) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest")
            .set("allow.auto.create.topics", "false")
            .set("session.timeout.ms", "60000")
            .set("heartbeat.interval.ms", "10000")
            .set("max.in.flight.requests.per.connection", "5")
            .create()
            .map_err(|e| EventBusError::Broker(format!("failed to create consumer: {e}")))?;
        Ok(Self {
            consumer,
            group_id: config.group_id.clone(),
            topics: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn subscribe(&self, topic: &str) -> Result<()> {
        let mut topics = self.topics.lock().await;
        if !topics.iter().any(|t| t == topic) {
            topics.push(topic.to_string());
        }
        let subscription: Vec<&str> = topics.iter().map(String::as_str).collect();
        debug!(topic, "subscribing");
        self.consumer
            .subscribe(&subscription)
            .map_err(|e| EventBusError::Broker(format!("failed to subscribe to '{topic}': {e}")))
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        // Partition assignment arrives with the first group rebalance, which
        // the message loop drives; poll the assignment until it lands.
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let assigned = self
                .consumer
                .assignment()
                .map(|partitions| partitions.count())
                .unwrap_or(0);
            if assigned > 0 {
                debug!(group = %self.group_id, assigned, "consumer group ready");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(EventBusError::Timeout {
                    resource: self.group_id.clone(),
                    expected: "partition assignment".to_string(),
                });
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    async fn next(&self) -> Result<Option<InboundMessage>> {
        match self.consumer.recv().await {
            Ok(message) => Ok(Some(InboundMessage {
                topic: message.topic().to_string(),
                partition: message.partition(),
                key: message.key().map(|k| Bytes::copy_from_slice(k)),
                payload: message
                    .payload()
                    .map(Bytes::copy_from_slice)
                    .unwrap_or_default(),
            })),
            Err(e) => Err(EventBusError::Broker(format!("consume failed: {e}"))),
        }
    }

    async fn disconnect(&self) {
        self.consumer.unsubscribe();
        self.topics.lock().await.clear();
    }
}
