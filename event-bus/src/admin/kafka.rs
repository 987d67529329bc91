//! Admin API backend over rdkafka

use std::time::Duration;

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::types::RDKafkaErrorCode;
use async_trait::async_trait;
use tracing::debug;

use super::TopicAdmin;
use crate::config::EventBusConfig;
use crate::error::{EventBusError, Result};

/// Session timeout for the short-lived metadata consumers. These never join
/// a consumer group, so the value only bounds the connection handshake.
const METADATA_SESSION_TIMEOUT_MS: &str = "6000";

const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Direct broker administration through the Kafka admin API.
pub struct KafkaAdmin {
    brokers: String,
    admin: AdminClient<DefaultClientContext>,
    operation_timeout: Duration,
    metadata_timeout: Duration,
}

impl KafkaAdmin {
    pub fn new(config: &EventBusConfig) -> Result<Self> {
        let brokers = config.brokers.join(",");
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .create()
            .map_err(|e| EventBusError::Broker(format!("failed to create admin client: {e}")))?;
        Ok(Self {
            brokers,
            admin,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            metadata_timeout: DEFAULT_METADATA_TIMEOUT,
        })
    }

    /// Metadata lookups go through a short-lived consumer on a blocking
    /// thread; the admin client itself has no metadata surface.
    fn metadata_consumer(brokers: &str) -> Result<BaseConsumer> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", brokers)
            .set("session.timeout.ms", METADATA_SESSION_TIMEOUT_MS);
        client_config
            .create()
            .map_err(|e| EventBusError::Broker(format!("failed to create metadata consumer: {e}")))
    }

    fn admin_options(&self) -> AdminOptions {
        AdminOptions::new().operation_timeout(Some(self.operation_timeout))
    }
}

#[async_trait]
impl TopicAdmin for KafkaAdmin {
    async fn connect(&self) -> Result<()> {
        // librdkafka connects on first use; the client was validated at
        // construction time.
        debug!(brokers = %self.brokers, "admin interface ready");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        debug!("admin interface released");
        Ok(())
    }

    async fn list_topic_names(&self) -> Result<Vec<String>> {
        let brokers = self.brokers.clone();
        let timeout = self.metadata_timeout;
        tokio::task::spawn_blocking(move || {
            let consumer = Self::metadata_consumer(&brokers)?;
            let metadata = consumer
                .fetch_metadata(None, timeout)
                .map_err(|e| EventBusError::Broker(format!("failed to fetch metadata: {e}")))?;
            Ok(metadata
                .topics()
                .iter()
                .map(|t| t.name().to_string())
                .collect())
        })
        .await
        .map_err(|e| EventBusError::Broker(format!("metadata task failed: {e}")))?
    }

    async fn create_topic(&self, name: &str, partitions: i32, replication: i32) -> Result<()> {
        let topic = NewTopic::new(name, partitions, TopicReplication::Fixed(replication));
        let results = self
            .admin
            .create_topics(&[topic], &self.admin_options())
            .await
            .map_err(|e| EventBusError::Broker(format!("failed to create topic '{name}': {e}")))?;

        for result in results {
            if let Err((topic, code)) = result {
                if code != RDKafkaErrorCode::TopicAlreadyExists {
                    return Err(EventBusError::Broker(format!(
                        "failed to create topic '{topic}': {code}"
                    )));
                }
            }
        }
        Ok(())
    }

    async fn delete_topic(&self, name: &str) -> Result<()> {
        let results = self
            .admin
            .delete_topics(&[name], &self.admin_options())
            .await
            .map_err(|e| EventBusError::Broker(format!("failed to delete topic '{name}': {e}")))?;

        for result in results {
            if let Err((topic, code)) = result {
                if code != RDKafkaErrorCode::UnknownTopicOrPartition {
                    return Err(EventBusError::Broker(format!(
                        "failed to delete topic '{topic}': {code}"
                    )));
                }
            }
        }
        Ok(())
    }

    async fn topic_exists(&self, name: &str) -> Result<bool> {
        let brokers = self.brokers.clone();
        let topic_name = name.to_string();
        let timeout = self.metadata_timeout;
        tokio::task::spawn_blocking(move || {
            let consumer = Self::metadata_consumer(&brokers)?;
            let metadata = consumer
                .fetch_metadata(Some(&topic_name), timeout)
                .map_err(|e| EventBusError::Broker(format!("failed to fetch metadata: {e}")))?;
            // An unknown topic still yields a metadata entry, carrying an
            // error code instead of partitions.
            Ok(metadata
                .topics()
                .iter()
                .any(|t| t.name() == topic_name && t.error().is_none()))
        })
        .await
        .map_err(|e| EventBusError::Broker(format!("metadata task failed: {e}")))?
    }

    async fn group_exists(&self, group_id: &str) -> Result<bool> {
        let brokers = self.brokers.clone();
        let group = group_id.to_string();
        let timeout = self.metadata_timeout;
        tokio::task::spawn_blocking(move || {
            let consumer = Self::metadata_consumer(&brokers)?;
            let groups = consumer
                .fetch_group_list(Some(&group), timeout)
                .map_err(|e| EventBusError::Broker(format!("failed to fetch group list: {e}")))?;
            Ok(groups.groups().iter().any(|g| g.name() == group))
        })
        .await
        .map_err(|e| EventBusError::Broker(format!("group lookup task failed: {e}")))?
    }

    async fn create_group(&self, group_id: &str) -> Result<()> {
        // The Kafka API provisions groups implicitly when a consumer joins;
        // explicit provisioning only exists on CLI-administered deployments.
        Err(EventBusError::Broker(format!(
            "consumer group '{group_id}' cannot be created through the admin API; \
             groups are provisioned implicitly on join"
        )))
    }

    async fn delete_group(&self, group_id: &str) -> Result<()> {
        let results = self
            .admin
            .delete_groups(&[group_id], &self.admin_options())
            .await
            .map_err(|e| {
                EventBusError::Broker(format!("failed to delete group '{group_id}': {e}"))
            })?;

        for result in results {
            if let Err((group, code)) = result {
                if code != RDKafkaErrorCode::GroupIdNotFound {
                    return Err(EventBusError::Broker(format!(
                        "failed to delete group '{group}': {code}"
                    )));
                }
            }
        }
        Ok(())
    }
}
