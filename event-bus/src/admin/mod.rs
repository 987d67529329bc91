//! Broker administration seam
//!
//! The topic lifecycle manager talks to whichever administrative backend
//! the deployment offers: the broker admin API directly, or the platform
//! CLI when direct access is unavailable. Both live behind [`TopicAdmin`].

pub mod cli;
pub mod kafka;

use async_trait::async_trait;

use crate::error::Result;

pub use cli::CliAdmin;
pub use kafka::KafkaAdmin;

/// Administrative operations against the broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TopicAdmin: Send + Sync {
    /// Establish the administrative connection. Idempotent.
    async fn connect(&self) -> Result<()>;

    /// Release the administrative connection. Safe to call repeatedly.
    async fn disconnect(&self) -> Result<()>;

    /// Names of every topic currently known to the broker.
    async fn list_topic_names(&self) -> Result<Vec<String>>;

    /// Create a topic. Succeeds if the topic already exists.
    async fn create_topic(&self, name: &str, partitions: i32, replication: i32) -> Result<()>;

    /// Delete a topic. Succeeds if the topic is already gone.
    async fn delete_topic(&self, name: &str) -> Result<()>;

    /// Existence probe. A lookup failure meaning "not found" returns
    /// `Ok(false)`; any other failure propagates.
    async fn topic_exists(&self, name: &str) -> Result<bool>;

    /// Whether the named consumer group is provisioned on the broker.
    async fn group_exists(&self, group_id: &str) -> Result<bool>;

    /// Provision a consumer group, on deployments that require it.
    async fn create_group(&self, group_id: &str) -> Result<()>;

    /// Tear down a consumer group.
    async fn delete_group(&self, group_id: &str) -> Result<()>;
}
