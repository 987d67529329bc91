//! Topic lifecycle management
//!
//! Makes the broker's set of topics match what the client declares, and
//! manages the named consumer group on deployments that provision groups
//! explicitly. Creation and deletion are asynchronous on the broker side
//! relative to the administrative call returning, so every mutating
//! operation polls until the broker reports the expected state.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::admin::TopicAdmin;
use crate::config::TopicSettings;
use crate::error::{EventBusError, Result};

pub struct TopicManager {
    admin: Box<dyn TopicAdmin>,
    connected: bool,
    known_topics: Vec<String>,
    settings: TopicSettings,
    wait_timeout: Duration,
    wait_interval: Duration,
}

impl TopicManager {
    pub fn new(
        admin: Box<dyn TopicAdmin>,
        settings: TopicSettings,
        wait_timeout: Duration,
        wait_interval: Duration,
    ) -> Self {
        Self {
            admin,
            connected: false,
            known_topics: Vec::new(),
            settings,
            wait_timeout,
            wait_interval,
        }
    }

    /// Establish the administrative connection at most once. Every public
    /// operation calls this lazily.
    async fn connect(&mut self) -> Result<()> {
        if !self.connected {
            debug!("admin interface connecting");
            self.admin.connect().await?;
            self.connected = true;
        }
        Ok(())
    }

    async fn refresh_topics(&mut self) -> Result<()> {
        self.known_topics = self.admin.list_topic_names().await?;
        debug!(topics = ?self.known_topics, "refreshed known topics");
        Ok(())
    }

    /// Ensure every named topic exists, creating the ones that don't.
    /// Returns the set actually created.
    ///
    /// Two-phase check: topics missing from the local cache trigger a single
    /// refresh and a recheck before anything is created, so topics that
    /// exist but weren't cached yet don't provoke creation calls — without
    /// paying for a metadata fetch on every verification.
    pub async fn verify_topics(&mut self, topics: &[String]) -> Result<Vec<String>> {
        self.connect().await?;

        let mut missing: Vec<String> = topics
            .iter()
            .filter(|name| !self.known_topics.contains(name))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(Vec::new());
        }

        self.refresh_topics().await?;
        missing.retain(|name| !self.known_topics.contains(name));
        if missing.is_empty() {
            return Ok(Vec::new());
        }

        info!(topics = ?missing, "creating missing topics");
        for topic in &missing {
            self.admin
                .create_topic(topic, self.settings.partitions, self.settings.replication)
                .await?;
        }
        for topic in &missing {
            self.wait_for_topic(topic, true).await?;
        }
        self.known_topics.extend(missing.iter().cloned());

        Ok(missing)
    }

    /// Create a single topic and wait until the broker reports it.
    pub async fn create_topic(&mut self, topic: &str) -> Result<()> {
        self.connect().await?;
        debug!(topic, "creating topic");
        self.admin
            .create_topic(topic, self.settings.partitions, self.settings.replication)
            .await?;
        self.wait_for_topic(topic, true).await?;
        if !self.known_topics.iter().any(|t| t == topic) {
            self.known_topics.push(topic.to_string());
        }
        Ok(())
    }

    /// Delete a single topic and wait until the broker no longer reports it.
    pub async fn delete_topic(&mut self, topic: &str) -> Result<()> {
        self.connect().await?;
        debug!(topic, "deleting topic");
        self.admin.delete_topic(topic).await?;
        self.wait_for_topic(topic, false).await?;
        self.known_topics.retain(|t| t != topic);
        Ok(())
    }

    pub async fn topic_exists(&mut self, topic: &str) -> Result<bool> {
        self.connect().await?;
        self.admin.topic_exists(topic).await
    }

    /// Ensure the consumer group is provisioned, creating it if absent and
    /// waiting until the broker reports it. Only meaningful on deployments
    /// with explicit group provisioning.
    pub async fn verify_group(&mut self, group_id: &str) -> Result<()> {
        self.connect().await?;
        if self.admin.group_exists(group_id).await? {
            return Ok(());
        }
        info!(group = group_id, "creating consumer group");
        self.admin.create_group(group_id).await?;
        self.wait_for_group(group_id).await
    }

    pub async fn delete_group(&mut self, group_id: &str) -> Result<()> {
        self.connect().await?;
        self.admin.delete_group(group_id).await
    }

    pub async fn disconnect(&mut self) {
        if self.connected {
            if let Err(e) = self.admin.disconnect().await {
                warn!(error = %e, "admin disconnect failed");
            }
            self.connected = false;
        }
    }

    /// Poll the existence probe until it matches `existence` or the deadline
    /// elapses. Transient probe failures are retried, not surfaced; the only
    /// terminal failure is the deadline.
    async fn wait_for_topic(&self, topic: &str, existence: bool) -> Result<()> {
        debug!(topic, existence, "waiting for topic to settle");
        let deadline = tokio::time::Instant::now() + self.wait_timeout;
        loop {
            match self.admin.topic_exists(topic).await {
                Ok(state) if state == existence => return Ok(()),
                Ok(_) => {}
                Err(e) => debug!(topic, error = %e, "existence probe failed, retrying"),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(EventBusError::Timeout {
                    resource: topic.to_string(),
                    expected: if existence { "exists" } else { "absent" }.to_string(),
                });
            }
            tokio::time::sleep(self.wait_interval).await;
        }
    }

    async fn wait_for_group(&self, group_id: &str) -> Result<()> {
        debug!(group = group_id, "waiting for consumer group to settle");
        let deadline = tokio::time::Instant::now() + self.wait_timeout;
        loop {
            match self.admin.group_exists(group_id).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => debug!(group = group_id, error = %e, "group probe failed, retrying"),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(EventBusError::Timeout {
                    resource: group_id.to_string(),
                    expected: "exists".to_string(),
                });
            }
            tokio::time::sleep(self.wait_interval).await;
        }
    }
}
