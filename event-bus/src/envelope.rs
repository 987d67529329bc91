//! Canonical event envelope exchanged on the wire

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel context id: the producer mints a fresh identifier and uses it
/// as both the event id and the context id, starting a new causal chain.
pub const NEW_CONTEXT: &str = "new";

/// The unit exchanged on the wire. Value bytes are the JSON encoding of
/// this structure; the message key is the derived partition key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Unique event id, generated per produce call.
    pub id: Uuid,
    /// Causal chain identifier. Events produced while processing another
    /// event carry the origin event's context id.
    pub context_id: String,
    /// Physical topic name. The consumer rewrites this back to the logical
    /// name before handing the event to application code.
    pub topic: String,
    /// Logical event discriminator. `key` is the historical wire name.
    #[serde(alias = "key")]
    pub event_name: String,
    #[serde(alias = "created")]
    pub created_at: DateTime<Utc>,
    /// Stamped on the consumer side at dispatch, for latency tracking.
    #[serde(alias = "received", default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
    /// Partition the message arrived on. Consumer-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<i32>,
    pub origin_service: String,
    pub origin_service_version: String,
    /// Opaque application data.
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Build a producer-side envelope. A `NEW_CONTEXT` context id resolves
    /// to the freshly minted event id.
    pub fn new(
        topic: &str,
        event_name: &str,
        payload: serde_json::Value,
        context_id: &str,
        origin_service: &str,
        origin_service_version: &str,
    ) -> Self {
        let id = Uuid::new_v4();
        let context_id = if context_id == NEW_CONTEXT {
            id.to_string()
        } else {
            context_id.to_string()
        };
        Self {
            id,
            context_id,
            topic: topic.to_string(),
            event_name: event_name.to_string(),
            created_at: Utc::now(),
            received_at: None,
            partition: None,
            origin_service: origin_service.to_string(),
            origin_service_version: origin_service_version.to_string(),
            payload,
        }
    }

    /// Consumer-side stamp: reception time and source partition.
    pub fn mark_received(&mut self, partition: i32) {
        self.received_at = Some(Utc::now());
        self.partition = Some(partition);
    }

    /// Produce-to-dispatch transit time, when the envelope was received.
    pub fn transit_latency(&self) -> Option<chrono::Duration> {
        self.received_at.map(|received| received - self.created_at)
    }
}
