//! Validating event producer

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::envelope::EventEnvelope;
use crate::error::{EventBusError, Result};
use crate::transport::MessageSink;

/// Producing side of the client: validates topic/event pairs against the
/// declared allow-list, derives the partition key, wraps the payload in the
/// canonical envelope and publishes it.
pub struct EventProducer {
    sink: Option<Arc<dyn MessageSink>>,
    /// Defensive copy of the declared allow-list, taken at init so later
    /// mutation of the caller's declaration cannot corrupt validation.
    allowed: HashMap<String, Vec<String>>,
    origin_service: String,
    origin_service_version: String,
    key_fields: Vec<String>,
}

impl EventProducer {
    pub fn new(
        origin_service: impl Into<String>,
        origin_service_version: impl Into<String>,
        key_fields: Vec<String>,
    ) -> Self {
        Self {
            sink: None,
            allowed: HashMap::new(),
            origin_service: origin_service.into(),
            origin_service_version: origin_service_version.into(),
            key_fields,
        }
    }

    /// Attach the broker connection and register the allow-list.
    pub fn init(
        &mut self,
        sink: Arc<dyn MessageSink>,
        allow_list: &HashMap<String, Vec<String>>,
    ) -> Result<()> {
        if self.sink.is_some() {
            return Err(EventBusError::Validation(
                "producer already initialized".to_string(),
            ));
        }
        self.allowed = allow_list
            .iter()
            .map(|(topic, events)| (topic.clone(), events.clone()))
            .collect();
        self.sink = Some(sink);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.sink.is_some()
    }

    /// Publish one event. `topic` is the physical topic name; `context_id`
    /// must never be empty — callers start a new chain with
    /// [`crate::envelope::NEW_CONTEXT`].
    pub async fn produce(
        &self,
        topic: &str,
        event_name: &str,
        payload: Value,
        context_id: &str,
        key_hint: Option<&str>,
    ) -> Result<()> {
        let sink = self.sink.as_ref().ok_or_else(|| {
            EventBusError::Validation(
                "producer not initialized; did you call init?".to_string(),
            )
        })?;

        let declared = self
            .allowed
            .get(topic)
            .map(|events| events.iter().any(|e| e == event_name))
            .unwrap_or(false);
        if !declared {
            return Err(EventBusError::Validation(format!(
                "unsupported topic/event '{topic}/{event_name}'; declared topics: {:?}",
                self.allowed
            )));
        }

        if context_id.is_empty() {
            return Err(EventBusError::Validation(
                "produce requires a context id; use NEW_CONTEXT to start a new chain"
                    .to_string(),
            ));
        }

        let envelope = EventEnvelope::new(
            topic,
            event_name,
            payload,
            context_id,
            &self.origin_service,
            &self.origin_service_version,
        );
        let key = derive_partition_key(key_hint, &envelope.payload, &self.key_fields, &envelope.id);
        let value = serde_json::to_vec(&envelope)
            .map_err(|e| EventBusError::Serialization(e.to_string()))?;

        debug!(topic, event = event_name, key = %key, "producing event");
        sink.send(topic, key.as_bytes(), value).await
    }

    /// Disconnect and clear state; a fresh `init` is legal afterwards.
    pub async fn shutdown(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.disconnect().await;
        }
        self.allowed.clear();
    }
}

/// Partition key priority: explicit hint, the payload's own `id`, then the
/// configured entity-id fields in order (most specific entity first), and
/// finally the generated event id. Related entities thereby share a
/// partition, so their events are processed in arrival order.
fn derive_partition_key(
    hint: Option<&str>,
    payload: &Value,
    key_fields: &[String],
    event_id: &Uuid,
) -> String {
    if let Some(hint) = hint {
        if !hint.is_empty() {
            return hint.to_string();
        }
    }
    if let Some(object) = payload.as_object() {
        if let Some(id) = object.get("id").filter(|v| !v.is_null()) {
            return key_value(id);
        }
        for field in key_fields {
            if let Some(value) = object.get(field).filter(|v| !v.is_null()) {
                return key_value(value);
            }
        }
    }
    event_id.to_string()
}

fn key_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::NEW_CONTEXT;
    use crate::transport::MockMessageSink;
    use serde_json::json;
    use std::sync::Mutex;

    fn default_key_fields() -> Vec<String> {
        vec![
            "itemId".to_string(),
            "bundleId".to_string(),
            "userId".to_string(),
        ]
    }

    fn allow_list() -> HashMap<String, Vec<String>> {
        HashMap::from([(
            "qa1.items".to_string(),
            vec!["ITEM_CREATED".to_string(), "ITEM_ESTIMATION".to_string()],
        )])
    }

    /// Sink that records (topic, key, decoded envelope) per send.
    fn capturing_sink() -> (Arc<MockMessageSink>, Arc<Mutex<Vec<(String, String, EventEnvelope)>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&sent);
        let mut sink = MockMessageSink::new();
        sink.expect_send().returning(move |topic, key, payload| {
            let envelope: EventEnvelope = serde_json::from_slice(&payload).unwrap();
            captured.lock().unwrap().push((
                topic.to_string(),
                String::from_utf8(key.to_vec()).unwrap(),
                envelope,
            ));
            Ok(())
        });
        sink.expect_disconnect().returning(|| ());
        (Arc::new(sink), sent)
    }

    fn producer_with_sink(sink: Arc<MockMessageSink>) -> EventProducer {
        let mut producer = EventProducer::new("estimation-service", "v1", default_key_fields());
        producer.init(sink, &allow_list()).unwrap();
        producer
    }

    #[tokio::test]
    async fn produce_requires_init() {
        let producer = EventProducer::new("svc", "v1", default_key_fields());
        let err = producer
            .produce("qa1.items", "ITEM_CREATED", json!({}), NEW_CONTEXT, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EventBusError::Validation(_)));
    }

    #[test]
    fn double_init_is_rejected() {
        let (sink, _) = capturing_sink();
        let mut producer = producer_with_sink(Arc::clone(&sink));
        let err = producer.init(sink, &allow_list()).unwrap_err();
        assert!(matches!(err, EventBusError::Validation(_)));
    }

    #[tokio::test]
    async fn shutdown_allows_reinit() {
        let (sink, _) = capturing_sink();
        let mut producer = producer_with_sink(Arc::clone(&sink));
        producer.shutdown().await;
        assert!(!producer.is_initialized());
        producer.init(sink, &allow_list()).unwrap();
    }

    #[tokio::test]
    async fn undeclared_pairs_fail_with_the_allow_list_in_the_message() {
        let (sink, _) = capturing_sink();
        let producer = producer_with_sink(sink);

        let err = producer
            .produce("qa1.items", "UNKNOWN_EVENT", json!({}), NEW_CONTEXT, None)
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("qa1.items/UNKNOWN_EVENT"));
        assert!(message.contains("ITEM_CREATED"), "allow-list not enumerated: {message}");

        let err = producer
            .produce("qa1.orders", "ITEM_CREATED", json!({}), NEW_CONTEXT, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EventBusError::Validation(_)));
    }

    #[tokio::test]
    async fn declared_pairs_are_published() {
        let (sink, sent) = capturing_sink();
        let producer = producer_with_sink(sink);
        producer
            .produce("qa1.items", "ITEM_CREATED", json!({"itemId": 42}), NEW_CONTEXT, None)
            .await
            .unwrap();
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "qa1.items");
        assert_eq!(sent[0].2.event_name, "ITEM_CREATED");
        assert_eq!(sent[0].2.origin_service, "estimation-service");
    }

    #[tokio::test]
    async fn empty_context_is_rejected() {
        let (sink, _) = capturing_sink();
        let producer = producer_with_sink(sink);
        let err = producer
            .produce("qa1.items", "ITEM_CREATED", json!({}), "", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EventBusError::Validation(_)));
    }

    #[tokio::test]
    async fn new_context_sentinel_mints_matching_ids() {
        let (sink, sent) = capturing_sink();
        let producer = producer_with_sink(sink);
        producer
            .produce("qa1.items", "ITEM_CREATED", json!({}), NEW_CONTEXT, None)
            .await
            .unwrap();
        let sent = sent.lock().unwrap();
        let envelope = &sent[0].2;
        assert_eq!(envelope.context_id, envelope.id.to_string());
    }

    #[tokio::test]
    async fn partition_key_prefers_item_over_user() {
        let (sink, sent) = capturing_sink();
        let producer = producer_with_sink(sink);

        producer
            .produce("qa1.items", "ITEM_CREATED", json!({"itemId": 42}), NEW_CONTEXT, None)
            .await
            .unwrap();
        producer
            .produce("qa1.items", "ITEM_CREATED", json!({"userId": 7}), NEW_CONTEXT, None)
            .await
            .unwrap();
        producer
            .produce(
                "qa1.items",
                "ITEM_CREATED",
                json!({"itemId": 42, "userId": 7}),
                NEW_CONTEXT,
                None,
            )
            .await
            .unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent[0].1, "42");
        assert_eq!(sent[1].1, "7");
        assert_eq!(sent[2].1, "42");
    }

    #[tokio::test]
    async fn explicit_hint_beats_payload_fields() {
        let (sink, sent) = capturing_sink();
        let producer = producer_with_sink(sink);
        producer
            .produce(
                "qa1.items",
                "ITEM_CREATED",
                json!({"itemId": 42}),
                NEW_CONTEXT,
                Some("shard-9"),
            )
            .await
            .unwrap();
        assert_eq!(sent.lock().unwrap()[0].1, "shard-9");
    }

    #[tokio::test]
    async fn payload_own_id_beats_entity_fields() {
        let (sink, sent) = capturing_sink();
        let producer = producer_with_sink(sink);
        producer
            .produce(
                "qa1.items",
                "ITEM_CREATED",
                json!({"id": "evt-1", "itemId": 42}),
                NEW_CONTEXT,
                None,
            )
            .await
            .unwrap();
        assert_eq!(sent.lock().unwrap()[0].1, "evt-1");
    }

    #[tokio::test]
    async fn keyless_payload_falls_back_to_the_event_id() {
        let (sink, sent) = capturing_sink();
        let producer = producer_with_sink(sink);
        producer
            .produce("qa1.items", "ITEM_CREATED", json!({"note": "hi"}), NEW_CONTEXT, None)
            .await
            .unwrap();
        let sent = sent.lock().unwrap();
        assert_eq!(sent[0].1, sent[0].2.id.to_string());
    }
}
