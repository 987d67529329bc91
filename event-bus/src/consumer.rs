//! Subscribing consumer with per-event routing
//!
//! Subscribes to the declared topics and dispatches every inbound message
//! to the registered handler, propagating the tracing context around each
//! invocation. Dispatch is strictly sequential: one message's handler
//! finishes (or fails) before the next message is looked at, which is what
//! keeps the context scoped to a single message.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::context;
use crate::envelope::EventEnvelope;
use crate::error::{EventBusError, Result};
use crate::naming::TopicNamer;
use crate::transport::{InboundMessage, MessageSource};

pub type EventHandler = Arc<dyn Fn(EventEnvelope) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Per-topic routing: event name to handler, with an optional default that
/// catches every event name not spoken for.
#[derive(Clone, Default)]
pub struct TopicRoutes {
    handlers: HashMap<String, EventHandler>,
    default_handler: Option<EventHandler>,
}

impl TopicRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event name.
    pub fn on<F, Fut>(mut self, event_name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.handlers.insert(event_name.into(), wrap(handler));
        self
    }

    /// Register the fallback handler for event names without a specific one.
    pub fn on_default<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.default_handler = Some(wrap(handler));
        self
    }

    fn resolve(&self, event_name: &str) -> Option<(&'static str, EventHandler)> {
        if let Some(handler) = self.handlers.get(event_name) {
            return Some(("specific", Arc::clone(handler)));
        }
        self.default_handler
            .as_ref()
            .map(|handler| ("default", Arc::clone(handler)))
    }

    fn merge(&mut self, other: TopicRoutes) {
        self.handlers.extend(other.handlers);
        if other.default_handler.is_some() {
            self.default_handler = other.default_handler;
        }
    }
}

fn wrap<F, Fut>(handler: F) -> EventHandler
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(handler(event)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsumerState {
    Uninitialized,
    Subscribing,
    Running,
    ShuttingDown,
    Terminated,
}

pub struct EventConsumer {
    source: Arc<dyn MessageSource>,
    router: RwLock<HashMap<String, TopicRoutes>>,
    state: RwLock<ConsumerState>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
    stop: Notify,
    namer: TopicNamer,
    auto_context: bool,
    ready_timeout: Duration,
}

impl EventConsumer {
    pub fn new(
        source: Arc<dyn MessageSource>,
        namer: TopicNamer,
        auto_context: bool,
        ready_timeout: Duration,
    ) -> Self {
        Self {
            source,
            router: RwLock::new(HashMap::new()),
            state: RwLock::new(ConsumerState::Uninitialized),
            loop_task: Mutex::new(None),
            stop: Notify::new(),
            namer,
            auto_context,
            ready_timeout,
        }
    }

    /// Subscribe to a batch of topics and merge them into the routing
    /// table. May be called repeatedly before [`wait_init`]. A failed
    /// subscribe for one topic is reported and does not abort the rest.
    ///
    /// [`wait_init`]: EventConsumer::wait_init
    pub async fn add_topics(&self, topics: HashMap<String, TopicRoutes>) -> Result<()> {
        {
            let mut state = self.state.write().await;
            match *state {
                ConsumerState::Uninitialized | ConsumerState::Subscribing => {
                    *state = ConsumerState::Subscribing;
                }
                other => {
                    return Err(EventBusError::Validation(format!(
                        "topics can only be added before wait_init (state: {other:?})"
                    )))
                }
            }
        }

        let mut router = self.router.write().await;
        for (topic, routes) in topics {
            debug!(topic = %topic, "subscribing to topic");
            if let Err(e) = self.source.subscribe(&topic).await {
                error!(topic = %topic, error = %e, "failed subscribing to topic");
            }
            router.entry(topic).or_default().merge(routes);
        }
        Ok(())
    }

    /// Start the message loop and wait for the consumer group to finish its
    /// initial setup.
    pub async fn wait_init(self: Arc<Self>) -> Result<()> {
        {
            let state = self.state.read().await;
            if *state != ConsumerState::Subscribing {
                return Err(EventBusError::Validation(format!(
                    "wait_init requires at least one add_topics call (state: {:?})",
                    *state
                )));
            }
        }

        let consumer = Arc::clone(&self);
        let handle = tokio::spawn(async move { consumer.run_loop().await });
        *self.loop_task.lock().await = Some(handle);

        self.source.wait_ready(self.ready_timeout).await?;
        *self.state.write().await = ConsumerState::Running;
        info!("consumer ready to receive events");
        Ok(())
    }

    /// The single dispatch loop. Transient consume errors are retried; a
    /// protocol violation stops the loop loudly.
    async fn run_loop(&self) {
        loop {
            tokio::select! {
                _ = self.stop.notified() => break,
                next = self.source.next() => match next {
                    Ok(Some(message)) => {
                        if let Err(e) = self.dispatch(message).await {
                            error!(error = %e, "fatal dispatch error, stopping consumer");
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("message source closed");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "transient consume error");
                    }
                }
            }
        }
        *self.state.write().await = ConsumerState::Terminated;
    }

    /// Dispatch one inbound message.
    ///
    /// Per-message failures (unparseable payload, handler error, no handler
    /// registered) are contained here; the returned error is reserved for
    /// protocol violations that must stop the loop.
    pub async fn dispatch(&self, message: InboundMessage) -> Result<()> {
        let router = self.router.read().await;
        let Some(routes) = router.get(&message.topic) else {
            // Subscriptions and the routing table are built together, so a
            // message from an unregistered topic means the orchestration
            // layer itself is broken.
            return Err(EventBusError::Protocol(format!(
                "message arrived for unregistered topic '{}'",
                message.topic
            )));
        };

        let mut envelope: EventEnvelope = match serde_json::from_slice(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(topic = %message.topic, error = %e, "skipping unparseable message");
                return Ok(());
            }
        };
        envelope.topic = self.namer.strip(&envelope.topic);
        envelope.mark_received(message.partition);

        let event_name = envelope.event_name.clone();
        let Some((handler_kind, handler)) = routes.resolve(&event_name) else {
            debug!(event = %event_name, "no handler registered, skipping");
            return Ok(());
        };
        drop(router);

        if let Some(latency) = envelope.transit_latency() {
            debug!(event = %event_name, latency_ms = latency.num_milliseconds(), "event in transit");
        }
        info!(event = %event_name, handler = handler_kind, "processing event");

        let context_id = envelope.context_id.clone();
        let started = std::time::Instant::now();
        let invocation = handler(envelope);
        let outcome = if self.auto_context {
            context::with_context(context_id.clone(), invocation).await
        } else {
            invocation.await
        };

        match outcome {
            Ok(()) => info!(
                event = %event_name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "event processed"
            ),
            Err(e) => error!(
                event = %event_name,
                context = %context_id,
                error = %e,
                "event handler failed"
            ),
        }
        Ok(())
    }

    /// Disconnect and stop the loop. Safe to call even if the consumer was
    /// never fully initialized.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.write().await;
            if matches!(
                *state,
                ConsumerState::ShuttingDown | ConsumerState::Terminated
            ) {
                return;
            }
            *state = ConsumerState::ShuttingDown;
        }
        self.stop.notify_one();
        self.source.disconnect().await;
        if let Some(handle) = self.loop_task.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "consumer loop task failed");
            }
        }
        self.router.write().await.clear();
        *self.state.write().await = ConsumerState::Terminated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockMessageSource;
    use bytes::Bytes;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn namer() -> TopicNamer {
        TopicNamer::new("", "qa1")
    }

    fn consumer(source: MockMessageSource, auto_context: bool) -> Arc<EventConsumer> {
        Arc::new(EventConsumer::new(
            Arc::new(source),
            namer(),
            auto_context,
            Duration::from_millis(100),
        ))
    }

    fn quiet_source() -> MockMessageSource {
        let mut source = MockMessageSource::new();
        source.expect_subscribe().returning(|_| Ok(()));
        source.expect_wait_ready().returning(|_| Ok(()));
        source.expect_next().returning(|| Ok(None));
        source.expect_disconnect().returning(|| ());
        source
    }

    fn message(topic: &str, event_name: &str, payload: serde_json::Value) -> InboundMessage {
        let envelope = json!({
            "id": uuid::Uuid::new_v4().to_string(),
            "contextId": "ctx-77",
            "topic": topic,
            "eventName": event_name,
            "createdAt": "2026-08-01T10:00:00Z",
            "originService": "tester",
            "originServiceVersion": "v1",
            "payload": payload,
        });
        InboundMessage {
            topic: topic.to_string(),
            partition: 0,
            key: None,
            payload: Bytes::from(serde_json::to_vec(&envelope).unwrap()),
        }
    }

    fn counting_routes(counter: Arc<AtomicUsize>) -> TopicRoutes {
        TopicRoutes::new().on("ITEM_CREATED", move |_event| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn specific_handler_beats_default() {
        let specific = Arc::new(AtomicUsize::new(0));
        let fallback = Arc::new(AtomicUsize::new(0));
        let specific_clone = Arc::clone(&specific);
        let fallback_clone = Arc::clone(&fallback);

        let routes = TopicRoutes::new()
            .on("ITEM_CREATED", move |_| {
                let c = Arc::clone(&specific_clone);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .on_default(move |_| {
                let c = Arc::clone(&fallback_clone);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });

        let consumer = consumer(quiet_source(), false);
        consumer
            .add_topics(HashMap::from([("qa1.items".to_string(), routes)]))
            .await
            .unwrap();

        consumer
            .dispatch(message("qa1.items", "ITEM_CREATED", json!({})))
            .await
            .unwrap();
        assert_eq!(specific.load(Ordering::SeqCst), 1);
        assert_eq!(fallback.load(Ordering::SeqCst), 0);

        consumer
            .dispatch(message("qa1.items", "SOMETHING_ELSE", json!({})))
            .await
            .unwrap();
        assert_eq!(fallback.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unhandled_event_names_are_skipped_silently() {
        let handled = Arc::new(AtomicUsize::new(0));
        let consumer = consumer(quiet_source(), false);
        consumer
            .add_topics(HashMap::from([(
                "qa1.items".to_string(),
                counting_routes(Arc::clone(&handled)),
            )]))
            .await
            .unwrap();

        consumer
            .dispatch(message("qa1.items", "NOBODY_LISTENS", json!({})))
            .await
            .unwrap();
        assert_eq!(handled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unregistered_topic_is_a_protocol_violation() {
        let consumer = consumer(quiet_source(), false);
        consumer
            .add_topics(HashMap::from([(
                "qa1.items".to_string(),
                counting_routes(Arc::new(AtomicUsize::new(0))),
            )]))
            .await
            .unwrap();

        let err = consumer
            .dispatch(message("qa1.payments", "PAYMENT_DONE", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, EventBusError::Protocol(_)));
    }

    #[tokio::test]
    async fn malformed_payload_is_skipped_without_invoking_handlers() {
        let handled = Arc::new(AtomicUsize::new(0));
        let consumer = consumer(quiet_source(), false);
        consumer
            .add_topics(HashMap::from([(
                "qa1.items".to_string(),
                counting_routes(Arc::clone(&handled)),
            )]))
            .await
            .unwrap();

        let garbage = InboundMessage {
            topic: "qa1.items".to_string(),
            partition: 0,
            key: None,
            payload: Bytes::from_static(b"not json at all"),
        };
        consumer.dispatch(garbage).await.unwrap();
        assert_eq!(handled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_failure_does_not_stop_subsequent_dispatch() {
        let successes = Arc::new(AtomicUsize::new(0));
        let successes_clone = Arc::clone(&successes);

        let routes = TopicRoutes::new()
            .on("EXPLODES", |_| async { anyhow::bail!("boom") })
            .on("WORKS", move |_| {
                let c = Arc::clone(&successes_clone);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });

        let consumer = consumer(quiet_source(), false);
        consumer
            .add_topics(HashMap::from([("qa1.items".to_string(), routes)]))
            .await
            .unwrap();

        consumer
            .dispatch(message("qa1.items", "EXPLODES", json!({})))
            .await
            .unwrap();
        consumer
            .dispatch(message("qa1.items", "WORKS", json!({})))
            .await
            .unwrap();
        assert_eq!(successes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn envelope_metadata_is_normalized_before_the_handler_runs() {
        let seen: Arc<Mutex<Option<EventEnvelope>>> = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);
        let routes = TopicRoutes::new().on("ITEM_CREATED", move |event| {
            let seen = Arc::clone(&seen_clone);
            async move {
                *seen.lock().await = Some(event);
                Ok(())
            }
        });

        let consumer = consumer(quiet_source(), false);
        consumer
            .add_topics(HashMap::from([("qa1.items".to_string(), routes)]))
            .await
            .unwrap();

        let mut inbound = message("qa1.items", "ITEM_CREATED", json!({"itemId": 1}));
        inbound.partition = 4;
        consumer.dispatch(inbound).await.unwrap();

        let seen = seen.lock().await;
        let envelope = seen.as_ref().unwrap();
        assert_eq!(envelope.topic, "items"); // environment segment stripped
        assert_eq!(envelope.partition, Some(4));
        assert!(envelope.received_at.is_some());
    }

    #[tokio::test]
    async fn handler_sees_the_dispatch_context_when_enabled() {
        let observed: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let observed_clone = Arc::clone(&observed);
        let routes = TopicRoutes::new().on("ITEM_CREATED", move |_| {
            let observed = Arc::clone(&observed_clone);
            async move {
                *observed.lock().await = crate::context::current_context();
                Ok(())
            }
        });

        let consumer = consumer(quiet_source(), true);
        consumer
            .add_topics(HashMap::from([("qa1.items".to_string(), routes)]))
            .await
            .unwrap();
        consumer
            .dispatch(message("qa1.items", "ITEM_CREATED", json!({})))
            .await
            .unwrap();

        assert_eq!(*observed.lock().await, Some("ctx-77".to_string()));
        // cleared once the handler is done
        assert_eq!(crate::context::current_context(), None);
    }

    #[tokio::test]
    async fn context_stays_off_when_propagation_is_disabled() {
        let observed: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let observed_clone = Arc::clone(&observed);
        let routes = TopicRoutes::new().on("ITEM_CREATED", move |_| {
            let observed = Arc::clone(&observed_clone);
            async move {
                *observed.lock().await = crate::context::current_context();
                Ok(())
            }
        });

        let consumer = consumer(quiet_source(), false);
        consumer
            .add_topics(HashMap::from([("qa1.items".to_string(), routes)]))
            .await
            .unwrap();
        consumer
            .dispatch(message("qa1.items", "ITEM_CREATED", json!({})))
            .await
            .unwrap();
        assert_eq!(*observed.lock().await, None);
    }

    #[tokio::test]
    async fn wait_init_runs_the_loop_and_delivers_messages() {
        let handled = Arc::new(AtomicUsize::new(0));

        let mut source = MockMessageSource::new();
        source.expect_subscribe().returning(|_| Ok(()));
        source.expect_wait_ready().returning(|_| Ok(()));
        let calls = AtomicUsize::new(0);
        source.expect_next().returning(move || {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Some(message("qa1.items", "ITEM_CREATED", json!({}))))
            } else {
                Ok(None)
            }
        });
        source.expect_disconnect().returning(|| ());

        let consumer = consumer(source, false);
        consumer
            .add_topics(HashMap::from([(
                "qa1.items".to_string(),
                counting_routes(Arc::clone(&handled)),
            )]))
            .await
            .unwrap();
        consumer.clone().wait_init().await.unwrap();

        // the loop drains the single queued message, then sees the source close
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handled.load(Ordering::SeqCst), 1);

        consumer.shutdown().await;
    }

    #[tokio::test]
    async fn wait_init_requires_prior_add_topics() {
        let mut source = MockMessageSource::new();
        source.expect_disconnect().returning(|| ());
        let consumer = consumer(source, false);
        let err = consumer.clone().wait_init().await.unwrap_err();
        assert!(matches!(err, EventBusError::Validation(_)));
    }

    #[tokio::test]
    async fn shutdown_is_safe_without_init() {
        let mut source = MockMessageSource::new();
        source.expect_disconnect().returning(|| ());
        let consumer = consumer(source, false);
        consumer.shutdown().await;
        consumer.shutdown().await;
    }

    #[tokio::test]
    async fn failed_subscribe_does_not_abort_the_batch() {
        let handled = Arc::new(AtomicUsize::new(0));
        let mut source = MockMessageSource::new();
        source
            .expect_subscribe()
            .returning(|topic| {
                if topic == "qa1.broken" {
                    Err(EventBusError::Broker("subscribe refused".into()))
                } else {
                    Ok(())
                }
            });
        source.expect_disconnect().returning(|| ());

        let consumer = consumer(source, false);
        consumer
            .add_topics(HashMap::from([
                (
                    "qa1.broken".to_string(),
                    counting_routes(Arc::new(AtomicUsize::new(0))),
                ),
                (
                    "qa1.items".to_string(),
                    counting_routes(Arc::clone(&handled)),
                ),
            ]))
            .await
            .unwrap();

        // the healthy topic still routes
        consumer
            .dispatch(message("qa1.items", "ITEM_CREATED", json!({})))
            .await
            .unwrap();
        assert_eq!(handled.load(Ordering::SeqCst), 1);
    }
}
