//! Client orchestration
//!
//! Single entry point composing the topic manager, producer and consumer:
//! normalizes the declared topic names, drives topic (and consumer-group)
//! verification before anything is allowed to produce or consume, and owns
//! coordinated shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::admin::{CliAdmin, KafkaAdmin, TopicAdmin};
use crate::config::EventBusConfig;
use crate::consumer::{EventConsumer, TopicRoutes};
use crate::context;
use crate::envelope::NEW_CONTEXT;
use crate::error::{EventBusError, Result};
use crate::naming::TopicNamer;
use crate::producer::EventProducer;
use crate::topics::TopicManager;
use crate::transport::{KafkaSink, KafkaSource, MessageSink, MessageSource};

/// What a service produces and consumes, in logical topic names.
#[derive(Default)]
pub struct ClientDescription {
    producing: HashMap<String, Vec<String>>,
    consuming: HashMap<String, TopicRoutes>,
}

impl ClientDescription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a produced topic with its allowed event names.
    pub fn produces<T, I, E>(mut self, topic: T, events: I) -> Self
    where
        T: Into<String>,
        I: IntoIterator<Item = E>,
        E: Into<String>,
    {
        self.producing
            .entry(topic.into())
            .or_default()
            .extend(events.into_iter().map(Into::into));
        self
    }

    /// Declare a consumed topic with its event routing.
    pub fn consumes(mut self, topic: impl Into<String>, routes: TopicRoutes) -> Self {
        self.consuming.insert(topic.into(), routes);
        self
    }
}

/// Cheaply cloneable client handle. Handlers that need to produce clone the
/// handle into their closure; there is no process-wide instance.
#[derive(Clone)]
pub struct EventBusClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: EventBusConfig,
    namer: TopicNamer,
    topics: Mutex<TopicManager>,
    producer: RwLock<EventProducer>,
    consumer: Mutex<Option<Arc<EventConsumer>>>,
    sink: Arc<dyn MessageSink>,
    source: Arc<dyn MessageSource>,
    /// Serializes init/shutdown; true between a successful init and the
    /// next shutdown.
    initialized: Mutex<bool>,
}

impl EventBusClient {
    /// Wire the client against the real broker, picking the administrative
    /// backend the configuration calls for.
    pub fn new(config: EventBusConfig) -> Result<Self> {
        let admin: Box<dyn TopicAdmin> = if config.use_admin_cli {
            let app = config.cli_app.clone().ok_or_else(|| {
                EventBusError::Configuration(
                    "EVENT_BUS_CLI_APP is required when CLI administration is enabled".to_string(),
                )
            })?;
            Box::new(CliAdmin::new(app))
        } else {
            Box::new(KafkaAdmin::new(&config)?)
        };
        let sink = Arc::new(KafkaSink::new(&config)?);
        let source = Arc::new(KafkaSource::new(&config)?);
        Ok(Self::with_transports(config, admin, sink, source))
    }

    /// Wire the client against explicit backends. Tests and alternative
    /// deployments come through here; `new` is the rdkafka convenience.
    pub fn with_transports(
        config: EventBusConfig,
        admin: Box<dyn TopicAdmin>,
        sink: Arc<dyn MessageSink>,
        source: Arc<dyn MessageSource>,
    ) -> Self {
        let namer = TopicNamer::new(config.topic_prefix.clone(), config.environment.clone());
        let topics = TopicManager::new(
            admin,
            config.topic.clone(),
            config.topic_wait_timeout(),
            config.topic_wait_interval(),
        );
        let producer = EventProducer::new(
            config.service_name.clone(),
            config.service_version.clone(),
            config.partition_key_fields.clone(),
        );
        Self {
            inner: Arc::new(ClientInner {
                namer,
                topics: Mutex::new(topics),
                producer: RwLock::new(producer),
                consumer: Mutex::new(None),
                sink,
                source,
                initialized: Mutex::new(false),
                config,
            }),
        }
    }

    /// Verify declared topics and bring up the producing and consuming
    /// sides. Producer topics are verified before this returns, so
    /// `produce` is legal immediately afterwards. A service that declares
    /// no consuming topics never touches consumer setup, and vice versa.
    pub async fn init(&self, description: ClientDescription) -> Result<()> {
        let mut initialized = self.inner.initialized.lock().await;
        if *initialized {
            return Err(EventBusError::Validation(
                "client already initialized; call shutdown first".to_string(),
            ));
        }

        let producing: HashMap<String, Vec<String>> = description
            .producing
            .into_iter()
            .map(|(topic, events)| (self.inner.namer.normalize(&topic), events))
            .collect();
        let consuming: HashMap<String, TopicRoutes> = description
            .consuming
            .into_iter()
            .map(|(topic, routes)| (self.inner.namer.normalize(&topic), routes))
            .collect();

        let mut topics = self.inner.topics.lock().await;

        // Explicitly provisioned group deployments need the group before
        // any consumer connection is opened.
        if self.inner.config.use_admin_cli && !consuming.is_empty() {
            topics.verify_group(&self.inner.config.group_id).await?;
        }

        if !producing.is_empty() {
            let names: Vec<String> = producing.keys().cloned().collect();
            topics.verify_topics(&names).await?;
            self.inner
                .producer
                .write()
                .await
                .init(Arc::clone(&self.inner.sink), &producing)?;
        }

        if !consuming.is_empty() {
            let names: Vec<String> = consuming.keys().cloned().collect();
            topics.verify_topics(&names).await?;
            let consumer = Arc::new(EventConsumer::new(
                Arc::clone(&self.inner.source),
                self.inner.namer.clone(),
                self.inner.config.auto_context,
                self.inner.config.topic_wait_timeout(),
            ));
            consumer.add_topics(consuming).await?;
            consumer.clone().wait_init().await?;
            *self.inner.consumer.lock().await = Some(consumer);
        }

        *initialized = true;
        info!(service = %self.inner.config.service_name, "event bus client initialized");
        Ok(())
    }

    /// Publish `payload` as `event_name` on the logical `topic`.
    ///
    /// Without an explicit context id: inside a handler with automatic
    /// context propagation enabled, the dispatching message's context is
    /// carried over; otherwise a new context chain starts.
    pub async fn produce(
        &self,
        topic: &str,
        event_name: &str,
        payload: Value,
        context: Option<&str>,
        key_hint: Option<&str>,
    ) -> Result<()> {
        let physical = self.inner.namer.normalize(topic);
        let context_id = match context {
            Some(explicit) if !explicit.is_empty() => explicit.to_string(),
            _ if self.inner.config.auto_context => {
                context::current_context().unwrap_or_else(|| NEW_CONTEXT.to_string())
            }
            _ => NEW_CONTEXT.to_string(),
        };
        self.inner
            .producer
            .read()
            .await
            .produce(&physical, event_name, payload, &context_id, key_hint)
            .await
    }

    /// Create the logical topic, waiting until the broker reports it.
    pub async fn create_topic(&self, topic: &str) -> Result<()> {
        let physical = self.inner.namer.normalize(topic);
        self.inner.topics.lock().await.create_topic(&physical).await
    }

    /// Delete the logical topic, waiting until the broker drops it.
    pub async fn delete_topic(&self, topic: &str) -> Result<()> {
        let physical = self.inner.namer.normalize(topic);
        self.inner.topics.lock().await.delete_topic(&physical).await
    }

    pub async fn topic_exists(&self, topic: &str) -> Result<bool> {
        let physical = self.inner.namer.normalize(topic);
        self.inner.topics.lock().await.topic_exists(&physical).await
    }

    /// Disconnect consumer, topic manager and producer. Components that
    /// were never brought up are skipped; `init` may be called again
    /// afterwards.
    pub async fn shutdown(&self) {
        let mut initialized = self.inner.initialized.lock().await;

        let consumer = self.inner.consumer.lock().await.take();
        let consumer_shutdown = async {
            if let Some(consumer) = consumer {
                consumer.shutdown().await;
            }
        };

        let mut topics = self.inner.topics.lock().await;
        futures::join!(consumer_shutdown, topics.disconnect());

        // Only after the dispatch loop has stopped: a handler still in
        // flight may be producing, and taking the write lock earlier would
        // starve its read of the producer.
        self.inner.producer.write().await.shutdown().await;

        *initialized = false;
        info!("event bus client shut down");
    }
}
