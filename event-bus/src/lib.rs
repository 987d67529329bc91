//! Kafka event bus client for Nexus-Security backend services
//!
//! A service declares, once at startup, which logical topics it produces
//! (with an allow-list of event names) and which it consumes (with
//! per-event-name handlers). The client guarantees those topics exist on
//! the broker, wraps every outgoing payload in the canonical
//! [`EventEnvelope`], and routes every inbound message to the registered
//! handler with the tracing context carried along.
//!
//! ```no_run
//! use event_bus::{ClientDescription, EventBusClient, EventBusConfig, TopicRoutes};
//! use serde_json::json;
//!
//! # async fn run() -> event_bus::Result<()> {
//! let client = EventBusClient::new(EventBusConfig::from_env()?)?;
//! let producer = client.clone();
//!
//! client
//!     .init(
//!         ClientDescription::new()
//!             .produces("estimations", ["ITEM_ESTIMATION"])
//!             .consumes(
//!                 "items",
//!                 TopicRoutes::new().on("ITEM_CREATED", move |event| {
//!                     let client = producer.clone();
//!                     async move {
//!                         client
//!                             .produce(
//!                                 "estimations",
//!                                 "ITEM_ESTIMATION",
//!                                 json!({ "itemId": event.payload["itemId"] }),
//!                                 Some(&event.context_id),
//!                                 None,
//!                             )
//!                             .await?;
//!                         Ok(())
//!                     }
//!                 }),
//!             ),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod client;
pub mod config;
pub mod consumer;
pub mod context;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod naming;
pub mod producer;
pub mod topics;
pub mod transport;

pub use client::{ClientDescription, EventBusClient};
pub use config::{EventBusConfig, Stage, TopicSettings};
pub use consumer::{EventConsumer, EventHandler, TopicRoutes};
pub use envelope::{EventEnvelope, NEW_CONTEXT};
pub use error::{EventBusError, Result};
pub use producer::EventProducer;
pub use topics::TopicManager;
