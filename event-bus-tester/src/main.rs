//! Demo service for the event-bus client.
//!
//! Listens for `ITEM_CREATED` / `ESTIMATION_NEEDED` on the `items` topic
//! and answers each with an `ITEM_ESTIMATION` event, carrying the consumed
//! event's context so the whole exchange traces as one chain.
//!
//! Environment: see `EventBusConfig::from_env` (KAFKA_URL, ENV, STAGE,
//! SERVICE_NAME at minimum).

use anyhow::Result;
use event_bus::{ClientDescription, EventBusClient, EventBusConfig, TopicRoutes};
use serde_json::json;
use tracing::info;

const ITEMS_TOPIC: &str = "items";
const ITEM_CREATED: &str = "ITEM_CREATED";
const ESTIMATION_NEEDED: &str = "ESTIMATION_NEEDED";
const ITEM_ESTIMATION: &str = "ITEM_ESTIMATION";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    event_bus::logging::init_default_logging("event-bus-tester")?;

    info!("starting event bus tester");
    let config = EventBusConfig::from_env()?;
    let client = EventBusClient::new(config)?;

    let estimator = client.clone();
    let routes = TopicRoutes::new()
        .on(ITEM_CREATED, {
            let estimator = estimator.clone();
            move |event| estimate(estimator.clone(), event)
        })
        .on(ESTIMATION_NEEDED, move |event| {
            estimate(estimator.clone(), event)
        });

    client
        .init(
            ClientDescription::new()
                .produces(ITEMS_TOPIC, [ITEM_ESTIMATION])
                .consumes(ITEMS_TOPIC, routes),
        )
        .await?;
    info!("initialized; waiting for item events");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    client.shutdown().await;
    Ok(())
}

async fn estimate(client: EventBusClient, event: event_bus::EventEnvelope) -> Result<()> {
    let item_id = event.payload["itemId"].clone();
    info!(item = %item_id, "item event received, producing estimation");
    client
        .produce(
            ITEMS_TOPIC,
            ITEM_ESTIMATION,
            json!({
                "itemId": item_id,
                "estimation": 4200,
            }),
            Some(&event.context_id),
            None,
        )
        .await?;
    Ok(())
}
