//! Environment-driven client configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EventBusError, Result};

/// Deployment stage. Controls topic sizing defaults and whether the
/// administration CLI is used instead of the broker admin API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Production,
    Qa,
    Development,
}

impl Stage {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "production" => Ok(Stage::Production),
            "qa" => Ok(Stage::Qa),
            "development" => Ok(Stage::Development),
            other => Err(EventBusError::Configuration(format!(
                "unknown STAGE '{other}' (expected production / qa / development)"
            ))),
        }
    }
}

/// Partition count and replication factor applied to created topics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSettings {
    pub partitions: i32,
    pub replication: i32,
}

impl TopicSettings {
    /// Sizing by stage: shared multi-tenant clusters get real partitioning
    /// and replication, local development gets the minimum.
    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::Production | Stage::Qa => Self {
                partitions: 8,
                replication: 3,
            },
            Stage::Development => Self {
                partitions: 1,
                replication: 1,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Broker host:port list.
    pub brokers: Vec<String>,
    /// Environment discriminator baked into physical topic names. There can
    /// be several qa or development environments on one cluster.
    pub environment: String,
    pub stage: Stage,
    /// Prefix forced by shared-cluster providers, empty when absent.
    pub topic_prefix: String,
    pub service_name: String,
    pub service_version: String,
    /// Consumer group id, derived from prefix + service name + environment.
    pub group_id: String,
    pub topic: TopicSettings,
    /// Automatically carry the consumed event's context id into produce
    /// calls made from inside a handler.
    pub auto_context: bool,
    /// Administer topics through the platform CLI instead of the admin API.
    pub use_admin_cli: bool,
    /// Target application for the administration CLI.
    pub cli_app: Option<String>,
    /// Entity-id payload fields tried in order when deriving a partition
    /// key, most specific entity first.
    pub partition_key_fields: Vec<String>,
    /// Existence-poll deadline, seconds.
    pub topic_wait_secs: u64,
    /// Existence-poll interval, milliseconds.
    pub topic_wait_interval_ms: u64,
}

impl EventBusConfig {
    pub fn from_env() -> Result<Self> {
        Self::build(&|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. `from_env` is the thin
    /// wrapper over the process environment.
    pub fn build(get: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let environment = required(
            get,
            "ENV",
            "environment name; distinct from STAGE, there can be several qa or development environments",
        )?;
        let stage = Stage::parse(&required(
            get,
            "STAGE",
            "deployment stage: production / qa / development",
        )?)?;
        let kafka_url = required(
            get,
            "KAFKA_URL",
            "comma separated host:port values for the kafka brokers",
        )?;
        let service_name = required(get, "SERVICE_NAME", "name of the current service")?;

        let brokers = parse_broker_list(&kafka_url);
        if brokers.is_empty() {
            return Err(EventBusError::Configuration(
                "KAFKA_URL contains no usable broker addresses".to_string(),
            ));
        }

        let topic_prefix = get("KAFKA_PREFIX").unwrap_or_default();
        let service_version = get("SERVICE_VERSION").unwrap_or_else(|| "v1".to_string());
        let group_id = format!("{topic_prefix}{service_name}-{environment}");

        let use_admin_cli = match get("EVENT_BUS_USE_CLI") {
            Some(raw) => parse_bool(&raw),
            // Shared deployments expose administration through the platform
            // CLI only; local development talks to the broker directly.
            None => stage != Stage::Development,
        };

        let partition_key_fields = get("EVENT_BUS_KEY_FIELDS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_else(default_key_fields);

        Ok(Self {
            brokers,
            environment,
            topic: TopicSettings::for_stage(stage),
            stage,
            topic_prefix,
            service_name,
            service_version,
            group_id,
            auto_context: get("EVENT_BUS_AUTO_CONTEXT")
                .map(|raw| parse_bool(&raw))
                .unwrap_or(false),
            use_admin_cli,
            cli_app: get("EVENT_BUS_CLI_APP"),
            partition_key_fields,
            topic_wait_secs: parse_u64(get("EVENT_BUS_TOPIC_WAIT_SECS"), 90),
            topic_wait_interval_ms: parse_u64(get("EVENT_BUS_TOPIC_WAIT_INTERVAL_MS"), 1000),
        })
    }

    pub fn topic_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.topic_wait_secs)
    }

    pub fn topic_wait_interval(&self) -> Duration {
        Duration::from_millis(self.topic_wait_interval_ms)
    }
}

fn required(get: &dyn Fn(&str) -> Option<String>, key: &str, hint: &str) -> Result<String> {
    get(key).ok_or_else(|| {
        EventBusError::Configuration(format!("missing environment variable {key}: {hint}"))
    })
}

/// Managed platforms hand out broker URLs with a `kafka+ssl://` scheme the
/// client library must not pass through to the SDK.
fn parse_broker_list(raw: &str) -> Vec<String> {
    raw.replace("kafka+ssl://", "")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim(), "true" | "1" | "yes")
}

fn parse_u64(raw: Option<String>, default: u64) -> u64 {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn default_key_fields() -> Vec<String> {
    vec![
        "itemId".to_string(),
        "bundleId".to_string(),
        "userId".to_string(),
    ]
}
