//! Administration CLI backend
//!
//! Managed multi-tenant deployments expose no direct admin API access;
//! topic and consumer-group administration goes through the platform CLI
//! instead. Command family: `<cli> kafka:<operation> -a <app>`, with
//! destructive operations requiring an explicit `--confirm`.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::TopicAdmin;
use crate::error::{EventBusError, Result};

const DEFAULT_CLI_BIN: &str = "heroku";

pub struct CliAdmin {
    bin: String,
    app: String,
}

impl CliAdmin {
    pub fn new(app: impl Into<String>) -> Self {
        Self {
            bin: DEFAULT_CLI_BIN.to_string(),
            app: app.into(),
        }
    }

    pub fn with_bin(app: impl Into<String>, bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            app: app.into(),
        }
    }

    /// Run a `kafka:*` subcommand. A spawn failure propagates; the exit
    /// status is returned for the caller to interpret.
    async fn run(&self, args: &[&str], confirm: bool) -> Result<std::process::Output> {
        let mut command = Command::new(&self.bin);
        command.args(args).arg("-a").arg(&self.app);
        if confirm {
            command.arg("--confirm").arg(&self.app);
        }
        debug!(cli = %self.bin, ?args, "running administration command");
        command.output().await.map_err(|e| {
            EventBusError::Broker(format!(
                "failed to run {} {}: {e}",
                self.bin,
                args.join(" ")
            ))
        })
    }

    /// Like [`run`], but a non-zero exit is an error.
    async fn run_checked(&self, args: &[&str], confirm: bool) -> Result<String> {
        let output = self.run(args, confirm).await?;
        if !output.status.success() {
            return Err(EventBusError::Broker(format!(
                "{} {} exited with {}: {}",
                self.bin,
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl TopicAdmin for CliAdmin {
    async fn connect(&self) -> Result<()> {
        debug!(app = %self.app, "administration CLI ready");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn list_topic_names(&self) -> Result<Vec<String>> {
        let stdout = self.run_checked(&["kafka:topics"], false).await?;
        // Tabular output: one topic per line, name in the first column,
        // preceded by a `=== Topics` style header.
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('='))
            .filter_map(|line| line.split_whitespace().next())
            .map(String::from)
            .collect())
    }

    async fn create_topic(&self, name: &str, partitions: i32, replication: i32) -> Result<()> {
        let partitions = partitions.to_string();
        let replication = replication.to_string();
        info!(topic = name, "creating topic through CLI");
        self.run_checked(
            &[
                "kafka:topics:create",
                name,
                "--partitions",
                &partitions,
                "--replication-factor",
                &replication,
            ],
            false,
        )
        .await?;
        Ok(())
    }

    async fn delete_topic(&self, name: &str) -> Result<()> {
        info!(topic = name, "destroying topic through CLI");
        self.run_checked(&["kafka:topics:destroy", name], true)
            .await?;
        Ok(())
    }

    async fn topic_exists(&self, name: &str) -> Result<bool> {
        // The info command succeeds exactly when the topic exists.
        let output = self.run(&["kafka:topics:info", name], false).await?;
        Ok(output.status.success())
    }

    async fn group_exists(&self, group_id: &str) -> Result<bool> {
        let listing = self.run_checked(&["kafka:consumer-groups"], false).await?;
        Ok(listing
            .lines()
            .map(str::trim)
            .any(|line| line.split_whitespace().next() == Some(group_id)))
    }

    async fn create_group(&self, group_id: &str) -> Result<()> {
        info!(group = group_id, "creating consumer group through CLI");
        self.run_checked(&["kafka:consumer-groups:create", group_id], false)
            .await?;
        Ok(())
    }

    async fn delete_group(&self, group_id: &str) -> Result<()> {
        info!(group = group_id, "destroying consumer group through CLI");
        self.run_checked(&["kafka:consumer-groups:destroy", group_id], true)
            .await?;
        Ok(())
    }
}
