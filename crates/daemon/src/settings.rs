// Daemon Configuration
// Defaults overlaid by BATCHLINE_* environment variables

use anyhow::{Context, Result};
use batchline_core::application::PruneConfig;
use config::{Config, Environment};
use serde::Deserialize;

pub const ENV_PREFIX: &str = "BATCHLINE";
const DEFAULT_DATABASE_URL: &str = "sqlite://~/.batchline/batches.db";
const DEFAULT_QUEUE_DATABASE_URL: &str = "sqlite://~/.batchline/queue.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Batch rows and unique-lock entries
    pub database_url: String,
    /// Queue transport (separate file, separate write lock)
    pub queue_database_url: String,
    /// Comma-separated queues served by workers
    pub queues: String,
    pub log_format: LogFormat,
    pub prune_interval_hours: u64,
    pub prune_finished_hours: u64,
    #[serde(default)]
    pub prune_unfinished_hours: Option<u64>,
    #[serde(default)]
    pub prune_cancelled_hours: Option<u64>,
    pub retry_base_delay_ms: u64,
}

impl DaemonConfig {
    /// Load from the process environment
    pub fn load() -> Result<Self> {
        Self::from_env(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
    }

    pub fn from_env(env: Environment) -> Result<Self> {
        let mut config: DaemonConfig = Config::builder()
            .set_default("database_url", DEFAULT_DATABASE_URL)?
            .set_default("queue_database_url", DEFAULT_QUEUE_DATABASE_URL)?
            .set_default("queues", "default")?
            .set_default("log_format", "pretty")?
            .set_default("prune_interval_hours", 24)?
            .set_default("prune_finished_hours", 24)?
            .set_default("retry_base_delay_ms", 1000)?
            .add_source(env)
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;

        config.database_url = expand(&config.database_url);
        config.queue_database_url = expand(&config.queue_database_url);
        Ok(config)
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.queues
            .split(',')
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn prune_config(&self) -> PruneConfig {
        PruneConfig {
            interval_hours: self.prune_interval_hours,
            finished_hours: self.prune_finished_hours,
            unfinished_hours: self.prune_unfinished_hours,
            cancelled_hours: self.prune_cancelled_hours,
        }
    }
}

/// Expand `~` and env vars inside the path part of a sqlite URL
fn expand(url: &str) -> String {
    match url.strip_prefix("sqlite://") {
        Some(path) => format!("sqlite://{}", shellexpand::tilde(path)),
        None => shellexpand::tilde(url).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .source(Some(source))
    }

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::from_env(env(&[])).unwrap();
        assert_eq!(config.queue_names(), vec!["default".to_string()]);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.prune_config(), PruneConfig::default());
        assert_eq!(config.retry_base_delay_ms, 1000);
        assert!(!config.database_url.contains('~'));
    }

    #[test]
    fn test_environment_overrides() {
        let config = DaemonConfig::from_env(env(&[
            ("BATCHLINE_QUEUES", "high, default,low"),
            ("BATCHLINE_LOG_FORMAT", "json"),
            ("BATCHLINE_PRUNE_CANCELLED_HOURS", "48"),
            ("BATCHLINE_DATABASE_URL", "sqlite::memory:"),
        ]))
        .unwrap();

        assert_eq!(config.queue_names(), vec!["high", "default", "low"]);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.prune_cancelled_hours, Some(48));
        assert_eq!(config.prune_unfinished_hours, None);
        assert_eq!(config.database_url, "sqlite::memory:");
    }
}
