//! Configuration management

use std::time::Duration;

use knapsack_import::dispatcher::{
    default_concurrency, DispatcherConfig, DEFAULT_FLUSH_INTERVAL_SECS,
    DEFAULT_MAX_RECORDS_PER_BATCH,
};
use knapsack_import::import::job::DEFAULT_CLUSTER_TIMEOUT_SECS;
use serde::{Deserialize, Serialize};

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 9400;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default document store the imports write to.
pub const DEFAULT_CLUSTER_URL: &str = "http://127.0.0.1:9200";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub cluster: ClusterConfig,
    pub import: ImportDefaults,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Destination store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub url: String,
}

/// Import settings used when a request does not override them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportDefaults {
    /// Cluster readiness wait, in seconds
    pub timeout_secs: u64,
    pub max_actions_per_bulk: usize,
    pub max_bulk_concurrency: usize,
    pub flush_interval_secs: u64,
}

impl ImportDefaults {
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            flush_interval: Duration::from_secs(self.flush_interval_secs.max(1)),
            max_records_per_batch: self.max_actions_per_bulk,
            max_concurrent_batches: self.max_bulk_concurrency,
            ..DispatcherConfig::default()
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: std::env::var("KNAPSACK_HOST")
                    .unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: env_or("KNAPSACK_PORT", DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: env_or(
                    "KNAPSACK_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                ),
            },
            cluster: ClusterConfig {
                url: std::env::var("KNAPSACK_CLUSTER_URL")
                    .unwrap_or_else(|_| DEFAULT_CLUSTER_URL.to_string()),
            },
            import: ImportDefaults {
                timeout_secs: env_or("KNAPSACK_IMPORT_TIMEOUT", DEFAULT_CLUSTER_TIMEOUT_SECS),
                max_actions_per_bulk: env_or(
                    "KNAPSACK_MAX_ACTIONS_PER_BULK",
                    DEFAULT_MAX_RECORDS_PER_BATCH,
                ),
                max_bulk_concurrency: env_or(
                    "KNAPSACK_MAX_BULK_CONCURRENCY",
                    default_concurrency(),
                ),
                flush_interval_secs: env_or(
                    "KNAPSACK_FLUSH_INTERVAL",
                    DEFAULT_FLUSH_INTERVAL_SECS,
                ),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.cluster.url.is_empty() {
            anyhow::bail!("Cluster URL cannot be empty");
        }
        reqwest::Url::parse(&self.cluster.url)
            .map_err(|e| anyhow::anyhow!("Invalid cluster URL '{}': {}", self.cluster.url, e))?;

        if self.import.max_actions_per_bulk == 0 {
            anyhow::bail!("max_actions_per_bulk must be greater than 0");
        }

        if self.import.max_bulk_concurrency == 0 {
            anyhow::bail!("max_bulk_concurrency must be greater than 0");
        }

        if self.import.flush_interval_secs == 0 {
            tracing::warn!("Flush interval of 0 seconds, using 1 second");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            cluster: ClusterConfig {
                url: DEFAULT_CLUSTER_URL.to_string(),
            },
            import: ImportDefaults {
                timeout_secs: DEFAULT_CLUSTER_TIMEOUT_SECS,
                max_actions_per_bulk: DEFAULT_MAX_RECORDS_PER_BATCH,
                max_bulk_concurrency: default_concurrency(),
                flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 9400);
        assert_eq!(config.cluster.url, "http://127.0.0.1:9200");
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cluster.url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.import.max_bulk_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dispatcher_config_from_defaults() {
        let mut defaults = Config::default().import;
        defaults.max_actions_per_bulk = 250;
        let dispatcher = defaults.dispatcher_config();
        assert_eq!(dispatcher.max_records_per_batch, 250);
        assert_eq!(dispatcher.flush_interval, Duration::from_secs(5));
        assert!(dispatcher.validate().is_ok());
    }
}
