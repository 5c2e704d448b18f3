//! Batched writes to the document store
//!
//! The import coordinator only sees the [`BulkDispatcher`] trait. Two
//! implementations ship with the crate:
//!
//! - [`HttpBulkDispatcher`]: Elasticsearch-compatible `_bulk` REST API
//! - [`RecordingDispatcher`]: keeps every call in memory (tests, dry runs)

pub mod http;
pub mod recording;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use knapsack_common::{KnapsackError, Result};
use serde::{Deserialize, Serialize};

use crate::import::{DocumentWrite, PendingSchemaRequest};

pub use http::HttpBulkDispatcher;
pub use recording::{DispatchEvent, RecordingDispatcher};

/// Default flush interval (5 seconds)
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 5;

/// Default number of writes per bulk request
pub const DEFAULT_MAX_RECORDS_PER_BATCH: usize = 1000;

/// Default per-request timeout towards the store (60 seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Cluster health level, ordered from worst to best
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Red,
    Yellow,
    Green,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Red => write!(f, "red"),
            HealthStatus::Yellow => write!(f, "yellow"),
            HealthStatus::Green => write!(f, "green"),
        }
    }
}

impl FromStr for HealthStatus {
    type Err = KnapsackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "red" => Ok(HealthStatus::Red),
            "yellow" => Ok(HealthStatus::Yellow),
            "green" => Ok(HealthStatus::Green),
            _ => Err(KnapsackError::Config(format!("unknown health status '{}'", s))),
        }
    }
}

/// Batching behaviour of a dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Buffered writes are flushed at least this often
    pub flush_interval: Duration,
    pub max_records_per_batch: usize,
    /// Bulk requests allowed in flight at once; further flushes wait
    pub max_concurrent_batches: usize,
    pub request_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
            max_records_per_batch: DEFAULT_MAX_RECORDS_PER_BATCH,
            max_concurrent_batches: default_concurrency(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_records_per_batch == 0 {
            return Err(KnapsackError::Config(
                "max_records_per_batch must be greater than 0".to_string(),
            ));
        }
        if self.max_concurrent_batches == 0 {
            return Err(KnapsackError::Config(
                "max_concurrent_batches must be greater than 0".to_string(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(KnapsackError::Config(
                "flush_interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Two bulk requests per available CPU
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(2)
}

/// Counters reported when a dispatcher shuts down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub batches: u64,
}

/// Buffers document writes and ships them to the store in batches
#[async_trait]
pub trait BulkDispatcher: Send + Sync {
    /// Block until the cluster reports at least `min`, or fail after `timeout`
    async fn wait_for_cluster(&self, min: HealthStatus, timeout: Duration) -> Result<()>;

    /// Create a collection with the accumulated settings and mappings.
    /// Fails with `SchemaAlreadyExists` when the collection is present.
    async fn create_collection(&self, request: &PendingSchemaRequest) -> Result<()>;

    /// Queue a write; may wait while the maximum number of batches is in flight
    async fn submit(&self, write: DocumentWrite) -> Result<()>;

    /// Flush what is buffered, wait for in-flight batches and stop accepting
    /// writes
    async fn flush_and_close(&self) -> Result<DispatchStats>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_health_ordering() {
        assert!(HealthStatus::Green > HealthStatus::Yellow);
        assert!(HealthStatus::Yellow > HealthStatus::Red);
        assert_eq!("YELLOW".parse::<HealthStatus>().unwrap(), HealthStatus::Yellow);
        assert!("blue".parse::<HealthStatus>().is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(DispatcherConfig::default().validate().is_ok());

        let config = DispatcherConfig {
            max_records_per_batch: 0,
            ..DispatcherConfig::default()
        };
        assert!(config.validate().is_err());

        let config = DispatcherConfig {
            max_concurrent_batches: 0,
            ..DispatcherConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
