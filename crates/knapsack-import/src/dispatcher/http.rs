//! Elasticsearch-compatible bulk dispatcher
//!
//! Writes are rendered into NDJSON action/source pairs as they are
//! submitted and shipped to `POST /_bulk` when the buffer reaches
//! `max_records_per_batch` or the flush ticker fires. At most
//! `max_concurrent_batches` bulk requests run at once; a flush waits for a
//! free slot, which is what pushes back on the import worker. Failed items
//! are counted and logged but never abort the import.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use knapsack_common::{KnapsackError, Result};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use super::{BulkDispatcher, DispatchStats, DispatcherConfig, HealthStatus};
use crate::import::{DocumentWrite, PendingSchemaRequest};

/// Pause between two cluster health checks
const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Default)]
struct Batch {
    body: String,
    count: usize,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    batches: AtomicU64,
}

struct Inner {
    client: Client,
    base: Url,
    config: DispatcherConfig,
    batch: Mutex<Batch>,
    slots: Arc<Semaphore>,
    in_flight: Mutex<JoinSet<()>>,
    counters: Counters,
    closed: AtomicBool,
}

/// Bulk dispatcher speaking the Elasticsearch REST API
pub struct HttpBulkDispatcher {
    inner: Arc<Inner>,
    ticker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: HealthStatus,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<Map<String, Value>>,
}

impl HttpBulkDispatcher {
    /// Create a dispatcher for the store at `base` and start its flush ticker
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(base: Url, config: DispatcherConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| KnapsackError::Dispatch(format!("failed to build HTTP client: {}", e)))?;

        let inner = Arc::new(Inner {
            client,
            base,
            slots: Arc::new(Semaphore::new(config.max_concurrent_batches)),
            config,
            batch: Mutex::new(Batch::default()),
            in_flight: Mutex::new(JoinSet::new()),
            counters: Counters::default(),
            closed: AtomicBool::new(false),
        });

        let ticker = tokio::spawn(run_ticker(Arc::downgrade(&inner), inner.config.flush_interval));

        info!(
            destination = %inner.base,
            max_records_per_batch = inner.config.max_records_per_batch,
            max_concurrent_batches = inner.config.max_concurrent_batches,
            "bulk dispatcher ready"
        );

        Ok(Self {
            inner,
            ticker: std::sync::Mutex::new(Some(ticker)),
        })
    }

    pub fn destination(&self) -> &Url {
        &self.inner.base
    }

    fn stop_ticker(&self) {
        let handle = match self.ticker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for HttpBulkDispatcher {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

async fn run_ticker(inner: Weak<Inner>, period: Duration) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if let Err(e) = inner.flush().await {
            warn!(error = %e, "scheduled flush failed");
        }
    }
}

impl Inner {
    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| KnapsackError::Config(format!("invalid store path '{}': {}", path, e)))
    }

    async fn cluster_health(&self) -> Result<HealthStatus> {
        let response = self
            .client
            .get(self.url("_cluster/health")?)
            .send()
            .await
            .map_err(request_error)?
            .error_for_status()
            .map_err(request_error)?;
        let health: HealthResponse = response.json().await.map_err(request_error)?;
        Ok(health.status)
    }

    /// Send the buffered batch, waiting for a free slot first
    async fn flush(self: &Arc<Self>) -> Result<()> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| KnapsackError::Dispatch("dispatcher is closed".to_string()))?;

        let batch = std::mem::take(&mut *self.batch.lock().await);
        if batch.count == 0 {
            return Ok(());
        }

        let inner = Arc::clone(self);
        let mut in_flight = self.in_flight.lock().await;
        // reap finished batches
        while in_flight.try_join_next().is_some() {}
        in_flight.spawn(async move {
            inner.send_batch(batch).await;
            drop(permit);
        });
        Ok(())
    }

    async fn send_batch(&self, batch: Batch) {
        let count = batch.count as u64;
        self.counters.batches.fetch_add(1, Ordering::Relaxed);
        debug!(documents = count, "sending bulk request");

        match self.post_bulk(batch.body).await {
            Ok(response) => {
                let failed = if response.errors {
                    response
                        .items
                        .iter()
                        .filter_map(|item| item.values().next())
                        .filter(|result| result.get("error").is_some())
                        .inspect(|result| {
                            debug!(item = %result, "bulk item rejected");
                        })
                        .count() as u64
                } else {
                    0
                };
                if failed > 0 {
                    warn!(failed, total = count, "bulk request had rejected documents");
                }
                self.counters.failed.fetch_add(failed, Ordering::Relaxed);
                self.counters
                    .succeeded
                    .fetch_add(count.saturating_sub(failed), Ordering::Relaxed);
            },
            Err(e) => {
                error!(error = %e, documents = count, "bulk request failed");
                self.counters.failed.fetch_add(count, Ordering::Relaxed);
            },
        }
    }

    async fn post_bulk(&self, body: String) -> Result<BulkResponse> {
        let response = self
            .client
            .post(self.url("_bulk")?)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(request_error)?
            .error_for_status()
            .map_err(request_error)?;
        response.json().await.map_err(request_error)
    }

    async fn refresh(&self) -> Result<()> {
        self.client
            .post(self.url("_refresh")?)
            .send()
            .await
            .map_err(request_error)?
            .error_for_status()
            .map_err(request_error)?;
        Ok(())
    }

    fn stats(&self) -> DispatchStats {
        DispatchStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            batches: self.counters.batches.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl BulkDispatcher for HttpBulkDispatcher {
    #[instrument(skip(self))]
    async fn wait_for_cluster(&self, min: HealthStatus, timeout: Duration) -> Result<()> {
        let started = Instant::now();
        let mut last_status;

        loop {
            match self.inner.cluster_health().await {
                Ok(status) if status >= min => {
                    debug!(%status, "cluster is ready");
                    return Ok(());
                },
                Ok(status) => last_status = status.to_string(),
                Err(e) => {
                    debug!(error = %e, "cluster health check failed");
                    last_status = format!("unreachable ({})", e);
                },
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(KnapsackError::ClusterUnavailable {
                    status: last_status,
                    waited: elapsed,
                });
            }
            tokio::time::sleep(HEALTH_POLL_INTERVAL.min(timeout - elapsed)).await;
        }
    }

    #[instrument(skip(self, request), fields(collection = %request.collection))]
    async fn create_collection(&self, request: &PendingSchemaRequest) -> Result<()> {
        let body = request.body()?;
        let path = urlencoding::encode(&request.collection).into_owned();
        let response = self
            .inner
            .client
            .put(self.inner.url(&path)?)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if status.is_success() {
            let ack: Value = response.json().await.unwrap_or(Value::Null);
            if ack.get("acknowledged") == Some(&Value::Bool(false)) {
                warn!("collection creation was not acknowledged");
            }
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        if is_already_exists(status, &text) {
            return Err(KnapsackError::SchemaAlreadyExists(request.collection.clone()));
        }
        Err(KnapsackError::Dispatch(format!(
            "creating collection {} failed with {}: {}",
            request.collection, status, text
        )))
    }

    async fn submit(&self, write: DocumentWrite) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(KnapsackError::Dispatch("dispatcher is closed".to_string()));
        }

        self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
        let lines = match render_bulk_lines(&write) {
            Ok(lines) => lines,
            Err(e) => {
                warn!(document = %write.describe(), error = %e, "document skipped");
                self.inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            },
        };

        let full = {
            let mut batch = self.inner.batch.lock().await;
            batch.body.push_str(&lines);
            batch.count += 1;
            batch.count >= self.inner.config.max_records_per_batch
        };

        if full {
            self.inner.flush().await?;
        }
        Ok(())
    }

    async fn flush_and_close(&self) -> Result<DispatchStats> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(self.inner.stats());
        }
        self.stop_ticker();
        self.inner.flush().await?;

        let mut in_flight = std::mem::take(&mut *self.inner.in_flight.lock().await);
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "bulk request task failed");
            }
        }

        if let Err(e) = self.inner.refresh().await {
            warn!(error = %e, "refresh after import failed");
        }

        let stats = self.inner.stats();
        info!(
            submitted = stats.submitted,
            succeeded = stats.succeeded,
            failed = stats.failed,
            batches = stats.batches,
            "bulk dispatcher closed"
        );
        Ok(stats)
    }
}

/// NDJSON action line plus source line for one write
pub fn render_bulk_lines(write: &DocumentWrite) -> Result<String> {
    let mut meta = Map::new();
    meta.insert("_index".to_string(), json!(write.collection));
    meta.insert("_type".to_string(), json!(write.subcollection));
    if let Some(id) = &write.id {
        meta.insert("_id".to_string(), json!(id));
    }
    if let Some(parent) = &write.parent {
        meta.insert("_parent".to_string(), json!(parent));
    }
    if let Some(routing) = &write.routing {
        meta.insert("_routing".to_string(), json!(routing));
    }
    if let Some(timestamp) = &write.timestamp {
        meta.insert("_timestamp".to_string(), json!(timestamp));
    }
    if let Some(version) = write.version {
        meta.insert("_version".to_string(), json!(version));
        meta.insert("_version_type".to_string(), json!("external"));
    }

    let action = json!({ "index": meta });
    Ok(format!("{}\n{}\n", action, write.source_line()?))
}

fn is_already_exists(status: StatusCode, body: &str) -> bool {
    (status == StatusCode::BAD_REQUEST || status == StatusCode::CONFLICT)
        && (body.contains("resource_already_exists_exception")
            || body.contains("index_already_exists_exception")
            || body.contains("IndexAlreadyExistsException"))
}

fn request_error(err: reqwest::Error) -> KnapsackError {
    KnapsackError::Dispatch(err.to_string())
}
