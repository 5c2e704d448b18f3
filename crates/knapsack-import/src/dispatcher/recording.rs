//! In-memory dispatcher

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use knapsack_common::{KnapsackError, Result};
use tokio::sync::Mutex;
use tracing::debug;

use super::{BulkDispatcher, DispatchStats, HealthStatus};
use crate::import::{DocumentWrite, PendingSchemaRequest};

/// One call received by a [`RecordingDispatcher`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    ClusterWait(HealthStatus),
    CreateCollection(PendingSchemaRequest),
    Write(DocumentWrite),
    Closed,
}

/// Records every call in order instead of talking to a store
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    events: Mutex<Vec<DispatchEvent>>,
    existing: HashSet<String>,
    health: Option<HealthStatus>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend these collections already exist in the store
    pub fn with_existing_collections<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.existing = names.into_iter().map(Into::into).collect();
        self
    }

    /// Report a fixed cluster health instead of always being ready
    pub fn with_health(mut self, health: HealthStatus) -> Self {
        self.health = Some(health);
        self
    }

    pub async fn events(&self) -> Vec<DispatchEvent> {
        self.events.lock().await.clone()
    }

    pub async fn writes(&self) -> Vec<DocumentWrite> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|event| match event {
                DispatchEvent::Write(write) => Some(write.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn schema_requests(&self) -> Vec<PendingSchemaRequest> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|event| match event {
                DispatchEvent::CreateCollection(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl BulkDispatcher for RecordingDispatcher {
    async fn wait_for_cluster(&self, min: HealthStatus, timeout: Duration) -> Result<()> {
        self.events.lock().await.push(DispatchEvent::ClusterWait(min));
        match self.health {
            Some(health) if health < min => Err(KnapsackError::ClusterUnavailable {
                status: health.to_string(),
                waited: timeout,
            }),
            _ => Ok(()),
        }
    }

    async fn create_collection(&self, request: &PendingSchemaRequest) -> Result<()> {
        if self.existing.contains(&request.collection) {
            return Err(KnapsackError::SchemaAlreadyExists(request.collection.clone()));
        }
        // same validation a real store would apply
        request.body()?;
        self.events
            .lock()
            .await
            .push(DispatchEvent::CreateCollection(request.clone()));
        Ok(())
    }

    async fn submit(&self, write: DocumentWrite) -> Result<()> {
        let mut events = self.events.lock().await;
        if events.last() == Some(&DispatchEvent::Closed) {
            return Err(KnapsackError::Dispatch("dispatcher is closed".to_string()));
        }
        debug!(document = %write.describe(), "recorded write");
        events.push(DispatchEvent::Write(write));
        Ok(())
    }

    async fn flush_and_close(&self) -> Result<DispatchStats> {
        let mut events = self.events.lock().await;
        let writes = events
            .iter()
            .filter(|e| matches!(e, DispatchEvent::Write(_)))
            .count() as u64;
        if events.last() != Some(&DispatchEvent::Closed) {
            events.push(DispatchEvent::Closed);
        }
        Ok(DispatchStats {
            submitted: writes,
            succeeded: writes,
            failed: 0,
            batches: u64::from(writes > 0),
        })
    }
}
