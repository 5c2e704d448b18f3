//! One import as a task value

use std::sync::Arc;
use std::time::{Duration, Instant};

use knapsack_common::Result;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

use super::coordinator::{CoordinatorStats, ImportCoordinator};
use super::{RemapTable, SchemaOverrides};
use crate::archive::{ArchiveSession, SessionMode};
use crate::dispatcher::{BulkDispatcher, DispatchStats, HealthStatus};
use crate::status::{ImportDescriptor, ImportStatusRegistry};

/// Default wait for the destination cluster (30 seconds)
pub const DEFAULT_CLUSTER_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    /// Create collections from archived settings/mappings
    pub create_index: bool,
    /// Keep going when a collection already exists
    pub ignore_existing_index: bool,
    pub cluster_timeout: Duration,
    /// Lowest cluster health the import starts on
    pub min_health: HealthStatus,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            create_index: true,
            ignore_existing_index: false,
            cluster_timeout: Duration::from_secs(DEFAULT_CLUSTER_TIMEOUT_SECS),
            min_health: HealthStatus::Yellow,
        }
    }
}

/// Outcome of a finished import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub packets: u64,
    pub documents: u64,
    pub schemas_created: u64,
    pub schemas_skipped: u64,
    pub dispatch: DispatchStats,
}

/// Everything one import worker needs: the archive, how to rename, where
/// schema overrides live and what to report while running
#[derive(Debug)]
pub struct ImportJob {
    session: ArchiveSession,
    remap: RemapTable,
    overrides: SchemaOverrides,
    options: ImportOptions,
    descriptor: ImportDescriptor,
}

impl ImportJob {
    /// The remap table is taken from the descriptor
    pub fn new(session: ArchiveSession, descriptor: ImportDescriptor) -> Self {
        Self {
            session,
            remap: descriptor.remap_table.clone(),
            overrides: SchemaOverrides::default(),
            options: ImportOptions::default(),
            descriptor,
        }
    }

    pub fn with_overrides(mut self, overrides: SchemaOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_options(mut self, options: ImportOptions) -> Self {
        self.options = options;
        self
    }

    pub fn descriptor(&self) -> &ImportDescriptor {
        &self.descriptor
    }

    /// Run the import to completion
    ///
    /// The descriptor is listed in `registry` while this runs. The session is
    /// closed and the dispatcher flushed and closed whether or not the import
    /// succeeds.
    pub async fn run(
        mut self,
        dispatcher: Arc<dyn BulkDispatcher>,
        registry: Arc<ImportStatusRegistry>,
    ) -> Result<ImportSummary> {
        let _registration = registry.register(self.descriptor.clone());
        let started = Instant::now();
        info!(
            path = %self.descriptor.source_path.display(),
            destination = %self.descriptor.destination,
            codec = self.session.codec().name(),
            "import started"
        );

        let outcome = self.execute(Arc::clone(&dispatcher)).await;

        let closed = self.session.close().await;
        if let Err(e) = &closed {
            warn!(error = %e, "failed to close archive");
        }
        let dispatched = dispatcher.flush_and_close().await;
        if let (Err(_), Err(e)) = (&outcome, &dispatched) {
            warn!(error = %e, "failed to close dispatcher");
        }

        let result = outcome.and_then(|stats| {
            closed?;
            let dispatch = dispatched?;
            Ok(ImportSummary {
                packets: stats.packets,
                documents: stats.documents,
                schemas_created: stats.schemas_created,
                schemas_skipped: stats.schemas_skipped,
                dispatch,
            })
        });

        match &result {
            Ok(summary) => info!(
                packets = summary.packets,
                documents = summary.documents,
                schemas_created = summary.schemas_created,
                failed_writes = summary.dispatch.failed,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "import finished"
            ),
            Err(e) => error!(
                error = %e,
                path = %self.descriptor.source_path.display(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "import failed"
            ),
        }
        result
    }

    /// Run on the tokio runtime without waiting for the result
    pub fn spawn(
        self,
        dispatcher: Arc<dyn BulkDispatcher>,
        registry: Arc<ImportStatusRegistry>,
    ) -> JoinHandle<Result<ImportSummary>> {
        let span = tracing::info_span!("import", id = %self.descriptor.id);
        tokio::spawn(self.run(dispatcher, registry).instrument(span))
    }

    async fn execute(
        &mut self,
        dispatcher: Arc<dyn BulkDispatcher>,
    ) -> Result<CoordinatorStats> {
        info!(
            min_health = %self.options.min_health,
            timeout_secs = self.options.cluster_timeout.as_secs(),
            "waiting for cluster"
        );
        dispatcher
            .wait_for_cluster(self.options.min_health, self.options.cluster_timeout)
            .await?;
        info!("cluster ready");

        if !self.session.is_open() {
            self.session.open(SessionMode::Read).await?;
        }

        let mut coordinator = ImportCoordinator::new(dispatcher)
            .with_remap(self.remap.clone())
            .with_overrides(std::mem::take(&mut self.overrides))
            .create_index(self.options.create_index)
            .ignore_existing_index(self.options.ignore_existing_index);
        coordinator.run(&mut self.session).await
    }
}
