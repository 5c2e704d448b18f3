//! Streaming import coordinator
//!
//! Reads packets from an open archive session in one pass and turns them
//! into store calls:
//!
//! 1. settings and mapping entries are collected into a pending schema
//!    request per source collection
//! 2. consecutive field entries sharing `(collection, subcollection, id)` are
//!    grouped; a change of coordinate (or end of stream) flushes the group
//! 3. a flush creates the collection first when a schema request is pending
//!    for it, then submits one document write
//!
//! Only the current group and the unresolved schema requests are held in
//! memory. Grouping compares source names; remapping happens at flush time.

use std::collections::HashMap;
use std::sync::Arc;

use knapsack_common::{KnapsackError, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{DocumentWrite, PendingSchemaRequest, RemapTable, SchemaOverrides};
use crate::archive::entry::ALL_COLLECTIONS;
use crate::archive::{ArchiveSession, Coordinate, EntryKind, Packet, RecordKey};
use crate::dispatcher::BulkDispatcher;

/// Counters of one coordinator pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub packets: u64,
    pub documents: u64,
    pub schemas_created: u64,
    pub schemas_skipped: u64,
}

/// Field entries of the document currently being assembled
#[derive(Debug, Default)]
struct FieldGroup {
    key: Option<RecordKey>,
    fields: Vec<(String, Packet)>,
}

impl FieldGroup {
    /// Later fields with the same name replace earlier ones in place
    fn insert(&mut self, field: String, packet: Packet) {
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some(slot) => slot.1 = packet,
            None => self.fields.push((field, packet)),
        }
    }

    fn take(&mut self) -> Option<(RecordKey, Vec<(String, Packet)>)> {
        if self.fields.is_empty() {
            return None;
        }
        let key = self.key.take()?;
        Some((key, std::mem::take(&mut self.fields)))
    }
}

pub struct ImportCoordinator {
    remap: RemapTable,
    overrides: SchemaOverrides,
    dispatcher: Arc<dyn BulkDispatcher>,
    create_index: bool,
    ignore_existing_index: bool,
    /// Keyed by source collection
    pending: HashMap<String, PendingSchemaRequest>,
    group: FieldGroup,
    stats: CoordinatorStats,
}

impl ImportCoordinator {
    pub fn new(dispatcher: Arc<dyn BulkDispatcher>) -> Self {
        Self {
            remap: RemapTable::default(),
            overrides: SchemaOverrides::default(),
            dispatcher,
            create_index: true,
            ignore_existing_index: false,
            pending: HashMap::new(),
            group: FieldGroup::default(),
            stats: CoordinatorStats::default(),
        }
    }

    pub fn with_remap(mut self, remap: RemapTable) -> Self {
        self.remap = remap;
        self
    }

    pub fn with_overrides(mut self, overrides: SchemaOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Create collections from archived settings/mappings before their first
    /// document (default: true)
    pub fn create_index(mut self, create: bool) -> Self {
        self.create_index = create;
        self
    }

    /// Downgrade "collection already exists" to a warning (default: false)
    pub fn ignore_existing_index(mut self, ignore: bool) -> Self {
        self.ignore_existing_index = ignore;
        self
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.stats
    }

    /// Drain `session` (opened for reading) and dispatch everything in it
    pub async fn run(&mut self, session: &mut ArchiveSession) -> Result<CoordinatorStats> {
        while let Some(packet) = session.next().await? {
            self.accept(packet).await?;
        }
        self.finish().await?;
        Ok(self.stats)
    }

    /// Route one packet
    pub async fn accept(&mut self, packet: Packet) -> Result<()> {
        self.stats.packets += 1;
        let coordinate = Coordinate::decode(packet.name())?;

        match coordinate.kind() {
            EntryKind::Settings => self.accept_settings(&coordinate, &packet).await,
            EntryKind::Mapping => self.accept_mapping(&coordinate, &packet).await,
            EntryKind::Field => {
                let key = coordinate.record_key();
                if self.group.key.as_ref() != Some(&key) {
                    self.flush().await?;
                    self.group.key = Some(key);
                }
                self.group
                    .insert(coordinate.field_name().to_string(), packet);
                Ok(())
            },
        }
    }

    /// Flush the last group; call once the stream is exhausted
    pub async fn finish(&mut self) -> Result<()> {
        self.flush().await?;
        for (collection, request) in self.pending.drain() {
            warn!(
                collection = %collection,
                destination = %request.collection,
                "schema entries without any documents, collection not created"
            );
        }
        Ok(())
    }

    async fn accept_settings(&mut self, coordinate: &Coordinate, packet: &Packet) -> Result<()> {
        let source = coordinate.collection.as_str();
        let destination = self.remap.collection(source).to_string();
        if is_wildcard(source, &destination) {
            debug!(collection = source, "ignoring settings for all collections");
            return Ok(());
        }

        let settings = self.overrides.settings(&destination, packet).await?;
        info!(collection = source, destination = %destination, "settings received");
        self.pending
            .entry(source.to_string())
            .or_insert_with(|| PendingSchemaRequest::new(destination))
            .set_settings(settings);
        Ok(())
    }

    async fn accept_mapping(&mut self, coordinate: &Coordinate, packet: &Packet) -> Result<()> {
        let source = coordinate.collection.as_str();
        let destination = self.remap.collection(source).to_string();
        if is_wildcard(source, &destination) {
            debug!(collection = source, "ignoring mapping for all collections");
            return Ok(());
        }

        let subcollection = self
            .remap
            .subcollection(source, &coordinate.subcollection)
            .to_string();
        let mapping = self
            .overrides
            .mapping(&destination, &subcollection, packet)
            .await?;
        info!(
            collection = source,
            subcollection = %coordinate.subcollection,
            destination = %destination,
            "mapping received"
        );
        self.pending
            .entry(source.to_string())
            .or_insert_with(|| PendingSchemaRequest::new(destination))
            .add_mapping(subcollection, mapping);
        Ok(())
    }

    /// Turn the current group into a document write; no-op when empty
    async fn flush(&mut self) -> Result<()> {
        let Some((key, fields)) = self.group.take() else {
            return Ok(());
        };

        if let Some(request) = self.pending.remove(&key.collection) {
            self.resolve_schema(request).await?;
        }

        let mut write = DocumentWrite::new(
            self.remap.collection(&key.collection),
            self.remap.subcollection(&key.collection, &key.subcollection),
            key.record_id,
        );
        for (field, packet) in &fields {
            write.apply_field(field, packet)?;
        }

        self.dispatcher.submit(write).await?;
        self.stats.documents += 1;
        Ok(())
    }

    async fn resolve_schema(&mut self, request: PendingSchemaRequest) -> Result<()> {
        if !self.create_index {
            debug!(collection = %request.collection, "collection creation disabled, dropping schema");
            return Ok(());
        }

        match self.dispatcher.create_collection(&request).await {
            Ok(()) => {
                info!(collection = %request.collection, "collection created");
                self.stats.schemas_created += 1;
                Ok(())
            },
            Err(KnapsackError::SchemaAlreadyExists(collection)) if self.ignore_existing_index => {
                warn!(collection = %collection, "collection already exists, keeping it");
                self.stats.schemas_skipped += 1;
                Ok(())
            },
            Err(e) => Err(e),
        }
    }
}

fn is_wildcard(source: &str, destination: &str) -> bool {
    source == ALL_COLLECTIONS || destination == ALL_COLLECTIONS
}
