//! Registry of running imports
//!
//! Every import registers a descriptor for as long as its worker runs. The
//! registry is shared by all workers and by status queries.

use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::import::RemapTable;

/// Observable description of one running import
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportDescriptor {
    #[serde(skip)]
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub remap_table: RemapTable,
    pub source_path: PathBuf,
    /// Store the documents are written to
    pub destination: String,
    /// Archive is a copy made for this import
    pub copy_mode: bool,
    /// Archive was downloaded before the import
    pub fetch_mode: bool,
}

impl ImportDescriptor {
    pub fn new(source_path: impl Into<PathBuf>, destination: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            remap_table: RemapTable::default(),
            source_path: source_path.into(),
            destination: destination.into(),
            copy_mode: false,
            fetch_mode: false,
        }
    }

    pub fn with_remap_table(mut self, remap_table: RemapTable) -> Self {
        self.remap_table = remap_table;
        self
    }

    pub fn with_copy_mode(mut self, copy_mode: bool) -> Self {
        self.copy_mode = copy_mode;
        self
    }

    pub fn with_fetch_mode(mut self, fetch_mode: bool) -> Self {
        self.fetch_mode = fetch_mode;
        self
    }
}

/// Process-wide list of running imports, in start order
#[derive(Debug, Default)]
pub struct ImportStatusRegistry {
    imports: RwLock<Vec<ImportDescriptor>>,
}

impl ImportStatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, descriptor: ImportDescriptor) {
        self.write().push(descriptor);
    }

    /// Remove a descriptor; returns whether it was registered
    pub fn remove(&self, descriptor: &ImportDescriptor) -> bool {
        let mut imports = self.write();
        let before = imports.len();
        imports.retain(|d| d.id != descriptor.id);
        imports.len() != before
    }

    /// Snapshot of the running imports
    pub fn list(&self) -> Vec<ImportDescriptor> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Add `descriptor` until the returned guard is dropped
    pub fn register(self: &Arc<Self>, descriptor: ImportDescriptor) -> Registration {
        self.add(descriptor.clone());
        Registration {
            registry: Arc::clone(self),
            descriptor,
        }
    }

    // A panic while holding the lock cannot leave the Vec half-updated, so
    // poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, Vec<ImportDescriptor>> {
        self.imports.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<ImportDescriptor>> {
        self.imports.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Keeps a descriptor registered; removes it on drop
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ImportStatusRegistry>,
    descriptor: ImportDescriptor,
}

impl Registration {
    pub fn descriptor(&self) -> &ImportDescriptor {
        &self.descriptor
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(&self.descriptor);
    }
}
