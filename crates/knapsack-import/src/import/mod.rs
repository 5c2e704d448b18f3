//! Archive-to-store import
//!
//! [`ImportJob`] is what a caller builds and spawns; it drives an
//! [`ImportCoordinator`] over an archive session and reports through the
//! status registry.

pub mod coordinator;
pub mod document;
pub mod job;
pub mod remap;
pub mod schema;

pub use coordinator::{CoordinatorStats, ImportCoordinator};
pub use document::DocumentWrite;
pub use job::{ImportJob, ImportOptions, ImportSummary};
pub use remap::RemapTable;
pub use schema::{PendingSchemaRequest, SchemaOverrides};
