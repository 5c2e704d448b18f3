//! Knapsack import library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Streams document collections out of archive files into an
//! Elasticsearch-compatible document store.
//!
//! # Overview
//!
//! - **Archives**: codec selection by file suffix and sequential packet
//!   sessions over tar, tar.gz and zip files ([`archive`])
//! - **Import**: grouping of field entries into documents, schema requests,
//!   name remapping ([`import`])
//! - **Dispatch**: batched, bounded-concurrency writes to the store
//!   ([`dispatcher`])
//! - **Status**: registry of running imports ([`status`])
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use knapsack_import::archive::CodecRegistry;
//! use knapsack_import::dispatcher::{DispatcherConfig, HttpBulkDispatcher};
//! use knapsack_import::status::{ImportDescriptor, ImportStatusRegistry};
//! use knapsack_import::import::ImportJob;
//!
//! # async fn run() -> knapsack_common::Result<()> {
//! let codecs = CodecRegistry::with_defaults();
//! let session = codecs.session("books.tar.gz")?;
//! let url = "http://localhost:9200/".parse().map_err(|_| {
//!     knapsack_common::KnapsackError::Config("bad url".into())
//! })?;
//! let dispatcher = Arc::new(HttpBulkDispatcher::connect(url, DispatcherConfig::default())?);
//! let registry = Arc::new(ImportStatusRegistry::new());
//!
//! let job = ImportJob::new(session, ImportDescriptor::new("books.tar.gz", "localhost:9200"));
//! let summary = job.run(dispatcher, registry).await?;
//! println!("{} documents imported", summary.documents);
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod cli;
pub mod dispatcher;
pub mod import;
pub mod status;

// Re-export commonly used types
pub use archive::{ArchiveSession, CodecRegistry, Packet};
pub use dispatcher::{BulkDispatcher, DispatcherConfig, HttpBulkDispatcher, RecordingDispatcher};
pub use import::{ImportJob, ImportOptions, ImportSummary, RemapTable, SchemaOverrides};
pub use status::{ImportDescriptor, ImportStatusRegistry};
