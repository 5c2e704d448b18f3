//! End-to-end tests for the import pipeline
//!
//! These tests build real archives on disk and run complete imports against
//! an in-memory dispatcher:
//! - Grouping of field entries into documents
//! - Schema creation before the first document of a collection
//! - Remapping of destinations
//! - Failure handling and status registry cleanup

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use flate2::write::GzEncoder;
use knapsack_common::KnapsackError;
use knapsack_import::archive::{CodecRegistry, Packet, SessionMode};
use knapsack_import::dispatcher::{
    BulkDispatcher, DispatchEvent, DispatchStats, HealthStatus, RecordingDispatcher,
};
use knapsack_import::import::{
    DocumentWrite, ImportJob, ImportOptions, PendingSchemaRequest, RemapTable, SchemaOverrides,
};
use knapsack_import::status::{ImportDescriptor, ImportStatusRegistry};
use serde_json::json;

/// Write `entries` as a gzip-compressed tar archive
fn write_tar_gz(dir: &Path, name: &str, entries: &[(&str, &str)]) -> PathBuf {
    let path = dir.join(name);
    let file = std::fs::File::create(&path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, flate2::Compression::default()));
    for (entry, payload) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(payload.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, entry, payload.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
    path
}

fn write_zip(dir: &Path, name: &str, entries: &[(&str, &str)]) -> PathBuf {
    let path = dir.join(name);
    let file = std::fs::File::create(&path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (entry, payload) in entries {
        zip.start_file(*entry, options).unwrap();
        zip.write_all(payload.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
    path
}

async fn run_import(
    path: &Path,
    dispatcher: Arc<RecordingDispatcher>,
    remap: RemapTable,
    options: ImportOptions,
) -> knapsack_common::Result<knapsack_import::ImportSummary> {
    let session = CodecRegistry::with_defaults().session(path)?;
    let descriptor = ImportDescriptor::new(path, "memory").with_remap_table(remap);
    ImportJob::new(session, descriptor)
        .with_options(options)
        .run(dispatcher, Arc::new(ImportStatusRegistry::new()))
        .await
}

// ============================================================================
// Scenario Tests
// ============================================================================

#[tokio::test]
async fn test_end_to_end_tar_gz() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_tar_gz(
        dir.path(),
        "a.tar.gz",
        &[
            ("a/t/_settings", r#"{"number_of_shards":1}"#),
            ("a/t/1/_source", r#"{"x":1}"#),
            ("a/t/2/_parent", "p1"),
            ("a/t/2/_source", r#"{"x":2}"#),
        ],
    );

    let dispatcher = Arc::new(RecordingDispatcher::new());
    let summary = run_import(&path, dispatcher.clone(), RemapTable::new(), ImportOptions::default())
        .await
        .unwrap();

    assert_eq!(summary.packets, 4);
    assert_eq!(summary.documents, 2);
    assert_eq!(summary.schemas_created, 1);
    assert_eq!(summary.dispatch.submitted, 2);

    let events = dispatcher.events().await;
    assert_eq!(events.len(), 5);
    assert_eq!(events[0], DispatchEvent::ClusterWait(HealthStatus::Yellow));
    assert_eq!(events[4], DispatchEvent::Closed);

    let requests = dispatcher.schema_requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].collection, "a");
    assert_eq!(requests[0].body().unwrap(), json!({"settings": {"number_of_shards": 1}}));

    let writes = dispatcher.writes().await;
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0].describe(), "a/t/1");
    assert_eq!(writes[0].body().unwrap(), json!({"x": 1}));
    assert_eq!(writes[0].parent, None);
    assert_eq!(writes[1].describe(), "a/t/2");
    assert_eq!(writes[1].body().unwrap(), json!({"x": 2}));
    assert_eq!(writes[1].parent.as_deref(), Some("p1"));
}

#[tokio::test]
async fn test_schema_precedes_data_in_zip() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_zip(
        dir.path(),
        "idx.zip",
        &[
            ("idx/_settings", r#"{"number_of_replicas":0}"#),
            ("idx/s/_mapping", r#"{"properties":{"x":{"type":"long"}}}"#),
            ("idx/s/r", r#"{"x":5}"#),
        ],
    );

    let dispatcher = Arc::new(RecordingDispatcher::new());
    run_import(&path, dispatcher.clone(), RemapTable::new(), ImportOptions::default())
        .await
        .unwrap();

    let events = dispatcher.events().await;
    let create = events
        .iter()
        .position(|e| matches!(e, DispatchEvent::CreateCollection(_)))
        .unwrap();
    let write = events
        .iter()
        .position(|e| matches!(e, DispatchEvent::Write(_)))
        .unwrap();
    assert!(create < write);
    assert_eq!(dispatcher.schema_requests().await.len(), 1);
}

#[tokio::test]
async fn test_remap_targets_destination() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_tar_gz(
        dir.path(),
        "idx.tar.gz",
        &[("idx/s/_mapping", "{}"), ("idx/s/r", r#"{"y":1}"#), ("idx/s/r/_routing", "k")],
    );

    let remap = RemapTable::from_json(r#"{"idx":"idx2"}"#).unwrap();
    let dispatcher = Arc::new(RecordingDispatcher::new());
    run_import(&path, dispatcher.clone(), remap, ImportOptions::default())
        .await
        .unwrap();

    let writes = dispatcher.writes().await;
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].collection, "idx2");
    assert_eq!(writes[0].subcollection, "s");
    assert_eq!(writes[0].routing.as_deref(), Some("k"));
    assert_eq!(dispatcher.schema_requests().await[0].collection, "idx2");
}

#[tokio::test]
async fn test_percent_encoded_names() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_tar_gz(dir.path(), "enc.tar.gz", &[("logs/entry/a%2Fb", "{}")]);

    let dispatcher = Arc::new(RecordingDispatcher::new());
    run_import(&path, dispatcher.clone(), RemapTable::new(), ImportOptions::default())
        .await
        .unwrap();

    assert_eq!(dispatcher.writes().await[0].id.as_deref(), Some("a/b"));
}

#[tokio::test]
async fn test_settings_override_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_tar_gz(
        dir.path(),
        "a.tar.gz",
        &[("a/_settings", r#"{"number_of_shards":5}"#), ("a/t/1", "{}")],
    );
    let override_file = dir.path().join("a-settings.json");
    std::fs::write(&override_file, r#"{"number_of_shards":1}"#).unwrap();

    let dispatcher = Arc::new(RecordingDispatcher::new());
    let session = CodecRegistry::with_defaults().session(&path).unwrap();
    ImportJob::new(session, ImportDescriptor::new(&path, "memory"))
        .with_overrides(SchemaOverrides::new().with_settings("a", &override_file))
        .run(dispatcher.clone(), Arc::new(ImportStatusRegistry::new()))
        .await
        .unwrap();

    let requests = dispatcher.schema_requests().await;
    assert_eq!(requests[0].settings.as_deref(), Some(r#"{"number_of_shards":1}"#));
}

// ============================================================================
// Failure Tests
// ============================================================================

/// Records like [`RecordingDispatcher`] but fails when closed
#[derive(Default)]
struct FailingCloseDispatcher {
    inner: RecordingDispatcher,
}

#[async_trait]
impl BulkDispatcher for FailingCloseDispatcher {
    async fn wait_for_cluster(
        &self,
        min: HealthStatus,
        timeout: Duration,
    ) -> knapsack_common::Result<()> {
        self.inner.wait_for_cluster(min, timeout).await
    }

    async fn create_collection(&self, request: &PendingSchemaRequest) -> knapsack_common::Result<()> {
        self.inner.create_collection(request).await
    }

    async fn submit(&self, write: DocumentWrite) -> knapsack_common::Result<()> {
        self.inner.submit(write).await
    }

    async fn flush_and_close(&self) -> knapsack_common::Result<DispatchStats> {
        self.inner.flush_and_close().await?;
        Err(KnapsackError::Dispatch("bulk channel broken".to_string()))
    }
}

async fn run_with_failing_close(path: &Path) -> knapsack_common::Result<knapsack_import::ImportSummary> {
    let session = CodecRegistry::with_defaults().session(path)?;
    ImportJob::new(session, ImportDescriptor::new(path, "memory"))
        .run(
            Arc::new(FailingCloseDispatcher::default()),
            Arc::new(ImportStatusRegistry::new()),
        )
        .await
}

#[tokio::test]
async fn test_close_failure_fails_import() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_tar_gz(dir.path(), "a.tar.gz", &[("a/t/1", "{}")]);

    let err = run_with_failing_close(&path).await.unwrap_err();
    assert!(matches!(err, KnapsackError::Dispatch(_)));
}

#[tokio::test]
async fn test_import_error_wins_over_close_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_tar_gz(dir.path(), "bad.tar.gz", &[("a/t/1", "{}"), ("orphan", "{}")]);

    let err = run_with_failing_close(&path).await.unwrap_err();
    assert!(matches!(err, KnapsackError::MalformedEntry(_)));
}

#[tokio::test]
async fn test_malformed_entry_aborts_import() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_tar_gz(
        dir.path(),
        "bad.tar.gz",
        &[("a/t/1", "{}"), ("orphan", "{}"), ("a/t/2", "{}")],
    );

    let dispatcher = Arc::new(RecordingDispatcher::new());
    let err = run_import(&path, dispatcher.clone(), RemapTable::new(), ImportOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, KnapsackError::MalformedEntry(_)));
    // the group open at the corrupt entry is dropped, the dispatcher still closed
    let events = dispatcher.events().await;
    assert_eq!(events.last(), Some(&DispatchEvent::Closed));
    assert!(dispatcher.writes().await.is_empty());
}

#[tokio::test]
async fn test_unhealthy_cluster_aborts_before_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_tar_gz(dir.path(), "a.tar.gz", &[("a/t/1", "{}")]);

    let dispatcher = Arc::new(RecordingDispatcher::new().with_health(HealthStatus::Red));
    let err = run_import(&path, dispatcher.clone(), RemapTable::new(), ImportOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, KnapsackError::ClusterUnavailable { .. }));
    assert!(dispatcher.writes().await.is_empty());
}

#[tokio::test]
async fn test_existing_collection_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_tar_gz(dir.path(), "a.tar.gz", &[("a/_settings", "{}"), ("a/t/1", "{}")]);

    let dispatcher = Arc::new(RecordingDispatcher::new().with_existing_collections(["a"]));
    let options = ImportOptions {
        ignore_existing_index: true,
        ..ImportOptions::default()
    };
    let summary = run_import(&path, dispatcher.clone(), RemapTable::new(), options)
        .await
        .unwrap();

    assert_eq!(summary.schemas_skipped, 1);
    assert_eq!(summary.documents, 1);
}

#[tokio::test]
async fn test_unknown_suffix_is_rejected() {
    let err = CodecRegistry::with_defaults()
        .session("/tmp/archive.rar")
        .unwrap_err();
    assert!(matches!(err, KnapsackError::CodecNotFound(_)));
}

// ============================================================================
// Status Registry Tests
// ============================================================================

#[tokio::test]
async fn test_registry_entry_removed_after_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_tar_gz(dir.path(), "bad.tar.gz", &[("x", "{}")]);
    let registry = Arc::new(ImportStatusRegistry::new());

    let session = CodecRegistry::with_defaults().session(&path).unwrap();
    let handle = ImportJob::new(session, ImportDescriptor::new(&path, "memory"))
        .spawn(Arc::new(RecordingDispatcher::new()), registry.clone());

    assert!(handle.await.unwrap().is_err());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_registry_lists_registered_import() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("live.tar");
    let registry = Arc::new(ImportStatusRegistry::new());

    let mut writer = CodecRegistry::with_defaults().session(&path).unwrap();
    writer.open(SessionMode::Write).await.unwrap();
    writer.write(Packet::new("a/t/1", "{}")).await.unwrap();
    writer.close().await.unwrap();

    let session = CodecRegistry::with_defaults().session(&path).unwrap();
    let job = ImportJob::new(session, ImportDescriptor::new(&path, "memory").with_copy_mode(true));
    let id = job.descriptor().id;

    let registration = registry.register(job.descriptor().clone());
    let listed = registry.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id);
    assert!(listed[0].copy_mode);
    drop(registration);

    job.run(Arc::new(RecordingDispatcher::new()), registry.clone())
        .await
        .unwrap();
    assert!(registry.is_empty());
}
