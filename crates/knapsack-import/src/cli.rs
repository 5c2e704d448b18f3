//! Command-line interface
//!
//! `knapsack-import import` runs one import in the foreground;
//! `knapsack-import codecs` lists what the codec registry can read.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use reqwest::Url;
use tracing::info;

use crate::archive::CodecRegistry;
use crate::dispatcher::{
    default_concurrency, BulkDispatcher, DispatcherConfig, HttpBulkDispatcher,
    RecordingDispatcher, DEFAULT_FLUSH_INTERVAL_SECS, DEFAULT_MAX_RECORDS_PER_BATCH,
};
use crate::import::job::DEFAULT_CLUSTER_TIMEOUT_SECS;
use crate::import::{ImportJob, ImportOptions, ImportSummary, RemapTable, SchemaOverrides};
use crate::status::{ImportDescriptor, ImportStatusRegistry};

/// Knapsack - stream archived document collections into a document store
#[derive(Parser, Debug)]
#[command(name = "knapsack-import")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Import an archive into the store
    Import(ImportArgs),

    /// List registered archive codecs and compression suffixes
    Codecs,
}

#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    /// Archive to import (.tar, .tar.gz, .zip)
    #[arg(short, long)]
    pub path: PathBuf,

    /// Document store base URL
    #[arg(long, env = "KNAPSACK_CLUSTER_URL", default_value = "http://127.0.0.1:9200")]
    pub cluster: String,

    /// JSON remap table, e.g. '{"books":"library","books/novel":"fiction"}'
    #[arg(long)]
    pub map: Option<String>,

    /// Settings override file, as COLLECTION=FILE (repeatable)
    #[arg(long = "settings", value_name = "COLLECTION=FILE")]
    pub settings: Vec<String>,

    /// Mapping override file, as COLLECTION/SUBCOLLECTION=FILE (repeatable)
    #[arg(long = "mapping", value_name = "COLLECTION/SUBCOLLECTION=FILE")]
    pub mappings: Vec<String>,

    /// Do not create collections from archived settings and mappings
    #[arg(long)]
    pub no_create_index: bool,

    /// Continue when a collection already exists
    #[arg(long)]
    pub ignore_existing_index: bool,

    /// Seconds to wait for the cluster to become ready
    #[arg(long, default_value_t = DEFAULT_CLUSTER_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Documents per bulk request
    #[arg(long, default_value_t = DEFAULT_MAX_RECORDS_PER_BATCH)]
    pub batch: usize,

    /// Bulk requests in flight at once (default: 2 x CPUs)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Seconds between forced flushes
    #[arg(long, default_value_t = DEFAULT_FLUSH_INTERVAL_SECS)]
    pub flush_interval: u64,

    /// Read and group the archive without contacting the store
    #[arg(long)]
    pub dry_run: bool,
}

impl ImportArgs {
    pub fn overrides(&self) -> Result<SchemaOverrides> {
        let mut overrides = SchemaOverrides::new();
        for entry in &self.settings {
            let (collection, file) = split_assignment(entry)?;
            overrides = overrides.with_settings(collection, file);
        }
        for entry in &self.mappings {
            let (target, file) = split_assignment(entry)?;
            let Some((collection, subcollection)) = target.split_once('/') else {
                bail!("mapping override '{}' must name COLLECTION/SUBCOLLECTION", entry);
            };
            overrides = overrides.with_mapping(collection, subcollection, file);
        }
        Ok(overrides)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            flush_interval: Duration::from_secs(self.flush_interval),
            max_records_per_batch: self.batch,
            max_concurrent_batches: self.concurrency.unwrap_or_else(default_concurrency),
            ..DispatcherConfig::default()
        }
    }

    pub fn options(&self) -> ImportOptions {
        ImportOptions {
            create_index: !self.no_create_index,
            ignore_existing_index: self.ignore_existing_index,
            cluster_timeout: Duration::from_secs(self.timeout),
            ..ImportOptions::default()
        }
    }
}

fn split_assignment(entry: &str) -> Result<(&str, &str)> {
    match entry.split_once('=') {
        Some((key, value)) if !key.is_empty() && !value.is_empty() => Ok((key, value)),
        _ => bail!("expected KEY=FILE, got '{}'", entry),
    }
}

/// Execute the CLI command
pub async fn execute(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Import(args) => {
            let summary = import(args).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        },
        Commands::Codecs => {
            let registry = CodecRegistry::with_defaults();
            for name in registry.names() {
                println!("{}", name);
            }
            let suffixes: Vec<_> = registry.compression_suffixes().into_iter().collect();
            println!("compression: {}", suffixes.join(", "));
            Ok(())
        },
    }
}

async fn import(args: &ImportArgs) -> Result<ImportSummary> {
    let codecs = CodecRegistry::with_defaults();
    let session = codecs.session(&args.path)?;
    let remap = RemapTable::parse_lenient(args.map.as_deref());
    let overrides = args.overrides()?;
    let config = args.dispatcher_config();
    config.validate()?;

    let destination = if args.dry_run {
        "dry-run".to_string()
    } else {
        args.cluster.clone()
    };
    let descriptor = ImportDescriptor::new(&args.path, destination).with_remap_table(remap);
    let job = ImportJob::new(session, descriptor)
        .with_overrides(overrides)
        .with_options(args.options());
    let registry = Arc::new(ImportStatusRegistry::new());

    if args.dry_run {
        let recorder = Arc::new(RecordingDispatcher::new());
        let dispatcher: Arc<dyn BulkDispatcher> = recorder.clone();
        let summary = job.run(dispatcher, registry).await?;
        for request in recorder.schema_requests().await {
            let body = request.body()?;
            info!(collection = %request.collection, %body, "would create collection");
        }
        return Ok(summary);
    }

    let url = Url::parse(&args.cluster)
        .with_context(|| format!("invalid cluster URL '{}'", args.cluster))?;
    let dispatcher = Arc::new(HttpBulkDispatcher::connect(url, config)?);
    Ok(job.run(dispatcher, registry).await?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_import_defaults() {
        let cli = parse(&["knapsack-import", "import", "--path", "books.tar.gz"]);
        let Commands::Import(args) = cli.command else {
            panic!("expected import command");
        };
        assert_eq!(args.path, PathBuf::from("books.tar.gz"));
        assert_eq!(args.batch, DEFAULT_MAX_RECORDS_PER_BATCH);

        let options = args.options();
        assert!(options.create_index);
        assert!(!options.ignore_existing_index);
        assert_eq!(options.cluster_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_override_arguments() {
        let cli = parse(&[
            "knapsack-import",
            "import",
            "--path",
            "a.zip",
            "--settings",
            "books=/tmp/s.json",
            "--mapping",
            "books/novel=/tmp/m.json",
            "--no-create-index",
        ]);
        let Commands::Import(args) = cli.command else {
            panic!("expected import command");
        };
        assert!(!args.overrides().unwrap().is_empty());
        assert!(!args.options().create_index);
    }

    #[test]
    fn test_bad_override_arguments() {
        let cli = parse(&["knapsack-import", "import", "--path", "a.zip", "--mapping", "books=/tmp/m.json"]);
        let Commands::Import(args) = cli.command else {
            panic!("expected import command");
        };
        assert!(args.overrides().is_err());
        assert!(split_assignment("books=").is_err());
        assert!(split_assignment("books").is_err());
    }

    #[tokio::test]
    async fn test_dry_run_import() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("books.zip");
        {
            let file = std::fs::File::create(&path).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("books/novel/1", options).unwrap();
            std::io::Write::write_all(&mut zip, br#"{"title":"Dune"}"#).unwrap();
            zip.finish().unwrap();
        }

        let cli = parse(&["knapsack-import", "import", "--path", path.to_str().unwrap(), "--dry-run"]);
        let Commands::Import(args) = cli.command else {
            panic!("expected import command");
        };
        let summary = import(&args).await.unwrap();
        assert_eq!(summary.documents, 1);
        assert_eq!(summary.dispatch.submitted, 1);
    }
}
