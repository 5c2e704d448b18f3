//! Import request parameters
//!
//! Path segments name the target (`/{index}/{type}/_import/{mode}`), query
//! parameters carry everything else.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use knapsack_import::archive::entry::ALL_COLLECTIONS;
use knapsack_import::dispatcher::DispatcherConfig;
use knapsack_import::import::{ImportOptions, RemapTable, SchemaOverrides};
use reqwest::Url;

use crate::config::Config;
use crate::error::AppError;
use crate::fetch::S3Location;

/// How the archive reaches the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Plain import from a local path
    Import,
    /// Archive is a copy produced for this import
    Copy,
    /// Archive is downloaded from S3 first if missing
    S3,
}

impl ImportMode {
    pub fn parse(mode: Option<&str>) -> Result<Self, AppError> {
        match mode {
            None | Some("import") => Ok(ImportMode::Import),
            Some("copy") => Ok(ImportMode::Copy),
            Some("s3") => Ok(ImportMode::S3),
            Some(other) => Err(AppError::BadRequest(format!("unknown import mode '{}'", other))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImportMode::Import => "import",
            ImportMode::Copy => "copy",
            ImportMode::S3 => "s3",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub index: String,
    pub doc_type: Option<String>,
    pub mode: ImportMode,
    pub path: PathBuf,
    pub remap: RemapTable,
    pub overrides: SchemaOverrides,
    pub options: ImportOptions,
    pub dispatcher: DispatcherConfig,
    pub destination: Url,
    /// Set when mode is `s3` and a location was given
    pub s3: Option<S3Location>,
}

impl ImportRequest {
    pub fn from_params(
        path_params: &HashMap<String, String>,
        query: &HashMap<String, String>,
        config: &Config,
    ) -> Result<Self, AppError> {
        let index = path_params
            .get("index")
            .cloned()
            .unwrap_or_else(|| ALL_COLLECTIONS.to_string());
        let doc_type = path_params.get("type").cloned();
        let mode = ImportMode::parse(path_params.get("mode").map(String::as_str))?;

        let path = match query.get("path") {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => PathBuf::from(default_archive_name(&index, doc_type.as_deref())),
        };

        let defaults = &config.import;
        let options = ImportOptions {
            create_index: parse_param(query, "createIndex", true)?,
            ignore_existing_index: parse_param(query, "ignoreExistingIndex", false)?,
            cluster_timeout: Duration::from_secs(parse_param(
                query,
                "timeout",
                defaults.timeout_secs,
            )?),
            ..ImportOptions::default()
        };

        let dispatcher = DispatcherConfig {
            max_records_per_batch: parse_param(
                query,
                "maxActionsPerBulkRequest",
                defaults.max_actions_per_bulk,
            )?,
            max_concurrent_batches: parse_param(
                query,
                "maxBulkConcurrency",
                defaults.max_bulk_concurrency,
            )?,
            ..defaults.dispatcher_config()
        };
        dispatcher.validate()?;

        let s3 = match (mode, query.get("s3")) {
            (ImportMode::S3, Some(uri)) => Some(
                S3Location::resolve(
                    uri,
                    query.get("bucketName").map(String::as_str),
                    query.get("key").map(String::as_str),
                )
                .ok_or_else(|| {
                    AppError::BadRequest("s3 mode needs a bucket and a key".to_string())
                })?,
            ),
            _ => None,
        };

        Ok(Self {
            index,
            doc_type,
            mode,
            path,
            remap: RemapTable::parse_lenient(query.get("map").map(String::as_str)),
            overrides: SchemaOverrides::from_params(query),
            options,
            dispatcher,
            destination: destination(query, &config.cluster.url)?,
            s3,
        })
    }
}

/// `{index}[_{type}].tar.gz`
pub fn default_archive_name(index: &str, doc_type: Option<&str>) -> String {
    match doc_type {
        Some(doc_type) => format!("{}_{}.tar.gz", index, doc_type),
        None => format!("{}.tar.gz", index),
    }
}

fn parse_param<T: std::str::FromStr>(
    query: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, AppError> {
    match query.get(key) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| AppError::BadRequest(format!("invalid value '{}' for {}", value, key))),
    }
}

/// Store URL, with `host` and `port` parameters replacing the configured ones
fn destination(query: &HashMap<String, String>, cluster_url: &str) -> Result<Url, AppError> {
    let mut url = Url::parse(cluster_url)
        .map_err(|e| AppError::Internal(format!("invalid cluster URL: {}", e)))?;

    if let Some(host) = query.get("host").filter(|h| !h.is_empty()) {
        url.set_host(Some(host.as_str()))
            .map_err(|e| AppError::BadRequest(format!("invalid host '{}': {}", host, e)))?;
    }
    if let Some(port) = query.get("port") {
        let port: u16 = port
            .parse()
            .map_err(|_| AppError::BadRequest(format!("invalid port '{}'", port)))?;
        if port != 0 {
            url.set_port(Some(port))
                .map_err(|_| AppError::BadRequest(format!("cannot set port {}", port)))?;
        }
    }
    Ok(url)
}
