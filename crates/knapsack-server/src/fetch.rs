//! S3 download before import
//!
//! Archives can live in an S3-compatible bucket. When an import names one and
//! the local path does not exist yet, the object is streamed to that path
//! first.

use std::env;
use std::path::Path;

use anyhow::{Context, Result};
use aws_sdk_s3::{
    config::{Credentials, Region},
    Client,
};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
}

impl FetchConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .unwrap_or_default(),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .unwrap_or_default(),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        })
    }
}

/// Where to fetch an archive from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    pub key: String,
}

impl S3Location {
    /// Parse `s3://bucket/key`; `bucket` and `key` fill in what the URI omits
    pub fn resolve(uri: &str, bucket: Option<&str>, key: Option<&str>) -> Option<Self> {
        let rest = uri.strip_prefix("s3://").unwrap_or("");
        let (uri_bucket, uri_key) = match rest.split_once('/') {
            Some((b, k)) => (b, k),
            None => (rest, ""),
        };

        let bucket = bucket.filter(|b| !b.is_empty()).unwrap_or(uri_bucket);
        let key = key.filter(|k| !k.is_empty()).unwrap_or(uri_key);
        if bucket.is_empty() || key.is_empty() {
            return None;
        }
        Some(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

impl std::fmt::Display for S3Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

#[derive(Clone)]
pub struct S3Fetcher {
    client: Client,
}

impl S3Fetcher {
    pub fn new(config: &FetchConfig) -> Self {
        debug!(endpoint = ?config.endpoint, region = %config.region, "initializing S3 fetcher");

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "knapsack-fetch",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(s3_config_builder.build()),
        }
    }

    /// Stream the object at `location` into a new file at `dest`
    #[instrument(skip(self), fields(location = %location))]
    pub async fn fetch(&self, location: &S3Location, dest: &Path) -> Result<u64> {
        let response = self
            .client
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", location))?;

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;

        let mut body = response.body;
        let mut written = 0u64;
        while let Some(chunk) = body
            .try_next()
            .await
            .context("Failed to read S3 response body")?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        info!(bytes = written, dest = %dest.display(), "archive downloaded");
        Ok(written)
    }
}
