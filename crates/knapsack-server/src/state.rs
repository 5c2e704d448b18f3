//! Shared handler state

use std::sync::Arc;

use knapsack_import::archive::CodecRegistry;
use knapsack_import::status::ImportStatusRegistry;

use crate::config::Config;
use crate::fetch::S3Fetcher;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub codecs: Arc<CodecRegistry>,
    pub imports: Arc<ImportStatusRegistry>,
    /// `None` disables the `s3` import mode
    pub fetcher: Option<S3Fetcher>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            codecs: Arc::new(CodecRegistry::with_defaults()),
            imports: Arc::new(ImportStatusRegistry::new()),
            fetcher: None,
        }
    }

    pub fn with_fetcher(mut self, fetcher: S3Fetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }
}
