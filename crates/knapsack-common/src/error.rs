//! Error types for knapsack

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for knapsack operations
pub type Result<T> = std::result::Result<T, KnapsackError>;

/// Main error type for knapsack
#[derive(Error, Debug)]
pub enum KnapsackError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No registered codec claims the path's suffix
    #[error("No archive codec found for path: {0}")]
    CodecNotFound(String),

    /// Two codecs tried to claim the same file suffix
    #[error("Archive suffix '{suffix}' is already registered by codec '{existing}'")]
    DuplicateCodecSuffix { suffix: String, existing: String },

    /// Entry name has fewer than two segments
    #[error("Malformed archive entry name: '{0}'")]
    MalformedEntry(String),

    #[error("Invalid _version value '{value}' for document {id}")]
    InvalidVersion { id: String, value: String },

    #[error("Collection already exists: {0}")]
    SchemaAlreadyExists(String),

    #[error("Unable to read override file {}: {source}", path.display())]
    OverrideSourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cluster not ready after {waited:?} (last status: {status})")]
    ClusterUnavailable { status: String, waited: Duration },

    /// Operation not allowed in the session's current state
    #[error("Archive session error: {0}")]
    SessionState(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl KnapsackError {
    /// Errors caused by the request itself rather than the archive or the store
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            KnapsackError::CodecNotFound(_)
                | KnapsackError::Config(_)
                | KnapsackError::OverrideSourceUnreadable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_not_found_is_client_error() {
        assert!(KnapsackError::CodecNotFound("a.rar".into()).is_client_error());
        assert!(!KnapsackError::MalformedEntry("x".into()).is_client_error());
    }

    #[test]
    fn test_display_includes_details() {
        let err = KnapsackError::InvalidVersion {
            id: "doc-1".into(),
            value: "abc".into(),
        };
        assert_eq!(err.to_string(), "Invalid _version value 'abc' for document doc-1");

        let err = KnapsackError::DuplicateCodecSuffix {
            suffix: "tar".into(),
            existing: "tar".into(),
        };
        assert!(err.to_string().contains("'tar'"));
    }
}
