//! Codec selection by file suffix

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use knapsack_common::{KnapsackError, Result};
use tracing::debug;

use super::{ArchiveSession, Codec, Compression};

/// Codec chosen for a path, plus the compression wrapped around it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub codec: Codec,
    pub compression: Option<Compression>,
}

/// Registered codecs and compression suffixes
///
/// Built once at startup and shared by reference. Every suffix belongs to
/// exactly one codec; registering a second claimant is rejected, so
/// selection never depends on registration order.
#[derive(Debug, Clone, Default)]
pub struct CodecRegistry {
    codecs: Vec<Codec>,
    compressions: Vec<Compression>,
}

impl CodecRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every codec and compression this build supports
    pub fn with_defaults() -> Self {
        Self {
            codecs: vec![Codec::Tar, Codec::Zip],
            compressions: vec![Compression::Gzip],
        }
    }

    pub fn register(&mut self, codec: Codec) -> Result<()> {
        if let Some(existing) = self
            .codecs
            .iter()
            .find(|c| c.suffix().eq_ignore_ascii_case(codec.suffix()))
        {
            return Err(KnapsackError::DuplicateCodecSuffix {
                suffix: codec.suffix().to_string(),
                existing: existing.name().to_string(),
            });
        }
        debug!(codec = codec.name(), "registered archive codec");
        self.codecs.push(codec);
        Ok(())
    }

    pub fn register_compression(&mut self, compression: Compression) {
        if !self.compressions.contains(&compression) {
            self.compressions.push(compression);
        }
    }

    /// Names of the registered codecs
    pub fn names(&self) -> BTreeSet<String> {
        self.codecs.iter().map(|c| c.name().to_string()).collect()
    }

    /// Registered compression suffixes
    pub fn compression_suffixes(&self) -> BTreeSet<String> {
        self.compressions.iter().map(|c| c.suffix().to_string()).collect()
    }

    /// Pick the codec whose suffix, optionally followed by a compression
    /// suffix, ends `path` (case-insensitive)
    pub fn select(&self, path: &Path) -> Result<Selection> {
        let lowered = path.to_string_lossy().to_lowercase();

        for &codec in &self.codecs {
            let plain = format!(".{}", codec.suffix());
            if lowered.ends_with(&plain) {
                return Ok(Selection {
                    codec,
                    compression: None,
                });
            }
            if !codec.supports_compression() {
                continue;
            }
            for &compression in &self.compressions {
                if lowered.ends_with(&format!("{}.{}", plain, compression.suffix())) {
                    return Ok(Selection {
                        codec,
                        compression: Some(compression),
                    });
                }
            }
        }

        Err(KnapsackError::CodecNotFound(path.display().to_string()))
    }

    /// Closed session over `path` using the selected codec
    pub fn session(&self, path: impl Into<PathBuf>) -> Result<ArchiveSession> {
        let path = path.into();
        let selection = self.select(&path)?;
        Ok(ArchiveSession::new(path, selection))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_suffixes() {
        let registry = CodecRegistry::with_defaults();
        let zip = registry.select(Path::new("foo.zip")).unwrap();
        assert_eq!(zip.codec, Codec::Zip);
        assert_eq!(zip.compression, None);

        let tar = registry.select(Path::new("/data/books.tar")).unwrap();
        assert_eq!(tar.codec, Codec::Tar);
    }

    #[test]
    fn test_compressed_double_suffix() {
        let registry = CodecRegistry::with_defaults();
        let selection = registry.select(Path::new("foo.tar.gz")).unwrap();
        assert_eq!(selection.codec, Codec::Tar);
        assert_eq!(selection.compression, Some(Compression::Gzip));
    }

    #[test]
    fn test_suffix_match_is_case_insensitive() {
        let registry = CodecRegistry::with_defaults();
        assert_eq!(registry.select(Path::new("FOO.TAR.GZ")).unwrap().codec, Codec::Tar);
        assert_eq!(registry.select(Path::new("Foo.Zip")).unwrap().codec, Codec::Zip);
    }

    #[test]
    fn test_unmatched_suffix() {
        let registry = CodecRegistry::with_defaults();
        for path in ["foo.rar", "foo.gz", "foo", "foo.zip.gz", "tar"] {
            assert!(
                matches!(registry.select(Path::new(path)), Err(KnapsackError::CodecNotFound(_))),
                "{} should not match",
                path
            );
        }
    }

    #[test]
    fn test_compression_needs_registration() {
        let mut registry = CodecRegistry::new();
        registry.register(Codec::Tar).unwrap();
        assert!(registry.select(Path::new("foo.tar.gz")).is_err());

        registry.register_compression(Compression::Gzip);
        assert!(registry.select(Path::new("foo.tar.gz")).is_ok());
    }

    #[test]
    fn test_duplicate_suffix_is_rejected() {
        let mut registry = CodecRegistry::with_defaults();
        match registry.register(Codec::Tar) {
            Err(KnapsackError::DuplicateCodecSuffix { suffix, existing }) => {
                assert_eq!(suffix, "tar");
                assert_eq!(existing, "tar");
            },
            other => panic!("expected DuplicateCodecSuffix, got {:?}", other),
        }
    }

    #[test]
    fn test_names() {
        let registry = CodecRegistry::with_defaults();
        let names: Vec<_> = registry.names().into_iter().collect();
        assert_eq!(names, vec!["tar".to_string(), "zip".to_string()]);
        assert!(registry.compression_suffixes().contains("gz"));
    }
}
