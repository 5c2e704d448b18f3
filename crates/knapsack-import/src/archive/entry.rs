//! Entry name decoding
//!
//! Exported archives name every entry
//! `<collection>/<subcollection>[/<record-id>[/<field>]]`, each segment
//! percent-encoded. Three shapes carry meaning:
//!
//! | name                         | kind                                   |
//! |------------------------------|----------------------------------------|
//! | `books/_settings`            | collection settings                    |
//! | `books/novel/_mapping`       | subcollection mapping                  |
//! | `books/novel/42[/title]`     | one field of a document (`_source` if no field) |
//!
//! Older exports also wrote settings as `books/novel/_settings`; that form is
//! accepted too.

use knapsack_common::{KnapsackError, Result};

/// Segment separator inside entry names
pub const SEPARATOR: char = '/';

/// Subcollection (or record) marker of settings entries
pub const SETTINGS: &str = "_settings";

/// Record marker of mapping entries
pub const MAPPING: &str = "_mapping";

/// Field used when an entry names no field
pub const SOURCE: &str = "_source";

/// Placeholder collection meaning "every collection"; schema operations skip it
pub const ALL_COLLECTIONS: &str = "_all";

/// Decoded identity of one archive entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coordinate {
    pub collection: String,
    pub subcollection: String,
    pub record_id: Option<String>,
    pub field: Option<String>,
}

/// What an entry carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Settings,
    Mapping,
    Field,
}

/// Identity of the document a field entry belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub collection: String,
    pub subcollection: String,
    pub record_id: Option<String>,
}

impl Coordinate {
    /// Decode an entry name, failing with `MalformedEntry` when it has fewer
    /// than two segments
    pub fn decode(name: &str) -> Result<Self> {
        let mut segments = name.split(SEPARATOR).map(|segment| {
            urlencoding::decode(segment)
                .map(|s| s.into_owned())
                .map_err(|_| KnapsackError::MalformedEntry(name.to_string()))
        });

        let collection = segments.next().transpose()?.unwrap_or_default();
        let subcollection = segments
            .next()
            .transpose()?
            .ok_or_else(|| KnapsackError::MalformedEntry(name.to_string()))?;
        if collection.is_empty() || subcollection.is_empty() {
            return Err(KnapsackError::MalformedEntry(name.to_string()));
        }

        let record_id = segments.next().transpose()?;
        let field = segments.next().transpose()?;
        if segments.next().is_some() {
            return Err(KnapsackError::MalformedEntry(name.to_string()));
        }

        Ok(Self {
            collection,
            subcollection,
            record_id,
            field,
        })
    }

    pub fn kind(&self) -> EntryKind {
        if self.subcollection == SETTINGS
            || (self.record_id.as_deref() == Some(SETTINGS) && self.field.is_none())
        {
            EntryKind::Settings
        } else if self.record_id.as_deref() == Some(MAPPING) {
            EntryKind::Mapping
        } else {
            EntryKind::Field
        }
    }

    /// Field name, `_source` when the entry names none
    pub fn field_name(&self) -> &str {
        self.field.as_deref().unwrap_or(SOURCE)
    }

    pub fn record_key(&self) -> RecordKey {
        RecordKey {
            collection: self.collection.clone(),
            subcollection: self.subcollection.clone(),
            record_id: self.record_id.clone(),
        }
    }
}

/// Decode an entry name; see [`Coordinate::decode`]
pub fn decode(name: &str) -> Result<Coordinate> {
    Coordinate::decode(name)
}

/// Build an entry name from raw segments
pub fn encode_name(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|segment| urlencoding::encode(segment))
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_three_segments_default_to_source() {
        let coord = decode("books/novel/42").unwrap();
        assert_eq!(coord.collection, "books");
        assert_eq!(coord.subcollection, "novel");
        assert_eq!(coord.record_id.as_deref(), Some("42"));
        assert_eq!(coord.field, None);
        assert_eq!(coord.field_name(), "_source");
        assert_eq!(coord.kind(), EntryKind::Field);
    }

    #[test]
    fn test_four_segments_keep_field() {
        let coord = decode("books/novel/42/_parent").unwrap();
        assert_eq!(coord.field_name(), "_parent");
        assert_eq!(coord.kind(), EntryKind::Field);
    }

    #[test]
    fn test_short_names_are_malformed() {
        for name in ["", "books", "books/", "/novel"] {
            match decode(name) {
                Err(KnapsackError::MalformedEntry(n)) => assert_eq!(n, name),
                other => panic!("expected MalformedEntry for {:?}, got {:?}", name, other),
            }
        }
    }

    #[test]
    fn test_long_names_are_malformed() {
        for name in ["books/novel/1/title/extra", "books/novel/1/title/"] {
            match decode(name) {
                Err(KnapsackError::MalformedEntry(n)) => assert_eq!(n, name),
                other => panic!("expected MalformedEntry for {:?}, got {:?}", name, other),
            }
        }
        // an encoded separator stays inside its segment
        let coord = decode("books/novel/1/a%2Fb").unwrap();
        assert_eq!(coord.field_name(), "a/b");
    }

    #[test]
    fn test_settings_entries() {
        assert_eq!(decode("books/_settings").unwrap().kind(), EntryKind::Settings);
        assert_eq!(decode("books/novel/_settings").unwrap().kind(), EntryKind::Settings);
        // a field literally named _settings is still a field
        assert_eq!(
            decode("books/novel/_settings/title").unwrap().kind(),
            EntryKind::Field
        );
    }

    #[test]
    fn test_mapping_entry() {
        let coord = decode("books/novel/_mapping").unwrap();
        assert_eq!(coord.kind(), EntryKind::Mapping);
        assert_eq!(coord.subcollection, "novel");
    }

    #[test]
    fn test_two_segment_document_has_no_id() {
        let coord = decode("books/novel").unwrap();
        assert_eq!(coord.kind(), EntryKind::Field);
        assert_eq!(coord.record_id, None);
        assert_eq!(coord.record_key().record_id, None);
    }

    #[test]
    fn test_segments_are_percent_decoded() {
        let name = encode_name(&["books", "novel", "a/b c", "title"]);
        assert_eq!(name, "books/novel/a%2Fb%20c/title");
        let coord = decode(&name).unwrap();
        assert_eq!(coord.record_id.as_deref(), Some("a/b c"));
        assert_eq!(coord.field_name(), "title");
    }

    #[test]
    fn test_record_key_ignores_field() {
        let a = decode("books/novel/42/_source").unwrap().record_key();
        let b = decode("books/novel/42/_parent").unwrap().record_key();
        let c = decode("books2/novel/42").unwrap().record_key();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
