//! Destination name remapping

use std::collections::BTreeMap;

use knapsack_common::Result;
use serde::Serialize;
use tracing::warn;

/// Maps source collection names (`"books"`) and collection/subcollection
/// pairs (`"books/novel"`) to destination names
///
/// Only write and schema destinations are remapped; grouping always uses the
/// names found in the archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RemapTable {
    entries: BTreeMap<String, String>,
}

impl RemapTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object; non-string values are used in their JSON form
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(json)?;
        let entries = raw
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, value)
            })
            .collect();
        Ok(Self { entries })
    }

    /// Like [`from_json`](Self::from_json), but a missing or unparsable map
    /// yields an empty table
    pub fn parse_lenient(json: Option<&str>) -> Self {
        match json {
            None => Self::default(),
            Some(json) => Self::from_json(json).unwrap_or_else(|e| {
                warn!(error = %e, "unparsable remap table, importing without remapping");
                Self::default()
            }),
        }
    }

    pub fn insert(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.entries.insert(from.into(), to.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn collection<'a>(&'a self, collection: &'a str) -> &'a str {
        self.entries
            .get(collection)
            .map(String::as_str)
            .unwrap_or(collection)
    }

    /// Remap a subcollection; keyed by its *source* collection
    pub fn subcollection<'a>(&'a self, collection: &str, subcollection: &'a str) -> &'a str {
        self.entries
            .get(&format!("{}/{}", collection, subcollection))
            .map(String::as_str)
            .unwrap_or(subcollection)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unmapped_names_pass_through() {
        let table = RemapTable::new();
        assert_eq!(table.collection("books"), "books");
        assert_eq!(table.subcollection("books", "novel"), "novel");
    }

    #[test]
    fn test_collection_and_pair_entries() {
        let table = RemapTable::from_json(r#"{"books":"library","books/novel":"fiction"}"#).unwrap();
        assert_eq!(table.collection("books"), "library");
        assert_eq!(table.subcollection("books", "novel"), "fiction");
        // pair lookups use the source collection
        assert_eq!(table.subcollection("library", "novel"), "novel");
    }

    #[test]
    fn test_non_string_values() {
        let table = RemapTable::from_json(r#"{"2023":2024}"#).unwrap();
        assert_eq!(table.collection("2023"), "2024");
    }

    #[test]
    fn test_lenient_parse() {
        assert!(RemapTable::parse_lenient(None).is_empty());
        assert!(RemapTable::parse_lenient(Some("not json")).is_empty());
        assert!(RemapTable::parse_lenient(Some("[1,2]")).is_empty());
        let table = RemapTable::parse_lenient(Some(r#"{"a":"b"}"#));
        assert_eq!(table.collection("a"), "b");
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let mut table = RemapTable::new();
        table.insert("a", "b");
        assert_eq!(serde_json::to_string(&table).unwrap(), r#"{"a":"b"}"#);
    }
}
