//! Collection schema requests
//!
//! Settings and mapping entries are not written as documents. They are
//! accumulated per source collection and turned into one collection-creation
//! call right before the first document of that collection is dispatched.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use knapsack_common::{KnapsackError, Result};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::archive::Packet;

/// Settings and mappings waiting for the first write to their collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingSchemaRequest {
    /// Destination collection (already remapped)
    pub collection: String,
    pub settings: Option<String>,
    /// Destination subcollection -> mapping text
    pub mappings: BTreeMap<String, String>,
}

impl PendingSchemaRequest {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            settings: None,
            mappings: BTreeMap::new(),
        }
    }

    pub fn set_settings(&mut self, settings: impl Into<String>) {
        self.settings = Some(settings.into());
    }

    pub fn add_mapping(&mut self, subcollection: impl Into<String>, mapping: impl Into<String>) {
        self.mappings.insert(subcollection.into(), mapping.into());
    }

    /// JSON body `{"settings": .., "mappings": {..}}` for collection creation
    pub fn body(&self) -> Result<Value> {
        let mut body = Map::new();
        if let Some(settings) = self.settings.as_deref().filter(|s| !s.trim().is_empty()) {
            body.insert("settings".to_string(), serde_json::from_str(settings)?);
        }
        if !self.mappings.is_empty() {
            let mut mappings = Map::new();
            for (subcollection, mapping) in &self.mappings {
                mappings.insert(subcollection.clone(), serde_json::from_str(mapping)?);
            }
            body.insert("mappings".to_string(), Value::Object(mappings));
        }
        Ok(Value::Object(body))
    }
}

/// Caller-supplied files replacing settings/mapping text from the archive
///
/// Keys follow the request parameter convention, using destination names:
/// `<collection>_settings` and `<collection>_<subcollection>_mapping`.
#[derive(Debug, Clone, Default)]
pub struct SchemaOverrides {
    files: HashMap<String, PathBuf>,
}

impl SchemaOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick every `*_settings` / `*_mapping` entry out of request parameters
    pub fn from_params<'a, I>(params: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let files = params
            .into_iter()
            .filter(|(key, _)| key.ends_with("_settings") || key.ends_with("_mapping"))
            .map(|(key, value)| (key.clone(), PathBuf::from(value)))
            .collect();
        Self { files }
    }

    pub fn with_settings(mut self, collection: &str, path: impl Into<PathBuf>) -> Self {
        self.files.insert(settings_key(collection), path.into());
        self
    }

    pub fn with_mapping(
        mut self,
        collection: &str,
        subcollection: &str,
        path: impl Into<PathBuf>,
    ) -> Self {
        self.files
            .insert(mapping_key(collection, subcollection), path.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Settings text for a destination collection: override file if one is
    /// configured, otherwise the packet payload
    pub async fn settings(&self, collection: &str, packet: &Packet) -> Result<String> {
        self.resolve(&settings_key(collection), packet).await
    }

    /// Mapping text for a destination collection/subcollection
    pub async fn mapping(
        &self,
        collection: &str,
        subcollection: &str,
        packet: &Packet,
    ) -> Result<String> {
        self.resolve(&mapping_key(collection, subcollection), packet)
            .await
    }

    async fn resolve(&self, key: &str, packet: &Packet) -> Result<String> {
        match self.files.get(key) {
            Some(path) => tokio::fs::read_to_string(path).await.map_err(|source| {
                KnapsackError::OverrideSourceUnreadable {
                    path: path.clone(),
                    source,
                }
            }),
            None => Ok(packet.text().into_owned()),
        }
    }
}

fn settings_key(collection: &str) -> String {
    format!("{}_settings", collection)
}

fn mapping_key(collection: &str, subcollection: &str) -> String {
    format!("{}_{}_mapping", collection, subcollection)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_body_combines_settings_and_mappings() {
        let mut request = PendingSchemaRequest::new("books");
        request.set_settings(r#"{"number_of_shards":1}"#);
        request.add_mapping("novel", r#"{"properties":{"title":{"type":"text"}}}"#);

        assert_eq!(
            request.body().unwrap(),
            json!({
                "settings": {"number_of_shards": 1},
                "mappings": {"novel": {"properties": {"title": {"type": "text"}}}}
            })
        );
    }

    #[test]
    fn test_empty_request_body() {
        assert_eq!(PendingSchemaRequest::new("books").body().unwrap(), json!({}));
    }

    #[test]
    fn test_invalid_settings_json() {
        let mut request = PendingSchemaRequest::new("books");
        request.set_settings("{nope");
        assert!(matches!(request.body(), Err(KnapsackError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_override_file_replaces_payload() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("settings.json");
        std::fs::write(&file, r#"{"number_of_replicas":0}"#).unwrap();

        let overrides = SchemaOverrides::new().with_settings("books", &file);
        let packet = Packet::new("books/_settings", "{}");

        assert_eq!(
            overrides.settings("books", &packet).await.unwrap(),
            r#"{"number_of_replicas":0}"#
        );
        assert_eq!(overrides.settings("films", &packet).await.unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_unreadable_override() {
        let overrides = SchemaOverrides::new().with_mapping("books", "novel", "/nonexistent/m.json");
        let packet = Packet::new("books/novel/_mapping", "{}");
        let err = overrides.mapping("books", "novel", &packet).await.unwrap_err();
        assert!(matches!(err, KnapsackError::OverrideSourceUnreadable { .. }));
    }

    #[test]
    fn test_from_params_keeps_schema_keys_only() {
        let params: HashMap<String, String> = [
            ("books_settings", "/tmp/s.json"),
            ("books_novel_mapping", "/tmp/m.json"),
            ("timeout", "30"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let overrides = SchemaOverrides::from_params(&params);
        assert_eq!(overrides.files.len(), 2);
        assert!(overrides.files.contains_key("books_novel_mapping"));
    }
}
