//! Document writes assembled from field entries

use std::fmt;

use knapsack_common::{KnapsackError, Result};
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde_json::value::RawValue;
use serde_json::Value;

use crate::archive::Packet;

/// One document destined for the store
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DocumentWrite {
    pub collection: String,
    pub subcollection: String,
    /// `None` lets the store assign an id
    pub id: Option<String>,
    pub parent: Option<String>,
    pub routing: Option<String>,
    pub timestamp: Option<String>,
    /// External version
    pub version: Option<i64>,
    /// Raw document body from `_source`
    pub source: Option<Vec<u8>>,
    /// Single named properties, merged into the body as strings
    pub properties: Vec<(String, String)>,
}

impl DocumentWrite {
    pub fn new(
        collection: impl Into<String>,
        subcollection: impl Into<String>,
        id: Option<String>,
    ) -> Self {
        Self {
            collection: collection.into(),
            subcollection: subcollection.into(),
            id,
            ..Self::default()
        }
    }

    /// Apply one field entry
    pub fn apply_field(&mut self, field: &str, packet: &Packet) -> Result<()> {
        match field {
            "_parent" => self.parent = Some(packet.text().into_owned()),
            "_routing" => self.routing = Some(packet.text().into_owned()),
            "_timestamp" => self.timestamp = Some(packet.text().into_owned()),
            "_version" => {
                let text = packet.text();
                let version = text.trim().parse::<i64>().map_err(|_| {
                    KnapsackError::InvalidVersion {
                        id: self.describe(),
                        value: text.to_string(),
                    }
                })?;
                self.version = Some(version);
            },
            "_source" => self.source = Some(packet.payload().to_vec()),
            other => self
                .properties
                .push((other.to_string(), packet.text().into_owned())),
        }
        Ok(())
    }

    /// Document body as one line of JSON text, as sent to the store
    ///
    /// Without named properties the `_source` bytes pass through untouched
    /// apart from line breaks, which are blanked. Properties are appended to
    /// the top-level object; existing members keep their original text unless
    /// a property of the same name replaces them.
    pub fn source_line(&self) -> Result<String> {
        let text = match &self.source {
            Some(bytes) if self.properties.is_empty() => {
                String::from_utf8_lossy(bytes).into_owned()
            },
            None if self.properties.is_empty() => "{}".to_string(),
            source => self.merge_properties(source.as_deref())?,
        };
        Ok(single_line(text))
    }

    /// Parsed view of [`source_line`](Self::source_line)
    pub fn body(&self) -> Result<Value> {
        Ok(serde_json::from_str(&self.source_line()?)?)
    }

    fn merge_properties(&self, source: Option<&[u8]>) -> Result<String> {
        let members = match source {
            Some(bytes) => {
                serde_json::from_slice::<ObjectMembers<'_>>(bytes)
                    .map_err(|e| {
                        KnapsackError::Archive(format!(
                            "{}: _source is not a JSON object, cannot add fields ({})",
                            self.describe(),
                            e
                        ))
                    })?
                    .0
            },
            None => Vec::new(),
        };

        let mut parts = Vec::with_capacity(members.len() + self.properties.len());
        for (key, value) in &members {
            if self.properties.iter().any(|(name, _)| name == key) {
                continue;
            }
            parts.push(format!("{}:{}", serde_json::to_string(key)?, value.get()));
        }
        for (name, value) in &self.properties {
            parts.push(format!(
                "{}:{}",
                serde_json::to_string(name)?,
                serde_json::to_string(value)?
            ));
        }

        let mut out = String::from("{");
        out.push_str(&parts.join(","));
        out.push('}');
        Ok(out)
    }

    /// `collection/subcollection/id` for log and error messages
    pub fn describe(&self) -> String {
        format!(
            "{}/{}/{}",
            self.collection,
            self.subcollection,
            self.id.as_deref().unwrap_or("<auto>")
        )
    }
}

/// Top-level members of a JSON object, in document order, values unparsed
struct ObjectMembers<'a>(Vec<(String, &'a RawValue)>);

impl<'de> Deserialize<'de> for ObjectMembers<'de> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct MembersVisitor;

        impl<'de> Visitor<'de> for MembersVisitor {
            type Value = ObjectMembers<'de>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut members = Vec::new();
                while let Some(member) = map.next_entry::<String, &'de RawValue>()? {
                    members.push(member);
                }
                Ok(ObjectMembers(members))
            }
        }

        deserializer.deserialize_map(MembersVisitor)
    }
}

/// Bulk bodies are newline-delimited; JSON never needs a raw line break
/// outside of whitespace
fn single_line(text: String) -> String {
    if text.contains(['\r', '\n']) {
        text.replace(['\r', '\n'], " ")
    } else {
        text
    }
}
