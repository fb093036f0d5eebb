//! Collection index descriptors.
//!
//! Indexes are additive metadata: reads and writes are correct without them.
//! The one observable effect is uniqueness, which both backends enforce.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use eventmill_core::value::resolve_path;

use super::SortDirection;

/// Scalar type of a metadata column.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataColumnType {
    Text,
    Integer,
    Float,
    Boolean,
    Timestamp,
}

impl MetadataColumnType {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            MetadataColumnType::Text => "TEXT",
            MetadataColumnType::Integer => "BIGINT",
            MetadataColumnType::Float => "DOUBLE PRECISION",
            MetadataColumnType::Boolean => "BOOLEAN",
            MetadataColumnType::Timestamp => "TIMESTAMPTZ",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// One body path.
    Field { path: String, direction: SortDirection },
    /// Several body paths, each with its own sort direction.
    MultiField(Vec<(String, SortDirection)>),
    /// A typed scalar column filled from write metadata.
    MetadataField { field: String, column_type: MetadataColumnType },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub kind: IndexKind,
    #[serde(default)]
    pub unique: bool,
}

impl Index {
    pub fn field(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::Field { path: path.into(), direction: SortDirection::Asc },
            unique: false,
        }
    }

    pub fn multi_field<I, P>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (P, SortDirection)>,
        P: Into<String>,
    {
        Self {
            name: name.into(),
            kind: IndexKind::MultiField(fields.into_iter().map(|(p, d)| (p.into(), d)).collect()),
            unique: false,
        }
    }

    pub fn metadata_field(
        name: impl Into<String>,
        field: impl Into<String>,
        column_type: MetadataColumnType,
    ) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::MetadataField { field: field.into(), column_type },
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Metadata field stored for this index, if it is a metadata index.
    pub fn metadata_field_name(&self) -> Option<&str> {
        match &self.kind {
            IndexKind::MetadataField { field, .. } => Some(field),
            _ => None,
        }
    }

    /// Uniqueness key of a document under this index.
    ///
    /// `None` when any component is missing or null: like SQL unique indexes,
    /// such documents never collide. Components are compared by their text
    /// form (`#>>` in Postgres).
    pub(crate) fn unique_key(&self, body: &JsonValue, metadata: &serde_json::Map<String, JsonValue>) -> Option<Vec<String>> {
        let paths: Vec<&str> = match &self.kind {
            IndexKind::Field { path, .. } => vec![path.as_str()],
            IndexKind::MultiField(fields) => fields.iter().map(|(p, _)| p.as_str()).collect(),
            IndexKind::MetadataField { field, .. } => {
                return metadata.get(field).and_then(text_form).map(|k| vec![k]);
            }
        };
        paths
            .into_iter()
            .map(|p| resolve_path(body, p).and_then(text_form))
            .collect()
    }
}

fn text_form(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unique_keys_skip_missing_and_null_components() {
        let index = Index::multi_field("by_customer_day", [("customer", SortDirection::Asc), ("day", SortDirection::Desc)]).unique();
        let meta = serde_json::Map::new();

        assert_eq!(
            index.unique_key(&json!({"customer": "c1", "day": 3}), &meta),
            Some(vec!["c1".to_string(), "3".to_string()])
        );
        assert_eq!(index.unique_key(&json!({"customer": "c1"}), &meta), None);
        assert_eq!(index.unique_key(&json!({"customer": "c1", "day": null}), &meta), None);
    }

    #[test]
    fn metadata_indexes_read_write_metadata() {
        let index = Index::metadata_field("by_owner", "owner", MetadataColumnType::Text);
        let mut meta = serde_json::Map::new();
        meta.insert("owner".into(), json!("u1"));

        assert_eq!(index.metadata_field_name(), Some("owner"));
        assert_eq!(index.unique_key(&json!({}), &meta), Some(vec!["u1".to_string()]));
    }
}
