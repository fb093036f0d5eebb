use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use eventmill_core::{Classify, ErrorKind};

use super::{Filter, Index, Projection};

/// Write metadata: filled into metadata-field index columns.
pub type DocMetadata = serde_json::Map<String, JsonValue>;

/// A versioned JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub body: JsonValue,
    pub version: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub path: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(path: impl Into<String>) -> Self {
        Self { path: path.into(), direction: SortDirection::Asc }
    }

    pub fn desc(path: impl Into<String>) -> Self {
        Self { path: path.into(), direction: SortDirection::Desc }
    }
}

/// Optional arguments of every single-document write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOptions {
    pub metadata: Option<DocMetadata>,
    /// Explicit version; defaults to 1 on create and `current + 1` on update.
    pub version: Option<u64>,
}

impl WriteOptions {
    pub fn version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn metadata(mut self, metadata: DocMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Paging and ordering of a query.
///
/// Results are ordered by `order_by`, then by document id. Without `order_by`
/// the order is by id. Ties on equal sort values beyond that are broken by id
/// on both shipped backends; other backends only promise the explicit fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub order_by: Vec<OrderBy>,
}

impl FindOptions {
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }
}

/// Document store operation error.
#[derive(Debug, Error)]
pub enum DocumentStoreError {
    #[error("collection not found: {0}")]
    UnknownCollection(String),

    #[error("document {collection}/{id} already exists")]
    AlreadyExists { collection: String, id: String },

    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("unique index '{index}' of collection '{collection}' violated")]
    UniqueViolation { collection: String, index: String },

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("document store lock poisoned")]
    Poisoned,

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl Classify for DocumentStoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            DocumentStoreError::UnknownCollection(_) | DocumentStoreError::NotFound { .. } => {
                ErrorKind::NotFound
            }
            DocumentStoreError::AlreadyExists { .. } | DocumentStoreError::UniqueViolation { .. } => {
                ErrorKind::Conflict
            }
            DocumentStoreError::Invalid(_) => ErrorKind::Validation,
            DocumentStoreError::Poisoned
            | DocumentStoreError::Database(_)
            | DocumentStoreError::Io(_)
            | DocumentStoreError::Serialization(_) => ErrorKind::Backend,
        }
    }
}

pub type DocumentStream = BoxStream<'static, Result<Document, DocumentStoreError>>;
pub type DocumentIdStream = BoxStream<'static, Result<String, DocumentStoreError>>;

/// Key/value-with-query storage for versioned JSON documents.
///
/// ## Versions
///
/// Every successful mutation bumps the document version: creations default to
/// 1, updates to `current + 1`. An explicit `WriteOptions::version` wins
/// (aggregate snapshots store the last applied event's version this way).
///
/// ## Absence
///
/// Reads return `None` for a missing document. Writes that need an existing
/// document fail with [`DocumentStoreError::NotFound`]; `add_doc` on an
/// existing id fails with [`DocumentStoreError::AlreadyExists`]. Every
/// operation on a collection that was never added fails with
/// [`DocumentStoreError::UnknownCollection`].
///
/// ## Bulk operations
///
/// `update_many`, `replace_many` and `delete_many` are all-or-nothing: either
/// every matching document is written or none is.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a collection (no-op when it exists), optionally with an index.
    async fn add_collection(&self, collection: &str, index: Option<Index>) -> Result<(), DocumentStoreError>;

    /// Drop a collection and all its documents (no-op when absent).
    async fn drop_collection(&self, collection: &str) -> Result<(), DocumentStoreError>;

    async fn has_collection(&self, collection: &str) -> Result<bool, DocumentStoreError>;

    /// Add an index (no-op when an index with that name exists).
    async fn add_collection_index(&self, collection: &str, index: Index) -> Result<(), DocumentStoreError>;

    async fn drop_collection_index(&self, collection: &str, index_name: &str) -> Result<(), DocumentStoreError>;

    async fn has_collection_index(&self, collection: &str, index_name: &str) -> Result<bool, DocumentStoreError>;

    async fn add_doc(
        &self,
        collection: &str,
        id: &str,
        body: JsonValue,
        options: WriteOptions,
    ) -> Result<(), DocumentStoreError>;

    /// Shallow top-level merge of `partial` (a JSON object) into the body.
    async fn update_doc(
        &self,
        collection: &str,
        id: &str,
        partial: JsonValue,
        options: WriteOptions,
    ) -> Result<(), DocumentStoreError>;

    /// `update_doc` when present, `add_doc` otherwise.
    async fn upsert_doc(
        &self,
        collection: &str,
        id: &str,
        body: JsonValue,
        options: WriteOptions,
    ) -> Result<(), DocumentStoreError>;

    /// Replace the whole body.
    async fn replace_doc(
        &self,
        collection: &str,
        id: &str,
        body: JsonValue,
        options: WriteOptions,
    ) -> Result<(), DocumentStoreError>;

    /// Returns whether a document was deleted.
    async fn delete_doc(&self, collection: &str, id: &str) -> Result<bool, DocumentStoreError>;

    async fn get_doc_and_version(&self, collection: &str, id: &str) -> Result<Option<Document>, DocumentStoreError>;

    async fn get_doc(&self, collection: &str, id: &str) -> Result<Option<JsonValue>, DocumentStoreError> {
        Ok(self.get_doc_and_version(collection, id).await?.map(|d| d.body))
    }

    async fn get_doc_version(&self, collection: &str, id: &str) -> Result<Option<u64>, DocumentStoreError> {
        Ok(self.get_doc_and_version(collection, id).await?.map(|d| d.version))
    }

    async fn get_partial_doc(
        &self,
        collection: &str,
        id: &str,
        projection: &Projection,
    ) -> Result<Option<JsonValue>, DocumentStoreError> {
        Ok(self.get_doc(collection, id).await?.map(|body| projection.apply(&body)))
    }

    /// Merge `partial` into every matching document. Returns the number updated.
    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        partial: JsonValue,
        options: WriteOptions,
    ) -> Result<u64, DocumentStoreError>;

    /// Replace the body of every matching document. Returns the number replaced.
    async fn replace_many(
        &self,
        collection: &str,
        filter: &Filter,
        body: JsonValue,
        options: WriteOptions,
    ) -> Result<u64, DocumentStoreError>;

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, DocumentStoreError>;

    /// Lazy, ordered, finite sequence of matching documents.
    fn find_docs(&self, collection: &str, filter: &Filter, options: FindOptions) -> DocumentStream;

    fn find_doc_ids(&self, collection: &str, filter: &Filter, options: FindOptions) -> DocumentIdStream {
        use futures::TryStreamExt;
        Box::pin(self.find_docs(collection, filter, options).map_ok(|d| d.id))
    }

    fn find_partial_docs(
        &self,
        collection: &str,
        filter: &Filter,
        options: FindOptions,
        projection: &Projection,
    ) -> DocumentStream {
        use futures::TryStreamExt;
        let projection = projection.clone();
        Box::pin(self.find_docs(collection, filter, options).map_ok(move |d| Document {
            body: projection.apply(&d.body),
            ..d
        }))
    }

    async fn count_docs(&self, collection: &str, filter: &Filter) -> Result<u64, DocumentStoreError>;
}

/// Reject non-object partial bodies.
pub(crate) fn require_object(value: &JsonValue, what: &str) -> Result<(), DocumentStoreError> {
    if value.is_object() {
        Ok(())
    } else {
        Err(DocumentStoreError::Invalid(format!("{what} must be a JSON object")))
    }
}

/// Shallow top-level merge.
pub(crate) fn merge_top_level(target: &mut JsonValue, partial: &JsonValue) {
    if let (JsonValue::Object(target), JsonValue::Object(partial)) = (target, partial) {
        for (k, v) in partial {
            target.insert(k.clone(), v.clone());
        }
    }
}

/// Collection and index names become SQL identifiers, so both backends accept
/// the same restricted alphabet.
pub(crate) fn validate_name(kind: &str, name: &str) -> Result<(), DocumentStoreError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 30;
    if valid {
        Ok(())
    } else {
        Err(DocumentStoreError::Invalid(format!(
            "{kind} name '{name}' must match [A-Za-z_][A-Za-z0-9_]{{0,29}}"
        )))
    }
}
