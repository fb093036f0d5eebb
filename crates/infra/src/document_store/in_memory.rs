use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use eventmill_core::value::{resolve_path, sort_order};

use super::r#trait::{merge_top_level, require_object, validate_name};
use super::{
    DocMetadata, Document, DocumentStore, DocumentStoreError, DocumentStream, Filter, FindOptions,
    Index, SortDirection, WriteOptions,
};
use crate::persistence::SnapshotFile;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct StoredDoc {
    body: JsonValue,
    version: u64,
    /// Only fields declared by metadata-field indexes are kept.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    metadata: DocMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Collection {
    #[serde(default)]
    indexes: Vec<Index>,
    docs: BTreeMap<String, StoredDoc>,
}

pub(crate) type Collections = BTreeMap<String, Collection>;

pub(crate) fn collection_mut<'a>(
    collections: &'a mut Collections,
    name: &str,
) -> Result<&'a mut Collection, DocumentStoreError> {
    collections
        .get_mut(name)
        .ok_or_else(|| DocumentStoreError::UnknownCollection(name.to_string()))
}

fn collection<'a>(collections: &'a Collections, name: &str) -> Result<&'a Collection, DocumentStoreError> {
    collections
        .get(name)
        .ok_or_else(|| DocumentStoreError::UnknownCollection(name.to_string()))
}

/// Pure collection operations; the store and the unit of work share them.
impl Collection {
    pub(crate) fn add(&mut self, name: &str, id: &str, body: JsonValue, options: WriteOptions) -> Result<(), DocumentStoreError> {
        if self.docs.contains_key(id) {
            return Err(DocumentStoreError::AlreadyExists { collection: name.to_string(), id: id.to_string() });
        }
        let metadata = self.retained_metadata(None, options.metadata.as_ref());
        let doc = StoredDoc { body, version: options.version.unwrap_or(1), metadata };
        self.put(name, id, doc)
    }

    pub(crate) fn update(&mut self, name: &str, id: &str, partial: JsonValue, options: WriteOptions) -> Result<(), DocumentStoreError> {
        require_object(&partial, "partial document")?;
        let current = self.existing(name, id)?;
        let mut body = current.body.clone();
        merge_top_level(&mut body, &partial);
        let doc = StoredDoc {
            body,
            version: options.version.unwrap_or(current.version + 1),
            metadata: self.retained_metadata(Some(&current.metadata), options.metadata.as_ref()),
        };
        self.put(name, id, doc)
    }

    pub(crate) fn upsert(&mut self, name: &str, id: &str, body: JsonValue, options: WriteOptions) -> Result<(), DocumentStoreError> {
        require_object(&body, "upserted document")?;
        if self.docs.contains_key(id) {
            self.update(name, id, body, options)
        } else {
            self.add(name, id, body, options)
        }
    }

    pub(crate) fn replace(&mut self, name: &str, id: &str, body: JsonValue, options: WriteOptions) -> Result<(), DocumentStoreError> {
        let current = self.existing(name, id)?;
        let doc = StoredDoc {
            body,
            version: options.version.unwrap_or(current.version + 1),
            metadata: self.retained_metadata(Some(&current.metadata), options.metadata.as_ref()),
        };
        self.put(name, id, doc)
    }

    /// Replace-or-create with an explicit version.
    pub(crate) fn set(&mut self, name: &str, id: &str, body: JsonValue, version: u64) -> Result<(), DocumentStoreError> {
        let metadata = self.docs.get(id).map(|d| d.metadata.clone()).unwrap_or_default();
        self.put(name, id, StoredDoc { body, version, metadata })
    }

    pub(crate) fn delete(&mut self, id: &str) -> bool {
        self.docs.remove(id).is_some()
    }

    pub(crate) fn update_many(&mut self, name: &str, filter: &Filter, partial: JsonValue, options: WriteOptions) -> Result<u64, DocumentStoreError> {
        require_object(&partial, "partial document")?;
        let ids = self.matching_ids(filter);
        let mut staged = self.clone();
        for id in &ids {
            staged.update(name, id, partial.clone(), options.clone())?;
        }
        *self = staged;
        Ok(ids.len() as u64)
    }

    pub(crate) fn replace_many(&mut self, name: &str, filter: &Filter, body: JsonValue, options: WriteOptions) -> Result<u64, DocumentStoreError> {
        let ids = self.matching_ids(filter);
        let mut staged = self.clone();
        for id in &ids {
            staged.replace(name, id, body.clone(), options.clone())?;
        }
        *self = staged;
        Ok(ids.len() as u64)
    }

    pub(crate) fn delete_many(&mut self, filter: &Filter) -> u64 {
        let before = self.docs.len();
        let filter = filter.compile();
        self.docs.retain(|id, doc| !filter.matches(id, &doc.body));
        (before - self.docs.len()) as u64
    }

    pub(crate) fn get(&self, id: &str) -> Option<Document> {
        self.docs.get(id).map(|d| Document { id: id.to_string(), body: d.body.clone(), version: d.version })
    }

    pub(crate) fn count(&self, filter: &Filter) -> u64 {
        let filter = filter.compile();
        self.docs.iter().filter(|(id, d)| filter.matches(id, &d.body)).count() as u64
    }

    pub(crate) fn find(&self, filter: &Filter, options: &FindOptions) -> Vec<Document> {
        let filter = filter.compile();
        // BTreeMap iteration is already ordered by id.
        let mut hits: Vec<(&String, &StoredDoc)> = self
            .docs
            .iter()
            .filter(|(id, d)| filter.matches(id, &d.body))
            .collect();

        if !options.order_by.is_empty() {
            hits.sort_by(|(a_id, a), (b_id, b)| {
                options
                    .order_by
                    .iter()
                    .map(|o| compare_at(&a.body, &b.body, &o.path, o.direction))
                    .find(|ord| ord.is_ne())
                    .unwrap_or_else(|| a_id.cmp(b_id))
            });
        }

        let skip = options.skip.unwrap_or(0) as usize;
        let limit = options.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        hits.into_iter()
            .skip(skip)
            .take(limit)
            .map(|(id, d)| Document { id: id.clone(), body: d.body.clone(), version: d.version })
            .collect()
    }

    pub(crate) fn add_index(&mut self, name: &str, index: Index) -> Result<(), DocumentStoreError> {
        validate_name("index", &index.name)?;
        if self.indexes.iter().any(|i| i.name == index.name) {
            return Ok(());
        }
        if index.unique {
            let mut seen = std::collections::HashSet::new();
            for doc in self.docs.values() {
                if let Some(key) = index.unique_key(&doc.body, &doc.metadata) {
                    if !seen.insert(key) {
                        return Err(DocumentStoreError::UniqueViolation {
                            collection: name.to_string(),
                            index: index.name.clone(),
                        });
                    }
                }
            }
        }
        self.indexes.push(index);
        Ok(())
    }

    pub(crate) fn drop_index(&mut self, index_name: &str) {
        self.indexes.retain(|i| i.name != index_name);
    }

    pub(crate) fn has_index(&self, index_name: &str) -> bool {
        self.indexes.iter().any(|i| i.name == index_name)
    }

    fn existing(&self, name: &str, id: &str) -> Result<&StoredDoc, DocumentStoreError> {
        self.docs
            .get(id)
            .ok_or_else(|| DocumentStoreError::NotFound { collection: name.to_string(), id: id.to_string() })
    }

    fn matching_ids(&self, filter: &Filter) -> Vec<String> {
        let filter = filter.compile();
        self.docs
            .iter()
            .filter(|(id, d)| filter.matches(id, &d.body))
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn retained_metadata(&self, previous: Option<&DocMetadata>, given: Option<&DocMetadata>) -> DocMetadata {
        let mut out = previous.cloned().unwrap_or_default();
        if let Some(given) = given {
            for field in self.indexes.iter().filter_map(Index::metadata_field_name) {
                if let Some(value) = given.get(field) {
                    out.insert(field.to_string(), value.clone());
                }
            }
        }
        out
    }

    /// Insert after checking unique indexes against every other document.
    fn put(&mut self, name: &str, id: &str, doc: StoredDoc) -> Result<(), DocumentStoreError> {
        for index in self.indexes.iter().filter(|i| i.unique) {
            let Some(key) = index.unique_key(&doc.body, &doc.metadata) else {
                continue;
            };
            let clash = self
                .docs
                .iter()
                .any(|(other_id, other)| other_id != id && index.unique_key(&other.body, &other.metadata).as_ref() == Some(&key));
            if clash {
                return Err(DocumentStoreError::UniqueViolation {
                    collection: name.to_string(),
                    index: index.name.clone(),
                });
            }
        }
        self.docs.insert(id.to_string(), doc);
        Ok(())
    }
}

/// Missing values sort last ascending and first descending, like SQL NULLs.
fn compare_at(a: &JsonValue, b: &JsonValue, path: &str, direction: SortDirection) -> Ordering {
    let ord = match (resolve_path(a, path), resolve_path(b, path)) {
        (Some(x), Some(y)) => sort_order(x, y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    match direction {
        SortDirection::Asc => ord,
        SortDirection::Desc => ord.reverse(),
    }
}

#[derive(Debug, Default)]
struct Inner {
    collections: RwLock<Collections>,
    snapshot: Option<SnapshotFile>,
}

/// In-memory document store.
///
/// Intended for tests/dev. Optionally persisted to a flat JSON snapshot file
/// that is rewritten after every successful mutation.
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDocumentStore {
    inner: Arc<Inner>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load (or start) a store persisted at `path`.
    pub fn with_snapshot(path: impl Into<PathBuf>) -> Result<Self, DocumentStoreError> {
        let snapshot = SnapshotFile::new(path);
        let collections: Collections = snapshot.load()?;
        Ok(Self {
            inner: Arc::new(Inner { collections: RwLock::new(collections), snapshot: Some(snapshot) }),
        })
    }

    pub(crate) fn lock_write(&self) -> Result<RwLockWriteGuard<'_, Collections>, DocumentStoreError> {
        self.inner.collections.write().map_err(|_| DocumentStoreError::Poisoned)
    }

    /// Save `live` with `staged` collections replacing their live
    /// counterparts, leaving `live` untouched.
    pub(crate) fn persist_staged(&self, live: &Collections, staged: &Collections) -> Result<(), DocumentStoreError> {
        if let Some(snapshot) = &self.inner.snapshot {
            let mut next = live.clone();
            next.extend(staged.iter().map(|(name, docs)| (name.clone(), docs.clone())));
            snapshot.save(&next)?;
        }
        Ok(())
    }

    /// Apply `f`; with a snapshot file the change becomes visible only once
    /// the file is saved.
    fn write<R>(&self, f: impl FnOnce(&mut Collections) -> Result<R, DocumentStoreError>) -> Result<R, DocumentStoreError> {
        let mut collections = self.lock_write()?;
        let Some(snapshot) = &self.inner.snapshot else {
            return f(&mut collections);
        };
        let mut next = collections.clone();
        let out = f(&mut next)?;
        snapshot.save(&next)?;
        *collections = next;
        Ok(out)
    }

    fn read<R>(&self, f: impl FnOnce(&Collections) -> Result<R, DocumentStoreError>) -> Result<R, DocumentStoreError> {
        let collections = self.inner.collections.read().map_err(|_| DocumentStoreError::Poisoned)?;
        f(&collections)
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn add_collection(&self, name: &str, index: Option<Index>) -> Result<(), DocumentStoreError> {
        validate_name("collection", name)?;
        self.write(|cols| {
            let collection = cols.entry(name.to_string()).or_default();
            match index {
                Some(index) => collection.add_index(name, index),
                None => Ok(()),
            }
        })
    }

    async fn drop_collection(&self, name: &str) -> Result<(), DocumentStoreError> {
        self.write(|cols| {
            cols.remove(name);
            Ok(())
        })
    }

    async fn has_collection(&self, name: &str) -> Result<bool, DocumentStoreError> {
        self.read(|cols| Ok(cols.contains_key(name)))
    }

    async fn add_collection_index(&self, name: &str, index: Index) -> Result<(), DocumentStoreError> {
        self.write(|cols| collection_mut(cols, name)?.add_index(name, index))
    }

    async fn drop_collection_index(&self, name: &str, index_name: &str) -> Result<(), DocumentStoreError> {
        self.write(|cols| {
            collection_mut(cols, name)?.drop_index(index_name);
            Ok(())
        })
    }

    async fn has_collection_index(&self, name: &str, index_name: &str) -> Result<bool, DocumentStoreError> {
        self.read(|cols| Ok(collection(cols, name)?.has_index(index_name)))
    }

    async fn add_doc(&self, name: &str, id: &str, body: JsonValue, options: WriteOptions) -> Result<(), DocumentStoreError> {
        self.write(|cols| collection_mut(cols, name)?.add(name, id, body, options))
    }

    async fn update_doc(&self, name: &str, id: &str, partial: JsonValue, options: WriteOptions) -> Result<(), DocumentStoreError> {
        self.write(|cols| collection_mut(cols, name)?.update(name, id, partial, options))
    }

    async fn upsert_doc(&self, name: &str, id: &str, body: JsonValue, options: WriteOptions) -> Result<(), DocumentStoreError> {
        self.write(|cols| collection_mut(cols, name)?.upsert(name, id, body, options))
    }

    async fn replace_doc(&self, name: &str, id: &str, body: JsonValue, options: WriteOptions) -> Result<(), DocumentStoreError> {
        self.write(|cols| collection_mut(cols, name)?.replace(name, id, body, options))
    }

    async fn delete_doc(&self, name: &str, id: &str) -> Result<bool, DocumentStoreError> {
        self.write(|cols| Ok(collection_mut(cols, name)?.delete(id)))
    }

    async fn get_doc_and_version(&self, name: &str, id: &str) -> Result<Option<Document>, DocumentStoreError> {
        self.read(|cols| Ok(collection(cols, name)?.get(id)))
    }

    async fn update_many(&self, name: &str, filter: &Filter, partial: JsonValue, options: WriteOptions) -> Result<u64, DocumentStoreError> {
        self.write(|cols| collection_mut(cols, name)?.update_many(name, filter, partial, options))
    }

    async fn replace_many(&self, name: &str, filter: &Filter, body: JsonValue, options: WriteOptions) -> Result<u64, DocumentStoreError> {
        self.write(|cols| collection_mut(cols, name)?.replace_many(name, filter, body, options))
    }

    async fn delete_many(&self, name: &str, filter: &Filter) -> Result<u64, DocumentStoreError> {
        self.write(|cols| Ok(collection_mut(cols, name)?.delete_many(filter)))
    }

    fn find_docs(&self, name: &str, filter: &Filter, options: FindOptions) -> DocumentStream {
        let result = self.read(|cols| Ok(collection(cols, name)?.find(filter, &options)));
        match result {
            Ok(docs) => Box::pin(futures::stream::iter(docs.into_iter().map(Ok))),
            Err(e) => Box::pin(futures::stream::once(async move { Err(e) })),
        }
    }

    async fn count_docs(&self, name: &str, filter: &Filter) -> Result<u64, DocumentStoreError> {
        self.read(|cols| Ok(collection(cols, name)?.count(filter)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_store::{OrderBy, Projection};
    use eventmill_core::Classify;
    use futures::TryStreamExt;
    use serde_json::json;

    async fn orders() -> InMemoryDocumentStore {
        let store = InMemoryDocumentStore::new();
        store.add_collection("orders", None).await.unwrap();
        store
    }

    async fn ids(store: &InMemoryDocumentStore, filter: &Filter, options: FindOptions) -> Vec<String> {
        store.find_doc_ids("orders", filter, options).try_collect().await.unwrap()
    }

    #[tokio::test]
    async fn scenario_a_add_then_update() {
        let store = orders().await;
        store.add_doc("orders", "1", json!({"status": "new"}), WriteOptions::default()).await.unwrap();
        store.update_doc("orders", "1", json!({"status": "paid"}), WriteOptions::default()).await.unwrap();

        let doc = store.get_doc_and_version("orders", "1").await.unwrap().unwrap();
        assert_eq!(doc.body, json!({"status": "paid"}));
        assert_eq!(doc.version, 2);
    }

    #[tokio::test]
    async fn add_returns_exact_body_and_rejects_duplicates() {
        let store = orders().await;
        let body = json!({"a": [1, {"b": null}], "c": 1.5});
        store.add_doc("orders", "1", body.clone(), WriteOptions::default()).await.unwrap();
        assert_eq!(store.get_doc("orders", "1").await.unwrap(), Some(body));

        let err = store.add_doc("orders", "1", json!({}), WriteOptions::default()).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn update_merges_top_level_and_honours_explicit_versions() {
        let store = orders().await;
        store.add_doc("orders", "1", json!({"a": 1, "b": {"x": 1}}), WriteOptions::default().version(5)).await.unwrap();
        store.update_doc("orders", "1", json!({"b": {"y": 2}}), WriteOptions::default()).await.unwrap();

        let doc = store.get_doc_and_version("orders", "1").await.unwrap().unwrap();
        assert_eq!(doc.body, json!({"a": 1, "b": {"y": 2}}));
        assert_eq!(doc.version, 6);

        let err = store.update_doc("orders", "2", json!({}), WriteOptions::default()).await.unwrap_err();
        assert!(err.is_not_found());
        let err = store.update_doc("orders", "1", json!([1]), WriteOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), eventmill_core::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn upsert_replace_and_delete() {
        let store = orders().await;
        store.upsert_doc("orders", "1", json!({"a": 1}), WriteOptions::default()).await.unwrap();
        store.upsert_doc("orders", "1", json!({"b": 2}), WriteOptions::default()).await.unwrap();
        assert_eq!(store.get_doc("orders", "1").await.unwrap(), Some(json!({"a": 1, "b": 2})));

        store.replace_doc("orders", "1", json!({"c": 3}), WriteOptions::default()).await.unwrap();
        assert_eq!(store.get_doc("orders", "1").await.unwrap(), Some(json!({"c": 3})));
        assert_eq!(store.get_doc_version("orders", "1").await.unwrap(), Some(3));
        assert!(store.replace_doc("orders", "2", json!({}), WriteOptions::default()).await.is_err());

        assert!(store.delete_doc("orders", "1").await.unwrap());
        assert!(!store.delete_doc("orders", "1").await.unwrap());
        assert_eq!(store.get_doc("orders", "1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_collections_are_not_found() {
        let store = InMemoryDocumentStore::new();
        assert!(!store.has_collection("orders").await.unwrap());
        let err = store.get_doc("orders", "1").await.unwrap_err();
        assert!(matches!(err, DocumentStoreError::UnknownCollection(_)));
        assert!(store.add_collection("bad name", None).await.is_err());
    }

    #[tokio::test]
    async fn find_orders_pages_and_breaks_ties_by_id() {
        let store = orders().await;
        for (id, total) in [("a", 30), ("b", 10), ("c", 30), ("d", 20)] {
            store.add_doc("orders", id, json!({"total": total}), WriteOptions::default()).await.unwrap();
        }
        store.add_doc("orders", "e", json!({}), WriteOptions::default()).await.unwrap();

        let asc = FindOptions::default().order_by(OrderBy::asc("total"));
        assert_eq!(ids(&store, &Filter::Any, asc).await, ["b", "d", "a", "c", "e"]);

        let desc = FindOptions::default().order_by(OrderBy::desc("total"));
        assert_eq!(ids(&store, &Filter::Any, desc).await, ["e", "a", "c", "d", "b"]);

        let page = FindOptions::default().order_by(OrderBy::asc("total")).skip(1).limit(2);
        assert_eq!(ids(&store, &Filter::Any, page).await, ["d", "a"]);

        assert_eq!(ids(&store, &Filter::gte("total", 20), FindOptions::default()).await, ["a", "c", "d"]);
        assert_eq!(store.count_docs("orders", &Filter::gte("total", 20)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn bulk_operations_touch_every_match_or_nothing() {
        let store = orders().await;
        store.add_collection_index("orders", Index::field("by_code", "code").unique()).await.unwrap();
        for (id, status) in [("1", "new"), ("2", "new"), ("3", "paid")] {
            store.add_doc("orders", id, json!({"status": status}), WriteOptions::default()).await.unwrap();
        }

        let n = store.update_many("orders", &Filter::eq("status", "new"), json!({"seen": true}), WriteOptions::default()).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(store.get_doc_version("orders", "2").await.unwrap(), Some(2));

        // Both matches would get the same unique code: nothing is written.
        let err = store
            .update_many("orders", &Filter::eq("status", "new"), json!({"code": "X"}), WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::UniqueViolation { .. }));
        assert_eq!(store.count_docs("orders", &Filter::exists("code")).await.unwrap(), 0);

        let n = store.replace_many("orders", &Filter::eq("status", "paid"), json!({"status": "archived"}), WriteOptions::default()).await.unwrap();
        assert_eq!(n, 1);
        assert_eq!(store.delete_many("orders", &Filter::eq("seen", true)).await.unwrap(), 2);
        assert_eq!(store.count_docs("orders", &Filter::Any).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn indexes_are_tracked_and_unique_ones_enforced() {
        let store = orders().await;
        store.add_doc("orders", "1", json!({"code": "A"}), WriteOptions::default()).await.unwrap();
        store.add_doc("orders", "2", json!({"code": "A"}), WriteOptions::default()).await.unwrap();

        let err = store.add_collection_index("orders", Index::field("by_code", "code").unique()).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(!store.has_collection_index("orders", "by_code").await.unwrap());

        store.delete_doc("orders", "2").await.unwrap();
        store.add_collection_index("orders", Index::field("by_code", "code").unique()).await.unwrap();
        assert!(store.has_collection_index("orders", "by_code").await.unwrap());
        assert!(store.add_doc("orders", "3", json!({"code": "A"}), WriteOptions::default()).await.is_err());
        store.add_doc("orders", "4", json!({"code": null}), WriteOptions::default()).await.unwrap();

        store.drop_collection_index("orders", "by_code").await.unwrap();
        store.add_doc("orders", "3", json!({"code": "A"}), WriteOptions::default()).await.unwrap();
    }

    #[tokio::test]
    async fn metadata_indexes_enforce_uniqueness_on_write_metadata() {
        let store = orders().await;
        let index = Index::metadata_field("by_owner", "owner", crate::document_store::MetadataColumnType::Text).unique();
        store.add_collection_index("orders", index).await.unwrap();

        let mut meta = DocMetadata::new();
        meta.insert("owner".into(), json!("u1"));
        store.add_doc("orders", "1", json!({}), WriteOptions::default().metadata(meta.clone())).await.unwrap();
        let err = store.add_doc("orders", "2", json!({}), WriteOptions::default().metadata(meta)).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn partial_documents() {
        let store = orders().await;
        store
            .add_doc("orders", "1", json!({"customer": {"name": "Ada"}, "details": {"total": 3}}), WriteOptions::default())
            .await
            .unwrap();
        let projection = Projection::new().field("name", "customer.name").merge("details");

        assert_eq!(
            store.get_partial_doc("orders", "1", &projection).await.unwrap(),
            Some(json!({"name": "Ada", "total": 3}))
        );
        assert_eq!(store.get_partial_doc("orders", "2", &projection).await.unwrap(), None);

        let docs: Vec<Document> = store
            .find_partial_docs("orders", &Filter::Any, FindOptions::default(), &projection)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(docs[0].body, json!({"name": "Ada", "total": 3}));
    }

    #[tokio::test]
    async fn snapshot_file_survives_restart() {
        let path = std::env::temp_dir().join(format!("eventmill-docs-{}.json", uuid::Uuid::now_v7()));
        {
            let store = InMemoryDocumentStore::with_snapshot(&path).unwrap();
            store.add_collection("orders", Some(Index::field("by_status", "status"))).await.unwrap();
            store.add_doc("orders", "1", json!({"status": "new"}), WriteOptions::default()).await.unwrap();
        }

        let store = InMemoryDocumentStore::with_snapshot(&path).unwrap();
        assert_eq!(store.get_doc("orders", "1").await.unwrap(), Some(json!({"status": "new"})));
        assert!(store.has_collection_index("orders", "by_status").await.unwrap());
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn failed_snapshot_save_leaves_documents_unchanged() {
        let path = std::env::temp_dir().join(format!("eventmill-docs-{}.json", uuid::Uuid::now_v7()));
        let store = InMemoryDocumentStore::with_snapshot(&path).unwrap();
        store.add_collection("orders", None).await.unwrap();
        store.add_doc("orders", "1", json!({"status": "new"}), WriteOptions::default()).await.unwrap();

        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("blocker"), b"").unwrap();

        let err = store
            .update_doc("orders", "1", json!({"status": "paid"}), WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::Io(_)));
        let doc = store.get_doc_and_version("orders", "1").await.unwrap().unwrap();
        assert_eq!(doc.body, json!({"status": "new"}));
        assert_eq!(doc.version, 1);
        assert_eq!(store.get_doc("orders", "2").await.unwrap(), None);

        let _ = std::fs::remove_dir_all(&path);
    }
}
