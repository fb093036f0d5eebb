use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use eventmill_core::EventId;
use eventmill_events::{Event, StreamPosition};

use crate::document_store::{DocumentStore, DocumentStoreError, Filter, WriteOptions};

use super::{PositionInitializer, ProcessedListener};

/// Default collection of [`DocumentCheckpointStore`].
pub const CHECKPOINT_COLLECTION: &str = "subscription_checkpoints";

/// Last processed event per `(subscription, stream)`, kept in a document
/// collection so a subscription resumes where it stopped across restarts.
///
/// Register it both as the subscription's processed listener and as the
/// position initializer of its streams.
#[derive(Clone)]
pub struct DocumentCheckpointStore {
    documents: Arc<dyn DocumentStore>,
    collection: String,
}

impl std::fmt::Debug for DocumentCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCheckpointStore")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

fn checkpoint_id(subscription: &str, stream: &str) -> String {
    format!("{subscription}:{stream}")
}

impl DocumentCheckpointStore {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self::with_collection(documents, CHECKPOINT_COLLECTION)
    }

    pub fn with_collection(documents: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self { documents, collection: collection.into() }
    }

    pub async fn ensure_collection(&self) -> Result<(), DocumentStoreError> {
        self.documents.add_collection(&self.collection, None).await
    }

    pub async fn last_processed(&self, subscription: &str, stream: &str) -> Result<Option<EventId>, DocumentStoreError> {
        let Some(doc) = self.documents.get_doc(&self.collection, &checkpoint_id(subscription, stream)).await? else {
            return Ok(None);
        };
        match doc.get("lastProcessedEventId").and_then(|v| v.as_str()) {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|e: eventmill_core::InvalidId| DocumentStoreError::Invalid(e.to_string())),
            None => Ok(None),
        }
    }

    pub async fn record(&self, subscription: &str, stream: &str, event_id: EventId) -> Result<(), DocumentStoreError> {
        let body = json!({
            "subscription": subscription,
            "stream": stream,
            "lastProcessedEventId": event_id.to_string(),
            "updatedAt": Utc::now().to_rfc3339(),
        });
        self.documents
            .upsert_doc(&self.collection, &checkpoint_id(subscription, stream), body, WriteOptions::default())
            .await
    }

    /// Forget every checkpoint of `subscription`; its next start replays
    /// from the beginning.
    pub async fn clear(&self, subscription: &str) -> Result<u64, DocumentStoreError> {
        self.documents
            .delete_many(&self.collection, &Filter::eq("subscription", subscription))
            .await
    }
}

#[async_trait]
impl ProcessedListener for DocumentCheckpointStore {
    async fn processed(&self, subscription: &str, stream: &str, event: &Event) -> anyhow::Result<()> {
        self.record(subscription, stream, event.uuid).await?;
        Ok(())
    }
}

#[async_trait]
impl PositionInitializer for DocumentCheckpointStore {
    /// The stored checkpoint wins over the in-process position.
    async fn initial_position(
        &self,
        subscription: &str,
        stream: &str,
        recorded: Option<&StreamPosition>,
    ) -> anyhow::Result<StreamPosition> {
        let matcher = recorded.and_then(|p| p.matcher()).cloned();
        let position = match self.last_processed(subscription, stream).await? {
            Some(id) => StreamPosition::after(id),
            None => recorded.cloned().unwrap_or_else(StreamPosition::beginning),
        };
        Ok(match (matcher, position.matcher()) {
            (Some(matcher), None) => position.with_matcher(matcher),
            _ => position,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_store::InMemoryDocumentStore;

    async fn checkpoints() -> DocumentCheckpointStore {
        let store = DocumentCheckpointStore::new(Arc::new(InMemoryDocumentStore::new()));
        store.ensure_collection().await.unwrap();
        store
    }

    #[tokio::test]
    async fn records_and_reads_back_per_stream() {
        let store = checkpoints().await;
        assert_eq!(store.last_processed("sub", "a").await.unwrap(), None);

        let first = EventId::new();
        let second = EventId::new();
        store.record("sub", "a", first).await.unwrap();
        store.record("sub", "a", second).await.unwrap();
        store.record("sub", "b", first).await.unwrap();
        store.record("other", "a", first).await.unwrap();

        assert_eq!(store.last_processed("sub", "a").await.unwrap(), Some(second));
        assert_eq!(store.last_processed("sub", "b").await.unwrap(), Some(first));

        assert_eq!(store.clear("sub").await.unwrap(), 2);
        assert_eq!(store.last_processed("sub", "a").await.unwrap(), None);
        assert_eq!(store.last_processed("other", "a").await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn initial_position_prefers_the_stored_checkpoint() {
        let store = checkpoints().await;
        let fresh = store.initial_position("sub", "a", None).await.unwrap();
        assert_eq!(fresh, StreamPosition::beginning());

        let stored = EventId::new();
        store.record("sub", "a", stored).await.unwrap();
        let in_process = StreamPosition::after(EventId::new());
        let position = store.initial_position("sub", "a", Some(&in_process)).await.unwrap();
        assert_eq!(position.last_processed(), Some(stored));
    }
}
