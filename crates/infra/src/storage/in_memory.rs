use async_trait::async_trait;
use tracing::error;

use crate::document_store::in_memory::{Collections, collection_mut};
use crate::document_store::InMemoryDocumentStore;
use crate::event_store::in_memory::{Streams, append_staged, delete_staged};
use crate::event_store::InMemoryEventStore;

use super::{CommitError, UnitOfWork, WriteBatch, WriteOp};

/// Commits a batch against an in-memory document store and event store.
///
/// Both stores stay locked for the whole commit (events first, then
/// documents). Touched streams and collections are copied, the batch is
/// applied to the copies and the copies replace the originals only when
/// every operation succeeded and the snapshot files, if any, are saved.
#[derive(Debug, Clone)]
pub struct InMemoryUnitOfWork {
    documents: InMemoryDocumentStore,
    events: InMemoryEventStore,
}

impl InMemoryUnitOfWork {
    pub fn new(documents: InMemoryDocumentStore, events: InMemoryEventStore) -> Self {
        Self { documents, events }
    }
}

fn stage_stream(staged: &mut Streams, live: &Streams, stream: &str) {
    if !staged.contains_key(stream) {
        if let Some(events) = live.get(stream) {
            staged.insert(stream.to_string(), events.clone());
        }
    }
}

fn stage_collection(staged: &mut Collections, live: &Collections, collection: &str) {
    if !staged.contains_key(collection) {
        if let Some(docs) = live.get(collection) {
            staged.insert(collection.to_string(), docs.clone());
        }
    }
}

fn apply(op: WriteOp, streams: &mut Streams, collections: &mut Collections) -> Result<(), CommitError> {
    match op {
        WriteOp::AppendTo { stream, events, matcher, expected_version } => {
            append_staged(streams, &stream, events, matcher.as_ref(), expected_version)?;
        }
        WriteOp::DeleteEvents { stream, matcher } => {
            delete_staged(streams, &stream, &matcher)?;
        }
        WriteOp::AddDoc { collection, id, body, options } => {
            collection_mut(collections, &collection)?.add(&collection, &id, body, options)?;
        }
        WriteOp::UpdateDoc { collection, id, partial, options } => {
            collection_mut(collections, &collection)?.update(&collection, &id, partial, options)?;
        }
        WriteOp::UpsertDoc { collection, id, body, options } => {
            collection_mut(collections, &collection)?.upsert(&collection, &id, body, options)?;
        }
        WriteOp::ReplaceDoc { collection, id, body, options } => {
            collection_mut(collections, &collection)?.replace(&collection, &id, body, options)?;
        }
        WriteOp::SetDoc { collection, id, body, version } => {
            collection_mut(collections, &collection)?.set(&collection, &id, body, version)?;
        }
        WriteOp::DeleteDoc { collection, id } => {
            collection_mut(collections, &collection)?.delete(&id);
        }
    }
    Ok(())
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn commit(&self, batch: WriteBatch) -> Result<(), CommitError> {
        if batch.is_empty() {
            return Ok(());
        }
        let notifications: Vec<_> = batch
            .appended()
            .map(|(stream, events)| (stream.to_string(), events.to_vec()))
            .collect();

        {
            let mut streams = self.events.lock_write()?;
            let mut collections = self.documents.lock_write()?;

            let mut staged_streams = Streams::new();
            let mut staged_collections = Collections::new();
            for op in batch {
                match &op {
                    WriteOp::AppendTo { stream, .. } | WriteOp::DeleteEvents { stream, .. } => {
                        stage_stream(&mut staged_streams, &streams, stream);
                    }
                    WriteOp::AddDoc { collection, .. }
                    | WriteOp::UpdateDoc { collection, .. }
                    | WriteOp::UpsertDoc { collection, .. }
                    | WriteOp::ReplaceDoc { collection, .. }
                    | WriteOp::SetDoc { collection, .. }
                    | WriteOp::DeleteDoc { collection, .. } => {
                        stage_collection(&mut staged_collections, &collections, collection);
                    }
                }
                apply(op, &mut staged_streams, &mut staged_collections)?;
            }

            if !staged_streams.is_empty() {
                self.events.persist_staged(&streams, &staged_streams)?;
            }
            if !staged_collections.is_empty() {
                if let Err(err) = self.documents.persist_staged(&collections, &staged_collections) {
                    if !staged_streams.is_empty() {
                        // Put the event snapshot back in line with memory.
                        if let Err(restore) = self.events.persist(&streams) {
                            error!(error = %restore, "event snapshot left ahead of memory");
                        }
                    }
                    return Err(err.into());
                }
            }
            streams.extend(staged_streams);
            collections.extend(staged_collections);
        }

        for (stream, events) in &notifications {
            self.events.notify(stream, events);
        }
        Ok(())
    }
}
