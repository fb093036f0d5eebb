use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{Span, instrument};

use crate::document_store::postgres as pg_docs;
use crate::event_store::postgres as pg_events;
use crate::event_store::PostgresEventStore;

use super::{CommitError, UnitOfWork, WriteBatch, WriteOp};

/// Commits a batch in one Postgres transaction.
///
/// Append listeners of the wrapped event store are notified after `COMMIT`.
#[derive(Debug, Clone)]
pub struct PostgresUnitOfWork {
    pool: Arc<PgPool>,
    events: PostgresEventStore,
}

impl PostgresUnitOfWork {
    /// `events` must use the same database as `pool`.
    pub fn new(pool: PgPool, events: PostgresEventStore) -> Self {
        Self { pool: Arc::new(pool), events }
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    #[instrument(skip(self, batch), fields(ops = batch.len(), appended), err)]
    async fn commit(&self, batch: WriteBatch) -> Result<(), CommitError> {
        if batch.is_empty() {
            return Ok(());
        }
        let notifications: Vec<_> = batch
            .appended()
            .map(|(stream, events)| (stream.to_string(), events.to_vec()))
            .collect();

        let mut tx = self.pool.begin().await?;
        for op in batch {
            match op {
                WriteOp::AppendTo { stream, events, matcher, expected_version } => {
                    pg_events::append_to(&mut tx, &stream, &events, matcher.as_ref(), expected_version).await?;
                }
                WriteOp::DeleteEvents { stream, matcher } => {
                    pg_events::delete(&mut tx, &stream, &matcher).await?;
                }
                WriteOp::AddDoc { collection, id, body, options } => {
                    pg_docs::add_doc(&mut tx, &collection, &id, body, options).await?;
                }
                WriteOp::UpdateDoc { collection, id, partial, options } => {
                    pg_docs::update_doc(&mut tx, &collection, &id, partial, options).await?;
                }
                WriteOp::UpsertDoc { collection, id, body, options } => {
                    pg_docs::upsert_doc(&mut tx, &collection, &id, body, options).await?;
                }
                WriteOp::ReplaceDoc { collection, id, body, options } => {
                    pg_docs::replace_doc(&mut tx, &collection, &id, body, options).await?;
                }
                WriteOp::SetDoc { collection, id, body, version } => {
                    pg_docs::set_doc(&mut tx, &collection, &id, body, version).await?;
                }
                WriteOp::DeleteDoc { collection, id } => {
                    pg_docs::delete_doc(&mut tx, &collection, &id).await?;
                }
            }
        }
        tx.commit().await?;

        Span::current().record("appended", notifications.iter().map(|(_, e)| e.len()).sum::<usize>());
        for (stream, events) in &notifications {
            self.events.notify(stream, events);
        }
        Ok(())
    }
}
