//! Postgres-backed event store implementation.
//!
//! All streams share one `events` table; `no` (BIGSERIAL) gives the total
//! append order, so a stream's order is `ORDER BY no`.
//!
//! ```sql
//! event_streams(name TEXT PRIMARY KEY, created_at TIMESTAMPTZ)
//! events(no BIGSERIAL PRIMARY KEY, stream_name TEXT REFERENCES event_streams ON DELETE CASCADE,
//!        uuid UUID, name TEXT, payload JSONB, meta JSONB, created_at TIMESTAMPTZ,
//!        UNIQUE (stream_name, uuid))
//! ```
//!
//! A partial unique index over `(stream_name, aggregateType, aggregateId,
//! aggregateVersion)` makes two writers of the same aggregate version collide
//! even when neither asked for a version check.
//!
//! ## Error Mapping
//!
//! | Postgres error | `EventStoreError` | Scenario |
//! |---|---|---|
//! | `23505` on `events_stream_name_uuid_key` | `DuplicateEvent` | event id reused |
//! | `23505` on `events_aggregate_version_idx` | `Concurrency` | concurrent save of one aggregate |
//! | `23503` | `UnknownStream` | stream dropped while appending |
//! | anything else | `Database` (original error) | |
//!
//! ## Thread Safety
//!
//! `PostgresEventStore` is `Send + Sync` and can be shared across tasks. The
//! append listeners are process-local: they fire for appends made through
//! this instance only.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use serde_json::Value as JsonValue;
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, PgPool, Row};
use tracing::{Span, instrument};
use uuid::Uuid;

use eventmill_core::{EventId, ExpectedVersion};
use eventmill_events::{AppendListener, Event, ListenerId, ListenerRegistry, Metadata, MetadataMatcher};

use super::r#trait::{concurrency_error, validate_batch};
use super::sql::push_matcher;
use super::{EventStore, EventStoreError, EventStream, LoadQuery};
use crate::document_store::sql::Sql;

const PAGE_SIZE: u64 = 256;

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS event_streams (
        name       TEXT PRIMARY KEY,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS events (
        no          BIGSERIAL PRIMARY KEY,
        stream_name TEXT NOT NULL REFERENCES event_streams (name) ON DELETE CASCADE,
        uuid        UUID NOT NULL,
        name        TEXT NOT NULL,
        payload     JSONB NOT NULL,
        meta        JSONB NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL,
        CONSTRAINT events_stream_name_uuid_key UNIQUE (stream_name, uuid)
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS events_aggregate_version_idx
        ON events (stream_name, (meta ->> 'aggregateType'), (meta ->> 'aggregateId'), (meta ->> 'aggregateVersion'))
        WHERE meta ? 'aggregateVersion'
    "#,
];

/// Postgres-backed append-only event store.
///
/// ## Optimistic Concurrency
///
/// `append_to` with an exact expected version runs in a transaction that:
/// 1. Takes `pg_advisory_xact_lock` on the `(stream, matcher)` partition
/// 2. Counts the events of the partition
/// 3. Validates the count against `expected_version`
/// 4. Inserts the batch
///
/// Writers of the same partition are serialised by the lock; the unique
/// aggregate-version index catches everything else.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
    listeners: Arc<ListenerRegistry>,
}

impl PostgresEventStore {
    /// Create a new PostgresEventStore with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            listeners: Arc::new(ListenerRegistry::new()),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the tables and indexes (idempotent).
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&*self.pool).await?;
        }
        Ok(())
    }

    pub(crate) fn notify(&self, stream: &str, events: &[Event]) {
        self.listeners.notify(stream, events);
    }
}

#[derive(Debug)]
struct EventRow {
    no: i64,
    uuid: Uuid,
    name: String,
    payload: JsonValue,
    meta: Json<Metadata>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for EventRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(EventRow {
            no: row.try_get("no")?,
            uuid: row.try_get("uuid")?,
            name: row.try_get("name")?,
            payload: row.try_get("payload")?,
            meta: row.try_get("meta")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Event {
            uuid: EventId::from_uuid(row.uuid),
            name: row.name,
            payload: row.payload,
            meta: row.meta.0,
            created_at: row.created_at,
        }
    }
}

fn map_sqlx_error(stream: &str, event_id: Option<EventId>, err: sqlx::Error) -> EventStoreError {
    if let sqlx::Error::Database(db_err) = &err {
        match (db_err.code().as_deref(), db_err.constraint()) {
            (Some("23505"), Some("events_stream_name_uuid_key")) => {
                if let Some(id) = event_id {
                    return EventStoreError::DuplicateEvent(id);
                }
            }
            (Some("23505"), Some("events_aggregate_version_idx")) => {
                return EventStoreError::Concurrency(format!(
                    "stream '{stream}': concurrent append of an existing aggregate version"
                ));
            }
            (Some("23503"), _) => return EventStoreError::UnknownStream(stream.to_string()),
            _ => {}
        }
    }
    EventStoreError::Database(err)
}

async fn stream_exists(conn: &mut PgConnection, stream: &str) -> Result<bool, EventStoreError> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM event_streams WHERE name = $1)")
        .bind(stream)
        .fetch_one(&mut *conn)
        .await?;
    Ok(exists)
}

async fn require_stream(conn: &mut PgConnection, stream: &str) -> Result<(), EventStoreError> {
    if stream_exists(conn, stream).await? {
        Ok(())
    } else {
        Err(EventStoreError::UnknownStream(stream.to_string()))
    }
}

/// Conditional append on a connection that is already inside a transaction.
#[instrument(
    skip(conn, events, matcher),
    fields(stream = %stream, event_count = events.len(), expected_version = %expected_version),
    err
)]
pub(crate) async fn append_to(
    conn: &mut PgConnection,
    stream: &str,
    events: &[Event],
    matcher: Option<&MetadataMatcher>,
    expected_version: ExpectedVersion,
) -> Result<(), EventStoreError> {
    require_stream(conn, stream).await?;
    validate_batch(events)?;

    if let ExpectedVersion::Exact(expected) = expected_version {
        let partition = format!("{stream}:{}", serde_json::to_string(&matcher)?);
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(partition)
            .execute(&mut *conn)
            .await?;

        let mut qb = Sql::new("SELECT COUNT(*) FROM events WHERE stream_name = ");
        qb.push_bind(stream.to_string());
        qb.push(" AND ");
        push_matcher(&mut qb, matcher);
        let current: i64 = qb.build_query_scalar().fetch_one(&mut *conn).await?;
        if current as u64 != expected {
            return Err(concurrency_error(stream, expected_version, current as u64));
        }
    }

    for event in events {
        sqlx::query(
            r#"
            INSERT INTO events (stream_name, uuid, name, payload, meta, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(stream)
        .bind(event.uuid.as_uuid())
        .bind(&event.name)
        .bind(&event.payload)
        .bind(Json(&event.meta))
        .bind(event.created_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error(stream, Some(event.uuid), e))?;
    }
    Ok(())
}

#[instrument(skip(conn, matcher), fields(stream = %stream, deleted), err)]
pub(crate) async fn delete(
    conn: &mut PgConnection,
    stream: &str,
    matcher: &MetadataMatcher,
) -> Result<u64, EventStoreError> {
    require_stream(conn, stream).await?;
    let mut qb = Sql::new("DELETE FROM events WHERE stream_name = ");
    qb.push_bind(stream.to_string());
    qb.push(" AND ");
    push_matcher(&mut qb, Some(matcher));

    let deleted = qb.build().execute(&mut *conn).await?.rows_affected();
    Span::current().record("deleted", deleted);
    Ok(deleted)
}

#[derive(Debug, Clone, Copy)]
enum Cursor {
    Start,
    After(i64),
    Done,
}

/// Keyset-paged reader; `no` bounds the next page.
#[derive(Debug, Clone)]
struct Pager {
    pool: Arc<PgPool>,
    stream: String,
    query: LoadQuery,
}

impl Pager {
    async fn first_cursor(&self) -> Result<Option<i64>, EventStoreError> {
        let mut conn = self.pool.acquire().await?;
        require_stream(&mut conn, &self.stream).await?;
        let Some(from) = self.query.from_event_id else {
            return Ok(None);
        };
        let no: Option<i64> = sqlx::query_scalar("SELECT no FROM events WHERE stream_name = $1 AND uuid = $2")
            .bind(&self.stream)
            .bind(from.as_uuid())
            .fetch_optional(&mut *conn)
            .await?;
        no.map(Some).ok_or_else(|| EventStoreError::EventNotFound {
            stream: self.stream.clone(),
            event_id: from,
        })
    }

    async fn page(&self, bound: Option<i64>, take: u64) -> Result<Vec<EventRow>, EventStoreError> {
        let (comparison, order) = if self.query.reverse { ("<", "DESC") } else { (">", "ASC") };
        let mut qb = Sql::new(
            "SELECT no, uuid, name, payload, meta, created_at FROM events WHERE stream_name = ",
        );
        qb.push_bind(self.stream.clone());
        if let Some(bound) = bound {
            qb.push(format!(" AND no {comparison} "));
            qb.push_bind(bound);
        }
        qb.push(" AND ");
        push_matcher(&mut qb, self.query.matcher.as_ref());
        qb.push(format!(" ORDER BY no {order} LIMIT "));
        qb.push_bind(take as i64);

        let rows = qb.build().fetch_all(&*self.pool).await?;
        rows.iter()
            .map(|row| EventRow::from_row(row).map_err(EventStoreError::Database))
            .collect()
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[instrument(skip(self), err)]
    async fn create_stream(&self, stream: &str) -> Result<(), EventStoreError> {
        sqlx::query("INSERT INTO event_streams (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(stream)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn delete_stream(&self, stream: &str) -> Result<(), EventStoreError> {
        sqlx::query("DELETE FROM event_streams WHERE name = $1")
            .bind(stream)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    async fn has_stream(&self, stream: &str) -> Result<bool, EventStoreError> {
        let mut conn = self.pool.acquire().await?;
        stream_exists(&mut conn, stream).await
    }

    async fn append_to(
        &self,
        stream: &str,
        events: Vec<Event>,
        matcher: Option<&MetadataMatcher>,
        expected_version: ExpectedVersion,
    ) -> Result<(), EventStoreError> {
        let mut tx = self.pool.begin().await?;
        append_to(&mut tx, stream, &events, matcher, expected_version).await?;
        tx.commit().await?;

        self.notify(stream, &events);
        Ok(())
    }

    fn load(&self, stream: &str, query: LoadQuery) -> EventStream {
        let pager = Arc::new(Pager {
            pool: Arc::clone(&self.pool),
            stream: stream.to_string(),
            query,
        });
        let remaining = pager.query.limit;

        futures::stream::try_unfold((Cursor::Start, remaining), move |(cursor, remaining)| {
            let pager = Arc::clone(&pager);
            async move {
                let bound = match cursor {
                    Cursor::Done => return Ok(None),
                    Cursor::Start => pager.first_cursor().await?,
                    Cursor::After(no) => Some(no),
                };
                if remaining == Some(0) {
                    return Ok(None);
                }
                let take = remaining.map_or(PAGE_SIZE, |r| r.min(PAGE_SIZE));
                let rows = pager.page(bound, take).await?;
                let fetched = rows.len() as u64;
                let next = match rows.last() {
                    Some(last) if fetched == take => Cursor::After(last.no),
                    _ => Cursor::Done,
                };
                let events: Vec<Event> = rows.into_iter().map(Event::from).collect();
                Ok::<_, EventStoreError>(Some((events, (next, remaining.map(|r| r - fetched)))))
            }
        })
        .map_ok(|events| futures::stream::iter(events.into_iter().map(Ok::<_, EventStoreError>)))
        .try_flatten()
        .boxed()
    }

    async fn delete(&self, stream: &str, matcher: &MetadataMatcher) -> Result<u64, EventStoreError> {
        let mut conn = self.pool.acquire().await?;
        delete(&mut conn, stream, matcher).await
    }

    #[instrument(skip(self, query), fields(stream = %stream, republished), err)]
    async fn republish(&self, stream: &str, query: LoadQuery) -> Result<u64, EventStoreError> {
        let events: Vec<Event> = self.load(stream, query).try_collect().await?;
        self.notify(stream, &events);
        Span::current().record("republished", events.len());
        Ok(events.len() as u64)
    }

    fn attach_append_listener(&self, listener: AppendListener) -> ListenerId {
        self.listeners.attach(listener)
    }

    fn detach_append_listener(&self, id: ListenerId) -> bool {
        self.listeners.detach(id)
    }
}
