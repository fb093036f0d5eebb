use std::collections::HashSet;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use eventmill_core::{Classify, ErrorKind, EventId, ExpectedVersion};
use eventmill_events::{AppendListener, Event, ListenerId, MetadataMatcher};

/// Event store operation error.
///
/// These are **infrastructure errors** (storage, concurrency, stream state) as
/// opposed to domain errors raised by apply functions or commands.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The matched partition was not at the expected version, or another
    /// writer appended the same aggregate version first.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("stream not found: {0}")]
    UnknownStream(String),

    #[error("event {event_id} not found in stream {stream}")]
    EventNotFound { stream: String, event_id: EventId },

    #[error("event {0} already exists")]
    DuplicateEvent(EventId),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("event store lock poisoned")]
    Poisoned,

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl Classify for EventStoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            EventStoreError::Concurrency(_) | EventStoreError::DuplicateEvent(_) => ErrorKind::Conflict,
            EventStoreError::UnknownStream(_) | EventStoreError::EventNotFound { .. } => ErrorKind::NotFound,
            EventStoreError::InvalidAppend(_) => ErrorKind::Validation,
            EventStoreError::Poisoned
            | EventStoreError::Database(_)
            | EventStoreError::Io(_)
            | EventStoreError::Serialization(_) => ErrorKind::Backend,
        }
    }
}

/// What to read from a stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadQuery {
    pub matcher: Option<MetadataMatcher>,
    /// Exclusive starting point. With `reverse` the events *before* it are
    /// returned, newest first.
    pub from_event_id: Option<EventId>,
    pub limit: Option<u64>,
    pub reverse: bool,
}

impl LoadQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn matching(mut self, matcher: MetadataMatcher) -> Self {
        self.matcher = Some(matcher);
        self
    }

    pub fn after(mut self, event_id: EventId) -> Self {
        self.from_event_id = Some(event_id);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }
}

pub type EventStream = BoxStream<'static, Result<Event, EventStoreError>>;

/// Append-only store of named event streams.
///
/// ## Streams
///
/// Streams must be created before use; appending to or loading from a stream
/// that does not exist fails with [`EventStoreError::UnknownStream`]. Within a
/// stream events are totally ordered by append; there is no order across
/// streams.
///
/// ## Conditional appends
///
/// `append_to` with a matcher and `ExpectedVersion::Exact(n)` succeeds only if
/// exactly `n` events of the stream match the matcher at commit time. The
/// whole batch is appended or none of it is. Independently of the expected
/// version, two events of one stream may never carry the same
/// `(aggregateType, aggregateId, aggregateVersion)`; the second writer gets
/// [`EventStoreError::Concurrency`].
///
/// ## Listeners
///
/// Append listeners are called synchronously after a successful commit with
/// the stream name and the appended batch. `republish` pushes stored events
/// through the same path.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Create an empty stream (no-op when it exists).
    async fn create_stream(&self, stream: &str) -> Result<(), EventStoreError>;

    /// Delete a stream and all its events (no-op when absent).
    async fn delete_stream(&self, stream: &str) -> Result<(), EventStoreError>;

    async fn has_stream(&self, stream: &str) -> Result<bool, EventStoreError>;

    async fn append_to(
        &self,
        stream: &str,
        events: Vec<Event>,
        matcher: Option<&MetadataMatcher>,
        expected_version: ExpectedVersion,
    ) -> Result<(), EventStoreError>;

    /// Lazy, ordered, finite sequence of events.
    fn load(&self, stream: &str, query: LoadQuery) -> EventStream;

    /// Remove every matching event. Returns the number removed.
    async fn delete(&self, stream: &str, matcher: &MetadataMatcher) -> Result<u64, EventStoreError>;

    /// Re-emit stored events to the append listeners. Returns the number emitted.
    async fn republish(&self, stream: &str, query: LoadQuery) -> Result<u64, EventStoreError>;

    fn attach_append_listener(&self, listener: AppendListener) -> ListenerId;

    fn detach_append_listener(&self, id: ListenerId) -> bool;
}

/// Batch-local checks shared by both backends: unique event ids and unique
/// aggregate versions within the batch.
pub(crate) fn validate_batch(events: &[Event]) -> Result<(), EventStoreError> {
    let mut ids = HashSet::with_capacity(events.len());
    let mut versions = HashSet::new();
    for event in events {
        if !ids.insert(event.uuid) {
            return Err(EventStoreError::DuplicateEvent(event.uuid));
        }
        if let Some(key) = aggregate_version_key(event) {
            if !versions.insert(key) {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch carries aggregate version {} of {}/{} twice",
                    event.aggregate_version().unwrap_or_default(),
                    event.aggregate_type().unwrap_or_default(),
                    event.aggregate_id().unwrap_or_default(),
                )));
            }
        }
    }
    Ok(())
}

/// `(aggregateType, aggregateId, aggregateVersion)` in text form, when the
/// event carries a version.
pub(crate) fn aggregate_version_key(event: &Event) -> Option<(String, String, String)> {
    let text = |key: &str| event.meta.get(key).map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string));
    let version = text(eventmill_events::meta::AGGREGATE_VERSION)?;
    Some((
        text(eventmill_events::meta::AGGREGATE_TYPE).unwrap_or_default(),
        text(eventmill_events::meta::AGGREGATE_ID).unwrap_or_default(),
        version,
    ))
}

pub(crate) fn concurrency_error(stream: &str, expected: ExpectedVersion, actual: u64) -> EventStoreError {
    EventStoreError::Concurrency(format!(
        "stream '{stream}': expected version {expected}, found {actual}"
    ))
}
