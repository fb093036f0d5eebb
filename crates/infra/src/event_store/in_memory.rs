use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use async_trait::async_trait;
use futures::StreamExt;

use eventmill_core::ExpectedVersion;
use eventmill_events::{AppendListener, Event, ListenerId, ListenerRegistry, MetadataMatcher};

use super::r#trait::{aggregate_version_key, concurrency_error, validate_batch};
use super::{EventStore, EventStoreError, EventStream, LoadQuery};
use crate::persistence::SnapshotFile;

/// Stream name → events in append order.
pub(crate) type Streams = BTreeMap<String, Vec<Event>>;

fn stream_mut<'a>(streams: &'a mut Streams, stream: &str) -> Result<&'a mut Vec<Event>, EventStoreError> {
    streams
        .get_mut(stream)
        .ok_or_else(|| EventStoreError::UnknownStream(stream.to_string()))
}

/// Conditional append against an unlocked `Streams` map.
///
/// Returns the appended events so the caller can notify listeners once the
/// write is durable.
pub(crate) fn append_staged(
    streams: &mut Streams,
    stream: &str,
    events: Vec<Event>,
    matcher: Option<&MetadataMatcher>,
    expected_version: ExpectedVersion,
) -> Result<Vec<Event>, EventStoreError> {
    let existing = stream_mut(streams, stream)?;
    validate_batch(&events)?;

    let current = existing
        .iter()
        .filter(|e| matcher.is_none_or(|m| m.matches(e)))
        .count() as u64;
    if !expected_version.matches(current) {
        return Err(concurrency_error(stream, expected_version, current));
    }

    let ids: HashSet<_> = existing.iter().map(|e| e.uuid).collect();
    let versions: HashSet<_> = existing.iter().filter_map(aggregate_version_key).collect();
    for event in &events {
        if ids.contains(&event.uuid) {
            return Err(EventStoreError::DuplicateEvent(event.uuid));
        }
        if let Some(key) = aggregate_version_key(event).filter(|k| versions.contains(k)) {
            return Err(EventStoreError::Concurrency(format!(
                "stream '{stream}': aggregate {}/{} already has version {}",
                key.0, key.1, key.2
            )));
        }
    }

    existing.extend(events.iter().cloned());
    Ok(events)
}

pub(crate) fn delete_staged(
    streams: &mut Streams,
    stream: &str,
    matcher: &MetadataMatcher,
) -> Result<u64, EventStoreError> {
    let existing = stream_mut(streams, stream)?;
    let before = existing.len();
    existing.retain(|e| !matcher.matches(e));
    Ok((before - existing.len()) as u64)
}

/// The events a query selects, in delivery order.
pub(crate) fn select(streams: &Streams, stream: &str, query: &LoadQuery) -> Result<Vec<Event>, EventStoreError> {
    let events = streams
        .get(stream)
        .ok_or_else(|| EventStoreError::UnknownStream(stream.to_string()))?;

    let window: Box<dyn Iterator<Item = &Event> + '_> = match (query.from_event_id, query.reverse) {
        (None, false) => Box::new(events.iter()),
        (None, true) => Box::new(events.iter().rev()),
        (Some(from), reverse) => {
            let position = events.iter().position(|e| e.uuid == from).ok_or_else(|| {
                EventStoreError::EventNotFound { stream: stream.to_string(), event_id: from }
            })?;
            if reverse {
                Box::new(events[..position].iter().rev())
            } else {
                Box::new(events[position + 1..].iter())
            }
        }
    };

    let limit = query.limit.map_or(usize::MAX, |l| l as usize);
    Ok(window
        .filter(|e| query.matcher.as_ref().is_none_or(|m| m.matches(e)))
        .take(limit)
        .cloned()
        .collect())
}

#[derive(Debug, Default)]
struct Inner {
    streams: RwLock<Streams>,
    listeners: ListenerRegistry,
    snapshot: Option<SnapshotFile>,
}

/// In-memory append-only event store.
///
/// Intended for tests/dev. Optionally persisted to a JSON snapshot file that
/// is rewritten after every successful mutation. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    inner: Arc<Inner>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load (or start) a store persisted at `path`.
    pub fn with_snapshot(path: impl Into<PathBuf>) -> Result<Self, EventStoreError> {
        let snapshot = SnapshotFile::new(path);
        let streams: Streams = snapshot.load()?;
        Ok(Self {
            inner: Arc::new(Inner {
                streams: RwLock::new(streams),
                listeners: ListenerRegistry::new(),
                snapshot: Some(snapshot),
            }),
        })
    }

    pub(crate) fn lock_write(&self) -> Result<RwLockWriteGuard<'_, Streams>, EventStoreError> {
        self.inner.streams.write().map_err(|_| EventStoreError::Poisoned)
    }

    pub(crate) fn persist(&self, streams: &Streams) -> Result<(), EventStoreError> {
        if let Some(snapshot) = &self.inner.snapshot {
            snapshot.save(streams)?;
        }
        Ok(())
    }

    /// Save `live` with `staged` streams replacing their live counterparts,
    /// leaving `live` untouched.
    pub(crate) fn persist_staged(&self, live: &Streams, staged: &Streams) -> Result<(), EventStoreError> {
        if let Some(snapshot) = &self.inner.snapshot {
            let mut next = live.clone();
            next.extend(staged.iter().map(|(name, events)| (name.clone(), events.clone())));
            snapshot.save(&next)?;
        }
        Ok(())
    }

    pub(crate) fn notify(&self, stream: &str, events: &[Event]) {
        self.inner.listeners.notify(stream, events);
    }

    /// Apply `f`; with a snapshot file the change becomes visible only once
    /// the file is saved.
    fn write<R>(&self, f: impl FnOnce(&mut Streams) -> Result<R, EventStoreError>) -> Result<R, EventStoreError> {
        let mut streams = self.lock_write()?;
        let Some(snapshot) = &self.inner.snapshot else {
            return f(&mut streams);
        };
        let mut next = streams.clone();
        let out = f(&mut next)?;
        snapshot.save(&next)?;
        *streams = next;
        Ok(out)
    }

    fn read<R>(&self, f: impl FnOnce(&Streams) -> Result<R, EventStoreError>) -> Result<R, EventStoreError> {
        let streams = self.inner.streams.read().map_err(|_| EventStoreError::Poisoned)?;
        f(&streams)
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn create_stream(&self, stream: &str) -> Result<(), EventStoreError> {
        self.write(|streams| {
            streams.entry(stream.to_string()).or_default();
            Ok(())
        })
    }

    async fn delete_stream(&self, stream: &str) -> Result<(), EventStoreError> {
        self.write(|streams| {
            streams.remove(stream);
            Ok(())
        })
    }

    async fn has_stream(&self, stream: &str) -> Result<bool, EventStoreError> {
        self.read(|streams| Ok(streams.contains_key(stream)))
    }

    async fn append_to(
        &self,
        stream: &str,
        events: Vec<Event>,
        matcher: Option<&MetadataMatcher>,
        expected_version: ExpectedVersion,
    ) -> Result<(), EventStoreError> {
        let appended = self.write(|streams| append_staged(streams, stream, events, matcher, expected_version))?;
        self.notify(stream, &appended);
        Ok(())
    }

    fn load(&self, stream: &str, query: LoadQuery) -> EventStream {
        match self.read(|streams| select(streams, stream, &query)) {
            Ok(events) => futures::stream::iter(events.into_iter().map(Ok)).boxed(),
            Err(e) => futures::stream::once(async move { Err(e) }).boxed(),
        }
    }

    async fn delete(&self, stream: &str, matcher: &MetadataMatcher) -> Result<u64, EventStoreError> {
        self.write(|streams| delete_staged(streams, stream, matcher))
    }

    async fn republish(&self, stream: &str, query: LoadQuery) -> Result<u64, EventStoreError> {
        let events = self.read(|streams| select(streams, stream, &query))?;
        self.notify(stream, &events);
        Ok(events.len() as u64)
    }

    fn attach_append_listener(&self, listener: AppendListener) -> ListenerId {
        self.inner.listeners.attach(listener)
    }

    fn detach_append_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.detach(id)
    }
}
