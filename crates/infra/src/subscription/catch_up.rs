use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::TryStreamExt;
use tracing::{debug, info, warn};

use eventmill_core::EventId;
use eventmill_events::{Event, MetadataMatcher, StreamPosition};

use crate::event_queue::{EventConsumer, EventQueue, QueueOptions};
use crate::event_store::{EventStore, LoadQuery};

use super::{PositionInitializer, ProcessedListener, ResumeFromLastProcessed, SubscriptionError};

type SharedPosition = Arc<Mutex<Option<StreamPosition>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct StreamSubscription {
    stream: String,
    initializer: Arc<dyn PositionInitializer>,
    queue: EventQueue,
    position: SharedPosition,
}

/// Consumes an event, then records it as processed.
#[derive(Clone)]
struct Handler {
    subscription: String,
    stream: String,
    consumer: Arc<dyn EventConsumer>,
    processed: Option<Arc<dyn ProcessedListener>>,
    position: SharedPosition,
}

impl Handler {
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        self.consumer.consume(&self.stream, event).await?;

        lock(&self.position)
            .get_or_insert_with(StreamPosition::beginning)
            .advance(event.uuid);

        if let Some(listener) = &self.processed {
            // The event is consumed; a listener failure must not redeliver it.
            if let Err(err) = listener.processed(&self.subscription, &self.stream, event).await {
                warn!(
                    subscription = %self.subscription,
                    stream = %self.stream,
                    event_id = %event.uuid,
                    error = %err,
                    "processed listener failed"
                );
            }
        }
        Ok(())
    }
}

/// Queue consumer of the live phase: skips events outside the partition.
///
/// An event is committed before its append notification reaches the queue,
/// so replay may consume an event whose notification is still in flight.
/// `replayed` holds the ids consumed by the replay of this start; each of them
/// is dropped once when it shows up on the queue.
struct LiveConsumer {
    handler: Handler,
    matcher: Option<MetadataMatcher>,
    replayed: Mutex<HashSet<EventId>>,
}

#[async_trait]
impl EventConsumer for LiveConsumer {
    async fn consume(&self, _stream: &str, event: &Event) -> anyhow::Result<()> {
        if self.matcher.as_ref().is_some_and(|m| !m.matches(event)) {
            return Ok(());
        }
        let already_replayed = lock(&self.replayed).remove(&event.uuid);
        if already_replayed {
            debug!(stream = %self.handler.stream, event_id = %event.uuid, "late notification of a replayed event");
            return Ok(());
        }
        self.handler.handle(event).await
    }
}

/// Replays each subscribed stream, then follows it live.
///
/// Queues are created (and start buffering) when the subscription is built,
/// so nothing appended between `build` and `start_processing` is lost.
pub struct CatchUpSubscription {
    name: String,
    store: Arc<dyn EventStore>,
    consumer: Arc<dyn EventConsumer>,
    processed: Option<Arc<dyn ProcessedListener>>,
    streams: Vec<StreamSubscription>,
    running: tokio::sync::Mutex<bool>,
    paused: AtomicBool,
}

impl std::fmt::Debug for CatchUpSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatchUpSubscription")
            .field("name", &self.name)
            .field("streams", &self.streams.iter().map(|s| s.stream.as_str()).collect::<Vec<_>>())
            .field("paused", &self.paused.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

pub struct CatchUpSubscriptionBuilder {
    name: String,
    store: Arc<dyn EventStore>,
    consumer: Arc<dyn EventConsumer>,
    processed: Option<Arc<dyn ProcessedListener>>,
    options: QueueOptions,
    streams: Vec<(String, Arc<dyn PositionInitializer>)>,
}

impl CatchUpSubscriptionBuilder {
    /// Subscribe to `stream`, resuming after the last processed event.
    pub fn stream(self, stream: impl Into<String>) -> Self {
        self.stream_with(stream, Arc::new(ResumeFromLastProcessed::new()))
    }

    pub fn stream_with(mut self, stream: impl Into<String>, initializer: Arc<dyn PositionInitializer>) -> Self {
        self.streams.push((stream.into(), initializer));
        self
    }

    pub fn processed_listener(mut self, listener: Arc<dyn ProcessedListener>) -> Self {
        self.processed = Some(listener);
        self
    }

    pub fn queue_options(mut self, options: QueueOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> CatchUpSubscription {
        let streams = self
            .streams
            .into_iter()
            .map(|(stream, initializer)| StreamSubscription {
                queue: EventQueue::new(Arc::clone(&self.store), stream.clone(), self.options),
                stream,
                initializer,
                position: Arc::new(Mutex::new(None)),
            })
            .collect();

        CatchUpSubscription {
            name: self.name,
            store: self.store,
            consumer: self.consumer,
            processed: self.processed,
            streams,
            running: tokio::sync::Mutex::new(false),
            paused: AtomicBool::new(false),
        }
    }
}

impl CatchUpSubscription {
    pub fn builder(
        name: impl Into<String>,
        store: Arc<dyn EventStore>,
        consumer: Arc<dyn EventConsumer>,
    ) -> CatchUpSubscriptionBuilder {
        CatchUpSubscriptionBuilder {
            name: name.into(),
            store,
            consumer,
            processed: None,
            options: QueueOptions::default(),
            streams: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn is_running(&self) -> bool {
        *self.running.lock().await
    }

    /// Last position reached on `stream`, `None` before the first start.
    pub fn position(&self, stream: &str) -> Option<StreamPosition> {
        self.find(stream).and_then(|s| lock(&s.position).clone())
    }

    /// Events of `stream` the live phase gave up on.
    pub fn dead_letters(&self, stream: &str) -> Vec<Event> {
        self.find(stream).map(|s| s.queue.dead_letters()).unwrap_or_default()
    }

    fn find(&self, stream: &str) -> Option<&StreamSubscription> {
        self.streams.iter().find(|s| s.stream == stream)
    }

    fn handler(&self, sub: &StreamSubscription) -> Handler {
        Handler {
            subscription: self.name.clone(),
            stream: sub.stream.clone(),
            consumer: Arc::clone(&self.consumer),
            processed: self.processed.clone(),
            position: Arc::clone(&sub.position),
        }
    }

    /// Replay every stream in order, then attach the live consumers.
    ///
    /// A consumer failure during replay aborts the start: queues attached for
    /// earlier streams are detached again and the error is returned.
    pub async fn start_processing(&self) -> Result<(), SubscriptionError> {
        let mut running = self.running.lock().await;
        if *running {
            return Err(SubscriptionError::AlreadyRunning(self.name.clone()));
        }
        self.paused.store(false, Ordering::Release);

        for (i, sub) in self.streams.iter().enumerate() {
            if let Err(err) = self.catch_up(sub).await {
                for attached in &self.streams[..i] {
                    attached.queue.detach().await;
                }
                return Err(err);
            }
        }

        *running = !self.paused.load(Ordering::Acquire);
        info!(subscription = %self.name, streams = self.streams.len(), running = *running, "subscription started");
        Ok(())
    }

    async fn catch_up(&self, sub: &StreamSubscription) -> Result<(), SubscriptionError> {
        let recorded = lock(&sub.position).clone();
        let position = sub
            .initializer
            .initial_position(&self.name, &sub.stream, recorded.as_ref())
            .await
            .map_err(|source| SubscriptionError::Initializer { stream: sub.stream.clone(), source })?;

        let mut query = LoadQuery::all();
        if let Some(matcher) = position.matcher() {
            query = query.matching(matcher.clone());
        }
        if let Some(last) = position.last_processed() {
            query = query.after(last);
            sub.queue.discard_through(last);
        }
        let matcher = position.matcher().cloned();
        *lock(&sub.position) = Some(position);

        let handler = self.handler(sub);
        let mut replayed = HashSet::new();
        let mut events = self.store.load(&sub.stream, query);
        while let Some(event) = events.try_next().await? {
            if self.paused.load(Ordering::Acquire) {
                break;
            }
            if sub.queue.is_buffered(event.uuid) {
                debug!(subscription = %self.name, stream = %sub.stream, event_id = %event.uuid, "replay reached the queue");
                break;
            }
            handler.handle(&event).await.map_err(|source| SubscriptionError::ConsumerFailed {
                stream: sub.stream.clone(),
                event_id: event.uuid,
                source,
            })?;
            replayed.insert(event.uuid);
        }
        drop(events);

        if self.paused.load(Ordering::Acquire) {
            return Ok(());
        }
        // Events replayed while their append notification was still in flight.
        if let Some(last) = lock(&sub.position).as_ref().and_then(|p| p.last_processed()) {
            sub.queue.discard_through(last);
        }
        let count = replayed.len();
        let live = LiveConsumer { handler, matcher, replayed: Mutex::new(replayed) };
        sub.queue.attach(Arc::new(live)).await?;
        debug!(subscription = %self.name, stream = %sub.stream, replayed = count, "stream caught up");
        Ok(())
    }

    /// Stop replay and live delivery; awaits in-flight deliveries.
    pub async fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        let mut running = self.running.lock().await;
        for sub in &self.streams {
            sub.queue.detach().await;
        }
        *running = false;
        info!(subscription = %self.name, "subscription paused");
    }
}
