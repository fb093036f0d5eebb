//! Per-stream event queue fed by an append listener.
//!
//! - Without a consumer, appended events accumulate in a waiting buffer
//!   ([`EventQueue::peek`] shows the oldest).
//! - [`EventQueue::attach`] starts a delivery task that hands events to the
//!   consumer one at a time, waiting buffer first, through a bounded channel.
//! - A failed delivery is re-queued at the back; after
//!   `max_delivery_attempts` failures the event becomes a dead letter.
//! - [`EventQueue::detach`] stops intake into the channel, waits for the
//!   in-flight delivery and moves undelivered events back to the front of the
//!   waiting buffer, in order.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use eventmill_core::{Classify, ErrorKind, EventId};
use eventmill_events::{Event, ListenerId};

use crate::config::{DEFAULT_MAX_DELIVERY_ATTEMPTS, DEFAULT_QUEUE_CAPACITY, EngineConfig};
use crate::event_store::EventStore;

/// Receives queued events.
///
/// Must be idempotent: an event whose delivery failed is delivered again.
#[async_trait]
pub trait EventConsumer: Send + Sync {
    async fn consume(&self, stream: &str, event: &Event) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Bound of the delivery channel.
    pub capacity: usize,
    pub max_delivery_attempts: u32,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            max_delivery_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
        }
    }
}

impl From<&EngineConfig> for QueueOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            capacity: config.queue_capacity,
            max_delivery_attempts: config.max_delivery_attempts,
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("a consumer is already attached to the queue of stream {0}")]
    AlreadyAttached(String),
}

impl Classify for QueueError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Conflict
    }
}

#[derive(Debug)]
struct Pending {
    event: Event,
    attempts: u32,
}

#[derive(Debug, Default)]
struct Shared {
    waiting: VecDeque<Pending>,
    /// Ids of the events in `waiting`.
    buffered: HashSet<EventId>,
    sender: Option<mpsc::Sender<Pending>>,
    dead_letters: Vec<Event>,
}

impl Shared {
    fn push_back(&mut self, pending: Pending) {
        self.buffered.insert(pending.event.uuid);
        self.waiting.push_back(pending);
    }

    fn push_front(&mut self, pending: Pending) {
        self.buffered.insert(pending.event.uuid);
        self.waiting.push_front(pending);
    }

    fn pop_front(&mut self) -> Option<Pending> {
        let pending = self.waiting.pop_front()?;
        self.buffered.remove(&pending.event.uuid);
        Some(pending)
    }

    /// Straight into the channel when nothing older is waiting and there is room.
    fn enqueue(&mut self, pending: Pending) {
        let pending = match &self.sender {
            Some(sender) if self.waiting.is_empty() => match sender.try_send(pending) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(p) | mpsc::error::TrySendError::Closed(p)) => p,
            },
            _ => pending,
        };
        self.push_back(pending);
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    // The state stays consistent across a panicking consumer: it is never
    // mutated while a consumer runs.
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug)]
struct DeliveryWorker {
    stop: Arc<AtomicBool>,
    join: JoinHandle<mpsc::Receiver<Pending>>,
}

/// Buffered, ordered, at-least-once delivery of one stream's appended events.
pub struct EventQueue {
    stream: String,
    store: Arc<dyn EventStore>,
    listener: ListenerId,
    options: QueueOptions,
    shared: Arc<Mutex<Shared>>,
    worker: tokio::sync::Mutex<Option<DeliveryWorker>>,
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("stream", &self.stream)
            .field("options", &self.options)
            .field("waiting", &self.len())
            .finish_non_exhaustive()
    }
}

impl EventQueue {
    /// Start buffering every event appended to `stream` from now on.
    pub fn new(store: Arc<dyn EventStore>, stream: impl Into<String>, options: QueueOptions) -> Self {
        let stream = stream.into();
        let shared = Arc::new(Mutex::new(Shared::default()));

        let sink = Arc::clone(&shared);
        let watched = stream.clone();
        let listener = store.attach_append_listener(Arc::new(move |appended: &str, events: &[Event]| {
            if appended != watched {
                return;
            }
            let mut shared = lock(&sink);
            for event in events {
                shared.enqueue(Pending { event: event.clone(), attempts: 0 });
            }
        }));

        Self {
            stream,
            store,
            listener,
            options,
            shared,
            worker: tokio::sync::Mutex::new(None),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Oldest event in the waiting buffer.
    pub fn peek(&self) -> Option<Event> {
        lock(&self.shared).waiting.front().map(|p| p.event.clone())
    }

    /// Whether `event_id` sits in the waiting buffer.
    pub fn is_buffered(&self, event_id: EventId) -> bool {
        lock(&self.shared).buffered.contains(&event_id)
    }

    /// Number of events in the waiting buffer.
    pub fn len(&self) -> usize {
        lock(&self.shared).waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop buffered events up to and including `event_id`. Returns how many
    /// were dropped (zero when the id is not buffered).
    pub fn discard_through(&self, event_id: EventId) -> usize {
        let mut shared = lock(&self.shared);
        if !shared.buffered.contains(&event_id) {
            return 0;
        }
        let mut dropped = 0;
        while let Some(pending) = shared.pop_front() {
            dropped += 1;
            if pending.event.uuid == event_id {
                break;
            }
        }
        dropped
    }

    /// Events that exhausted their delivery attempts, oldest first.
    pub fn dead_letters(&self) -> Vec<Event> {
        lock(&self.shared).dead_letters.clone()
    }

    pub async fn is_attached(&self) -> bool {
        self.worker.lock().await.is_some()
    }

    /// Start delivering to `consumer`. Requires a Tokio runtime.
    pub async fn attach(&self, consumer: Arc<dyn EventConsumer>) -> Result<(), QueueError> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return Err(QueueError::AlreadyAttached(self.stream.clone()));
        }

        let (tx, rx) = mpsc::channel(self.options.capacity.max(1));
        lock(&self.shared).sender = Some(tx);

        let stop = Arc::new(AtomicBool::new(false));
        let join = tokio::spawn(deliver_loop(Delivery {
            stream: self.stream.clone(),
            shared: Arc::clone(&self.shared),
            consumer,
            stop: Arc::clone(&stop),
            max_attempts: self.options.max_delivery_attempts.max(1),
            rx,
        }));
        *worker = Some(DeliveryWorker { stop, join });
        debug!(stream = %self.stream, "queue consumer attached");
        Ok(())
    }

    /// Stop delivering; no-op when nothing is attached.
    pub async fn detach(&self) {
        let Some(worker) = self.worker.lock().await.take() else {
            return;
        };
        worker.stop.store(true, Ordering::Release);
        lock(&self.shared).sender = None;

        match worker.join.await {
            Ok(mut rx) => {
                let mut undelivered = Vec::new();
                while let Ok(pending) = rx.try_recv() {
                    undelivered.push(pending);
                }
                let mut shared = lock(&self.shared);
                for pending in undelivered.into_iter().rev() {
                    shared.push_front(pending);
                }
            }
            Err(err) => error!(stream = %self.stream, error = %err, "queue delivery task failed"),
        }
        debug!(stream = %self.stream, waiting = self.len(), "queue consumer detached");
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        self.store.detach_append_listener(self.listener);
        if let Some(worker) = self.worker.get_mut().take() {
            worker.stop.store(true, Ordering::Release);
            lock(&self.shared).sender = None;
        }
    }
}

struct Delivery {
    stream: String,
    shared: Arc<Mutex<Shared>>,
    consumer: Arc<dyn EventConsumer>,
    stop: Arc<AtomicBool>,
    max_attempts: u32,
    rx: mpsc::Receiver<Pending>,
}

async fn deliver_loop(mut delivery: Delivery) -> mpsc::Receiver<Pending> {
    loop {
        if delivery.stop.load(Ordering::Acquire) {
            break;
        }
        let next = match delivery.rx.try_recv() {
            Ok(pending) => Some(pending),
            Err(_) => lock(&delivery.shared).pop_front(),
        };
        let pending = match next {
            Some(pending) => pending,
            None => match delivery.rx.recv().await {
                Some(pending) => pending,
                None => break,
            },
        };
        delivery.deliver(pending).await;
    }
    delivery.rx
}

impl Delivery {
    async fn deliver(&self, mut pending: Pending) {
        let Err(err) = self.consumer.consume(&self.stream, &pending.event).await else {
            return;
        };
        pending.attempts += 1;

        let mut shared = lock(&self.shared);
        if pending.attempts >= self.max_attempts {
            error!(
                stream = %self.stream,
                event_id = %pending.event.uuid,
                event_name = %pending.event.name,
                attempts = pending.attempts,
                error = %err,
                "event moved to dead letters"
            );
            shared.dead_letters.push(pending.event);
        } else {
            warn!(
                stream = %self.stream,
                event_id = %pending.event.uuid,
                attempts = pending.attempts,
                error = %err,
                "event delivery failed, re-queued"
            );
            shared.push_back(pending);
        }
    }
}
