//! Catch-up subscriptions: historical replay followed by live consumption.
//!
//! For every subscribed stream a [`CatchUpSubscription`] first replays stored
//! events from the position its [`PositionInitializer`] returns, then attaches
//! its consumer to the stream's [`EventQueue`](crate::event_queue::EventQueue).
//! The queue exists from the moment the subscription is built, so every event
//! appended during replay is already buffered; replay stops at the first
//! buffered event and the queue delivers the rest. No event is skipped and
//! none is consumed twice.

pub mod catch_up;
pub mod checkpoint;

use async_trait::async_trait;
use thiserror::Error;

use eventmill_core::{Classify, ErrorKind, EventId};
use eventmill_events::{Event, MetadataMatcher, StreamPosition};

use crate::event_queue::QueueError;
use crate::event_store::EventStoreError;

pub use catch_up::{CatchUpSubscription, CatchUpSubscriptionBuilder};
pub use checkpoint::{CHECKPOINT_COLLECTION, DocumentCheckpointStore};

/// Computes where replay of one stream starts, on every `start_processing`.
#[async_trait]
pub trait PositionInitializer: Send + Sync {
    /// `recorded` is the position this subscription reached in this process
    /// (`None` before the first start).
    async fn initial_position(
        &self,
        subscription: &str,
        stream: &str,
        recorded: Option<&StreamPosition>,
    ) -> anyhow::Result<StreamPosition>;
}

/// Default initializer: resume after the last processed event, from the
/// beginning on the first start.
#[derive(Debug, Clone, Default)]
pub struct ResumeFromLastProcessed {
    matcher: Option<MetadataMatcher>,
}

impl ResumeFromLastProcessed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only replay events of this partition.
    pub fn matching(matcher: MetadataMatcher) -> Self {
        Self { matcher: Some(matcher) }
    }
}

#[async_trait]
impl PositionInitializer for ResumeFromLastProcessed {
    async fn initial_position(
        &self,
        _subscription: &str,
        _stream: &str,
        recorded: Option<&StreamPosition>,
    ) -> anyhow::Result<StreamPosition> {
        let position = recorded.cloned().unwrap_or_else(StreamPosition::beginning);
        Ok(match (&self.matcher, position.matcher()) {
            (Some(matcher), None) => position.with_matcher(matcher.clone()),
            _ => position,
        })
    }
}

/// Told about every event the subscription's consumer processed successfully.
#[async_trait]
pub trait ProcessedListener: Send + Sync {
    async fn processed(&self, subscription: &str, stream: &str, event: &Event) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("subscription {0} is already running")]
    AlreadyRunning(String),

    #[error("position initializer failed for stream {stream}")]
    Initializer {
        stream: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("consumer failed on event {event_id} of stream {stream}")]
    ConsumerFailed {
        stream: String,
        event_id: EventId,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Events(#[from] EventStoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl Classify for SubscriptionError {
    fn kind(&self) -> ErrorKind {
        match self {
            SubscriptionError::AlreadyRunning(_) => ErrorKind::Conflict,
            SubscriptionError::Initializer { .. } => ErrorKind::Configuration,
            SubscriptionError::ConsumerFailed { .. } => ErrorKind::Backend,
            SubscriptionError::Events(e) => e.kind(),
            SubscriptionError::Queue(e) => e.kind(),
        }
    }
}
