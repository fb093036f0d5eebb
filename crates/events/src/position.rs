//! Subscription positions.
//!
//! A position tells a catch-up subscription where replay of one stream starts.
//! Positions are recomputed on every start by a position initializer.

use eventmill_core::EventId;

use crate::MetadataMatcher;

/// Resume point for one stream: the last processed event (exclusive) and the
/// partition to read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamPosition {
    last_processed: Option<EventId>,
    matcher: Option<MetadataMatcher>,
}

impl StreamPosition {
    /// Replay from the beginning of the stream.
    pub fn beginning() -> Self {
        Self::default()
    }

    pub fn after(event_id: EventId) -> Self {
        Self {
            last_processed: Some(event_id),
            matcher: None,
        }
    }

    pub fn with_matcher(mut self, matcher: MetadataMatcher) -> Self {
        self.matcher = Some(matcher);
        self
    }

    pub fn last_processed(&self) -> Option<EventId> {
        self.last_processed
    }

    pub fn matcher(&self) -> Option<&MetadataMatcher> {
        self.matcher.as_ref()
    }

    /// Advance past `event_id`, keeping the matcher.
    pub fn advance(&mut self, event_id: EventId) {
        self.last_processed = Some(event_id);
    }
}
