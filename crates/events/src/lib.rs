//! Event model shared by the event stores, queues and the aggregate repository.
//!
//! - [`Event`]: the immutable wire unit `{uuid, name, payload, meta, createdAt}`
//! - [`meta`]: reserved metadata keys and [`Visibility`]
//! - [`MetadataMatcher`]: stream partition predicates
//! - [`ListenerRegistry`]: append notifications
//! - [`StreamPosition`]: catch-up resume points

pub mod command;
pub mod event;
pub mod listener;
pub mod matcher;
pub mod meta;
pub mod position;

pub use command::Command;
pub use event::{Event, Metadata};
pub use listener::{AppendListener, ListenerId, ListenerRegistry};
pub use matcher::{FieldType, MatchCondition, MatchOp, MetadataMatcher};
pub use meta::Visibility;
pub use position::StreamPosition;
