//! Append-only event store boundary.
//!
//! Named streams of immutable [`Event`](eventmill_events::Event)s with
//! conditional appends, matcher-scoped loads and append notifications. Two
//! backends ship: [`InMemoryEventStore`] and [`PostgresEventStore`].

pub mod in_memory;
pub mod postgres;
pub(crate) mod sql;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, EventStream, LoadQuery};
