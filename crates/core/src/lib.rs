//! `eventmill-core`: storage-agnostic building blocks.
//!
//! This crate contains **pure** primitives shared by the event and document
//! stores (no I/O, no async).

pub mod error;
pub mod id;
pub mod value;
pub mod version;

pub use error::{Classify, ErrorKind};
pub use id::{CommandId, EventId, InvalidId};
pub use version::ExpectedVersion;
