//! Aggregate repository: folds write-model events into state and saves new
//! events together with the state snapshot.
//!
//! ```text
//! save(events, state, expected_version, command)
//!   ↓ stamp aggregate id/type/version + causation + command metadata
//!   ↓ WriteBatch: write-model append (or history delete), public append,
//!   ↓             snapshot set (or delete), live projection writes
//!   ↓ UnitOfWork::commit (all or nothing)
//!   ↓ append listeners notified
//! ```

pub mod aggregate;
pub mod config;
pub mod live_projection;

use thiserror::Error;

use eventmill_core::{Classify, ErrorKind};

use crate::document_store::DocumentStoreError;
use crate::event_store::EventStoreError;
use crate::storage::CommitError;

pub use aggregate::AggregateRepository;
pub use config::{AggregateDescription, ApplyFunctions, ApplyFn, PublicFn, RepositoryConfig, public_copy};
pub use live_projection::LiveProjection;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("aggregate {aggregate_type}/{aggregate_id} not found")]
    NotFound { aggregate_type: String, aggregate_id: String },

    /// Another writer saved the aggregate since `expected_version` was read.
    #[error("aggregate {aggregate_type}/{aggregate_id} was modified concurrently (expected version {expected_version})")]
    Conflict {
        aggregate_type: String,
        aggregate_id: String,
        expected_version: u64,
        #[source]
        source: CommitError,
    },

    #[error("aggregate {aggregate_type} misconfigured: {message}")]
    Configuration { aggregate_type: String, message: String },

    #[error("live projection {projection} failed")]
    Projection {
        projection: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Events(#[from] EventStoreError),

    #[error(transparent)]
    Documents(#[from] DocumentStoreError),

    #[error(transparent)]
    Commit(CommitError),
}

impl Classify for RepositoryError {
    fn kind(&self) -> ErrorKind {
        match self {
            RepositoryError::NotFound { .. } => ErrorKind::NotFound,
            RepositoryError::Conflict { .. } => ErrorKind::Conflict,
            RepositoryError::Configuration { .. } => ErrorKind::Configuration,
            RepositoryError::Projection { .. } => ErrorKind::Backend,
            RepositoryError::Events(e) => e.kind(),
            RepositoryError::Documents(e) => e.kind(),
            RepositoryError::Commit(e) => e.kind(),
        }
    }
}
