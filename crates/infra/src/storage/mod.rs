//! Atomic multi-store writes and backend wiring.
//!
//! A [`WriteBatch`] collects event appends and document writes; a
//! [`UnitOfWork`] commits the whole batch or nothing. [`Storage`] bundles the
//! three handles of one backend so callers never mix an in-memory event store
//! with a Postgres document store.

pub mod batch;
pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tracing::info;

use eventmill_core::{Classify, ErrorKind};

use crate::config::{Backend, ConfigError, EngineConfig};
use crate::document_store::{DocumentStore, DocumentStoreError, InMemoryDocumentStore, PostgresDocumentStore};
use crate::event_store::{EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore};

pub use batch::{WriteBatch, WriteOp};
pub use in_memory::InMemoryUnitOfWork;
pub use postgres::PostgresUnitOfWork;

#[derive(Debug, Error)]
pub enum CommitError {
    #[error(transparent)]
    Events(#[from] EventStoreError),

    #[error(transparent)]
    Documents(#[from] DocumentStoreError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl Classify for CommitError {
    fn kind(&self) -> ErrorKind {
        match self {
            CommitError::Events(e) => e.kind(),
            CommitError::Documents(e) => e.kind(),
            CommitError::Database(_) => ErrorKind::Backend,
        }
    }
}

/// Commits a [`WriteBatch`] atomically.
///
/// Append listeners are notified only after the batch is durable, once per
/// `AppendTo` op, in batch order.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn commit(&self, batch: WriteBatch) -> Result<(), CommitError>;
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Events(#[from] EventStoreError),

    #[error(transparent)]
    Documents(#[from] DocumentStoreError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl Classify for StorageError {
    fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Config(e) => e.kind(),
            StorageError::Events(e) => e.kind(),
            StorageError::Documents(e) => e.kind(),
            StorageError::Database(_) => ErrorKind::Backend,
        }
    }
}

/// The document store, event store and unit of work of one backend.
#[derive(Clone)]
pub struct Storage {
    pub documents: Arc<dyn DocumentStore>,
    pub events: Arc<dyn EventStore>,
    pub unit_of_work: Arc<dyn UnitOfWork>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}

impl Storage {
    /// Fresh, empty, non-persistent stores.
    pub fn in_memory() -> Self {
        Self::from_in_memory(InMemoryDocumentStore::new(), InMemoryEventStore::new())
    }

    pub fn from_in_memory(documents: InMemoryDocumentStore, events: InMemoryEventStore) -> Self {
        let unit_of_work = InMemoryUnitOfWork::new(documents.clone(), events.clone());
        Self {
            documents: Arc::new(documents),
            events: Arc::new(events),
            unit_of_work: Arc::new(unit_of_work),
        }
    }

    /// Postgres stores over one pool; creates the event tables when missing.
    pub async fn postgres(pool: sqlx::PgPool) -> Result<Self, StorageError> {
        let events = PostgresEventStore::new(pool.clone());
        events.ensure_schema().await?;
        let unit_of_work = PostgresUnitOfWork::new(pool.clone(), events.clone());
        Ok(Self {
            documents: Arc::new(PostgresDocumentStore::new(pool)),
            events: Arc::new(events),
            unit_of_work: Arc::new(unit_of_work),
        })
    }

    /// Build the configured backend and create the well-known streams.
    pub async fn connect(config: &EngineConfig) -> Result<Self, StorageError> {
        let storage = match config.backend {
            Backend::Memory => match &config.snapshot_path {
                Some(dir) => Self::from_in_memory(
                    InMemoryDocumentStore::with_snapshot(dir.join("documents.json"))?,
                    InMemoryEventStore::with_snapshot(dir.join("events.json"))?,
                ),
                None => Self::in_memory(),
            },
            Backend::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .ok_or(ConfigError::Missing("EVENTMILL_DATABASE_URL or DATABASE_URL"))?;
                let pool = PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .connect(url)
                    .await?;
                Self::postgres(pool).await?
            }
        };

        storage.events.create_stream(&config.write_model_stream).await?;
        storage.events.create_stream(&config.public_stream).await?;
        info!(
            backend = ?config.backend,
            write_model_stream = %config.write_model_stream,
            public_stream = %config.public_stream,
            "storage ready"
        );
        Ok(storage)
    }
}
