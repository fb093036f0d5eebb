//! Versioned JSON document storage with a backend-agnostic filter DSL.
//!
//! Aggregate snapshots, projections and subscription checkpoints all live in a
//! [`DocumentStore`]. Two backends ship: [`InMemoryDocumentStore`] (tests/dev,
//! optional snapshot file) and [`PostgresDocumentStore`] (one table per
//! collection, JSONB body).

pub mod filter;
pub mod in_memory;
pub mod index;
pub mod partial;
pub mod postgres;
pub(crate) mod sql;
pub mod r#trait;

pub use filter::{CompiledFilter, Filter};
pub use in_memory::InMemoryDocumentStore;
pub use index::{Index, IndexKind, MetadataColumnType};
pub use partial::{MERGE_ALIAS, Projection};
pub use postgres::PostgresDocumentStore;
pub use r#trait::{
    DocMetadata, Document, DocumentIdStream, DocumentStore, DocumentStoreError, DocumentStream,
    FindOptions, OrderBy, SortDirection, WriteOptions,
};
