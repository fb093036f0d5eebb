//! Infrastructure layer: document and event stores, queues, subscriptions and
//! the aggregate repository.
//!
//! - [`document_store`]: versioned JSON documents queried with a [`Filter`](document_store::Filter)
//! - [`event_store`]: append-only streams with optimistic concurrency
//! - [`storage`]: atomic batches across both stores, backend wiring
//! - [`event_queue`]: buffered per-stream delivery driven by append listeners
//! - [`subscription`]: catch-up subscriptions (replay, then live)
//! - [`repository`]: aggregate state from snapshots and events
//! - [`config`]: environment-driven engine configuration

pub mod config;
pub mod document_store;
pub mod event_queue;
pub mod event_store;
pub mod repository;
pub mod storage;
pub mod subscription;

pub(crate) mod persistence;
