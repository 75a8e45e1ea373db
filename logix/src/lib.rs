//! # Logix
//!
//! Ships structured application logs and method-level trace events from
//! producer processes to a columnar store.
//!
//! ## Architecture
//!
//! - **Client side**: [`dispatcher::LogEventDispatcher`] buffers serialized events in
//!   bounded per-category channels, batches them by size or age, and hands batches to
//!   a pooled bus transport guarded by a [`circuit::CircuitBreaker`].
//! - **Server side**: [`consumer::ConsumerPipeline`] polls the bus, routes records by
//!   category, and bulk-inserts batches through the [`row_binary`] encoder.
//! - **Query side**: [`query`] readers and services, with [`trace_tree`] rebuilding
//!   call trees from flat START/END rows.

pub mod bus;
pub mod circuit;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod id_gen;
pub mod layer;
pub mod net;
pub mod pool;
pub mod query;
pub mod row_binary;
pub mod store;
pub mod trace_context;
pub mod trace_tree;
pub mod transport;
pub mod utils;

pub use error::{LogixError, Result};
