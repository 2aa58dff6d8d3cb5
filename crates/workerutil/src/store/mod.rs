//! Queue abstraction consumed by the worker
//!
//! This module provides:
//! - [`Record`] and [`Store`] traits implemented by the caller's queue
//! - [`InMemoryStore`] for tests and local runs

mod memory;
#[allow(clippy::module_inception)]
mod store;

pub use memory::{DequeueFilter, InMemoryStore};
pub use store::{Record, RecordId, RecordState, Store, StoreError};
