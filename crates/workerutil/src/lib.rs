//! # workerutil
//!
//! A generic polling worker for database-backed job queues.
//!
//! ## Features
//!
//! - **Pluggable queue**: any [`Store`] that can claim, finish, and renew records
//! - **Bounded concurrency**: at most `num_handlers` records handled at once
//! - **Retry classification**: handler errors mark records errored (retried) or,
//!   when wrapped in [`NonRetryableError`], failed
//! - **Lease renewal**: optional heartbeats; lost leases cancel their handler
//! - **Budgets**: stop after a number of dequeues or a maximum active time
//! - **Deterministic tests**: every timer runs on an injectable [`Clock`]
//!
//! ## Lifecycle
//!
//! ```text
//!   Idle ──run()──▶ Running ──stop()/budget──▶ Draining ──handlers done──▶ Stopped
//!     │                                                                    ▲
//!     └──────────────────────────────stop()────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use workerutil::prelude::*;
//!
//! let worker = Arc::new(Worker::new(store, handler, WorkerOptions::from_env())?);
//! let handle = worker.start();
//!
//! tokio::signal::ctrl_c().await?;
//! worker.shutdown().await;
//! handle.await??;
//! ```

pub mod clock;
pub mod handler;
pub mod metrics;
pub mod store;
pub mod telemetry;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::handler::{
        Handler, HandlerContext, HandlerHooks, NonRetryableError, PreDequeue, PreDequeuer,
    };
    pub use crate::store::{InMemoryStore, Record, RecordId, Store, StoreError};
    pub use crate::worker::{Worker, WorkerError, WorkerOptions, WorkerStatus};
    pub use async_trait::async_trait;
}

// Re-export key types at crate root
pub use clock::{Clock, MockClock, SystemClock};
pub use handler::{
    is_non_retryable, HandleOutcome, Handler, HandlerContext, HandlerHooks, NonRetryableError,
    PreDequeue, PreDequeuer,
};
pub use metrics::{MetricsSnapshot, WorkerMetrics};
pub use store::{InMemoryStore, Record, RecordId, RecordState, Store, StoreError};
pub use telemetry::{init_tracing, TelemetryConfig};
pub use worker::{Worker, WorkerError, WorkerOptions, WorkerStatus};
