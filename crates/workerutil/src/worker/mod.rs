//! Polling worker
//!
//! This module provides:
//! - [`Worker`] - Dequeue loop with bounded concurrent handlers
//! - [`WorkerOptions`] - Worker configuration
//! - [`WorkerStatus`] - Lifecycle status
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                         Worker                           │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────┐  │
//! │  │ Dequeue loop │  │  Heartbeat   │  │ Max active time│  │
//! │  │  (interval)  │  │ (optional)   │  │   (optional)   │  │
//! │  └──────┬───────┘  └──────┬───────┘  └────────────────┘  │
//! │         │                 │                              │
//! │         ▼                 ▼                              │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │           In-flight set (record id -> token)       │  │
//! │  └────────────────────────────────────────────────────┘  │
//! │         │                                                │
//! │         ▼                                                │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │     Handler tasks (Semaphore-limited to N)         │  │
//! │  │  [record 1] [record 2] ... [record N]              │  │
//! │  └────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod heartbeat;
mod options;
mod pool;
mod running;

pub use options::WorkerOptions;
pub use pool::{Worker, WorkerError, WorkerStatus};
