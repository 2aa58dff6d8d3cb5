//! Record and Store trait definitions

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Identifier of a queued record, unique within its queue for the lifetime of a claim
pub type RecordId = i64;

/// A unit of queued work
///
/// The pool only needs a stable identifier; everything else about the record
/// is opaque and handed to the [`Handler`](crate::Handler) untouched.
pub trait Record: Send + Sync + 'static {
    /// Stable identifier of this record
    fn record_id(&self) -> RecordId;
}

/// Error type for store operations
///
/// The worker only logs these and moves on; stores map their driver errors
/// onto whichever variant fits.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Store temporarily unavailable (connection refused, pool exhausted)
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected or failed the operation
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Record state in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Visible to dequeue, not owned by any worker
    Queued,
    /// Claimed by a worker and receiving heartbeats
    Processing,
    /// Handler finished without error
    Completed,
    /// Handler failed; eligible for retry per store policy
    Errored,
    /// Handler failed with a non-retryable error
    Failed,
}

impl RecordState {
    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for RecordState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Errored => write!(f, "errored"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Queue of records consumed by a [`Worker`](crate::Worker)
///
/// Implementations own the persistence and claim semantics; the worker assumes
/// `dequeue` atomically transfers ownership of one record to the caller.
/// Implementations must be safe for concurrent calls from every handler slot
/// plus the heartbeat loop.
///
/// Boolean results report whether the record was still found in the state the
/// operation expects (`false` usually means a reaper reclaimed it).
#[async_trait]
pub trait Store<R: Record>: Send + Sync + 'static {
    /// Claim the next eligible record
    ///
    /// `extra` is forwarded verbatim from the handler's pre-dequeue hook.
    /// Returns `Ok(None)` when nothing is available.
    async fn dequeue(
        &self,
        worker_hostname: &str,
        extra: Option<serde_json::Value>,
    ) -> Result<Option<R>, StoreError>;

    /// Mark a record as completed
    async fn mark_complete(&self, id: RecordId) -> Result<bool, StoreError>;

    /// Mark a record as errored (retryable) with a failure message
    async fn mark_errored(&self, id: RecordId, failure_message: &str) -> Result<bool, StoreError>;

    /// Mark a record as failed (terminal) with a failure message
    async fn mark_failed(&self, id: RecordId, failure_message: &str) -> Result<bool, StoreError>;

    /// Renew the lease on the given records
    ///
    /// Returns the subset still owned by this worker.
    async fn heartbeat(&self, ids: &[RecordId]) -> Result<Vec<RecordId>, StoreError>;
}
