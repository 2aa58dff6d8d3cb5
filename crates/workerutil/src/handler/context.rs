//! Handler execution context

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::store::RecordId;

/// Context provided to handlers while a record is in flight
///
/// The cancellation token fires when the worker learns it no longer owns the
/// record (lease lost on heartbeat) or when [`Worker::cancel`](crate::Worker::cancel)
/// is called. The worker never aborts a running handler; handlers that want to
/// stop early must observe the token themselves.
///
/// # Example
///
/// ```ignore
/// async fn handle(&self, ctx: &HandlerContext, record: &Job) -> anyhow::Result<()> {
///     tokio::select! {
///         result = do_work(record) => result,
///         _ = ctx.cancelled() => Err(NonRetryableError::new("lease lost").into()),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Record being handled
    pub record_id: RecordId,

    /// Name of the worker running the handler
    pub worker_name: String,

    /// When the worker claimed the record
    pub claimed_at: DateTime<Utc>,

    cancellation: CancellationToken,
}

impl HandlerContext {
    /// Create a new handler context
    pub fn new(
        record_id: RecordId,
        worker_name: impl Into<String>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            record_id,
            worker_name: worker_name.into(),
            claimed_at: Utc::now(),
            cancellation,
        }
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolve when cancellation is requested
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    /// Clone of the underlying cancellation token, for handing to sub-tasks
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }
}
