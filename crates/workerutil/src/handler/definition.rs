//! Handler trait definition

use async_trait::async_trait;

use super::HandlerContext;
use crate::store::Record;

/// Executes the unit of work for one record
///
/// `Ok(())` marks the record completed. Any error marks it errored (retryable)
/// unless it carries a [`NonRetryableError`](crate::NonRetryableError), which
/// marks it failed.
///
/// Optional capabilities are exposed by overriding [`hooks`](Self::hooks) and
/// [`pre_dequeuer`](Self::pre_dequeuer); the worker checks for them before each use
/// and skips them when absent.
///
/// # Example
///
/// ```ignore
/// use workerutil::prelude::*;
///
/// struct IndexHandler;
///
/// #[async_trait]
/// impl Handler<IndexJob> for IndexHandler {
///     async fn handle(&self, ctx: &HandlerContext, job: &IndexJob) -> anyhow::Result<()> {
///         if job.repository.is_empty() {
///             return Err(NonRetryableError::new("missing repository").into());
///         }
///         index(job).await
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<R: Record>: Send + Sync + 'static {
    /// Process one claimed record
    async fn handle(&self, ctx: &HandlerContext, record: &R) -> anyhow::Result<()>;

    /// Instrumentation hooks run around [`handle`](Self::handle)
    fn hooks(&self) -> Option<&dyn HandlerHooks<R>> {
        None
    }

    /// Hook consulted before every dequeue
    fn pre_dequeuer(&self) -> Option<&dyn PreDequeuer> {
        None
    }
}

/// Instrumentation run immediately before and after each handler invocation
///
/// Hooks are for observation only; they cannot influence the record outcome.
#[async_trait]
pub trait HandlerHooks<R: Record>: Send + Sync {
    /// Called before `handle`
    async fn pre_handle(&self, ctx: &HandlerContext, record: &R);

    /// Called after `handle`, before the terminal store call
    async fn post_handle(&self, ctx: &HandlerContext, record: &R);
}

/// Decision returned by a [`PreDequeuer`]
#[derive(Debug, Clone, PartialEq)]
pub enum PreDequeue {
    /// Skip dequeuing this tick
    Skip,
    /// Dequeue, passing `extra` through to the store untouched
    Dequeue { extra: Option<serde_json::Value> },
}

impl PreDequeue {
    /// Dequeue with no extra argument
    pub fn proceed() -> Self {
        Self::Dequeue { extra: None }
    }

    /// Dequeue with an extra argument for the store
    pub fn with_extra(extra: serde_json::Value) -> Self {
        Self::Dequeue { extra: Some(extra) }
    }
}

/// Gate consulted before every dequeue
///
/// Lets a handler throttle claiming or steer which class of record the store
/// hands out. An error is logged and treated as [`PreDequeue::Skip`].
#[async_trait]
pub trait PreDequeuer: Send + Sync {
    /// Decide whether and how to dequeue this tick
    async fn pre_dequeue(&self) -> anyhow::Result<PreDequeue>;
}
