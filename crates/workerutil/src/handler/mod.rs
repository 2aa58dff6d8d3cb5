//! Handler abstractions
//!
//! Handlers execute the work behind a claimed record. They:
//! - Report retryable or non-retryable failure through their error value
//! - May expose pre/post instrumentation hooks
//! - May gate or steer each dequeue through a pre-dequeue hook

mod context;
mod definition;
mod error;

pub use context::HandlerContext;
pub use definition::{Handler, HandlerHooks, PreDequeue, PreDequeuer};
pub use error::{is_non_retryable, HandleOutcome, NonRetryableError};
