//! Time sources for the worker's timers
//!
//! The worker drives three independent timers (dequeue interval, heartbeat
//! interval, maximum active time), each from its own [`Clock`]. Production code
//! uses [`SystemClock`]; tests use [`MockClock`] and step virtual time by hand.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};

/// Source of timer futures
pub trait Clock: Send + Sync + 'static {
    /// Future that resolves once `duration` has elapsed on this clock
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Wall-clock timers backed by `tokio::time`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

struct Timer {
    deadline: Duration,
    tx: oneshot::Sender<()>,
}

#[derive(Default)]
struct MockClockState {
    elapsed: Duration,
    timers: Vec<Timer>,
}

/// Virtual clock that only moves when told to
///
/// Timers registered through [`Clock::sleep`] fire when [`advance`](Self::advance)
/// moves virtual time past their deadline. Clones share the same time line.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use workerutil::{Clock, MockClock};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let clock = MockClock::new();
/// let sleep = clock.sleep(Duration::from_secs(1));
///
/// clock.blocking_advance(Duration::from_secs(1)).await;
/// sleep.await;
/// assert_eq!(clock.elapsed(), Duration::from_secs(1));
/// # }
/// ```
#[derive(Clone, Default)]
pub struct MockClock {
    state: Arc<Mutex<MockClockState>>,
    registered: Arc<Notify>,
}

impl MockClock {
    /// Create a clock at virtual time zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since creation
    pub fn elapsed(&self) -> Duration {
        self.state.lock().elapsed
    }

    /// Number of live timers waiting on this clock
    pub fn pending_timers(&self) -> usize {
        let mut state = self.state.lock();
        state.timers.retain(|timer| !timer.tx.is_closed());
        state.timers.len()
    }

    /// Move virtual time forward and fire every timer that came due
    pub fn advance(&self, duration: Duration) {
        let due: Vec<Timer> = {
            let mut state = self.state.lock();
            state.elapsed += duration;
            let now = state.elapsed;
            let (due, pending): (Vec<Timer>, Vec<Timer>) = std::mem::take(&mut state.timers)
                .into_iter()
                .partition(|timer| timer.deadline <= now);
            state.timers = pending;
            due
        };

        for timer in due {
            let _ = timer.tx.send(());
        }
    }

    /// Wait until something is sleeping on this clock, then advance it
    pub async fn blocking_advance(&self, duration: Duration) {
        loop {
            let registered = self.registered.notified();
            if self.pending_timers() > 0 {
                break;
            }
            registered.await;
        }
        self.advance(duration);
    }
}

impl Clock for MockClock {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            if duration.is_zero() {
                let _ = tx.send(());
            } else {
                let deadline = state.elapsed + duration;
                state.timers.push(Timer { deadline, tx });
            }
        }
        self.registered.notify_waiters();

        Box::pin(async move {
            let _ = rx.await;
        })
    }
}

impl std::fmt::Debug for MockClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockClock")
            .field("elapsed", &state.elapsed)
            .field("timers", &state.timers.len())
            .finish()
    }
}
