//! Retry ticks and cancellable deadlines.
//!
//! Actors never sleep inside a handler. A retrying actor polls a
//! [`RetryTicker`] next to its inbox in `select!`, and a deadline is a small
//! task that posts a message back into the owner's inbox when it fires.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Repeating retry event for an actor's event loop.
pub struct RetryTicker {
    interval: Interval,
}

impl RetryTicker {
    /// First tick fires one `period` after creation, not immediately.
    pub fn new(period: Duration) -> Self {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// One-shot timer that delivers a message unless cancelled first.
///
/// Dropping the deadline aborts the timer task.
#[derive(Debug)]
pub struct Deadline {
    task: JoinHandle<()>,
}

impl Deadline {
    pub fn schedule<M>(delay: Duration, target: mpsc::UnboundedSender<M>, message: M) -> Self
    where
        M: Send + 'static,
    {
        let task = tokio::spawn(async move {
            time::sleep(delay).await;
            // The owner may already be gone; nothing left to notify.
            let _ = target.send(message);
        });
        Self { task }
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.task.abort();
    }
}
