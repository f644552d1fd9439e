//! Reconnect timers.
//!
//! The client never sleeps inline: a timer is a separate task that posts
//! its id back to the actor when it fires. Cancelling aborts that task; the
//! actor additionally ignores ids that are no longer pending.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

pub type TimerId = u64;

/// Schedules a one-shot timer that sends `id` on `fired` after `delay`.
pub trait Scheduler: Send + 'static {
    fn schedule(
        &mut self,
        delay: Duration,
        id: TimerId,
        fired: mpsc::UnboundedSender<TimerId>,
    ) -> TimerHandle;
}

/// Cancellation handle for a scheduled timer.
#[derive(Debug, Default)]
pub struct TimerHandle {
    abort: Option<AbortHandle>,
}

impl TimerHandle {
    pub fn new(abort: AbortHandle) -> Self {
        Self { abort: Some(abort) }
    }

    pub fn cancel(self) {
        if let Some(abort) = self.abort {
            abort.abort();
        }
    }
}

/// Timers backed by `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(
        &mut self,
        delay: Duration,
        id: TimerId,
        fired: mpsc::UnboundedSender<TimerId>,
    ) -> TimerHandle {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = fired.send(id);
        });
        TimerHandle::new(task.abort_handle())
    }
}
