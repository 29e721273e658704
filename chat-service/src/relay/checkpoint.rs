//! Periodic checkpoint timer.

use std::future;
use std::time::Duration;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Repeating timer driving checkpoint flushes.
///
/// The scheduler only produces ticks; the caller polls [`tick`](Self::tick)
/// from its select loop and performs the write itself. A disarmed scheduler
/// never completes a tick, so a `tick()` branch left in a select after
/// `disarm()` is inert.
#[derive(Debug, Default)]
pub struct CheckpointScheduler {
    interval: Option<Interval>,
}

impl CheckpointScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking every `period`, first tick one period from now.
    /// Re-arming replaces the previous timer.
    pub fn arm(&mut self, period: Duration) {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
    }

    /// Stop future ticks. Returns `false` if it was not armed.
    pub fn disarm(&mut self) -> bool {
        self.interval.take().is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.interval.is_some()
    }

    /// Wait for the next tick. Pending forever while disarmed.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => future::pending::<()>().await,
        }
    }
}
