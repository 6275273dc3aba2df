// File: matchrig-core/src/cancel.rs
//
// Cooperative cancellation for multi-step routines. Every pacing sleep in the
// codebase goes through `sleep_cancellable` so a triggered signal is observed
// within one step (50ms by default), never after a long uninterruptible wait.

use std::time::Duration;
use tokio::sync::watch;

pub const DEFAULT_SLEEP_STEP: Duration = Duration::from_millis(50);

/// Resettable stop signal shared between a controller and any number of
/// workers. Used both for round-over events (cleared on match reset) and for
/// the process-wide operator stop.
#[derive(Clone)]
pub struct StopSignal {
    tx: std::sync::Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: std::sync::Arc::new(tx) }
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Re-arm the signal for reuse. Workers mid-sleep will simply observe
    /// `false` again on their next step.
    pub fn clear(&self) {
        let _ = self.tx.send(false);
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Sleeps for `duration` in small increments, re-checking `stop` between
/// increments. Returns `true` if the signal fired before the full duration
/// elapsed, `false` if the sleep completed.
pub async fn sleep_cancellable(duration: Duration, stop: Option<&StopSignal>) -> bool {
    sleep_cancellable_step(duration, stop, DEFAULT_SLEEP_STEP).await
}

pub async fn sleep_cancellable_step(
    duration: Duration,
    stop: Option<&StopSignal>,
    step: Duration,
) -> bool {
    let Some(stop) = stop else {
        tokio::time::sleep(duration).await;
        return false;
    };

    let mut remaining = duration;
    loop {
        if stop.is_triggered() {
            return true;
        }
        if remaining.is_zero() {
            return false;
        }
        let chunk = remaining.min(step);
        tokio::time::sleep(chunk).await;
        remaining = remaining.saturating_sub(chunk);
    }
}
