//! Periodic playback position polling.
//!
//! The poller is an explicit, cancellable tokio task. It ticks on a fixed
//! period (missed ticks are caught up, so the schedule does not drift) with
//! an immediate first tick, and checks its cancellation flag before every
//! delivery so a tick that was already running when `stop()` was called is
//! dropped instead of delivered.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::engine::PositionReader;

/// Default polling period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

struct PollTask {
    cancelled: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Repeating position sampler. Must be started from within a tokio runtime.
#[derive(Default)]
pub struct PositionPoller {
    task: Option<PollTask>,
}

impl PositionPoller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Start polling `poll_fn` every `interval`, forwarding results to
    /// `on_tick`. A failed read is reported as position 0.
    pub fn start<F>(&mut self, poll_fn: PositionReader, mut on_tick: F, interval: Duration)
    where
        F: FnMut(u64) + Send + 'static,
    {
        self.stop();

        let cancelled = Arc::new(AtomicBool::new(false));
        let token = Arc::clone(&cancelled);
        let period = interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
            loop {
                ticker.tick().await;
                if token.load(Ordering::Acquire) {
                    break;
                }
                let position_ms = match poll_fn() {
                    Ok(ms) => ms,
                    Err(e) => {
                        tracing::debug!(error = %e, "Position read failed, reporting 0");
                        0
                    }
                };
                if token.load(Ordering::Acquire) {
                    break;
                }
                on_tick(position_ms);
            }
        });

        self.task = Some(PollTask { cancelled, handle });
    }

    /// Cancel future ticks. Safe to call when not running.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancelled.store(true, Ordering::Release);
            task.handle.abort();
        }
    }
}

impl Drop for PositionPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
