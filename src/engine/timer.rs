use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// One-second countdown over the attempt deadline. The expiry callback runs
/// on its own task so that stopping the timer never cancels a finalization
/// already in flight.
pub struct CountdownTimer {
    remaining: Arc<AtomicI64>,
    cancelled: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl CountdownTimer {
    /// Callers must not start a timer for untimed exams.
    pub fn start<F, Fut>(total_seconds: i64, on_expire: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let remaining = Arc::new(AtomicI64::new(total_seconds.max(0)));
        let cancelled = Arc::new(AtomicBool::new(false));

        let task_remaining = Arc::clone(&remaining);
        let task_cancelled = Arc::clone(&cancelled);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                let left = task_remaining.load(Ordering::SeqCst);
                if left <= 0 {
                    break;
                }
                ticker.tick().await;
                task_remaining.store(left - 1, Ordering::SeqCst);
            }

            if !task_cancelled.load(Ordering::SeqCst) {
                tokio::spawn(on_expire());
            }
        });

        Self { remaining, cancelled, handle }
    }

    pub fn remaining_seconds(&self) -> i64 {
        self.remaining.load(Ordering::SeqCst).max(0)
    }

    /// Stops the countdown and suppresses the expiry callback if it has not
    /// fired yet.
    pub fn stop(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.handle.abort();
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.handle.abort();
    }
}
