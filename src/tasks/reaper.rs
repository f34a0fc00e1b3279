use tokio::sync::watch;
use tokio::time::{interval, Duration};

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::engine::lifecycle;

/// Closes open attempts whose deadline passed with nobody driving them: a
/// crashed browser, a lost session after restart, or an annulment whose store
/// write failed.
pub(crate) async fn run(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let mut tick = interval(Duration::from_secs(state.settings().exam().reaper_interval_seconds));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(err) = sweep(&state).await {
                    tracing::error!(error = %err, "expired attempt sweep failed");
                }
            }
        }
    }
}

pub(crate) async fn sweep(state: &AppState) -> anyhow::Result<usize> {
    let pruned = state.registry().prune_settled();
    if pruned > 0 {
        tracing::debug!(pruned, "evicted settled sessions");
    }

    let expired = state.stores().attempts.list_open_expired(primitive_now_utc()).await?;

    let mut closed = 0;
    for attempt in expired {
        if state.registry().get(&attempt.id).is_some() {
            // A live session owns this attempt; its own timer closes it.
            continue;
        }

        match lifecycle::force_close_expired(state.stores(), &attempt.id).await {
            Ok(()) => closed += 1,
            Err(err) => {
                tracing::error!(
                    attempt_id = %attempt.id,
                    error = %err,
                    "Failed to close expired attempt"
                );
            }
        }
    }

    if closed > 0 {
        metrics::counter!("expired_attempts_closed_total").increment(closed as u64);
        tracing::info!(closed, "closed expired attempts");
    }

    Ok(closed)
}
