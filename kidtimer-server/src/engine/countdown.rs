use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{TickOutcome, TimerEngine};
use crate::storage::TimerGateway;

/// Drives one timer until it leaves `active` or `token` is cancelled.
pub(super) fn spawn<G: TimerGateway>(
    engine: TimerEngine<G>,
    timer_id: String,
    token: CancellationToken,
) {
    let period = engine.inner.settings.tick_period;
    tokio::spawn(async move {
        // First tick fires one period after start.
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    match engine.advance(&timer_id, Some(&token)).await {
                        TickOutcome::Running(_) => {}
                        TickOutcome::Completed | TickOutcome::Idle => break,
                    }
                }
            }
        }
        trace!(timer_id = %timer_id, "countdown stopped");
    });
}
