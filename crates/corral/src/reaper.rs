//! Background reaper: idle-timeout eviction and minimum-floor top-up

use std::sync::Weak;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::factory::Factory;
use crate::pool::PoolInner;

/// Spawn the periodic reaper task for a pool.
///
/// The task holds the pool only weakly, so dropping the last `Pool` handle
/// lets the process exit without waiting out a tick, and stops as soon as
/// `token` is cancelled (drain quiescence or `destroy_all`).
pub(crate) fn spawn<F: Factory>(
    pool: Weak<PoolInner<F>>,
    token: CancellationToken,
    period: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(pool) = pool.upgrade() else { break };
            PoolInner::reap(&pool);
        }
    });
}
