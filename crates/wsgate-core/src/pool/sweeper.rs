use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::pool::account_pool::AccountPool;

/// One background sweeper per account pool. Exits when the pool is closed.
pub fn spawn_sweeper(pool: Arc<AccountPool>) -> JoinHandle<()> {
    let mut shutdown = pool.shutdown_rx();
    let period = pool.tuning().sweep_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so a freshly created pool
        // is not swept before its first acquire.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = pool.sweep().await;
                    if report.evicted > 0 || report.rotated > 0 || report.ping_failures > 0 {
                        debug!(
                            event = "ctx_pool_swept",
                            account_id = %pool.account().account_id,
                            evicted = report.evicted,
                            rotated = report.rotated,
                            ping_failures = report.ping_failures,
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
