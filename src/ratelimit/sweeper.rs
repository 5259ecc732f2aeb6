//! Background removal of idle keys.
//!
//! Keys are only compacted when they are touched. A key that stops sending
//! keeps its last record until it is queried again, so long-running
//! processes with many short-lived keys can run a sweeper to reclaim them.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::limiter::SlidingWindowLimiter;

/// Spawn a task that calls [`SlidingWindowLimiter::purge_expired`] every `interval`.
///
/// Must be called from within a tokio runtime. Abort the returned handle to
/// stop sweeping.
pub fn spawn_sweeper<K>(limiter: Arc<SlidingWindowLimiter<K>>, interval: Duration) -> JoinHandle<()>
where
    K: Eq + Hash + Debug + Send + Sync + 'static,
{
    info!(interval = ?interval, "Starting expired key sweeper");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let removed = limiter.purge_expired();
            debug!(
                removed = removed,
                active_keys = limiter.active_keys(),
                "Sweep complete"
            );
        }
    })
}
