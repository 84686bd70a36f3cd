use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::task::JoinHandle;

use crate::cache::RateTracker;

/// How often the sweep runs. Eviction is also done lazily on touch, so
/// this only has to keep up with keys that went quiet for good.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Periodically evict idle tracker keys so memory stays bounded across
/// long uptimes and many guilds. Abort the returned handle on shutdown;
/// there is nothing to flush.
pub fn spawn_sweeper(tracker: Arc<RateTracker>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let evicted = tracker.sweep(chrono::Utc::now());
            if evicted > 0 {
                debug!(
                    "swept {} idle tracker keys ({} still live)",
                    evicted,
                    tracker.tracked_keys()
                );
            }
        }
    })
}
