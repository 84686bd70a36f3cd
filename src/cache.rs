use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::core::TrackerKey;

/// Sliding-window state for one `(guild, actor, kind)` key.
///
/// The punishment epoch lives here too, so the executor's test-and-set and
/// the tracker's counting are serialized by the same per-key entry guard.
#[derive(Debug)]
struct ActorWindow {
    hits: VecDeque<DateTime<Utc>>,
    punished_until: Option<DateTime<Utc>>,
    epoch: u64,
    last_touch: DateTime<Utc>,
    window: Duration,
}

impl ActorWindow {
    fn new(at: DateTime<Utc>, window: Duration) -> Self {
        Self {
            hits: VecDeque::new(),
            punished_until: None,
            epoch: 0,
            last_touch: at,
            window,
        }
    }

    /// Drop everything older than the trailing window. Retain, rather than
    /// front-pop: correlation delays mean hits do not always arrive in
    /// timestamp order.
    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        self.hits.retain(|ts| *ts >= cutoff);
    }

    fn stale(&self, now: DateTime<Utc>) -> bool {
        now - self.last_touch >= self.window * 2
    }

    fn reset(&mut self) {
        self.hits.clear();
        self.punished_until = None;
        self.epoch = 0;
    }
}

/// Keyed sliding-window counters for the whole process.
///
/// Keys are fully independent: state is a [`DashMap`] and every operation
/// touches exactly one entry, so two raids in two guilds (or two actors in
/// one guild) never contend on a shared lock.
#[derive(Default)]
pub struct RateTracker {
    windows: DashMap<TrackerKey, ActorWindow>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an event and return the in-window count for its key.
    ///
    /// Atomic per key: concurrent calls for the same key are linearized by
    /// the entry guard, both get counted, and neither observes a shrinking
    /// score. `window` comes from the guild's threshold for this kind and
    /// is remembered for eviction.
    pub fn record(&self, key: &TrackerKey, at: DateTime<Utc>, window: Duration) -> u32 {
        let mut entry = self
            .windows
            .entry(key.clone())
            .or_insert_with(|| ActorWindow::new(at, window));

        if entry.stale(at) {
            entry.reset();
        }

        entry.window = window;
        entry.prune(at);
        entry.hits.push_back(at);
        entry.last_touch = at;
        entry.hits.len() as u32
    }

    /// Current in-window count without recording anything.
    pub fn peek(&self, key: &TrackerKey, at: DateTime<Utc>) -> u32 {
        match self.windows.get(key) {
            Some(entry) => {
                let cutoff = at - entry.window;
                entry.hits.iter().filter(|ts| **ts >= cutoff).count() as u32
            }
            None => 0,
        }
    }

    /// Begin a punishment epoch for the key unless one is already active.
    ///
    /// Returns the new epoch number, or `None` when the key is still inside
    /// an active cooldown (the caller reports `Suppressed`). Starting an
    /// epoch clears the window: the episode is over and counting restarts.
    /// Atomic with respect to concurrent [`RateTracker::record`] calls on
    /// the same key.
    pub fn begin_epoch(&self, key: &TrackerKey, at: DateTime<Utc>, cooldown: Duration) -> Option<u64> {
        let mut entry = self
            .windows
            .entry(key.clone())
            .or_insert_with(|| ActorWindow::new(at, cooldown));

        if entry.punished_until.map_or(false, |until| at < until) {
            return None;
        }

        entry.epoch += 1;
        entry.punished_until = Some(at + cooldown);
        entry.hits.clear();
        entry.last_touch = at;
        Some(entry.epoch)
    }

    /// Whether the key is inside an active punishment cooldown.
    pub fn epoch_active(&self, key: &TrackerKey, at: DateTime<Utc>) -> bool {
        self.windows
            .get(key)
            .and_then(|entry| entry.punished_until)
            .map_or(false, |until| at < until)
    }

    /// Evict keys idle for at least twice their window; returns how many
    /// went. Cheap enough to run from a periodic task, and [`record`] also
    /// resets stale entries lazily, so memory stays bounded either way.
    ///
    /// [`record`]: RateTracker::record
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, entry| !entry.stale(now));
        before - self.windows.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Actor, EventKind, GuildId, UserId};
    use std::sync::Arc;

    fn key(guild: u64, user: u64) -> TrackerKey {
        TrackerKey {
            guild_id: GuildId(guild),
            actor: Actor::User(UserId(user)),
            kind: EventKind::ChannelDelete,
        }
    }

    #[test]
    fn scores_count_only_the_window() {
        let tracker = RateTracker::new();
        let k = key(1, 2);
        let t0 = Utc::now();
        let window = Duration::seconds(60);

        assert_eq!(tracker.record(&k, t0, window), 1);
        assert_eq!(tracker.record(&k, t0 + Duration::seconds(30), window), 2);
        // t0 falls out; the hit at t0+30 is exactly on the edge and stays.
        assert_eq!(tracker.record(&k, t0 + Duration::seconds(90), window), 2);
    }

    #[test]
    fn keys_are_independent() {
        let tracker = RateTracker::new();
        let t0 = Utc::now();
        let window = Duration::seconds(60);

        assert_eq!(tracker.record(&key(1, 2), t0, window), 1);
        assert_eq!(tracker.record(&key(1, 3), t0, window), 1);
        assert_eq!(tracker.record(&key(2, 2), t0, window), 1);
        assert_eq!(tracker.record(&key(1, 2), t0, window), 2);
    }

    #[test]
    fn out_of_order_hits_still_prune_correctly() {
        let tracker = RateTracker::new();
        let k = key(1, 2);
        let t0 = Utc::now();
        let window = Duration::seconds(60);

        // A slow correlation can deliver an older timestamp after a newer one.
        assert_eq!(tracker.record(&k, t0 + Duration::seconds(5), window), 1);
        assert_eq!(tracker.record(&k, t0, window), 2);
        assert_eq!(tracker.peek(&k, t0 + Duration::seconds(64)), 1);
    }

    #[test]
    fn punishment_resets_the_episode() {
        let tracker = RateTracker::new();
        let k = key(1, 2);
        let t0 = Utc::now();
        let window = Duration::seconds(60);

        assert_eq!(tracker.record(&k, t0, window), 1);
        assert_eq!(tracker.record(&k, t0 + Duration::seconds(1), window), 2);
        assert_eq!(tracker.record(&k, t0 + Duration::seconds(2), window), 3);

        let epoch = tracker.begin_epoch(&k, t0 + Duration::seconds(2), window);
        assert_eq!(epoch, Some(1));

        // Window restarted: the late event counts alone.
        assert_eq!(tracker.record(&k, t0 + Duration::seconds(61), window), 1);
    }

    #[test]
    fn epochs_suppress_until_cooldown_lapses() {
        let tracker = RateTracker::new();
        let k = key(1, 2);
        let t0 = Utc::now();
        let cooldown = Duration::seconds(60);

        assert_eq!(tracker.begin_epoch(&k, t0, cooldown), Some(1));
        assert_eq!(tracker.begin_epoch(&k, t0 + Duration::seconds(30), cooldown), None);
        assert!(tracker.epoch_active(&k, t0 + Duration::seconds(30)));
        assert_eq!(
            tracker.begin_epoch(&k, t0 + Duration::seconds(60), cooldown),
            Some(2)
        );
    }

    #[test]
    fn idle_keys_get_swept() {
        let tracker = RateTracker::new();
        let t0 = Utc::now();
        let window = Duration::seconds(60);

        tracker.record(&key(1, 2), t0, window);
        tracker.record(&key(1, 3), t0 + Duration::seconds(110), window);
        assert_eq!(tracker.tracked_keys(), 2);

        // 2x window after the first key's last touch.
        let evicted = tracker.sweep(t0 + Duration::seconds(120));
        assert_eq!(evicted, 1);
        assert_eq!(tracker.tracked_keys(), 1);
    }

    #[test]
    fn stale_entries_reset_on_touch() {
        let tracker = RateTracker::new();
        let k = key(1, 2);
        let t0 = Utc::now();
        let window = Duration::seconds(60);

        tracker.record(&k, t0, window);
        tracker.begin_epoch(&k, t0, window);

        // Far past 2x window: the old epoch state must not leak in.
        assert_eq!(tracker.record(&k, t0 + Duration::seconds(300), window), 1);
        assert!(!tracker.epoch_active(&k, t0 + Duration::seconds(300)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_records_lose_nothing() {
        let tracker = Arc::new(RateTracker::new());
        let t0 = Utc::now();
        let window = Duration::seconds(600);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    tracker.record(&key(1, 2), t0, window);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(tracker.peek(&key(1, 2), t0), 400);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_epoch_starts_yield_exactly_one() {
        let tracker = Arc::new(RateTracker::new());
        let t0 = Utc::now();
        let cooldown = Duration::seconds(60);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                tracker.begin_epoch(&key(1, 2), t0, cooldown)
            }));
        }

        let mut started = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                started += 1;
            }
        }

        assert_eq!(started, 1);
    }
}
