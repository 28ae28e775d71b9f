//! Age-based eviction for in-process dedup bookkeeping.

use std::hash::Hash;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Value that remembers when it was last written
pub(crate) trait Aged {
    fn touched_at(&self) -> Instant;
}

/// Forgets entries older than `retention`
///
/// Sweeps are amortized: [`RetentionWindow::sweep`] scans the map at most
/// once per tenth of the window.
#[derive(Debug)]
pub(crate) struct RetentionWindow {
    retention: Duration,
    last_sweep: Mutex<Instant>,
}

impl RetentionWindow {
    pub(crate) fn new(retention: Duration) -> Self {
        Self {
            retention,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    pub(crate) fn retention(&self) -> Duration {
        self.retention
    }

    /// Evict expired entries if a sweep is due. Must not be called while a
    /// reference into `map` is held.
    pub(crate) fn sweep<K, V>(&self, map: &DashMap<K, V>) -> usize
    where
        K: Eq + Hash,
        V: Aged,
    {
        let now = Instant::now();
        {
            let mut last = self.last_sweep.lock();
            if now.saturating_duration_since(*last) < self.retention / 10 {
                return 0;
            }
            *last = now;
        }
        self.evict(map, now)
    }

    pub(crate) fn evict<K, V>(&self, map: &DashMap<K, V>, now: Instant) -> usize
    where
        K: Eq + Hash,
        V: Aged,
    {
        let before = map.len();
        map.retain(|_, value| now.saturating_duration_since(value.touched_at()) < self.retention);
        let evicted = before.saturating_sub(map.len());
        if evicted > 0 {
            debug!(evicted = evicted, remaining = map.len(), "Expired dedup entries evicted");
        }
        evicted
    }
}
