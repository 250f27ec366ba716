//! Process-wide counter store with background reclamation of expired windows.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use super::clock::{Clock, SystemClock};
use crate::error::{FloodgateError, Result};

/// How often expired entries are reclaimed unless configured otherwise.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// One key's current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    /// Requests observed in the current window
    pub count: u64,
    /// Epoch milliseconds at which the current window ends
    pub reset_time: u64,
}

impl RateLimitEntry {
    /// A fresh, empty window starting at `now`.
    pub fn fresh(now: u64, window_ms: u64) -> Self {
        Self {
            count: 0,
            reset_time: now.saturating_add(window_ms),
        }
    }

    /// A window is over once its reset time is reached.
    pub fn is_expired(&self, now: u64) -> bool {
        self.reset_time <= now
    }
}

/// Mapping from rate limit key to its current window.
///
/// Every limiter built on the same store shares its counters, so a store is
/// normally created once per process and handed around in an `Arc`. Updates
/// to a single key are serialized by the map's shard lock.
pub struct CounterStore {
    entries: DashMap<String, RateLimitEntry>,
    clock: Arc<dyn Clock>,
    sweep_interval: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for CounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterStore")
            .field("entries", &self.entries.len())
            .field("clock", &self.clock)
            .field("sweep_interval", &self.sweep_interval)
            .field("running", &self.is_running())
            .finish()
    }
}

impl CounterStore {
    /// Create a store on the system clock with the default sweep interval.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock), DEFAULT_SWEEP_INTERVAL)
    }

    /// Create a store with an injected clock and sweep interval.
    ///
    /// # Panics
    ///
    /// Panics if `sweep_interval` is zero.
    pub fn with_clock(clock: Arc<dyn Clock>, sweep_interval: Duration) -> Self {
        assert!(!sweep_interval.is_zero(), "sweep interval must be positive");
        Self {
            entries: DashMap::new(),
            clock,
            sweep_interval,
            sweeper: Mutex::new(None),
        }
    }

    /// The clock every window computation on this store uses.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Get a copy of the entry stored for `key`, expired or not.
    pub fn get(&self, key: &str) -> Option<RateLimitEntry> {
        self.entries.get(key).map(|entry| *entry)
    }

    /// Replace the entry for `key`.
    pub fn set(&self, key: &str, entry: RateLimitEntry) {
        self.entries.insert(key.to_string(), entry);
    }

    /// Remove the entry for `key`, returning it if present.
    pub fn remove(&self, key: &str) -> Option<RateLimitEntry> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    /// Read-modify-write a single key while holding its lock.
    ///
    /// `f` receives the current entry (if any) and returns the entry to store
    /// along with a value handed back to the caller. No other update to the
    /// same key can interleave with `f`.
    pub fn update<R, F>(&self, key: &str, f: F) -> R
    where
        F: FnOnce(Option<RateLimitEntry>) -> (RateLimitEntry, R),
    {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut slot) => {
                let (next, out) = f(Some(*slot.get()));
                slot.insert(next);
                out
            }
            Entry::Vacant(slot) => {
                let (next, out) = f(None);
                slot.insert(next);
                out
            }
        }
    }

    /// Remove every entry whose window ended at or before `now`.
    ///
    /// Returns the number of entries removed. Live entries are untouched.
    pub fn sweep(&self, now: u64) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            if entry.is_expired(now) {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "Swept expired rate limit entries");
        } else {
            trace!("Sweep found no expired rate limit entries");
        }

        removed
    }

    /// Sweep using the store's own clock.
    pub fn sweep_now(&self) -> usize {
        self.sweep(self.now())
    }

    /// Number of tracked keys, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Start the periodic sweep on the current tokio runtime.
    ///
    /// The task holds only a weak reference to the store and exits once the
    /// store is dropped. Calling `start` on a running store does nothing.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut sweeper = self.sweeper.lock();
        if sweeper.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| FloodgateError::Runtime(e.to_string()))?;

        let store = Arc::downgrade(self);
        let period = self.sweep_interval;

        *sweeper = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.sweep_now();
            }
        }));

        info!(interval_secs = period.as_secs(), "Rate limit sweeper started");
        Ok(())
    }

    /// Stop the periodic sweep. Entries are kept.
    pub fn stop(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
            info!("Rate limit sweeper stopped");
        }
    }

    /// Whether the sweep task is currently scheduled.
    pub fn is_running(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Default for CounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CounterStore {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;

    fn test_store(clock: &ManualClock) -> CounterStore {
        CounterStore::with_clock(Arc::new(clock.clone()), Duration::from_secs(60))
    }

    #[test]
    fn test_entry_expiry_is_inclusive() {
        let entry = RateLimitEntry::fresh(1_000, 500);

        assert_eq!(entry.count, 0);
        assert_eq!(entry.reset_time, 1_500);
        assert!(!entry.is_expired(1_499));
        assert!(entry.is_expired(1_500));
    }

    #[test]
    fn test_get_set_remove() {
        let clock = ManualClock::new(0);
        let store = test_store(&clock);
        let entry = RateLimitEntry { count: 3, reset_time: 100 };

        assert!(store.get("k").is_none());
        store.set("k", entry);
        assert_eq!(store.get("k"), Some(entry));
        assert_eq!(store.remove("k"), Some(entry));
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_sees_previous_value() {
        let clock = ManualClock::new(0);
        let store = test_store(&clock);

        let first = store.update("k", |current| {
            assert!(current.is_none());
            (RateLimitEntry { count: 1, reset_time: 10 }, "created")
        });
        let second = store.update("k", |current| {
            let mut entry = current.unwrap();
            entry.count += 1;
            (entry, entry.count)
        });

        assert_eq!(first, "created");
        assert_eq!(second, 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let clock = ManualClock::new(0);
        let store = test_store(&clock);

        store.set("expired", RateLimitEntry { count: 4, reset_time: 1_000 });
        store.set("boundary", RateLimitEntry { count: 1, reset_time: 2_000 });
        store.set("live", RateLimitEntry { count: 2, reset_time: 2_001 });

        assert_eq!(store.sweep(2_000), 2);
        assert!(store.get("expired").is_none());
        assert!(store.get("boundary").is_none());
        assert_eq!(store.get("live"), Some(RateLimitEntry { count: 2, reset_time: 2_001 }));
    }

    #[test]
    fn test_sweep_now_uses_store_clock() {
        let clock = ManualClock::new(0);
        let store = test_store(&clock);
        store.set("k", RateLimitEntry { count: 1, reset_time: 500 });

        assert_eq!(store.sweep_now(), 0);
        clock.advance(500);
        assert_eq!(store.sweep_now(), 1);
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let clock = ManualClock::new(0);
        let store = Arc::new(test_store(&clock));

        let result = store.start();
        assert!(matches!(result, Err(FloodgateError::Runtime(_))));
        assert!(!store.is_running());
    }

    #[test]
    #[should_panic(expected = "sweep interval must be positive")]
    fn test_zero_sweep_interval_panics() {
        let clock = ManualClock::new(0);
        CounterStore::with_clock(Arc::new(clock), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep_reclaims_expired_entries() {
        let clock = ManualClock::new(0);
        let store = Arc::new(test_store(&clock));
        store.set("short", RateLimitEntry { count: 1, reset_time: 1_000 });
        store.set("long", RateLimitEntry { count: 1, reset_time: 3_600_000 });

        store.start().unwrap();
        assert!(store.is_running());

        clock.advance(1_000);
        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        assert!(store.get("short").is_none());
        assert!(store.get("long").is_some());

        store.stop();
        assert!(!store.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_store_keeps_entries() {
        let clock = ManualClock::new(0);
        let store = Arc::new(test_store(&clock));
        store.set("k", RateLimitEntry { count: 1, reset_time: 10 });

        store.start().unwrap();
        store.start().unwrap();
        store.stop();

        clock.advance(100);
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(store.len(), 1);
    }
}
