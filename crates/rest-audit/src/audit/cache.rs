//! Prior-state cache
//!
//! Holds the last known JSON state of an entity, keyed by the GET endpoint it
//! was read from, until the paired update/delete consumes it. Entries older
//! than `max_age` are invisible to [`PriorStateCache::get`] and removed by
//! [`PriorStateCache::sweep`].

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value as JsonValue;
use std::{
    sync::{Arc, Mutex, Weak},
    time::Duration,
};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::debug;

/// Source of "now" for record timestamps and cache ageing
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = now.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: JsonValue,
    inserted_at: DateTime<Utc>,
}

pub struct PriorStateCache {
    entries: scc::HashMap<String, CacheEntry>,
    max_age: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl PriorStateCache {
    pub fn new(max_age: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: scc::HashMap::new(),
            max_age: TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX),
            clock,
        }
    }

    pub fn get(&self, key: &str) -> Option<JsonValue> {
        let now = self.clock.now();
        self.entries
            .read(key, |_, entry| {
                if self.is_expired(entry, now) {
                    None
                } else {
                    Some(entry.value.clone())
                }
            })
            .flatten()
    }

    /// Replace whatever is stored under `key`
    pub fn set(&self, key: impl Into<String>, value: JsonValue) {
        let entry = CacheEntry {
            value,
            inserted_at: self.clock.now(),
        };
        let _ = self.entries.upsert(key.into(), entry);
    }

    pub fn delete(&self, key: &str) -> Option<JsonValue> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    /// Drop every entry older than `max_age`; returns how many went
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !self.is_expired(entry, now));
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "Swept prior-state cache");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sweep every `interval` until the cache is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match cache.upgrade() {
                    Some(cache) => {
                        cache.sweep();
                    },
                    None => break,
                }
            }
        })
    }

    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(entry.inserted_at) > self.max_age
    }
}

impl std::fmt::Debug for PriorStateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorStateCache")
            .field("entries", &self.entries.len())
            .field("max_age", &self.max_age)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    const MAX_AGE: Duration = Duration::from_secs(300);

    fn cache() -> (PriorStateCache, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        (PriorStateCache::new(MAX_AGE, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_set_get_delete() {
        let (cache, _) = cache();
        cache.set("get:/api/test/5", json!({"id": 5}));

        assert_eq!(cache.get("get:/api/test/5"), Some(json!({"id": 5})));
        assert_eq!(cache.get("get:/api/test/6"), None);
        assert_eq!(cache.delete("get:/api/test/5"), Some(json!({"id": 5})));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_set_replaces_and_refreshes() {
        let (cache, clock) = cache();
        cache.set("k", json!(1));
        clock.advance(Duration::from_secs(200));
        cache.set("k", json!(2));
        clock.advance(Duration::from_secs(200));

        assert_eq!(cache.get("k"), Some(json!(2)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entry_is_invisible() {
        let (cache, clock) = cache();
        cache.set("k", json!({"a": "a"}));
        clock.advance(MAX_AGE + Duration::from_secs(1));

        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_sweep_removes_only_old_entries() {
        let (cache, clock) = cache();
        cache.set("old", json!(1));
        clock.advance(Duration::from_secs(250));
        cache.set("young", json!(2));
        clock.advance(Duration::from_secs(100));

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.get("old"), None);
        assert_eq!(cache.get("young"), Some(json!(2)));
    }

    #[test]
    fn test_manual_clock_set() {
        let clock = ManualClock::new(Utc::now());
        let at = DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        clock.set(at);
        assert_eq!(clock.now(), at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_on_interval() {
        let clock = ManualClock::new(Utc::now());
        let cache = Arc::new(PriorStateCache::new(MAX_AGE, Arc::new(clock.clone())));
        cache.set("k", json!(1));

        let handle = cache.spawn_sweeper(Duration::from_secs(900));
        clock.advance(MAX_AGE + Duration::from_secs(1));

        tokio::time::sleep(Duration::from_secs(901)).await;
        assert!(cache.is_empty());

        drop(cache);
        tokio::time::sleep(Duration::from_secs(901)).await;
        assert!(handle.is_finished());
    }
}
