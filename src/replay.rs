//! Bounded replay-nonce cache.
//!
//! Records every `(nonce, scope_path)` pair consumed by a successful
//! redemption so a captured signed URL cannot be presented twice. Entries
//! are bucketed by expiry timestamp and evicted once the capability they
//! belong to has expired on its own, keeping the cache bounded by the
//! number of redemptions inside one validity window rather than growing
//! forever.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One cache key: the nonce plus the scope it was consumed for.
type Entry = (String, String);

#[derive(Debug, Default)]
struct Inner {
    /// Fast membership check for consumed pairs.
    seen: HashSet<Entry>,
    /// Expiry second → pairs to drop once that second has passed.
    buckets: BTreeMap<i64, Vec<Entry>>,
}

impl Inner {
    fn evict(&mut self, now: DateTime<Utc>) {
        // Bucket keys are second-truncated expiry timestamps, so a key
        // equal to the current second may still cover a live capability;
        // only strictly older buckets are safe to drop.
        let cutoff = now.timestamp();
        let live = self.buckets.split_off(&cutoff);
        for entries in std::mem::replace(&mut self.buckets, live).into_values() {
            for entry in entries {
                self.seen.remove(&entry);
            }
        }
    }
}

/// Thread-safe replay cache with atomic check-and-insert.
///
/// The lock is held only for the membership check and insert, never
/// across signing or I/O, so concurrent redemptions of distinct nonces
/// contend only briefly. Two redemptions racing on the identical nonce
/// serialize on the lock and exactly one wins.
#[derive(Debug, Default)]
pub struct ReplayCache {
    inner: Mutex<Inner>,
}

impl ReplayCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically record a `(nonce, scope_path)` pair.
    ///
    /// Returns `true` if the pair was fresh and is now recorded, `false`
    /// if it was already consumed within its validity window. Expired
    /// buckets are dropped lazily on every call.
    pub fn check_and_insert(
        &self,
        nonce: &str,
        scope_path: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.evict(now);

        let entry = (nonce.to_string(), scope_path.to_string());
        if inner.seen.contains(&entry) {
            return false;
        }

        inner.seen.insert(entry.clone());
        inner
            .buckets
            .entry(expires_at.timestamp())
            .or_default()
            .push(entry);
        true
    }

    /// Drop all entries whose capability has expired.
    pub fn evict_expired(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.evict(now);
    }

    /// Number of live entries (test and diagnostics hook).
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .seen
            .len()
    }

    /// Whether the cache currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn a periodic eviction sweep on the tokio runtime.
    ///
    /// The sweep bounds memory during quiet periods; verification never
    /// waits on it beyond the short-held mutex. Abort the returned handle
    /// on shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cache.evict_expired(Utc::now());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_first_insert_succeeds_second_fails() {
        let cache = ReplayCache::new();
        assert!(cache.check_and_insert("n1", "products/1", ts(1000), ts(900)));
        assert!(!cache.check_and_insert("n1", "products/1", ts(1000), ts(901)));
    }

    #[test]
    fn test_same_nonce_different_scope_is_distinct() {
        let cache = ReplayCache::new();
        assert!(cache.check_and_insert("n1", "products/1", ts(1000), ts(900)));
        assert!(cache.check_and_insert("n1", "products/2", ts(1000), ts(900)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_entries_evicted_after_expiry() {
        let cache = ReplayCache::new();
        assert!(cache.check_and_insert("n1", "p", ts(1000), ts(900)));
        cache.evict_expired(ts(1000));
        assert_eq!(cache.len(), 1, "expiry second may still cover a live capability");

        cache.evict_expired(ts(1001));
        assert!(cache.is_empty(), "strictly past buckets are dropped");
    }

    #[test]
    fn test_lazy_eviction_on_insert() {
        let cache = ReplayCache::new();
        assert!(cache.check_and_insert("old", "p", ts(1000), ts(900)));
        // Fresh insert after the old entry expired prunes it in passing
        assert!(cache.check_and_insert("new", "p", ts(2000), ts(1500)));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_evicts_in_background() {
        let cache = Arc::new(ReplayCache::new());
        // Already-expired entry: insertion still records it (lazy
        // eviction runs before the insert), the sweep then drops it.
        let now = Utc::now();
        assert!(cache.check_and_insert("n", "p", now - chrono::Duration::seconds(2), now));

        let handle = cache.spawn_sweeper(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(cache.is_empty(), "sweeper should have evicted the entry");
        handle.abort();
    }

    #[test]
    fn test_concurrent_same_nonce_exactly_one_wins() {
        let cache = Arc::new(ReplayCache::new());
        let mut handles = Vec::new();
        for _ in 0..100 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                cache.check_and_insert("shared", "products/1", ts(10_000), ts(9_000))
            }));
        }
        let wins = handles
            .into_iter()
            .map(|h| h.join().expect("thread panicked"))
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1, "exactly one racing insert may succeed");
    }
}
