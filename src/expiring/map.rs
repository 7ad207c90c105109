//! Sharded Map With Per-Entry Expiry
//!
//! [`ExpiringMap`] holds values that must not outlive a deadline. The
//! blocking connection parks each waiting request callback here, keyed by
//! sequence number, so that a request whose response never arrives is still
//! released once its time is up.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: entries are spread over independent `RwLock`s so that
//!    callers inserting and the worker removing rarely contend.
//! 2. **Lazy Expiry**: lookups treat an expired entry as absent.
//! 3. **Active Expiry**: [`ExpiringMap::evict_expired`]
//!    hands expired entries back so the sweeper can resolve them.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ExpiringMap                             │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Number of shards. Callback maps are small, so a handful is plenty.
const NUM_SHARDS: usize = 16;

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }
}

type Shard<K, V> = RwLock<HashMap<K, Entry<V>>>;

/// A concurrent map whose entries disappear after a time-to-live.
///
/// # Example
///
/// ```
/// use memlink::expiring::ExpiringMap;
/// use std::time::Duration;
///
/// let map = ExpiringMap::new(Some(Duration::from_secs(30)));
/// assert!(map.insert_if_absent(1u64, "waiting", None).is_ok());
/// assert!(map.contains_key(&1));
/// assert_eq!(map.remove(&1), Some("waiting"));
/// ```
pub struct ExpiringMap<K, V> {
    shards: Vec<Shard<K, V>>,
    default_ttl: Option<Duration>,
    /// Total entries removed by expiry
    expired_count: AtomicU64,
}

impl<K, V> std::fmt::Debug for ExpiringMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringMap")
            .field("shards", &self.shards.len())
            .field("default_ttl", &self.default_ttl)
            .field("expired_count", &self.expired_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl<K: Hash + Eq, V> ExpiringMap<K, V> {
    /// Creates an empty map. Entries inserted without their own TTL use
    /// `default_ttl`; `None` means they never expire.
    pub fn new(default_ttl: Option<Duration>) -> Self {
        let shards = (0..NUM_SHARDS).map(|_| RwLock::new(HashMap::new())).collect();

        Self {
            shards,
            default_ttl,
            expired_count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard(&self, key: &K) -> &Shard<K, V> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    fn read(shard: &Shard<K, V>) -> RwLockReadGuard<'_, HashMap<K, Entry<V>>> {
        shard.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(shard: &Shard<K, V>) -> RwLockWriteGuard<'_, HashMap<K, Entry<V>>> {
        shard.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts `value` unless a live entry already holds `key`.
    ///
    /// # Returns
    ///
    /// `Err(value)` gives the value back when the key is taken.
    pub fn insert_if_absent(&self, key: K, value: V, ttl: Option<Duration>) -> Result<(), V> {
        let now = Instant::now();
        let mut data = Self::write(self.shard(&key));

        if data.get(&key).is_some_and(|entry| !entry.is_expired(now)) {
            return Err(value);
        }

        let expires_at = ttl.or(self.default_ttl).map(|ttl| now + ttl);
        data.insert(key, Entry { value, expires_at });
        Ok(())
    }

    /// Removes and returns the entry for `key`, expired or not.
    ///
    /// Expired entries are still handed back so the caller can settle them;
    /// the sweeper simply has not reached them yet.
    pub fn remove(&self, key: &K) -> Option<V> {
        Self::write(self.shard(key))
            .remove(key)
            .map(|entry| entry.value)
    }

    /// Returns true if a live entry holds `key`.
    pub fn contains_key(&self, key: &K) -> bool {
        let now = Instant::now();
        Self::read(self.shard(key))
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Number of entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| Self::read(shard).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total entries removed by [`evict_expired`](Self::evict_expired).
    pub fn expired_count(&self) -> u64 {
        self.expired_count.load(Ordering::Relaxed)
    }

    /// Removes every expired entry and returns them.
    pub fn evict_expired(&self) -> Vec<(K, V)> {
        let now = Instant::now();
        let mut evicted = Vec::new();

        for shard in &self.shards {
            let mut data = Self::write(shard);
            if !data.values().any(|entry| entry.is_expired(now)) {
                continue;
            }

            let (expired, live): (HashMap<K, Entry<V>>, HashMap<K, Entry<V>>) =
                std::mem::take(&mut *data)
                    .into_iter()
                    .partition(|(_, entry)| entry.is_expired(now));
            *data = live;

            evicted.extend(expired.into_iter().map(|(key, entry)| (key, entry.value)));
        }

        if !evicted.is_empty() {
            self.expired_count
                .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        }

        evicted
    }

    /// Removes every entry.
    pub fn drain(&self) -> Vec<(K, V)> {
        let mut drained = Vec::new();

        for shard in &self.shards {
            drained.extend(
                Self::write(shard)
                    .drain()
                    .map(|(key, entry)| (key, entry.value)),
            );
        }

        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_insert_and_remove() {
        let map = ExpiringMap::new(None);

        assert!(map.insert_if_absent(7u64, "seven", None).is_ok());
        assert!(map.contains_key(&7));
        assert_eq!(map.len(), 1);

        assert_eq!(map.remove(&7), Some("seven"));
        assert!(!map.contains_key(&7));
        assert!(map.is_empty());
    }

    #[test]
    fn test_insert_if_absent_refuses_live_key() {
        let map = ExpiringMap::new(None);

        assert!(map.insert_if_absent(1u64, "first", None).is_ok());
        assert_eq!(map.insert_if_absent(1u64, "second", None), Err("second"));
        assert_eq!(map.remove(&1), Some("first"));
    }

    #[test]
    fn test_expired_entry_is_lazily_absent() {
        let map = ExpiringMap::new(None);
        map.insert_if_absent(1u64, "short", Some(Duration::from_millis(20)))
            .unwrap();

        thread::sleep(Duration::from_millis(40));

        assert!(!map.contains_key(&1));
        // Still physically present until evicted
        assert_eq!(map.len(), 1);
        // A new insert may take the slot over
        assert!(map.insert_if_absent(1u64, "again", None).is_ok());
        assert_eq!(map.remove(&1), Some("again"));
    }

    #[test]
    fn test_remove_returns_expired_entry() {
        let map = ExpiringMap::new(Some(Duration::from_millis(10)));
        map.insert_if_absent(3u64, "late", None).unwrap();

        thread::sleep(Duration::from_millis(30));

        assert_eq!(map.remove(&3), Some("late"));
    }

    #[test]
    fn test_evict_expired() {
        let map = ExpiringMap::new(None);

        for i in 0..10u64 {
            map.insert_if_absent(i, i, Some(Duration::from_millis(10)))
                .unwrap();
        }
        for i in 10..20u64 {
            map.insert_if_absent(i, i, Some(Duration::from_secs(60)))
                .unwrap();
        }

        thread::sleep(Duration::from_millis(30));

        let mut evicted = map.evict_expired();
        evicted.sort();

        assert_eq!(evicted.len(), 10);
        assert_eq!(evicted[0], (0, 0));
        assert_eq!(evicted[9], (9, 9));
        assert_eq!(map.len(), 10);
        assert_eq!(map.expired_count(), 10);

        // Nothing left to evict
        assert!(map.evict_expired().is_empty());
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let map = ExpiringMap::new(None);
        map.insert_if_absent("k", 1, None).unwrap();

        thread::sleep(Duration::from_millis(20));

        assert!(map.evict_expired().is_empty());
        assert!(map.contains_key(&"k"));
    }

    #[test]
    fn test_drain() {
        let map = ExpiringMap::new(None);
        for i in 0..50u64 {
            map.insert_if_absent(i, i * 2, None).unwrap();
        }

        let drained = map.drain();

        assert_eq!(drained.len(), 50);
        assert!(map.is_empty());
    }

    #[test]
    fn test_concurrent_inserts() {
        use std::sync::Arc;

        let map = Arc::new(ExpiringMap::new(None));
        let mut handles = vec![];

        for t in 0..8u64 {
            let map = Arc::clone(&map);
            handles.push(thread::spawn(move || {
                for i in 0..100u64 {
                    map.insert_if_absent(t * 1000 + i, i, None).unwrap();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(map.len(), 800);
    }
}
