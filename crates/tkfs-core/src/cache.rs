//! Key cache (spec §4.4): a bounded LRU of KMS-sourced keys with TTL
//! expiry, zeroized on eviction. Grounded on
//! `examples/original_source/internal/cryptocore/tk_aead_keys.go`'s
//! `getKey`, which wraps a `lru.NewLRUCacheWithExpire` behind a single
//! global mutex.
//!
//! The original serializes ALL key lookups behind one mutex, so two
//! threads that miss on the same key id simply do the KMS round trip
//! twice (the second overwrites the first's cache entry). This cache
//! closes that gap with a small singleflight: a miss registers the key id
//! as in flight before releasing the lock, and any other thread that
//! misses on the same id blocks on a condvar until the first caller's
//! fetch completes (spec §9 Open Questions).

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;
use std::num::NonZeroUsize;
use zeroize::Zeroize;

use crate::error::Result;

const CACHE_CAPACITY: usize = 1000;
const KEY_TTL: Duration = Duration::from_secs(5 * 60);

struct Entry {
    key: Vec<u8>,
    expires_at: Instant,
}

enum Slot {
    InFlight,
    Ready,
}

struct Inner {
    cache: LruCache<String, Entry>,
    in_flight: HashMap<String, Slot>,
}

/// Thread-safe, TTL-expiring, singleflight-deduplicated key cache.
///
/// `fetch` takes the key id plus a closure that performs the actual KMS
/// round trip; the closure runs with no lock held, and its result is
/// shared with any other thread that was waiting on the same id.
pub struct KeyCache {
    inner: Mutex<Inner>,
    cv: Condvar,
}

impl KeyCache {
    pub fn new() -> Self {
        KeyCache {
            inner: Mutex::new(Inner {
                cache: LruCache::new(NonZeroUsize::new(CACHE_CAPACITY).unwrap()),
                in_flight: HashMap::new(),
            }),
            cv: Condvar::new(),
        }
    }

    /// Fetch the key named `id`, consulting the cache first. On a miss,
    /// exactly one caller across all threads invokes `fetch_fn`; any
    /// concurrent caller for the same `id` blocks until that fetch
    /// completes and then reads the now-cached value.
    pub fn get_or_fetch(&self, id: &str, fetch_fn: impl FnOnce() -> Result<Vec<u8>>) -> Result<Vec<u8>> {
        loop {
            let mut guard = self.inner.lock().expect("key cache poisoned");
            if let Some(entry) = guard.cache.get(id) {
                if entry.expires_at > Instant::now() {
                    return Ok(entry.key.clone());
                }
                guard.cache.pop(id);
            }
            match guard.in_flight.get(id) {
                Some(Slot::InFlight) => {
                    guard = self
                        .cv
                        .wait_while(guard, |g| matches!(g.in_flight.get(id), Some(Slot::InFlight)))
                        .expect("key cache poisoned");
                    drop(guard);
                    continue;
                }
                _ => {
                    guard.in_flight.insert(id.to_string(), Slot::InFlight);
                    drop(guard);
                    break;
                }
            }
        }

        let result = fetch_fn();

        let mut guard = self.inner.lock().expect("key cache poisoned");
        guard.in_flight.remove(id);
        if let Ok(key) = &result {
            guard.cache.put(
                id.to_string(),
                Entry { key: key.clone(), expires_at: Instant::now() + KEY_TTL },
            );
        }
        drop(guard);
        self.cv.notify_all();
        result
    }

    /// Number of live (non-expired) entries currently cached. Test-only
    /// introspection hook.
    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().expect("key cache poisoned").cache.len()
    }
}

impl Default for KeyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Entry {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}
