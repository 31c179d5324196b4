// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-process cache with per-entry expiry and a janitor thread.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use sudu_core::{ConditionKey, ConditionValue, SnapshotCache};
use tracing::{debug, warn};

use crate::config::CacheConfig;

struct Entry<T> {
    value: T,
    /// `None` when the window runs past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl<T> Entry<T> {
    fn live_at(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

type Bucket<T> = HashMap<String, Entry<T>>;

struct Buckets<T> {
    namespaces: Mutex<HashMap<String, Bucket<T>>>,
    ttl: Duration,
}

impl<T> Buckets<T> {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Bucket<T>>> {
        self.namespaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn sweep(&self, now: Instant) -> usize {
        let mut namespaces = self.lock();
        let mut evicted = 0;
        for bucket in namespaces.values_mut() {
            let before = bucket.len();
            bucket.retain(|_, entry| entry.live_at(now));
            evicted += before - bucket.len();
        }
        namespaces.retain(|_, bucket| !bucket.is_empty());
        evicted
    }
}

/// Stops and joins the sweeping thread when dropped.
struct Janitor {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl Janitor {
    fn spawn<T: Send + 'static>(buckets: Arc<Buckets<T>>, interval: Duration) -> Option<Self> {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = Arc::clone(&stop);
        let spawned = thread::Builder::new()
            .name("sudu-cache-janitor".to_owned())
            .spawn(move || {
                let (lock, wake) = &*signal;
                let mut stopped = lock.lock().unwrap_or_else(PoisonError::into_inner);
                loop {
                    stopped = wake
                        .wait_timeout(stopped, interval)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                    if *stopped {
                        break;
                    }
                    let evicted = buckets.sweep(Instant::now());
                    if evicted > 0 {
                        debug!(evicted, "janitor evicted expired entries");
                    }
                }
            });
        match spawned {
            Ok(handle) => Some(Self {
                stop,
                handle: Some(handle),
            }),
            Err(err) => {
                warn!(%err, "cache janitor not started; expired entries are evicted on read only");
                None
            }
        }
    }
}

impl Drop for Janitor {
    fn drop(&mut self) {
        let (lock, wake) = &*self.stop;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        wake.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("cache janitor panicked");
            }
        }
    }
}

/// Namespaced in-memory cache.
///
/// Every entry expires `ttl` after it was last inserted. Expired entries read
/// as absent right away and are evicted by a background thread every
/// `sweep_interval`; the thread is stopped when the cache is dropped.
///
/// `MemoryCache<Vec<(K, V)>>` is a [`SnapshotCache`].
pub struct MemoryCache<T> {
    buckets: Arc<Buckets<T>>,
    janitor: Option<Janitor>,
}

impl<T: Clone + Send + 'static> MemoryCache<T> {
    /// A cache with the default retention (24 h, swept hourly).
    pub fn new() -> Self {
        Self::with_config(&CacheConfig::default())
    }

    /// A cache using `config`'s retention settings.
    pub fn with_config(config: &CacheConfig) -> Self {
        Self::with_retention(config.ttl(), config.sweep_interval())
    }

    /// A cache keeping entries for `ttl`, sweeping every `sweep_interval`.
    /// A zero interval disables the janitor.
    pub fn with_retention(ttl: Duration, sweep_interval: Duration) -> Self {
        let buckets = Arc::new(Buckets {
            namespaces: Mutex::new(HashMap::new()),
            ttl,
        });
        let janitor = if sweep_interval.is_zero() {
            None
        } else {
            Janitor::spawn(Arc::clone(&buckets), sweep_interval)
        };
        Self { buckets, janitor }
    }

    /// The live value stored under `(namespace, key)`.
    pub fn lookup(&self, namespace: &str, key: &str) -> Option<T> {
        let now = Instant::now();
        self.buckets
            .lock()
            .get(namespace)
            .and_then(|bucket| bucket.get(key))
            .filter(|entry| entry.live_at(now))
            .map(|entry| entry.value.clone())
    }

    /// Stores `value`, restarting its retention window.
    pub fn insert(&self, namespace: &str, key: &str, value: T) {
        let expires_at = Instant::now().checked_add(self.buckets.ttl);
        self.buckets
            .lock()
            .entry(namespace.to_owned())
            .or_default()
            .insert(key.to_owned(), Entry { value, expires_at });
    }

    /// Removes `(namespace, key)`. Returns `true` if something was stored.
    pub fn remove(&self, namespace: &str, key: &str) -> bool {
        let mut namespaces = self.buckets.lock();
        let Some(bucket) = namespaces.get_mut(namespace) else {
            return false;
        };
        let removed = bucket.remove(key).is_some();
        if bucket.is_empty() {
            namespaces.remove(namespace);
        }
        removed
    }
}

impl<T> MemoryCache<T> {
    /// Evicts every expired entry now. Returns how many were evicted.
    pub fn sweep(&self) -> usize {
        self.buckets.sweep(Instant::now())
    }

    /// Stored entries, expired or not, across all namespaces.
    pub fn len(&self) -> usize {
        self.buckets.lock().values().map(HashMap::len).sum()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retention window.
    pub fn ttl(&self) -> Duration {
        self.buckets.ttl
    }
}

impl<T: Clone + Send + 'static> Default for MemoryCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for MemoryCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("ttl", &self.buckets.ttl)
            .field("len", &self.len())
            .field("janitor", &self.janitor.is_some())
            .finish()
    }
}

impl<K: ConditionKey, V: ConditionValue> SnapshotCache<K, V> for MemoryCache<Vec<(K, V)>> {
    fn get(&self, namespace: &str, key: &str) -> Vec<(K, V)> {
        self.lookup(namespace, key).unwrap_or_default()
    }

    fn set(&self, namespace: &str, key: &str, entries: Vec<(K, V)>) {
        self.insert(namespace, key, entries);
    }

    fn delete(&self, namespace: &str, key: &str) {
        self.remove(namespace, key);
    }
}
