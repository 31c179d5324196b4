// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory snapshot cache fake that records how it was used.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use sudu_core::{CacheBinding, SnapshotCache};

type Slot = (String, String);

/// In-memory implementation of [`SnapshotCache`] for testing.
///
/// Clones share the same storage, so a test can keep one handle for
/// assertions and hand another to an orchestrator. Entries never expire.
///
/// # Example
///
/// ```
/// use sudu_core::Orchestrator;
/// use sudu_dry_tests::RecordingCache;
///
/// let cache = RecordingCache::<&'static str, i64>::new();
/// let orchestrator = Orchestrator::builder()
///     .cache(cache.binding("ns", "run"))
///     .build();
/// orchestrator.go(|scope| {
///     scope.satisfy([("x", 1)]);
///     Ok(())
/// });
/// orchestrator.wait().unwrap();
/// assert_eq!(cache.get_count(), 1);
/// assert_eq!(cache.snapshot("ns", "run"), Some(vec![("x", 1)]));
/// ```
pub struct RecordingCache<K, V> {
    inner: Arc<Mutex<RecordingCacheInner<K, V>>>,
}

struct RecordingCacheInner<K, V> {
    slots: HashMap<Slot, Vec<(K, V)>>,
    get_count: usize,
    set_count: usize,
    delete_count: usize,
}

impl<K, V> RecordingCache<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RecordingCacheInner {
                slots: HashMap::new(),
                get_count: 0,
                set_count: 0,
                delete_count: 0,
            })),
        }
    }

    /// Create a cache holding `entries` under `(namespace, key)`.
    pub fn with_snapshot(namespace: &str, key: &str, entries: Vec<(K, V)>) -> Self {
        let cache = Self::new();
        cache
            .lock()
            .slots
            .insert((namespace.to_owned(), key.to_owned()), entries);
        cache
    }

    /// A binding of this cache to `(namespace, key)` for an orchestrator.
    pub fn binding(&self, namespace: &str, key: &str) -> CacheBinding<K, V> {
        CacheBinding::new(Arc::new(self.clone()), namespace, key)
    }

    /// The stored snapshot, without counting as a `get`.
    pub fn snapshot(&self, namespace: &str, key: &str) -> Option<Vec<(K, V)>> {
        self.lock()
            .slots
            .get(&(namespace.to_owned(), key.to_owned()))
            .cloned()
    }

    /// Number of `get` calls.
    pub fn get_count(&self) -> usize {
        self.lock().get_count
    }

    /// Number of `set` calls.
    pub fn set_count(&self) -> usize {
        self.lock().set_count
    }

    /// Number of `delete` calls.
    pub fn delete_count(&self) -> usize {
        self.lock().delete_count
    }

    fn lock(&self) -> MutexGuard<'_, RecordingCacheInner<K, V>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<K, V> Clone for RecordingCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Default for RecordingCache<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SnapshotCache<K, V> for RecordingCache<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, namespace: &str, key: &str) -> Vec<(K, V)> {
        let mut inner = self.lock();
        inner.get_count += 1;
        inner
            .slots
            .get(&(namespace.to_owned(), key.to_owned()))
            .cloned()
            .unwrap_or_default()
    }

    fn set(&self, namespace: &str, key: &str, entries: Vec<(K, V)>) {
        let mut inner = self.lock();
        inner.set_count += 1;
        inner
            .slots
            .insert((namespace.to_owned(), key.to_owned()), entries);
    }

    fn delete(&self, namespace: &str, key: &str) {
        let mut inner = self.lock();
        inner.delete_count += 1;
        inner.slots.remove(&(namespace.to_owned(), key.to_owned()));
    }
}
