// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Snapshot cache port.
//!
//! An orchestrator can restore a previous run's confirmed conditions as
//! legacy guesses and save its own confirmed conditions when it succeeds.
//! The storage lives behind [`SnapshotCache`]; expiry and eviction are the
//! implementation's business.

use std::fmt;
use std::sync::Arc;

use tracing::info;

/// Namespaced snapshot storage.
///
/// Implementations report no errors: a failed read is a miss, a failed write
/// is dropped.
pub trait SnapshotCache<K, V>: Send + Sync {
    /// The stored snapshot, or an empty one if absent or expired.
    fn get(&self, namespace: &str, key: &str) -> Vec<(K, V)>;

    /// Replaces the stored snapshot.
    fn set(&self, namespace: &str, key: &str, entries: Vec<(K, V)>);

    /// Removes the stored snapshot.
    fn delete(&self, namespace: &str, key: &str);
}

/// One `(namespace, key)` slot in a cache.
pub struct CacheBinding<K, V> {
    cache: Arc<dyn SnapshotCache<K, V>>,
    namespace: String,
    key: String,
}

impl<K, V> CacheBinding<K, V> {
    /// Binds `cache` to one slot.
    pub fn new(
        cache: Arc<dyn SnapshotCache<K, V>>,
        namespace: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            namespace: namespace.into(),
            key: key.into(),
        }
    }

    /// Namespace of the slot.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Key of the slot.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Loads the stored snapshot.
    pub fn restore(&self) -> Vec<(K, V)> {
        let entries = self.cache.get(&self.namespace, &self.key);
        info!(
            namespace = %self.namespace,
            key = %self.key,
            entries = entries.len(),
            "restored snapshot"
        );
        entries
    }

    /// Stores `entries` as the new snapshot.
    pub fn store(&self, entries: Vec<(K, V)>) {
        info!(
            namespace = %self.namespace,
            key = %self.key,
            entries = entries.len(),
            "saving snapshot"
        );
        self.cache.set(&self.namespace, &self.key, entries);
    }

    /// Forgets the stored snapshot.
    pub fn clear(&self) {
        self.cache.delete(&self.namespace, &self.key);
    }
}

impl<K, V> Clone for CacheBinding<K, V> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            namespace: self.namespace.clone(),
            key: self.key.clone(),
        }
    }
}

impl<K, V> fmt::Debug for CacheBinding<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBinding")
            .field("namespace", &self.namespace)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
