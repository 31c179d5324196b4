// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! JSON-file snapshot cache.
//!
//! Layout: `<base>/<namespace>/<key>.json`, both components escaped so that
//! any string maps to a single path segment. Each document records when it
//! was stored; documents older than the retention window read as absent and
//! are deleted by [`FileCache::sweep`].

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sudu_core::{ConditionKey, ConditionValue, SnapshotCache};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::CacheConfig;

/// Error type for file cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// Serialization/deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct Document<E> {
    stored_at_secs: u64,
    entries: E,
}

#[derive(Deserialize)]
struct Stamp {
    stored_at_secs: u64,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

/// Escapes everything but `[A-Za-z0-9_-]` as `%XX`.
fn segment(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for byte in part.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    if out.is_empty() {
        out.push('%');
    }
    out
}

/// Snapshot cache persisted as JSON files.
#[derive(Debug, Clone)]
pub struct FileCache {
    base: PathBuf,
    ttl_secs: u64,
}

impl FileCache {
    /// Opens (creating if needed) a cache rooted at `base` with the default
    /// 24 h retention.
    pub fn open(base: impl Into<PathBuf>) -> Result<Self, CacheError> {
        Self::open_with(base, &CacheConfig::default())
    }

    /// Opens a cache rooted at `base` using `config`'s retention window.
    pub fn open_with(base: impl Into<PathBuf>, config: &CacheConfig) -> Result<Self, CacheError> {
        let base = base.into();
        fs::create_dir_all(&base)?;
        Ok(Self {
            base,
            ttl_secs: config.ttl_secs,
        })
    }

    /// Root directory.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// File holding `(namespace, key)`.
    pub fn path_for(&self, namespace: &str, key: &str) -> PathBuf {
        self.base
            .join(segment(namespace))
            .join(format!("{}.json", segment(key)))
    }

    fn expired(&self, stored_at_secs: u64, now: u64) -> bool {
        now.saturating_sub(stored_at_secs) >= self.ttl_secs
    }

    /// Reads `(namespace, key)`. `Ok(None)` if missing or expired.
    pub fn load<E>(&self, namespace: &str, key: &str) -> Result<Option<E>, CacheError>
    where
        E: DeserializeOwned,
    {
        let bytes = match fs::read(self.path_for(namespace, key)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let document: Document<E> = serde_json::from_slice(&bytes)?;
        if self.expired(document.stored_at_secs, now_secs()) {
            debug!(namespace, key, "cached snapshot expired");
            return Ok(None);
        }
        Ok(Some(document.entries))
    }

    /// Writes `entries` to `(namespace, key)`, stamped with the current time.
    pub fn save<E>(&self, namespace: &str, key: &str, entries: &E) -> Result<(), CacheError>
    where
        E: Serialize,
    {
        let path = self.path_for(namespace, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let document = Document {
            stored_at_secs: now_secs(),
            entries,
        };
        fs::write(path, serde_json::to_vec_pretty(&document)?)?;
        Ok(())
    }

    /// Deletes `(namespace, key)`. Returns `true` if a file was removed.
    pub fn remove(&self, namespace: &str, key: &str) -> Result<bool, CacheError> {
        match fs::remove_file(self.path_for(namespace, key)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Deletes every expired document. Returns how many were deleted.
    ///
    /// Documents that cannot be parsed are left alone and logged.
    #[instrument(skip(self), fields(base = %self.base.display()))]
    pub fn sweep(&self) -> Result<usize, CacheError> {
        let now = now_secs();
        let mut removed = 0;
        for namespace in fs::read_dir(&self.base)? {
            let namespace = namespace?;
            if !namespace.file_type()?.is_dir() {
                continue;
            }
            for document in fs::read_dir(namespace.path())? {
                let path = document?.path();
                if path.extension().is_none_or(|ext| ext != "json") {
                    continue;
                }
                let stamp = fs::read(&path).map_err(CacheError::from).and_then(|bytes| {
                    serde_json::from_slice::<Stamp>(&bytes).map_err(CacheError::from)
                });
                match stamp {
                    Ok(stamp) if self.expired(stamp.stored_at_secs, now) => {
                        fs::remove_file(&path)?;
                        removed += 1;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(path = %path.display(), %err, "skipping unreadable snapshot");
                    }
                }
            }
        }
        debug!(removed, "swept file cache");
        Ok(removed)
    }
}

impl<K, V> SnapshotCache<K, V> for FileCache
where
    K: ConditionKey + Serialize + DeserializeOwned,
    V: ConditionValue + Serialize + DeserializeOwned,
{
    fn get(&self, namespace: &str, key: &str) -> Vec<(K, V)> {
        match self.load::<Vec<(K, V)>>(namespace, key) {
            Ok(entries) => entries.unwrap_or_default(),
            Err(err) => {
                warn!(namespace, key, %err, "cache read failed, treating as a miss");
                Vec::new()
            }
        }
    }

    fn set(&self, namespace: &str, key: &str, entries: Vec<(K, V)>) {
        if let Err(err) = self.save(namespace, key, &entries) {
            warn!(namespace, key, %err, "cache write failed");
        }
    }

    fn delete(&self, namespace: &str, key: &str) {
        if let Err(err) = self.remove(namespace, key) {
            warn!(namespace, key, %err, "cache delete failed");
        }
    }
}
