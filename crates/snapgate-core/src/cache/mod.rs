//! CacheStore - フィンガープリントをキーにしたキャプチャ結果のキャッシュ
//!
//! - キャッシュ済みファイルは `<dir>/<fingerprint>.<ext>` に置く
//! - インデックスは `<dir>/cache_index.json`（毎回アトミックに書き換え）
//! - 期限切れ（TTL 超過）またはファイル消失のエントリは lookup 時に削除
//! - キャッシュ済みファイルの作成・削除はインデックスの書き込みロック内で行う
//!
//! All methods do blocking file I/O; async callers should go through
//! `spawn_blocking`.

mod fingerprint;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::persist::{StoreError, load_json_or_default, write_json_atomic};
use crate::ports::Clock;

pub use self::fingerprint::{Fingerprint, ParseFingerprintError};

pub const INDEX_FILE: &str = "cache_index.json";

/// Index metadata for one cached artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub file_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub original_path: PathBuf,
}

pub struct CacheStore {
    dir: PathBuf,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    index: RwLock<HashMap<Fingerprint, CacheEntry>>,
    persist_lock: Mutex<()>,
}

impl CacheStore {
    /// Open (or create) a cache rooted at `dir`, loading any existing index.
    pub fn open(
        dir: impl Into<PathBuf>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        let index: HashMap<Fingerprint, CacheEntry> = load_json_or_default(&dir.join(INDEX_FILE));
        tracing::debug!(dir = %dir.display(), entries = index.len(), "cache opened");
        Ok(Self {
            dir,
            ttl,
            clock,
            index: RwLock::new(index),
            persist_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now - entry.created_at > self.ttl
    }

    /// Path of a valid cached artifact for `key`, if any.
    ///
    /// Expired entries and entries whose file has disappeared are evicted.
    pub fn lookup(&self, key: &Fingerprint) -> Option<PathBuf> {
        let entry = self.index.read().get(key).cloned()?;
        let now = self.clock.now();

        let reason = if self.is_expired(&entry, now) {
            "expired"
        } else if !entry.file_path.is_file() {
            "missing artifact"
        } else {
            tracing::debug!(fingerprint = %key, "cache hit");
            return Some(entry.file_path);
        };

        tracing::debug!(fingerprint = %key, reason, "cache evict");
        self.evict(key, &entry);
        None
    }

    /// Remove `key` only if it still maps to `expected`, so a concurrent store wins.
    fn evict(&self, key: &Fingerprint, expected: &CacheEntry) {
        let removed = {
            let mut index = self.index.write();
            if index.get(key) != Some(expected) {
                return;
            }
            // ファイル削除もロック内で。同じパスへの store と交差させない
            let removed = index.remove(key);
            remove_quietly(&expected.file_path);
            removed
        };
        if removed.is_some() {
            self.save_index();
        }
    }

    /// Copy `artifact` into cache storage under `key` and return the cached path.
    ///
    /// An existing entry for the same key is replaced.
    pub fn store(&self, key: &Fingerprint, artifact: &Path) -> Result<PathBuf, StoreError> {
        let file_name = match artifact.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{key}.{ext}"),
            None => key.to_string(),
        };
        let target = self.dir.join(file_name);

        let bytes = std::fs::read(artifact).map_err(|e| StoreError::io(artifact, e))?;
        {
            let mut index = self.index.write();
            crate::persist::write_bytes_atomic(&target, &bytes)?;
            let entry = CacheEntry {
                file_path: target.clone(),
                created_at: self.clock.now(),
                original_path: artifact.to_path_buf(),
            };
            index.insert(key.clone(), entry);
        }
        self.persist()?;
        tracing::debug!(fingerprint = %key, path = %target.display(), "cache store");
        Ok(target)
    }

    /// Remove every expired entry and its file. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<CacheEntry> = {
            let mut index = self.index.write();
            let keys: Vec<Fingerprint> = index
                .iter()
                .filter(|(_, entry)| self.is_expired(entry, now))
                .map(|(key, _)| key.clone())
                .collect();
            let expired: Vec<CacheEntry> =
                keys.iter().filter_map(|key| index.remove(key)).collect();
            for entry in &expired {
                remove_quietly(&entry.file_path);
            }
            expired
        };
        if !expired.is_empty() {
            self.save_index();
            tracing::info!(removed = expired.len(), "cache sweep");
        }
        expired.len()
    }

    /// Remove every cached artifact. Returns how many entries were dropped.
    pub fn clear(&self) -> usize {
        let drained: Vec<CacheEntry> = {
            let mut index = self.index.write();
            let drained: Vec<CacheEntry> = index.drain().map(|(_, e)| e).collect();
            for entry in &drained {
                remove_quietly(&entry.file_path);
            }
            drained
        };
        self.save_index();
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Snapshot-then-write under one lock, so the file always reflects the newest map.
    fn persist(&self) -> Result<(), StoreError> {
        let _guard = self.persist_lock.lock();
        let snapshot = self.index.read().clone();
        write_json_atomic(&self.dir.join(INDEX_FILE), &snapshot)
    }

    fn save_index(&self) {
        if let Err(e) = self.persist() {
            tracing::warn!(error = %e, "failed to save cache index");
        }
    }
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove cached file");
        }
        _ => {}
    }
}
