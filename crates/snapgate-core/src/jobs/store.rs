//! JobStore port と JobTable 実装
//!
//! JobTable はジョブごとに Mutex を持ち、マップ全体は RwLock で保護します。
//! 別々のジョブの更新はお互いを待ちません。
//! 永続化パスを指定した場合、変更のたびに JSON インデックスをアトミックに書き換えます。
//! 書き換えはブロッキング I/O なので、非同期コードからは spawn_blocking 経由で呼びます。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::domain::{JobId, JobRecord, TransitionError};
use crate::observability::JobCounts;
use crate::persist::{load_json_or_default, write_json_atomic};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job already exists: {0}")]
    Duplicate(JobId),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("worker pool is at capacity")]
    QueueFull,

    #[error("job store operation interrupted: {0}")]
    Interrupted(String),
}

/// The job table: the only place job records live.
pub trait JobStore: Send + Sync {
    fn insert(&self, record: JobRecord) -> Result<(), JobError>;

    /// Snapshot of one record.
    fn get(&self, job_id: &JobId) -> Option<JobRecord>;

    /// Apply `f` to the record while holding its lock.
    ///
    /// `f` works on a copy; the copy replaces the record only when `f` succeeds.
    /// Returns the record as stored after the call.
    fn update(
        &self,
        job_id: &JobId,
        f: &mut dyn FnMut(&mut JobRecord) -> Result<(), JobError>,
    ) -> Result<JobRecord, JobError>;

    /// Delete terminal jobs last updated before `cutoff`. Returns how many were deleted.
    fn remove_terminal_before(&self, cutoff: DateTime<Utc>) -> usize;

    fn counts(&self) -> JobCounts;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type Slot = Arc<Mutex<JobRecord>>;

pub struct JobTable {
    records: RwLock<HashMap<JobId, Slot>>,
    path: Option<PathBuf>,
    persist_lock: Mutex<()>,
}

impl JobTable {
    /// A table that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            path: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// A table backed by the JSON index at `path`.
    ///
    /// A corrupt index is treated as empty. Jobs a previous process left
    /// pending or processing are kept as they are, and reported.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let loaded: Vec<JobRecord> = load_json_or_default(&path);

        let stranded = loaded.iter().filter(|r| !r.status.is_terminal()).count();
        if stranded > 0 {
            tracing::warn!(
                path = %path.display(),
                stranded,
                "jobs left unfinished by a previous run will stay non-terminal"
            );
        }
        tracing::debug!(path = %path.display(), jobs = loaded.len(), "job table opened");

        let records = loaded
            .into_iter()
            .map(|r| (r.job_id, Arc::new(Mutex::new(r))))
            .collect();
        Self {
            records: RwLock::new(records),
            path: Some(path),
            persist_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn slot(&self, job_id: &JobId) -> Option<Slot> {
        self.records.read().get(job_id).map(Arc::clone)
    }

    fn snapshot(&self) -> Vec<JobRecord> {
        let slots: Vec<Slot> = self.records.read().values().map(Arc::clone).collect();
        let mut records: Vec<JobRecord> = slots.iter().map(|s| s.lock().clone()).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.job_id.cmp(&b.job_id)));
        records
    }

    fn save(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let _guard = self.persist_lock.lock();
        if let Err(e) = write_json_atomic(path, &self.snapshot()) {
            tracing::warn!(error = %e, "failed to save job index");
        }
    }
}

impl JobStore for JobTable {
    fn insert(&self, record: JobRecord) -> Result<(), JobError> {
        {
            let mut records = self.records.write();
            if records.contains_key(&record.job_id) {
                return Err(JobError::Duplicate(record.job_id));
            }
            records.insert(record.job_id, Arc::new(Mutex::new(record)));
        }
        self.save();
        Ok(())
    }

    fn get(&self, job_id: &JobId) -> Option<JobRecord> {
        self.slot(job_id).map(|slot| slot.lock().clone())
    }

    fn update(
        &self,
        job_id: &JobId,
        f: &mut dyn FnMut(&mut JobRecord) -> Result<(), JobError>,
    ) -> Result<JobRecord, JobError> {
        let slot = self.slot(job_id).ok_or(JobError::NotFound(*job_id))?;
        let updated = {
            let mut record = slot.lock();
            let mut draft = record.clone();
            f(&mut draft)?;
            if draft == *record {
                return Ok(draft);
            }
            *record = draft.clone();
            draft
        };
        self.save();
        Ok(updated)
    }

    fn remove_terminal_before(&self, cutoff: DateTime<Utc>) -> usize {
        let removed = {
            let mut records = self.records.write();
            let before = records.len();
            records.retain(|_, slot| {
                let record = slot.lock();
                !(record.status.is_terminal() && record.updated_at < cutoff)
            });
            before - records.len()
        };
        if removed > 0 {
            self.save();
        }
        removed
    }

    fn counts(&self) -> JobCounts {
        let slots: Vec<Slot> = self.records.read().values().map(Arc::clone).collect();
        let mut counts = JobCounts::default();
        for slot in slots {
            counts.record(slot.lock().status);
        }
        counts
    }

    fn len(&self) -> usize {
        self.records.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobStatus, WebhookTarget};
    use chrono::{Duration, TimeZone};
    use ulid::Ulid;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn record(secs: i64) -> JobRecord {
        JobRecord::new(
            JobId::from_ulid(Ulid::new()),
            "screenshot",
            serde_json::json!({"url": "https://example.com"}),
            None,
            at(secs),
        )
    }

    fn finished(secs: i64) -> JobRecord {
        let mut r = record(secs);
        r.start_processing(at(secs)).unwrap();
        r.complete(serde_json::json!({}), at(secs)).unwrap();
        r
    }

    #[test]
    fn insert_get_and_duplicate() {
        let table = JobTable::in_memory();
        let r = record(0);
        table.insert(r.clone()).unwrap();
        assert_eq!(table.get(&r.job_id), Some(r.clone()));
        assert_eq!(table.insert(r.clone()), Err(JobError::Duplicate(r.job_id)));
    }

    #[test]
    fn failed_update_leaves_record_untouched() {
        let table = JobTable::in_memory();
        let r = record(0);
        table.insert(r.clone()).unwrap();

        let err = table
            .update(&r.job_id, &mut |job| {
                job.error = Some("scribble".into());
                job.complete(serde_json::json!({}), at(1))?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, JobError::Transition(_)));
        assert_eq!(table.get(&r.job_id), Some(r));
    }

    #[test]
    fn update_unknown_job() {
        let table = JobTable::in_memory();
        let id = JobId::from_ulid(Ulid::new());
        assert_eq!(
            table.update(&id, &mut |_| Ok(())),
            Err(JobError::NotFound(id))
        );
    }

    #[test]
    fn counts_by_status() {
        let table = JobTable::in_memory();
        table.insert(record(0)).unwrap();
        table.insert(record(0)).unwrap();
        table.insert(finished(0)).unwrap();
        let counts = table.counts();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn reaping_keeps_recent_and_unfinished_jobs() {
        let table = JobTable::in_memory();
        let old_done = finished(0);
        let old_pending = record(0);
        let new_done = finished(100);
        for r in [&old_done, &old_pending, &new_done] {
            table.insert(r.clone()).unwrap();
        }

        assert_eq!(table.remove_terminal_before(at(50)), 1);
        assert!(table.get(&old_done.job_id).is_none());
        assert!(table.get(&old_pending.job_id).is_some());
        assert!(table.get(&new_done.job_id).is_some());
    }

    #[test]
    fn persisted_table_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("webhooks").join("jobs.json");

        let mut with_hook = record(0);
        with_hook.webhook = Some(WebhookTarget {
            url: "https://hooks.test".into(),
            secret: Some("s".into()),
        });
        let id = with_hook.job_id;
        {
            let table = JobTable::open(&path);
            table.insert(with_hook).unwrap();
            table
                .update(&id, &mut |job| Ok(job.start_processing(at(1))?))
                .unwrap();
        }

        let reopened = JobTable::open(&path);
        let loaded = reopened.get(&id).unwrap();
        assert_eq!(loaded.status, JobStatus::Processing);
        assert_eq!(loaded.webhook.unwrap().secret.as_deref(), Some("s"));
        assert_eq!(loaded.updated_at, at(1));
    }

    #[test]
    fn corrupt_index_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, "{\"truncated\": [").unwrap();
        let table = JobTable::open(&path);
        assert!(table.is_empty());

        // and the next write replaces the corrupt file
        table.insert(record(0)).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<JobRecord> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn concurrent_updates_on_distinct_jobs() {
        let table = Arc::new(JobTable::in_memory());
        let ids: Vec<JobId> = (0..8)
            .map(|_| {
                let r = record(0);
                let id = r.job_id;
                table.insert(r).unwrap();
                id
            })
            .collect();

        let handles: Vec<_> = ids
            .iter()
            .copied()
            .map(|id| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    table
                        .update(&id, &mut |job| Ok(job.start_processing(at(1) + Duration::seconds(1))?))
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(table.counts().processing, 8);
    }
}
