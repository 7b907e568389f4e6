//! JobOrchestrator - 非同期ジョブのライフサイクル管理
//!
//! # フロー
//! 1. create: pending レコードを作って即座に ID を返す
//! 2. schedule: 枠を確保して processing に遷移し、work を別タスクで実行
//! 3. work の結果で completed / failed に遷移（panic も failed として記録）
//! 4. 終端遷移で webhook を一度だけ起動（配送は独立したタスク）
//! 5. drain: 実行中のジョブと配送中の webhook が全て終わるまで待つ

use std::future::Future;
use std::sync::Arc;

use chrono::Duration;
use tokio_util::task::TaskTracker;

use crate::domain::{JobId, JobRecord, JobView, WebhookTarget};
use crate::observability::JobCounts;
use crate::ports::{Clock, IdGenerator};
use crate::webhook::{DeliveryOutcome, WebhookDispatcher, WebhookPayload};

use super::pool::{Slot, WorkerPool};
use super::store::{JobError, JobStore};

/// What a unit of work reports: a result payload, or a human-readable error.
pub type WorkResult = Result<serde_json::Value, String>;

#[derive(Clone)]
pub struct JobOrchestrator {
    store: Arc<dyn JobStore>,
    pool: WorkerPool,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<WebhookDispatcher>,
    deliveries: TaskTracker,
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        pool: WorkerPool,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        dispatcher: Arc<WebhookDispatcher>,
    ) -> Self {
        Self {
            store,
            pool,
            ids,
            clock,
            dispatcher,
            deliveries: TaskTracker::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Run a store operation on the blocking pool; the index write is file I/O.
    async fn with_store<R, F>(&self, f: F) -> Result<R, JobError>
    where
        F: FnOnce(&dyn JobStore) -> Result<R, JobError> + Send + 'static,
        R: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| JobError::Interrupted(e.to_string()))?
    }

    /// Persist a new pending job and return its id. Never waits on execution.
    pub async fn create(
        &self,
        job_type: &str,
        params: serde_json::Value,
        webhook: Option<WebhookTarget>,
    ) -> Result<JobId, JobError> {
        let job_id = self.ids.generate_job_id();
        let record = JobRecord::new(job_id, job_type, params, webhook, self.clock.now());
        self.with_store(move |store| store.insert(record)).await?;
        tracing::info!(%job_id, job_type, "job created");
        Ok(job_id)
    }

    /// Run `work` for a pending job on the worker pool.
    ///
    /// Fails with `QueueFull` when no slot is free, leaving the job pending.
    /// A job can be scheduled once: later calls fail with a transition error.
    pub async fn schedule<F>(&self, job_id: JobId, work: F) -> Result<(), JobError>
    where
        F: Future<Output = WorkResult> + Send + 'static,
    {
        let slot = self.pool.try_reserve().ok_or(JobError::QueueFull)?;
        self.start(slot, job_id, work).await
    }

    /// create + schedule, reserving the slot first so a full pool leaves no pending job behind.
    pub async fn submit<F>(
        &self,
        job_type: &str,
        params: serde_json::Value,
        webhook: Option<WebhookTarget>,
        work: F,
    ) -> Result<JobId, JobError>
    where
        F: Future<Output = WorkResult> + Send + 'static,
    {
        let slot = self.pool.try_reserve().ok_or(JobError::QueueFull)?;
        let job_id = self.create(job_type, params, webhook).await?;
        self.start(slot, job_id, work).await?;
        Ok(job_id)
    }

    async fn start<F>(&self, slot: Slot, job_id: JobId, work: F) -> Result<(), JobError>
    where
        F: Future<Output = WorkResult> + Send + 'static,
    {
        let now = self.clock.now();
        self.with_store(move |store| {
            store.update(&job_id, &mut |job| Ok(job.start_processing(now)?))
        })
        .await?;
        tracing::info!(%job_id, "job processing");

        let this = self.clone();
        self.pool.spawn(slot, async move {
            // 別タスクで実行して panic を JoinError として受け取る
            let outcome = match tokio::spawn(work).await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err("job panicked during execution".to_string()),
                Err(_) => Err("job was cancelled".to_string()),
            };
            this.finish(job_id, outcome).await;
        });
        Ok(())
    }

    /// Record the terminal state and hand the webhook (if any) to the dispatcher.
    async fn finish(&self, job_id: JobId, outcome: WorkResult) {
        let now = self.clock.now();
        let updated = self
            .with_store(move |store| {
                let mut triggered = false;
                let record = store.update(&job_id, &mut |job| {
                    match &outcome {
                        Ok(result) => job.complete(result.clone(), now)?,
                        Err(message) => job.fail(message.clone(), now)?,
                    }
                    triggered = job.claim_webhook_trigger();
                    Ok(())
                })?;
                Ok((record, triggered))
            })
            .await;

        let (record, triggered) = match updated {
            Ok(updated) => updated,
            Err(e) => {
                tracing::warn!(%job_id, error = %e, "could not record job outcome");
                return;
            }
        };
        match &record.error {
            None => tracing::info!(%job_id, "job completed"),
            Some(error) => tracing::info!(%job_id, %error, "job failed"),
        }

        if triggered {
            self.spawn_delivery(&record);
        }
    }

    fn spawn_delivery(&self, record: &JobRecord) {
        let Some(target) = record.webhook.clone() else {
            return;
        };
        let payload = WebhookPayload::from(record);
        let job_id = record.job_id;
        let dispatcher = Arc::clone(&self.dispatcher);
        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);

        self.deliveries.spawn(async move {
            let outcome = dispatcher.deliver(&target, &payload).await;
            let result = tokio::task::spawn_blocking(move || {
                store.update(&job_id, &mut |job| {
                    match outcome {
                        DeliveryOutcome::Delivered { attempts } => {
                            job.mark_delivered(attempts, clock.now())
                        }
                        DeliveryOutcome::Failed { attempts } => job.mark_delivery_failed(attempts),
                    }
                    Ok(())
                })
            })
            .await
            .map_err(|e| JobError::Interrupted(e.to_string()))
            .and_then(|updated| updated);
            if let Err(e) = result {
                tracing::debug!(%job_id, error = %e, "delivery result not recorded");
            }
        });
    }

    /// Read-only snapshot; `None` for ids that never existed or were reaped.
    pub fn status(&self, job_id: &JobId) -> Option<JobView> {
        self.store.get(job_id).map(|record| record.view())
    }

    /// Delete terminal jobs last updated more than `retention` ago.
    pub async fn reap(&self, retention: Duration) -> usize {
        let cutoff = self.clock.now() - retention;
        let removed = self
            .with_store(move |store| Ok(store.remove_terminal_before(cutoff)))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "job reap aborted");
                0
            });
        if removed > 0 {
            tracing::info!(removed, "reaped finished jobs");
        }
        removed
    }

    pub fn counts(&self) -> JobCounts {
        self.store.counts()
    }

    /// Wait for running jobs and their webhook deliveries; new work is refused afterwards.
    pub async fn drain(&self) {
        self.pool.drain().await;
        // ジョブが全て終わった後なので、新しい配送はもう増えない
        self.deliveries.close();
        self.deliveries.wait().await;
    }

    /// Webhook deliveries still retrying.
    pub fn deliveries_in_flight(&self) -> usize {
        self.deliveries.len()
    }
}
