//! Job record and status management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::JobId;

/// Job status.
///
/// State transitions:
/// - Pending -> Processing -> Completed
/// - Pending -> Processing -> Failed
///
/// Completed and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// Where to notify when the job reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookTarget {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// Webhook bookkeeping stored on the job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryState {
    /// Set once, by the first terminal transition that hands the job to the dispatcher.
    pub triggered: bool,
    pub delivered: bool,
    /// Retries were exhausted without a 2xx response.
    pub failed: bool,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Rejected state transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition for {job_id}: {from:?} -> {to:?}")]
pub struct TransitionError {
    pub job_id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Job record: the single source of truth for one asynchronous job.
///
/// State transitions go through methods, never through direct field writes,
/// so `result` and `error` can only appear with their terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub job_type: String,
    pub params: serde_json::Value,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub webhook: Option<WebhookTarget>,
    #[serde(default)]
    pub delivery: DeliveryState,
}

impl JobRecord {
    pub fn new(
        job_id: JobId,
        job_type: impl Into<String>,
        params: serde_json::Value,
        webhook: Option<WebhookTarget>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            job_type: job_type.into(),
            params,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
            webhook,
            delivery: DeliveryState::default(),
        }
    }

    fn transition(&mut self, to: JobStatus, now: DateTime<Utc>) -> Result<(), TransitionError> {
        let allowed = matches!(
            (self.status, to),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        );
        if !allowed {
            return Err(TransitionError {
                job_id: self.job_id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Pending -> Processing.
    pub fn start_processing(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Processing, now)
    }

    /// Processing -> Completed.
    pub fn complete(
        &mut self,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(JobStatus::Completed, now)?;
        self.result = Some(result);
        Ok(())
    }

    /// Processing -> Failed.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Failed, now)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Claim the one-time webhook trigger.
    ///
    /// Returns true exactly once, and only for a terminal job with a webhook target.
    pub fn claim_webhook_trigger(&mut self) -> bool {
        if !self.status.is_terminal() || self.webhook.is_none() || self.delivery.triggered {
            return false;
        }
        self.delivery.triggered = true;
        true
    }

    pub fn mark_delivered(&mut self, attempts: u32, now: DateTime<Utc>) {
        self.delivery.delivered = true;
        self.delivery.failed = false;
        self.delivery.attempts = attempts;
        self.delivery.delivered_at = Some(now);
    }

    pub fn mark_delivery_failed(&mut self, attempts: u32) {
        self.delivery.delivered = false;
        self.delivery.failed = true;
        self.delivery.attempts = attempts;
    }

    pub fn view(&self) -> JobView {
        JobView::from(self)
    }
}

/// Job status for API responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub job_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub webhook_delivered: bool,
}

impl From<&JobRecord> for JobView {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.job_id,
            status: record.status,
            job_type: record.job_type.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            result: record.result.clone(),
            error: record.error.clone(),
            webhook_delivered: record.delivery.delivered,
        }
    }
}
