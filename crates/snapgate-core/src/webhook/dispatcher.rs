//! WebhookDispatcher - 署名付き通知の送信とリトライ

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::to_canonical_string;
use crate::domain::{JobId, JobRecord, JobStatus, WebhookTarget};
use crate::ports::Clock;

use super::retry::RetryPolicy;
use super::signing;
use super::transport::{OutboundRequest, WebhookTransport};

pub const HEADER_JOB_ID: &str = "X-Webhook-Job-ID";
pub const HEADER_TIMESTAMP: &str = "X-Webhook-Timestamp";
pub const HEADER_SIGNATURE: &str = "X-Webhook-Signature";

/// Body of a terminal-job notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub job_id: JobId,
    pub job_type: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl From<&JobRecord> for WebhookPayload {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.job_id,
            job_type: record.job_type.clone(),
            status: record.status,
            created_at: record.created_at,
            completed_at: record.updated_at,
            result: record.result.clone(),
            error: record.error.clone(),
        }
    }
}

/// Final result of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Failed { attempts: u32 },
}

impl DeliveryOutcome {
    pub fn attempts(self) -> u32 {
        match self {
            DeliveryOutcome::Delivered { attempts } | DeliveryOutcome::Failed { attempts } => {
                attempts
            }
        }
    }
}

pub struct WebhookDispatcher {
    transport: Arc<dyn WebhookTransport>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl WebhookDispatcher {
    pub fn new(
        transport: Arc<dyn WebhookTransport>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Build the signed request for `payload`.
    ///
    /// The body is the canonical serialization, so receivers can verify the
    /// signature over the raw bytes they receive.
    pub fn prepare(
        &self,
        target: &WebhookTarget,
        payload: &WebhookPayload,
    ) -> Result<OutboundRequest, signing::SigningError> {
        let value = serde_json::to_value(payload).unwrap_or(serde_json::Value::Null);
        let mut headers = vec![
            (HEADER_JOB_ID.to_string(), payload.job_id.to_string()),
            (
                HEADER_TIMESTAMP.to_string(),
                self.clock.now().timestamp().to_string(),
            ),
        ];
        if let Some(secret) = target.secret.as_deref().filter(|s| !s.is_empty()) {
            headers.push((HEADER_SIGNATURE.to_string(), signing::sign(&value, secret)?));
        }
        Ok(OutboundRequest {
            url: target.url.clone(),
            headers,
            body: to_canonical_string(&value).into_bytes(),
        })
    }

    /// POST `payload` to `target`, retrying non-2xx responses and transport errors.
    ///
    /// Never returns an error: the outcome says whether any attempt succeeded.
    pub async fn deliver(
        &self,
        target: &WebhookTarget,
        payload: &WebhookPayload,
    ) -> DeliveryOutcome {
        let request = match self.prepare(target, payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(job_id = %payload.job_id, error = %e, "webhook not sent");
                return DeliveryOutcome::Failed { attempts: 0 };
            }
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.transport.post(&request).await {
                Ok(status) if (200..300).contains(&status) => {
                    tracing::info!(job_id = %payload.job_id, attempts, status, "webhook delivered");
                    return DeliveryOutcome::Delivered { attempts };
                }
                Ok(status) => {
                    tracing::warn!(
                        job_id = %payload.job_id,
                        attempt = attempts,
                        status,
                        "webhook rejected"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %payload.job_id,
                        attempt = attempts,
                        error = %e,
                        "webhook delivery failed"
                    );
                }
            }

            if !self.policy.should_retry(attempts) {
                break;
            }
            tokio::time::sleep(self.policy.next_delay(attempts)).await;
        }

        tracing::warn!(job_id = %payload.job_id, attempts, "webhook retries exhausted");
        DeliveryOutcome::Failed { attempts }
    }
}
