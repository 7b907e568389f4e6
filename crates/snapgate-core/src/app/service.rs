//! CaptureService - キャッシュ・キャプチャ・非同期ジョブを組み合わせたリクエスト処理
//!
//! - 同期: lookup → (miss) capture → store
//! - 非同期: ジョブを投入して即座に ID を返す
//! - バッチ: URL ごとに同期フローを実行し、結果を data URI で返す

use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheStore, Fingerprint};
use crate::domain::{CaptureParams, ImageFormat, JobId, JobView, SnapgateError, WebhookTarget};
use crate::jobs::{JobError, JobOrchestrator};
use crate::ports::CaptureEngine;

pub const JOB_TYPE_SCREENSHOT: &str = "screenshot";
pub const MAX_BATCH_URLS: usize = 10;

/// A captured (or cached) artifact on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOutput {
    pub path: PathBuf,
    pub format: ImageFormat,
    pub cache_hit: bool,
}

/// Body of an asynchronous capture request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AsyncCaptureRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// One entry of a batch response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BatchItem {
    Success { url: String, data: String },
    Error { url: String, message: String },
}

#[derive(Clone)]
pub struct CaptureService {
    engine: Arc<dyn CaptureEngine>,
    cache: Arc<CacheStore>,
    jobs: JobOrchestrator,
}

impl CaptureService {
    pub fn new(
        engine: Arc<dyn CaptureEngine>,
        cache: Arc<CacheStore>,
        jobs: JobOrchestrator,
    ) -> Self {
        Self {
            engine,
            cache,
            jobs,
        }
    }

    pub fn jobs(&self) -> &JobOrchestrator {
        &self.jobs
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Validate and capture synchronously, serving from cache when possible.
    pub async fn capture(&self, params: CaptureParams) -> Result<CaptureOutput, SnapgateError> {
        params.validate()?;
        capture_cached(Arc::clone(&self.engine), Arc::clone(&self.cache), params).await
    }

    /// Validate and hand the capture to the worker pool. Returns the new job id.
    pub async fn submit(&self, request: AsyncCaptureRequest) -> Result<JobId, SnapgateError> {
        let mut body = request.params;
        match request.url.filter(|u| !u.trim().is_empty()) {
            Some(url) => {
                body.insert("url".to_string(), serde_json::Value::String(url));
            }
            None => return Err(crate::domain::ParamsError::MissingUrl.into()),
        }
        let params = CaptureParams::from_json(serde_json::Value::Object(body))?;
        params.validate()?;

        let webhook = match request.webhook_url.filter(|u| !u.trim().is_empty()) {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                Some(WebhookTarget {
                    url,
                    secret: request.webhook_secret.filter(|s| !s.is_empty()),
                })
            }
            Some(_) => {
                return Err(SnapgateError::InvalidRequest(
                    "webhook_url must start with http:// or https://".to_string(),
                ));
            }
            None => None,
        };

        let stored = serde_json::to_value(&params)
            .map_err(|e| SnapgateError::Internal(e.to_string()))?;
        let engine = Arc::clone(&self.engine);
        let cache = Arc::clone(&self.cache);
        let work = async move {
            // 結果にファイルシステムのパスは載せない
            let fingerprint = Fingerprint::of(&params);
            match capture_cached(engine, cache, params).await {
                Ok(output) => Ok(serde_json::json!({
                    "fingerprint": fingerprint,
                    "format": output.format,
                    "cached": output.cache_hit,
                })),
                Err(e) => Err(e.public_message()),
            }
        };

        self.jobs
            .submit(JOB_TYPE_SCREENSHOT, stored, webhook, work)
            .await
            .map_err(|e| match e {
                JobError::QueueFull => SnapgateError::QueueFull,
                other => SnapgateError::Internal(other.to_string()),
            })
    }

    pub fn job_status(&self, raw_id: &str) -> Result<JobView, SnapgateError> {
        let job_id: JobId = raw_id
            .parse()
            .map_err(|_| SnapgateError::JobNotFound(raw_id.to_string()))?;
        self.jobs
            .status(&job_id)
            .ok_or_else(|| SnapgateError::job_not_found(&job_id))
    }

    /// Capture each URL with the shared settings. Per-URL failures become error items.
    pub async fn batch(
        &self,
        urls: &[String],
        settings: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<BatchItem>, SnapgateError> {
        if urls.is_empty() {
            return Err(SnapgateError::InvalidRequest(
                "urls must be a non-empty array".to_string(),
            ));
        }
        if urls.len() > MAX_BATCH_URLS {
            return Err(SnapgateError::InvalidRequest(format!(
                "Maximum {MAX_BATCH_URLS} URLs per batch request"
            )));
        }

        let mut items = Vec::with_capacity(urls.len());
        for url in urls {
            let item = match self.batch_one(url, settings).await {
                Ok(data) => BatchItem::Success {
                    url: url.clone(),
                    data,
                },
                Err(e) => BatchItem::Error {
                    url: url.clone(),
                    message: e.public_message(),
                },
            };
            items.push(item);
        }
        Ok(items)
    }

    async fn batch_one(
        &self,
        url: &str,
        settings: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, SnapgateError> {
        let mut body = settings.clone();
        body.insert("url".to_string(), serde_json::Value::String(url.to_string()));
        let params = CaptureParams::from_json(serde_json::Value::Object(body))?;
        let output = self.capture(params).await?;
        let bytes = tokio::fs::read(&output.path)
            .await
            .map_err(|e| SnapgateError::Internal(format!("read {}: {e}", output.path.display())))?;
        Ok(format!(
            "data:{};base64,{}",
            output.format.mime_type(),
            BASE64.encode(bytes)
        ))
    }
}

/// Cache-aware capture. Cache I/O runs on the blocking pool.
async fn capture_cached(
    engine: Arc<dyn CaptureEngine>,
    cache: Arc<CacheStore>,
    params: CaptureParams,
) -> Result<CaptureOutput, SnapgateError> {
    let key = Fingerprint::of(&params);
    let format = params.format;

    let hit = {
        let cache = Arc::clone(&cache);
        let key = key.clone();
        tokio::task::spawn_blocking(move || cache.lookup(&key))
            .await
            .map_err(|e| SnapgateError::Internal(e.to_string()))?
    };
    if let Some(path) = hit {
        return Ok(CaptureOutput {
            path,
            format,
            cache_hit: true,
        });
    }

    let artifact = engine
        .capture(&params)
        .await
        .map_err(|e| SnapgateError::CaptureFailed(e.to_string()))?;

    let stored = {
        let artifact = artifact.clone();
        tokio::task::spawn_blocking(move || cache.store(&key, &artifact)).await
    };
    let path = match stored {
        Ok(Ok(cached)) => cached,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "capture not cached");
            artifact
        }
        Err(e) => {
            tracing::warn!(error = %e, "capture not cached");
            artifact
        }
    };
    Ok(CaptureOutput {
        path,
        format,
        cache_hit: false,
    })
}
