//! HTTP ハンドラ - リクエストを CaptureService に渡してレスポンスを組み立てる
//!
//! アクセスログ用に、扱った URL を `RequestTarget` としてレスポンスに付けます。

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::app::{App, AsyncCaptureRequest, BatchItem, CaptureOutput, HealthReport};
use crate::domain::{CaptureParams, JobView, SnapgateError};

use super::admission::{Caller, RequestTarget};
use super::error::ApiError;

pub const HEADER_CACHE: &str = "x-cache";

type ApiResult<T> = Result<T, ApiError>;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(v)| v)
        .map_err(|rejection| SnapgateError::InvalidRequest(rejection.body_text()).into())
}

pub async fn health(State(app): State<Arc<App>>) -> Json<HealthReport> {
    Json(app.health())
}

pub async fn screenshot_query(
    State(app): State<Arc<App>>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    let params = CaptureParams::from_query(&query).map_err(SnapgateError::from)?;
    capture(&app, params).await
}

pub async fn screenshot_body(
    State(app): State<Arc<App>>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> ApiResult<Response> {
    let params = CaptureParams::from_json(body(payload)?).map_err(SnapgateError::from)?;
    capture(&app, params).await
}

async fn capture(app: &App, params: CaptureParams) -> ApiResult<Response> {
    let url = params.url.clone();
    let result = match app.service.capture(params).await {
        Ok(output) => artifact_response(output).await,
        Err(e) => {
            tracing::info!(
                %url,
                kind = e.kind().as_str(),
                message = %e.public_message(),
                "capture rejected"
            );
            Err(e.into())
        }
    };
    let mut response = result.into_response();
    response.extensions_mut().insert(RequestTarget(url));
    Ok(response)
}

async fn artifact_response(output: CaptureOutput) -> ApiResult<Response> {
    let bytes = tokio::fs::read(&output.path).await.map_err(|e| {
        SnapgateError::Internal(format!("read {}: {e}", output.path.display()))
    })?;
    let cache = if output.cache_hit { "HIT" } else { "MISS" };
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(output.format.mime_type())),
            (
                header::HeaderName::from_static(HEADER_CACHE),
                HeaderValue::from_static(cache),
            ),
        ],
        bytes,
    )
        .into_response())
}

#[derive(Debug, Serialize)]
pub struct Accepted {
    pub job_id: String,
    pub status: &'static str,
    pub message: &'static str,
    pub status_url: String,
}

pub async fn screenshot_async(
    State(app): State<Arc<App>>,
    Extension(caller): Extension<Caller>,
    payload: Result<Json<AsyncCaptureRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let request = body(payload)?;
    let target = request.url.clone().unwrap_or_else(|| "N/A".to_string());
    let job_id = app.service.submit(request).await?;
    tracing::info!(credential = %caller.0, %job_id, "async job accepted");
    let mut response = (
        StatusCode::ACCEPTED,
        Json(Accepted {
            job_id: job_id.to_string(),
            status: "pending",
            message: "Job created successfully",
            status_url: format!("/jobs/{job_id}"),
        }),
    )
        .into_response();
    response.extensions_mut().insert(RequestTarget(target));
    Ok(response)
}

pub async fn job_status(
    State(app): State<Arc<App>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobView>> {
    Ok(Json(app.service.job_status(&job_id)?))
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub total: usize,
    pub results: Vec<BatchItem>,
}

pub async fn batch(
    State(app): State<Arc<App>>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> ApiResult<Json<BatchResponse>> {
    let request = body(payload)?;
    let results = app.service.batch(&request.urls, &request.settings).await?;
    Ok(Json(BatchResponse {
        total: results.len(),
        results,
    }))
}
