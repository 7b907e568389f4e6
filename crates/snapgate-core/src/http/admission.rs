//! Admission middleware - 認証 → レート制限 → ハンドラ
//!
//! 認証済みルートはすべてここを通ります。リクエストごとに 1 行の
//! アクセスログを出し、クレデンシャルはマスクして記録します。

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::app::App;
use crate::domain::SnapgateError;
use crate::limiter::mask;

use super::error::ApiError;

pub const HEADER_API_KEY: &str = "x-api-key";
pub const HEADER_REMAINING_MINUTE: &str = "x-ratelimit-remaining-minute";
pub const HEADER_REMAINING_HOUR: &str = "x-ratelimit-remaining-hour";

/// Masked credential of the admitted caller, available to handlers.
#[derive(Debug, Clone)]
pub struct Caller(pub String);

/// Response extension: the URL a handler worked on, for the access log.
#[derive(Debug, Clone)]
pub struct RequestTarget(pub String);

/// Response extension: the public message of a failed request.
#[derive(Debug, Clone)]
pub struct RequestOutcome(pub String);

fn query_param(request: &Request, name: &str) -> Option<String> {
    let Query(query) = Query::<HashMap<String, String>>::try_from_uri(request.uri()).ok()?;
    query.get(name).filter(|v| !v.is_empty()).cloned()
}

fn credential_of(request: &Request) -> Option<String> {
    if let Some(value) = request.headers().get(HEADER_API_KEY)
        && let Ok(key) = value.to_str()
        && !key.is_empty()
    {
        return Some(key.to_string());
    }
    query_param(request, "api_key")
}

/// (target, message) of the access log line.
///
/// ハンドラが付けた拡張を優先し、なければクエリの `url`、それもなければ "N/A"
fn log_fields(query_target: Option<String>, response: &Response) -> (String, String) {
    let target = response
        .extensions()
        .get::<RequestTarget>()
        .map(|t| t.0.clone())
        .or(query_target)
        .unwrap_or_else(|| "N/A".to_string());
    let message = match response.extensions().get::<RequestOutcome>() {
        Some(outcome) => outcome.0.clone(),
        None if response.status().is_success() => "Success".to_string(),
        None => response
            .status()
            .canonical_reason()
            .unwrap_or("error")
            .to_string(),
    };
    (target, message)
}

pub async fn admission(State(app): State<Arc<App>>, mut request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let query_target = query_param(&request, "url");
    let target = query_target.clone().unwrap_or_else(|| "N/A".to_string());

    let Some(credential) = credential_of(&request) else {
        tracing::info!(
            credential = "N/A",
            %method,
            %path,
            %target,
            status = 401,
            "missing API key"
        );
        return ApiError(SnapgateError::MissingCredential).into_response();
    };
    let masked = mask(&credential);
    if !app.auth.validate(&credential) {
        tracing::info!(
            credential = %masked,
            %method,
            %path,
            %target,
            status = 401,
            "invalid API key"
        );
        return ApiError(SnapgateError::InvalidCredential).into_response();
    }

    let admission = app.limiter.admit_with_quota(&credential);
    if !admission.allowed {
        tracing::info!(
            credential = %masked,
            %method,
            %path,
            %target,
            status = 429,
            retry_after = admission.retry_after,
            "rate limit exceeded"
        );
        return ApiError(SnapgateError::AdmissionDenied {
            retry_after: admission.retry_after,
        })
        .into_response();
    }

    request.extensions_mut().insert(Caller(masked.clone()));
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert(
        HEADER_REMAINING_MINUTE,
        HeaderValue::from(admission.remaining.per_minute),
    );
    headers.insert(
        HEADER_REMAINING_HOUR,
        HeaderValue::from(admission.remaining.per_hour),
    );
    let (target, message) = log_fields(query_target, &response);
    tracing::info!(
        credential = %masked,
        %method,
        %path,
        %target,
        status = response.status().as_u16(),
        %message,
        "request handled"
    );
    response
}
