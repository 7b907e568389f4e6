//! ApiError - SnapgateError から HTTP レスポンスへの変換
//!
//! - ErrorKind ごとにステータスコードを決める
//! - ボディは `{error, message, retry_after?}`
//! - 内部エラーの詳細はログにだけ出す

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::domain::{ErrorKind, SnapgateError};

use super::admission::RequestOutcome;

/// SnapgateError を HTTP レスポンスに変換するラッパー
#[derive(Debug)]
pub struct ApiError(pub SnapgateError);

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl From<SnapgateError> for ApiError {
    fn from(err: SnapgateError) -> Self {
        Self(err)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::AdmissionDenied => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::InvalidParams => StatusCode::BAD_REQUEST,
        ErrorKind::MissingCredential | ErrorKind::InvalidCredential => StatusCode::UNAUTHORIZED,
        ErrorKind::CaptureFailed | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::JobNotFound => StatusCode::NOT_FOUND,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        if kind == ErrorKind::Internal {
            tracing::error!(error = %self.0, "internal error");
        }
        let retry_after = match self.0 {
            SnapgateError::AdmissionDenied { retry_after } => Some(retry_after),
            _ => None,
        };
        let message = self.0.public_message();
        let outcome = RequestOutcome(message.clone());
        let body = ErrorBody {
            error: kind.as_str(),
            message,
            retry_after,
        };

        let mut response = (status_for(kind), Json(body)).into_response();
        response.extensions_mut().insert(outcome);
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ParamsError;
    use rstest::rstest;

    #[rstest]
    #[case(SnapgateError::AdmissionDenied { retry_after: 7 }, 429)]
    #[case(SnapgateError::InvalidParams(ParamsError::InvalidQuality), 400)]
    #[case(SnapgateError::MissingCredential, 401)]
    #[case(SnapgateError::InvalidCredential, 401)]
    #[case(SnapgateError::CaptureFailed("boom".into()), 500)]
    #[case(SnapgateError::QueueFull, 503)]
    #[case(SnapgateError::JobNotFound("x".into()), 404)]
    #[case(SnapgateError::Internal("/var/secret/path".into()), 500)]
    fn kinds_map_to_status(#[case] err: SnapgateError, #[case] expected: u16) {
        let response = ApiError(err).into_response();
        assert_eq!(response.status().as_u16(), expected);
    }

    #[test]
    fn admission_denied_sets_retry_after_header() {
        let response = ApiError(SnapgateError::AdmissionDenied { retry_after: 42 }).into_response();
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }
}
