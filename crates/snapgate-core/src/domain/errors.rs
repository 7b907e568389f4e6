//! Errors - エラー型と分類
//!
//! Caller-facing failures carry a stable machine-readable kind plus a
//! human-readable message. Internal details (paths, io errors) stay in logs.

use super::ids::JobId;
use super::params::ParamsError;

/// ErrorKind は呼び出し側に見せるエラーの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AdmissionDenied,
    InvalidParams,
    MissingCredential,
    InvalidCredential,
    CaptureFailed,
    QueueFull,
    JobNotFound,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::AdmissionDenied => "admission_denied",
            ErrorKind::InvalidParams => "invalid_params",
            ErrorKind::MissingCredential => "missing_credential",
            ErrorKind::InvalidCredential => "invalid_credential",
            ErrorKind::CaptureFailed => "capture_failed",
            ErrorKind::QueueFull => "queue_full",
            ErrorKind::JobNotFound => "job_not_found",
            ErrorKind::Internal => "internal",
        }
    }
}

/// SnapgateError はリクエスト処理のエラー
#[derive(Debug, thiserror::Error)]
pub enum SnapgateError {
    #[error("You have exceeded your rate limit. Please try again in {retry_after} seconds.")]
    AdmissionDenied { retry_after: u64 },

    #[error(transparent)]
    InvalidParams(#[from] ParamsError),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Please provide an API key using the X-API-Key header or api_key parameter")]
    MissingCredential,

    #[error("The provided API key is not valid")]
    InvalidCredential,

    #[error("{0}")]
    CaptureFailed(String),

    #[error("Too many jobs in flight, try again later")]
    QueueFull,

    #[error("No job with ID {0}")]
    JobNotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SnapgateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SnapgateError::AdmissionDenied { .. } => ErrorKind::AdmissionDenied,
            SnapgateError::InvalidParams(_) | SnapgateError::InvalidRequest(_) => {
                ErrorKind::InvalidParams
            }
            SnapgateError::MissingCredential => ErrorKind::MissingCredential,
            SnapgateError::InvalidCredential => ErrorKind::InvalidCredential,
            SnapgateError::CaptureFailed(_) => ErrorKind::CaptureFailed,
            SnapgateError::QueueFull => ErrorKind::QueueFull,
            SnapgateError::JobNotFound(_) => ErrorKind::JobNotFound,
            SnapgateError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to show to the caller.
    pub fn public_message(&self) -> String {
        match self {
            SnapgateError::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        }
    }

    pub fn job_not_found(job_id: &JobId) -> Self {
        SnapgateError::JobNotFound(job_id.to_string())
    }
}
