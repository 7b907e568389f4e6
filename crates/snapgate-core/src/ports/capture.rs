//! CaptureEngine port - ページレンダリングエンジン（外部コラボレータ）
//!
//! エンジン内部の挙動はこのクレートの関心外です。
//! 入力は検証済みの `CaptureParams`、出力はアーティファクトのパスか失敗メッセージ。

use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::CaptureParams;

/// Human-readable failure reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct CaptureError(pub String);

impl CaptureError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Renders a page and returns the path of the produced artifact.
///
/// Implementations are expected to enforce their own timeout and always
/// return eventually; nothing above this trait supervises a hung capture.
#[async_trait]
pub trait CaptureEngine: Send + Sync {
    async fn capture(&self, params: &CaptureParams) -> Result<PathBuf, CaptureError>;
}
