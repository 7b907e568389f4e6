//! CommandCapture - 外部レンダラーコマンドを CaptureEngine として使う
//!
//! - stdin: CaptureParams の JSON
//! - stdout: 生成したアーティファクトのパス（最後の空でない行）
//! - 非 0 終了・出力なし・タイムアウトはすべて CaptureError

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use snapgate_core::config::CaptureConfig;
use snapgate_core::domain::CaptureParams;
use snapgate_core::ports::{CaptureEngine, CaptureError};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct CommandCapture {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandCapture {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &CaptureConfig) -> anyhow::Result<Self> {
        let Some((program, args)) = config.command.split_first() else {
            bail!("capture.command is empty; set it to the renderer program and its arguments");
        };
        Ok(Self::new(program.clone(), args.to_vec(), config.timeout()))
    }

    async fn run(&self, input: Vec<u8>) -> Result<PathBuf, CaptureError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::new(format!("failed to start renderer: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            // stdin を読まないレンダラーもある。成否は終了コードで判断
            if let Err(e) = stdin.write_all(&input).await {
                tracing::debug!(error = %e, "renderer did not read parameters");
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CaptureError::new(format!("renderer failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(|l| l.trim().to_string())
                .unwrap_or_else(|| format!("renderer exited with {}", output.status));
            return Err(CaptureError::new(reason));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match stdout.lines().rev().map(str::trim).find(|l| !l.is_empty()) {
            Some(path) => Ok(PathBuf::from(path)),
            None => Err(CaptureError::new("renderer produced no artifact path")),
        }
    }
}

#[async_trait]
impl CaptureEngine for CommandCapture {
    async fn capture(&self, params: &CaptureParams) -> Result<PathBuf, CaptureError> {
        let input = serde_json::to_vec(params)
            .map_err(|e| CaptureError::new(format!("failed to encode parameters: {e}")))?;
        match tokio::time::timeout(self.timeout, self.run(input)).await {
            Ok(result) => result,
            Err(_) => Err(CaptureError::new(format!(
                "Capture timed out after {} seconds",
                self.timeout.as_secs()
            ))),
        }
    }
}
