//! App - アプリケーション層
//!
//! このモジュールは、ports と各コンポーネントを組み合わせてリクエスト処理を実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: 設定からのワイヤリングと起動時検証
//! - **CaptureService**: 同期・非同期・バッチのキャプチャフロー
//! - **GcLoop**: 期限切れキャッシュとアイドルなレート制限状態の掃除
//! - **ReaperLoop**: 終了済みジョブの回収
//! - **Maintenance**: 上の 2 ループの起動と停止

pub mod builder;
pub mod gc_loop;
pub mod maintenance;
pub mod reaper_loop;
pub mod service;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::gc_loop::{GcLoop, GcReport};
pub use self::maintenance::Maintenance;
pub use self::reaper_loop::ReaperLoop;
pub use self::service::{AsyncCaptureRequest, BatchItem, CaptureOutput, CaptureService};
pub use self::status::HealthReport;
