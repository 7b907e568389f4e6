//! snapgate-core
//!
//! Core building blocks for the Snapgate capture service.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, params, job, errors）
//! - **ports**: 抽象化レイヤー（CaptureEngine, Authenticator, Clock, IdGenerator）
//! - **limiter**: クレデンシャル単位のスライディングウィンドウ
//! - **cache**: フィンガープリントをキーにしたキャプチャ結果のキャッシュ
//! - **jobs**: 非同期ジョブのテーブル・ワーカープール・オーケストレータ
//! - **webhook**: 署名・リトライ付きの完了通知
//! - **app**: ワイヤリング、リクエスト処理、バックグラウンドのメンテナンス
//! - **http**: axum ルーターと admission middleware
//! - **config / persist / canonical / observability**: 共通の下回り

pub mod app;
pub mod cache;
pub mod canonical;
pub mod config;
pub mod domain;
pub mod http;
pub mod jobs;
pub mod limiter;
pub mod observability;
pub mod persist;
pub mod ports;
pub mod webhook;

pub use crate::app::{App, AppBuilder, BuildError};
pub use crate::config::Config;
pub use crate::domain::{ErrorKind, SnapgateError};
