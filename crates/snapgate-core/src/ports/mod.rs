//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部システム（レンダリングエンジン、認証、時刻など）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//! テストでは fake を注入します。

pub mod auth;
pub mod capture;
pub mod clock;
pub mod id_generator;

pub use self::auth::{Authenticator, StaticKeys};
pub use self::capture::{CaptureEngine, CaptureError};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
