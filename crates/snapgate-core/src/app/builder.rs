//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 外部コラボレータ（エンジン・認証・送信）の差し替え

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::cache::CacheStore;
use crate::config::Config;
use crate::jobs::{JobOrchestrator, JobStore, JobTable, WorkerPool};
use crate::limiter::RateLimiter;
use crate::persist::StoreError;
use crate::ports::{Authenticator, CaptureEngine, Clock, StaticKeys, SystemClock, UlidGenerator};
use crate::webhook::{HttpTransport, TransportError, WebhookDispatcher, WebhookTransport};

use super::maintenance::Maintenance;
use super::service::CaptureService;
use super::status::HealthReport;

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(config)
///     .capture_engine(Arc::new(engine))
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - 0 のレート上限・TTL・並列数・試行回数は build() 時に拒否
/// - キャプチャエンジン未設定も拒否
/// - キャッシュディレクトリや HTTP クライアントの初期化失敗はそのまま返す
///
/// clock / authenticator / webhook transport / job store は省略すると
/// 設定から組み立てた本番用の実装が使われます。
pub struct AppBuilder {
    config: Config,
    clock: Option<Arc<dyn Clock>>,
    engine: Option<Arc<dyn CaptureEngine>>,
    auth: Option<Arc<dyn Authenticator>>,
    transport: Option<Arc<dyn WebhookTransport>>,
    job_store: Option<Arc<dyn JobStore>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no capture engine configured")]
    MissingCaptureEngine,

    #[error("failed to open cache: {0}")]
    Cache(#[from] StoreError),

    #[error("failed to build webhook transport: {0}")]
    Transport(#[from] TransportError),
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            clock: None,
            engine: None,
            auth: None,
            transport: None,
            job_store: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn capture_engine(mut self, engine: Arc<dyn CaptureEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn authenticator(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn webhook_transport(mut self, transport: Arc<dyn WebhookTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn job_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.job_store = Some(store);
        self
    }

    /// 設定を検証してから各コンポーネントを組み立てる
    pub fn build(self) -> Result<App, BuildError> {
        validate(&self.config)?;
        let engine = self.engine.ok_or(BuildError::MissingCaptureEngine)?;
        let config = self.config;

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let limiter = Arc::new(RateLimiter::new(config.rate_limit, Arc::clone(&clock)));
        let cache = Arc::new(CacheStore::open(
            config.cache.dir.clone(),
            config.cache.ttl(),
            Arc::clone(&clock),
        )?);

        let transport: Arc<dyn WebhookTransport> = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::new(config.webhook.timeout())?),
        };
        let dispatcher = Arc::new(WebhookDispatcher::new(
            transport,
            config.webhook.retry_policy(),
            Arc::clone(&clock),
        ));

        let store: Arc<dyn JobStore> = match self.job_store {
            Some(s) => s,
            None => match &config.jobs.index_path {
                Some(path) => Arc::new(JobTable::open(path.clone())),
                None => Arc::new(JobTable::in_memory()),
            },
        };
        let jobs = JobOrchestrator::new(
            store,
            WorkerPool::new(config.jobs.max_in_flight),
            Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            Arc::clone(&clock),
            dispatcher,
        );

        let auth: Arc<dyn Authenticator> = match self.auth {
            Some(a) => a,
            None => {
                let keys = StaticKeys::new(config.auth.api_keys.iter().cloned());
                if keys.is_empty() {
                    tracing::warn!("no API keys configured, every request will be rejected");
                }
                Arc::new(keys)
            }
        };

        let service = CaptureService::new(engine, Arc::clone(&cache), jobs.clone());
        let started_at = clock.now();
        tracing::info!(
            per_minute = config.rate_limit.per_minute,
            per_hour = config.rate_limit.per_hour,
            cache_dir = %config.cache.dir.display(),
            max_in_flight = config.jobs.max_in_flight,
            "app built"
        );

        Ok(App {
            config,
            clock,
            started_at,
            limiter,
            cache,
            jobs,
            service,
            auth,
        })
    }
}

fn validate(config: &Config) -> Result<(), BuildError> {
    let invalid = |msg: &str| -> Result<(), BuildError> {
        Err(BuildError::InvalidConfig(msg.to_string()))
    };
    if config.rate_limit.per_minute == 0 || config.rate_limit.per_hour == 0 {
        return invalid("rate_limit.per_minute and rate_limit.per_hour must be positive");
    }
    if config.cache.ttl_hours == 0 {
        return invalid("cache.ttl_hours must be positive");
    }
    if config.jobs.max_in_flight == 0 {
        return invalid("jobs.max_in_flight must be positive");
    }
    if config.webhook.max_attempts == 0 {
        return invalid("webhook.max_attempts must be positive");
    }
    let hook = &config.webhook;
    if !hook.multiplier.is_finite()
        || hook.multiplier < 1.0
        || !hook.base_delay_secs.is_finite()
        || hook.base_delay_secs < 0.0
    {
        return invalid("webhook.multiplier must be >= 1 and webhook.base_delay_secs >= 0");
    }
    if config.cache.sweep_interval_secs == 0 || config.jobs.reap_interval_secs == 0 {
        return invalid("maintenance intervals must be positive");
    }
    Ok(())
}

/// App はアプリケーションのランタイム
///
/// HTTP 層はこれを `Arc<App>` として共有します。
pub struct App {
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub started_at: DateTime<Utc>,
    pub limiter: Arc<RateLimiter>,
    pub cache: Arc<CacheStore>,
    pub jobs: JobOrchestrator,
    pub service: CaptureService,
    pub auth: Arc<dyn Authenticator>,
}

impl App {
    pub fn health(&self) -> HealthReport {
        HealthReport::collect(self)
    }

    /// キャッシュ掃除とジョブ回収のループを起動
    pub fn spawn_maintenance(&self) -> Maintenance {
        Maintenance::spawn(self)
    }

    /// Wait for in-flight jobs and their webhook deliveries, then refuse new jobs.
    pub async fn drain(&self) {
        self.jobs.drain().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::service::testing::FakeEngine;
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    fn config_in(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.cache.dir = dir.join("cache");
        config.jobs.index_path = None;
        config.auth.api_keys = vec!["sk_test_1".to_string()];
        config
    }

    #[tokio::test]
    async fn build_success() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()));
        let app = AppBuilder::new(config_in(dir.path()))
            .clock(clock.clone())
            .capture_engine(Arc::new(FakeEngine::new(dir.path())))
            .build()
            .unwrap();

        assert!(app.auth.validate("sk_test_1"));
        assert!(!app.auth.validate("sk_test_2"));
        assert!(app.cache.dir().is_dir());

        clock.advance(chrono::Duration::seconds(90));
        let health = app.health();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.uptime_seconds, 90);
        assert_eq!(health.jobs.total(), 0);
    }

    #[test]
    fn build_without_engine_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = AppBuilder::new(config_in(dir.path())).build();
        assert!(matches!(result, Err(BuildError::MissingCaptureEngine)));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cases: Vec<fn(&mut Config)> = vec![
            |c: &mut Config| c.rate_limit.per_minute = 0,
            |c: &mut Config| c.rate_limit.per_hour = 0,
            |c: &mut Config| c.cache.ttl_hours = 0,
            |c: &mut Config| c.jobs.max_in_flight = 0,
            |c: &mut Config| c.webhook.max_attempts = 0,
            |c: &mut Config| c.webhook.multiplier = 0.5,
        ];
        for mutate in cases {
            let mut config = config_in(dir.path());
            mutate(&mut config);
            let result = AppBuilder::new(config)
                .capture_engine(Arc::new(FakeEngine::new(dir.path())))
                .build();
            assert!(matches!(result, Err(BuildError::InvalidConfig(_))));
        }
    }

    #[tokio::test]
    async fn job_index_is_reopened() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.jobs.index_path = Some(dir.path().join("jobs.json"));

        let app = AppBuilder::new(config.clone())
            .capture_engine(Arc::new(FakeEngine::new(dir.path())))
            .build()
            .unwrap();
        let id = app
            .jobs
            .create("screenshot", serde_json::json!({"url": "https://a.test"}), None)
            .await
            .unwrap();
        drop(app);

        let reopened = AppBuilder::new(config)
            .capture_engine(Arc::new(FakeEngine::new(dir.path())))
            .build()
            .unwrap();
        assert!(reopened.jobs.status(&id).is_some());
    }
}
