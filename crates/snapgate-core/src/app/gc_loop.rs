//! GcLoop - 期限切れキャッシュとアイドルなレート制限ウィンドウの掃除
//!
//! # フロー
//! 1. interval ごとに CacheStore::sweep_expired
//! 2. 同じタイミングで RateLimiter::sweep_idle
//! 3. shutdown が来たら抜ける

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::cache::CacheStore;
use crate::limiter::RateLimiter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    pub cache_entries_removed: usize,
    pub credentials_dropped: usize,
}

pub struct GcLoop {
    cache: Arc<CacheStore>,
    limiter: Arc<RateLimiter>,
    interval: Duration,
}

impl GcLoop {
    pub fn new(cache: Arc<CacheStore>, limiter: Arc<RateLimiter>, interval: Duration) -> Self {
        Self {
            cache,
            limiter,
            interval,
        }
    }

    /// One sweep. Cache file removal runs on the blocking pool.
    pub async fn tick(&self) -> GcReport {
        let cache = Arc::clone(&self.cache);
        let cache_entries_removed = tokio::task::spawn_blocking(move || cache.sweep_expired())
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "cache sweep aborted");
                0
            });
        let credentials_dropped = self.limiter.sweep_idle();
        if credentials_dropped > 0 {
            tracing::debug!(credentials_dropped, "idle rate limit windows dropped");
        }
        GcReport {
            cache_entries_removed,
            credentials_dropped,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // 最初の tick は即時に返るので読み捨てる
        ticker.tick().await;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Fingerprint;
    use crate::domain::CaptureParams;
    use crate::limiter::RateLimitConfig;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn tick_sweeps_cache_and_limiter() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let cache = Arc::new(
            CacheStore::open(dir.path().join("c"), chrono::Duration::hours(1), clock.clone())
                .unwrap(),
        );
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default(), clock.clone()));

        let src = dir.path().join("a.png");
        std::fs::write(&src, b"a").unwrap();
        cache
            .store(&Fingerprint::of(&CaptureParams::new("https://a.test")), &src)
            .unwrap();
        assert!(limiter.admit("k"));

        clock.advance(chrono::Duration::hours(2));
        let gc = GcLoop::new(cache.clone(), limiter.clone(), Duration::from_secs(60));
        let report = gc.tick().await;
        assert_eq!(
            report,
            GcReport {
                cache_entries_removed: 1,
                credentials_dropped: 1
            }
        );
        assert!(cache.is_empty());
        assert_eq!(limiter.tracked_credentials(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let cache = Arc::new(
            CacheStore::open(dir.path(), chrono::Duration::hours(1), clock.clone()).unwrap(),
        );
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default(), clock));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(GcLoop::new(cache, limiter, Duration::from_secs(5)).run(rx));
        tokio::time::sleep(Duration::from_secs(12)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
