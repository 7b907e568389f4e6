//! RateLimiter - クレデンシャル単位のスライディングウィンドウ方式アドミッション制御
//!
//! 分単位と時間単位の 2 つのウィンドウを持ち、どちらかが満杯なら拒否します。
//! 状態はメモリ上のみ（再起動でリセット）。

mod window;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::ports::Clock;

use self::window::SlidingWindow;

/// Quota per credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub per_minute: u32,
    pub per_hour: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: 10,
            per_hour: 60,
        }
    }
}

/// Quota left in each window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remaining {
    pub per_minute: u32,
    pub per_hour: u32,
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// Quota left after this request (when allowed) or right now (when denied).
    pub remaining: Remaining,
    /// Seconds to wait before retrying; 0 when allowed.
    pub retry_after: u64,
}

#[derive(Debug)]
struct CredentialWindows {
    minute: SlidingWindow,
    hour: SlidingWindow,
}

/// Per-credential admission control.
///
/// Each credential's windows sit behind their own mutex, so concurrent admits
/// for one credential are linearized while unrelated credentials never contend
/// beyond the brief map lookup.
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    windows: RwLock<HashMap<String, Arc<Mutex<CredentialWindows>>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            windows: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    fn fresh_windows(&self) -> CredentialWindows {
        CredentialWindows {
            minute: SlidingWindow::new(Duration::seconds(60), self.config.per_minute),
            hour: SlidingWindow::new(Duration::seconds(3600), self.config.per_hour),
        }
    }

    fn entry(&self, credential: &str) -> Arc<Mutex<CredentialWindows>> {
        if let Some(entry) = self.windows.read().get(credential) {
            return Arc::clone(entry);
        }
        let mut windows = self.windows.write();
        Arc::clone(
            windows
                .entry(credential.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(self.fresh_windows()))),
        )
    }

    fn existing(&self, credential: &str) -> Option<Arc<Mutex<CredentialWindows>>> {
        self.windows.read().get(credential).map(Arc::clone)
    }

    /// Admit one request, recording it in both windows when allowed.
    pub fn admit(&self, credential: &str) -> bool {
        self.admit_with_quota(credential).allowed
    }

    /// Same as [`RateLimiter::admit`], also reporting quota and wait time.
    pub fn admit_with_quota(&self, credential: &str) -> Admission {
        let entry = self.entry(credential);
        let mut w = entry.lock();
        let now = self.clock.now();
        w.minute.prune(now);
        w.hour.prune(now);

        if w.minute.is_full(now) || w.hour.is_full(now) {
            let retry_after = w.minute.wait_secs(now).max(w.hour.wait_secs(now));
            tracing::debug!(
                credential = %mask(credential),
                retry_after,
                "rate limit exceeded"
            );
            return Admission {
                allowed: false,
                remaining: Remaining {
                    per_minute: w.minute.remaining(now),
                    per_hour: w.hour.remaining(now),
                },
                retry_after,
            };
        }

        w.minute.record(now);
        w.hour.record(now);
        Admission {
            allowed: true,
            remaining: Remaining {
                per_minute: w.minute.remaining(now),
                per_hour: w.hour.remaining(now),
            },
            retry_after: 0,
        }
    }

    /// Quota left for `credential`, without recording anything.
    pub fn remaining(&self, credential: &str) -> Remaining {
        let Some(entry) = self.existing(credential) else {
            return Remaining {
                per_minute: self.config.per_minute,
                per_hour: self.config.per_hour,
            };
        };
        let w = entry.lock();
        let now = self.clock.now();
        Remaining {
            per_minute: w.minute.remaining(now),
            per_hour: w.hour.remaining(now),
        }
    }

    /// Seconds until `credential` may be admitted again; 0 when not blocked.
    ///
    /// When both windows are full, the longer wait wins.
    pub fn retry_after(&self, credential: &str) -> u64 {
        let Some(entry) = self.existing(credential) else {
            return 0;
        };
        let w = entry.lock();
        let now = self.clock.now();
        w.minute.wait_secs(now).max(w.hour.wait_secs(now))
    }

    /// Forget every recorded request for `credential`.
    pub fn reset(&self, credential: &str) {
        self.windows.write().remove(credential);
    }

    /// Discard credentials with no live entries. Returns how many were dropped.
    pub fn sweep_idle(&self) -> usize {
        let now = self.clock.now();
        let mut windows = self.windows.write();
        let before = windows.len();
        windows.retain(|_, entry| {
            // a clone held elsewhere means an admit is in progress
            if Arc::strong_count(entry) > 1 {
                return true;
            }
            let w = entry.lock();
            !(w.minute.is_empty(now) && w.hour.is_empty(now))
        });
        before - windows.len()
    }

    /// Number of credentials currently tracked.
    pub fn tracked_credentials(&self) -> usize {
        self.windows.read().len()
    }
}

/// Credential prefix safe for logs.
pub fn mask(credential: &str) -> String {
    let prefix: String = credential.chars().take(4).collect();
    format!("{prefix}***")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;

    fn limiter(per_minute: u32, per_hour: u32) -> (RateLimiter, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
        ));
        let limiter = RateLimiter::new(
            RateLimitConfig {
                per_minute,
                per_hour,
            },
            clock.clone(),
        );
        (limiter, clock)
    }

    #[test]
    fn eleventh_request_within_a_second_is_denied() {
        let (limiter, clock) = limiter(10, 60);
        for i in 0..10 {
            assert!(limiter.admit("key-a"), "request {i} should pass");
            clock.advance(Duration::milliseconds(50));
        }
        let denied = limiter.admit_with_quota("key-a");
        assert!(!denied.allowed);
        assert!((1..=60).contains(&denied.retry_after), "{}", denied.retry_after);
        assert_eq!(limiter.retry_after("key-a"), denied.retry_after);
    }

    #[test]
    fn window_slides_instead_of_resetting() {
        let (limiter, clock) = limiter(3, 100);
        assert!(limiter.admit("k"));
        clock.advance(Duration::seconds(20));
        assert!(limiter.admit("k"));
        clock.advance(Duration::seconds(20));
        assert!(limiter.admit("k"));
        assert!(!limiter.admit("k"));

        // first entry leaves the window, the other two still count
        clock.advance(Duration::seconds(21));
        assert!(limiter.admit("k"));
        assert!(!limiter.admit("k"));
    }

    #[test]
    fn denied_requests_are_not_recorded() {
        let (limiter, clock) = limiter(1, 100);
        assert!(limiter.admit("k"));
        for _ in 0..5 {
            assert!(!limiter.admit("k"));
        }
        clock.advance(Duration::seconds(61));
        assert!(limiter.admit("k"));
        assert_eq!(limiter.remaining("k").per_hour, 98);
    }

    #[test]
    fn hour_window_blocks_even_with_minute_quota() {
        let (limiter, clock) = limiter(10, 3);
        for _ in 0..3 {
            assert!(limiter.admit("k"));
            clock.advance(Duration::seconds(61));
        }
        let denied = limiter.admit_with_quota("k");
        assert!(!denied.allowed);
        assert_eq!(denied.remaining.per_minute, 10);
        assert_eq!(denied.remaining.per_hour, 0);
        // oldest entry is 183s old -> 3417s left -> 3418
        assert_eq!(denied.retry_after, 3418);
    }

    #[test]
    fn retry_after_reports_longer_wait_when_both_full() {
        let (limiter, _clock) = limiter(2, 2);
        assert!(limiter.admit("k"));
        assert!(limiter.admit("k"));
        assert_eq!(limiter.retry_after("k"), 3601);
    }

    #[rstest]
    #[case::unknown_credential("nobody")]
    #[case::empty_credential("")]
    fn unknown_credentials_have_full_quota(#[case] credential: &str) {
        let (limiter, _clock) = limiter(10, 60);
        assert_eq!(
            limiter.remaining(credential),
            Remaining {
                per_minute: 10,
                per_hour: 60
            }
        );
        assert_eq!(limiter.retry_after(credential), 0);
        assert_eq!(limiter.tracked_credentials(), 0);
    }

    #[test]
    fn credentials_are_isolated() {
        let (limiter, _clock) = limiter(1, 10);
        assert!(limiter.admit("a"));
        assert!(!limiter.admit("a"));
        assert!(limiter.admit("b"));
    }

    #[test]
    fn remaining_does_not_consume_quota() {
        let (limiter, _clock) = limiter(2, 10);
        assert!(limiter.admit("k"));
        for _ in 0..5 {
            assert_eq!(limiter.remaining("k").per_minute, 1);
        }
        assert!(limiter.admit("k"));
    }

    #[test]
    fn reset_restores_quota() {
        let (limiter, _clock) = limiter(1, 1);
        assert!(limiter.admit("k"));
        assert!(!limiter.admit("k"));
        limiter.reset("k");
        assert!(limiter.admit("k"));
    }

    #[test]
    fn sweep_drops_only_idle_credentials() {
        let (limiter, clock) = limiter(10, 60);
        assert!(limiter.admit("old"));
        clock.advance(Duration::seconds(3601));
        assert!(limiter.admit("fresh"));
        assert_eq!(limiter.sweep_idle(), 1);
        assert_eq!(limiter.tracked_credentials(), 1);
        assert_eq!(limiter.remaining("fresh").per_hour, 59);
    }

    #[test]
    fn concurrent_admits_never_exceed_the_limit() {
        let (limiter, _clock) = limiter(5, 100);
        let limiter = Arc::new(limiter);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || limiter.admit("shared"))
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|allowed| *allowed)
            .count();
        assert_eq!(admitted, 5);
    }

    #[test]
    fn mask_hides_most_of_the_key() {
        assert_eq!(mask("sk_live_123456"), "sk_l***");
        assert_eq!(mask("ab"), "ab***");
    }
}
