//! Status - ヘルスチェック用のスナップショット

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::observability::JobCounts;

use super::builder::App;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub version: String,
    pub jobs: JobCounts,
    pub jobs_in_flight: usize,
    pub cache_entries: usize,
    pub tracked_credentials: usize,
}

impl HealthReport {
    pub fn collect(app: &App) -> Self {
        let now = app.clock.now();
        let uptime = (now - app.started_at).num_seconds().max(0);
        Self {
            status: "healthy".to_string(),
            timestamp: now,
            uptime_seconds: u64::try_from(uptime).unwrap_or(0),
            version: env!("CARGO_PKG_VERSION").to_string(),
            jobs: app.jobs.counts(),
            jobs_in_flight: app.jobs.pool().in_flight(),
            cache_entries: app.cache.len(),
            tracked_credentials: app.limiter.tracked_credentials(),
        }
    }
}
