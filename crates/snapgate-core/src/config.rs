//! Config - TOML 設定ファイル
//!
//! 全フィールドにデフォルトがあるので、空のファイルでも起動できます。
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8080"
//!
//! [rate_limit]
//! per_minute = 10
//! per_hour = 60
//!
//! [auth]
//! api_keys = ["sk_live_..."]
//!
//! [capture]
//! command = ["node", "render.js"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::limiter::RateLimitConfig;
use crate::webhook::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub jobs: JobsConfig,
    pub webhook: WebhookConfig,
    pub auth: AuthConfig,
    pub capture: CaptureConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub ttl_hours: u64,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("cache"),
            ttl_hours: 24,
            sweep_interval_secs: 3600,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::try_from(self.ttl_hours).unwrap_or(i64::MAX / 3600))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// JSON index of the job table; `None` keeps jobs in memory only.
    pub index_path: Option<PathBuf>,
    pub retention_hours: u64,
    pub reap_interval_secs: u64,
    pub max_in_flight: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            index_path: Some(PathBuf::from("webhooks/jobs.json")),
            retention_hours: 48,
            reap_interval_secs: 3600,
            max_in_flight: 8,
        }
    }
}

impl JobsConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::try_from(self.retention_hours).unwrap_or(i64::MAX / 3600))
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub max_attempts: u32,
    pub base_delay_secs: f64,
    pub multiplier: f64,
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_secs: policy.base_delay.as_secs_f64(),
            multiplier: policy.multiplier,
            timeout_secs: 10,
        }
    }
}

impl WebhookConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::try_from_secs_f64(self.base_delay_secs).unwrap_or_default(),
            multiplier: self.multiplier,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub api_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Renderer program followed by its arguments.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 60,
        }
    }
}

impl CaptureConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.rate_limit.per_minute, 10);
        assert_eq!(config.rate_limit.per_hour, 60);
        assert_eq!(config.cache.ttl(), chrono::Duration::hours(24));
        assert_eq!(config.jobs.retention(), chrono::Duration::hours(48));
        assert_eq!(config.jobs.max_in_flight, 8);
        assert_eq!(config.webhook.retry_policy(), RetryPolicy::default());
        assert_eq!(config.webhook.timeout(), Duration::from_secs(10));
        assert_eq!(config.capture.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [rate_limit]
            per_minute = 3

            [auth]
            api_keys = ["k1", "k2"]

            [jobs]
            max_in_flight = 2

            [capture]
            command = ["node", "render.js"]
            "#,
        )
        .unwrap();
        assert_eq!(config.rate_limit.per_minute, 3);
        assert_eq!(config.rate_limit.per_hour, 60);
        assert_eq!(config.auth.api_keys, vec!["k1", "k2"]);
        assert_eq!(config.jobs.max_in_flight, 2);
        assert_eq!(config.jobs.retention_hours, 48);
        assert_eq!(config.capture.command, vec!["node", "render.js"]);
    }

    #[test]
    fn unreadable_file_is_reported() {
        let err = Config::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn bad_types_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapgate.toml");
        std::fs::write(&path, "[rate_limit]\nper_minute = \"ten\"\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }
}
