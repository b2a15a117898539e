//! Configuration models.

use serde::Deserialize;

/// Top-level application configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub scan: ScanConfig,
    pub runner: RunnerConfig,
    pub watcher: WatcherSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            scan: ScanConfig::default(),
            runner: RunnerConfig::default(),
            watcher: WatcherSettings::default(),
        }
    }
}

/// Application (Postgres) database settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/fundamental".to_string(),
            max_connections: 10,
        }
    }
}

/// Redis connection settings for the broker and progress counters.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
        }
    }
}

impl RedisConfig {
    /// Connection URL in the form `redis://[:password@]host:port/0`.
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) if !password.is_empty() => {
                format!("redis://:{}@{}:{}/0", password, self.host, self.port)
            }
            _ => format!("redis://{}:{}/0", self.host, self.port),
        }
    }
}

/// Library-scan behavior knobs.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Data source resolved from the registry for scans.
    pub data_source: String,
    /// Minimum confidence for the matching orchestrator to accept a match.
    pub min_confidence: f64,
    /// Minimum Levenshtein similarity for the fuzzy strategy.
    pub min_similarity: f64,
    /// Normalized-name similarity at or above which two metadata rows are
    /// considered duplicates.
    pub duplicate_name_similarity: f64,
    /// Minimum similarity for persisting an author-similarity edge.
    pub score_min_similarity: f64,
    /// Existing mappings younger than this many days are not re-matched.
    pub stale_data_max_age_days: Option<i64>,
    /// Minimum days between refreshes of already-synced author metadata.
    pub stale_data_refresh_interval_days: Option<i64>,
    /// Cap on works fetched per author during ingest.
    pub max_works_per_author: Option<i64>,
    /// Consumer instances per scan stage topic.
    pub workers_per_stage: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            data_source: "openlibrary".to_string(),
            min_confidence: 0.5,
            min_similarity: 0.7,
            duplicate_name_similarity: 0.85,
            score_min_similarity: 0.2,
            stale_data_max_age_days: None,
            stale_data_refresh_interval_days: None,
            max_works_per_author: Some(1000),
            workers_per_stage: 1,
        }
    }
}

/// Which task runtime backend executes enqueued tasks.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerBackend {
    /// In-process bounded worker pool.
    Thread,
    /// Broker-backed workers consuming the task topic.
    Broker,
}

/// Task runtime settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub backend: RunnerBackend,
    pub max_workers: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            backend: RunnerBackend::Thread,
            max_workers: 8,
        }
    }
}

/// Ingest-directory watcher settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WatcherSettings {
    pub ingest_dir: Option<String>,
    pub debounce_seconds: f64,
    pub poll_interval_seconds: f64,
    /// Use the polling watcher instead of native notifications. Also
    /// settable through `WATCHFILES_FORCE_POLLING=true`.
    pub force_polling: bool,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            ingest_dir: None,
            debounce_seconds: 5.0,
            poll_interval_seconds: 30.0,
            force_polling: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_url_without_password() {
        let redis = RedisConfig::default();
        assert_eq!(redis.url(), "redis://localhost:6379/0");
    }

    #[test]
    fn redis_url_with_password() {
        let redis = RedisConfig {
            host: "cache".into(),
            port: 6380,
            password: Some("hunter2".into()),
        };
        assert_eq!(redis.url(), "redis://:hunter2@cache:6380/0");
    }

    #[test]
    fn empty_password_is_ignored() {
        let redis = RedisConfig {
            password: Some(String::new()),
            ..RedisConfig::default()
        };
        assert_eq!(redis.url(), "redis://localhost:6379/0");
    }
}
