//! Environment-driven configuration loading.
//!
//! Settings come from the process environment with the `FUNDAMENTAL__`
//! prefix and `__` as the section separator (for example
//! `FUNDAMENTAL__REDIS__HOST`). A handful of well-known bare variables
//! (`DATABASE_URL`, `REDIS_HOST`, `REDIS_PORT`, `REDIS_PASSWORD`,
//! `WATCHFILES_FORCE_POLLING`) are honored for compatibility with
//! container deployments.

use thiserror::Error;

use crate::models::Config;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Read(#[from] config::ConfigError),

    #[error("invalid configuration value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Load configuration from the environment.
pub fn load() -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(
            config::Environment::with_prefix("FUNDAMENTAL")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let mut cfg: Config = builder.try_deserialize()?;
    apply_well_known_env(&mut cfg)?;
    Ok(cfg)
}

fn apply_well_known_env(cfg: &mut Config) -> Result<(), ConfigError> {
    if let Ok(url) = std::env::var("DATABASE_URL")
        && !url.is_empty()
    {
        cfg.database.url = url;
    }
    if let Ok(host) = std::env::var("REDIS_HOST")
        && !host.is_empty()
    {
        cfg.redis.host = host;
    }
    if let Ok(port) = std::env::var("REDIS_PORT")
        && !port.is_empty()
    {
        cfg.redis.port = port.parse().map_err(|_| ConfigError::InvalidValue {
            key: "REDIS_PORT",
            value: port,
        })?;
    }
    if let Ok(password) = std::env::var("REDIS_PASSWORD")
        && !password.is_empty()
    {
        cfg.redis.password = Some(password);
    }
    if let Ok(force) = std::env::var("WATCHFILES_FORCE_POLLING") {
        cfg.watcher.force_polling =
            matches!(force.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.runner.max_workers, 8);
        assert_eq!(cfg.scan.min_confidence, 0.5);
        assert_eq!(cfg.scan.data_source, "openlibrary");
        assert_eq!(cfg.scan.stale_data_max_age_days, None);
        assert!(!cfg.watcher.force_polling);
        assert_eq!(cfg.redis.url(), "redis://localhost:6379/0");
    }

    #[test]
    fn load_accepts_an_empty_environment() {
        // With nothing set, loading falls back to the defaults instead
        // of failing.
        let cfg = load().expect("load without env should succeed");
        assert_eq!(cfg.runner.max_workers, 8);
    }
}
