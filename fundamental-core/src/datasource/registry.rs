//! Data source registry.
//!
//! An explicit registry value (not process-global state) mapping a source
//! name to a constructor closure. Consumers resolve sources by name so
//! wiring stays configuration-driven, and embedders can register
//! additional sources without touching this crate.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgPool;

use crate::error::{CoreError, Result};

use super::openlibrary::OpenLibraryDataSource;
use super::{DataSource, OpenLibraryDumpDataSource};

/// Source selection carried in scan payloads:
/// `{"name": "openlibrary", "kwargs": {}}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataSourceConfig {
    pub name: String,
    #[serde(default)]
    pub kwargs: Value,
}

impl DataSourceConfig {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kwargs: Value::Null,
        }
    }
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self::named("openlibrary")
    }
}

type SourceConstructor =
    Arc<dyn Fn(&Value) -> Result<Arc<dyn DataSource>> + Send + Sync>;

/// Name → constructor table for data sources.
#[derive(Clone)]
pub struct DataSourceRegistry {
    constructors: HashMap<String, SourceConstructor>,
}

impl fmt::Debug for DataSourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSourceRegistry")
            .field("sources", &self.available_sources())
            .finish()
    }
}

impl DataSourceRegistry {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with the production sources wired: the OpenLibrary HTTP
    /// backend, and the local dump backend when a pool is available.
    pub fn with_defaults(dump_pool: Option<PgPool>) -> Self {
        let mut registry = Self::new();

        registry.register("openlibrary", |kwargs| {
            let delay_ms = kwargs
                .get("rate_limit_delay_ms")
                .and_then(Value::as_u64)
                .unwrap_or(500);
            let source = match kwargs.get("base_url").and_then(Value::as_str) {
                Some(base_url) => OpenLibraryDataSource::with_options(
                    base_url,
                    Duration::from_millis(delay_ms),
                )?,
                None if delay_ms != 500 => OpenLibraryDataSource::with_options(
                    "https://openlibrary.org",
                    Duration::from_millis(delay_ms),
                )?,
                None => OpenLibraryDataSource::new()?,
            };
            Ok(Arc::new(source) as Arc<dyn DataSource>)
        });

        if let Some(pool) = dump_pool {
            registry.register("openlibrary_dump", move |_kwargs| {
                Ok(Arc::new(OpenLibraryDumpDataSource::new(pool.clone()))
                    as Arc<dyn DataSource>)
            });
        }

        registry
    }

    /// Register a constructor under a name (case-insensitive).
    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn DataSource>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(name.to_lowercase(), Arc::new(constructor));
    }

    pub fn available_sources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Create a data source instance by name.
    pub fn create_source(&self, config: &DataSourceConfig) -> Result<Arc<dyn DataSource>> {
        let constructor = self
            .constructors
            .get(&config.name.to_lowercase())
            .ok_or_else(|| {
                CoreError::Configuration(format!(
                    "unknown data source: {}. Available: {}",
                    config.name,
                    self.available_sources().join(", ")
                ))
            })?;
        constructor(&config.kwargs)
    }
}

impl Default for DataSourceRegistry {
    fn default() -> Self {
        Self::with_defaults(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registered_sources_case_insensitively() {
        let registry = DataSourceRegistry::with_defaults(None);
        let source = registry
            .create_source(&DataSourceConfig::named("OpenLibrary"))
            .unwrap();
        assert_eq!(source.name(), "openlibrary");
    }

    #[test]
    fn unknown_source_is_a_configuration_error() {
        let registry = DataSourceRegistry::with_defaults(None);
        let err = registry
            .create_source(&DataSourceConfig::named("goodreads"))
            .unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
        assert!(err.to_string().contains("openlibrary"));
    }

    #[test]
    fn custom_sources_can_be_registered() {
        let mut registry = DataSourceRegistry::new();
        registry.register("noop", |_| {
            Ok(Arc::new(super::super::NoOpDataSource) as Arc<dyn DataSource>)
        });
        let source = registry
            .create_source(&DataSourceConfig::named("noop"))
            .unwrap();
        assert_eq!(source.name(), "noop");
    }

    #[test]
    fn kwargs_override_rate_limit_delay() {
        let registry = DataSourceRegistry::with_defaults(None);
        let config = DataSourceConfig {
            name: "openlibrary".into(),
            kwargs: serde_json::json!({"rate_limit_delay_ms": 50}),
        };
        assert!(registry.create_source(&config).is_ok());
    }
}
