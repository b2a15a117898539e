//! Worker fleet lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use fundamental_config::ScanConfig;

use crate::catalog::CatalogOpener;
use crate::datasource::{DataSourceConfig, DataSourceRegistry};
use crate::error::Result;
use crate::messaging::ScanBroker;
use crate::store::{AuthorIngest, AuthorMerger, AuthorStore, TaskStore};

use super::completion::CompletionWorker;
use super::crawl::CrawlWorker;
use super::dedup_worker::DeduplicateWorker;
use super::ingest::IngestWorker;
use super::link::LinkWorker;
use super::match_worker::MatchWorker;
use super::score::ScoreWorker;
use super::worker::{ScanWorker, attach_worker};

/// Shared dependencies handed to every worker.
#[derive(Clone)]
pub struct WorkerDependencies {
    pub store: Arc<dyn TaskStore>,
    pub authors: Arc<dyn AuthorStore>,
    pub ingest: Arc<dyn AuthorIngest>,
    pub merger: Arc<dyn AuthorMerger>,
    pub opener: Arc<dyn CatalogOpener>,
    pub registry: DataSourceRegistry,
}

impl std::fmt::Debug for WorkerDependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerDependencies")
            .field("registry", &self.registry)
            .finish()
    }
}

/// Wires one worker per stage (times `workers_per_stage`) to the broker
/// and owns the broker's consumer lifecycle.
pub struct ScanWorkerManager {
    broker: Arc<dyn ScanBroker>,
    deps: WorkerDependencies,
    config: ScanConfig,
    started: AtomicBool,
}

impl std::fmt::Debug for ScanWorkerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanWorkerManager")
            .field("started", &self.started.load(Ordering::SeqCst))
            .finish()
    }
}

impl ScanWorkerManager {
    pub fn new(
        broker: Arc<dyn ScanBroker>,
        deps: WorkerDependencies,
        config: ScanConfig,
    ) -> Self {
        Self {
            broker,
            deps,
            config,
            started: AtomicBool::new(false),
        }
    }

    /// Redis connection URL from the conventional environment variables.
    pub fn redis_url_from_env() -> String {
        let host = std::env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_string());
        let port = std::env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
        match std::env::var("REDIS_PASSWORD") {
            Ok(password) if !password.is_empty() => {
                format!("redis://:{password}@{host}:{port}/0")
            }
            _ => format!("redis://{host}:{port}/0"),
        }
    }

    fn build_workers(&self) -> Result<Vec<Arc<dyn ScanWorker>>> {
        let deps = &self.deps;
        let config = &self.config;

        // The match worker talks to the live HTTP source while ingest
        // prefers the local dump when it is registered.
        let match_source = deps
            .registry
            .create_source(&DataSourceConfig::named(&config.data_source))?;
        let ingest_source_config = if deps
            .registry
            .available_sources()
            .iter()
            .any(|name| name == "openlibrary_dump")
        {
            DataSourceConfig::named("openlibrary_dump")
        } else {
            DataSourceConfig::named(&config.data_source)
        };
        let ingest_source = deps.registry.create_source(&ingest_source_config)?;

        Ok(vec![
            Arc::new(CrawlWorker::new(
                Arc::clone(&self.broker),
                Arc::clone(&deps.store),
                Arc::clone(&deps.opener),
            )),
            Arc::new(MatchWorker::new(
                Arc::clone(&self.broker),
                Arc::clone(&deps.authors),
                match_source,
                config.min_confidence,
                config.stale_data_max_age_days,
            )),
            Arc::new(IngestWorker::new(
                Arc::clone(&self.broker),
                Arc::clone(&deps.ingest),
                ingest_source,
                config.stale_data_max_age_days,
                config.stale_data_refresh_interval_days,
                config.max_works_per_author.map(|n| n as usize),
            )),
            Arc::new(LinkWorker::new(
                Arc::clone(&self.broker),
                Arc::clone(&deps.authors),
            )),
            Arc::new(DeduplicateWorker::new(
                Arc::clone(&self.broker),
                Arc::clone(&deps.authors),
                Arc::clone(&deps.merger),
                config.duplicate_name_similarity,
            )),
            Arc::new(ScoreWorker::new(
                Arc::clone(&self.broker),
                Arc::clone(&deps.authors),
                config.score_min_similarity,
                config.stale_data_max_age_days,
            )),
            Arc::new(CompletionWorker::new(
                Arc::clone(&self.broker),
                Arc::clone(&deps.store),
            )),
        ])
    }

    /// Subscribe every worker and start the broker's consumers.
    pub async fn start_workers(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Workers already started");
            return Ok(());
        }

        let instances = self.config.workers_per_stage.max(1);
        info!(
            "Starting distributed scan workers ({} instances per stage)...",
            instances
        );

        for _ in 0..instances {
            for worker in self.build_workers()? {
                attach_worker(&self.broker, worker).await?;
            }
        }

        self.broker.start().await?;
        info!("All scan workers started and listening for jobs");
        Ok(())
    }

    /// Stop the broker's consumers gracefully.
    pub async fn stop_workers(&self) -> Result<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Stopping scan workers...");
        self.broker.stop().await?;
        info!("All scan workers stopped");
        Ok(())
    }
}
