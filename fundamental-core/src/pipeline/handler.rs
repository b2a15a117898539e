//! Task handler that runs the whole scan pipeline in-process.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use fundamental_config::ScanConfig;
use fundamental_model::LibraryId;

use crate::catalog::CatalogOpener;
use crate::datasource::{DataSourceConfig, DataSourceRegistry};
use crate::error::{CoreError, Result};
use crate::runtime::{TaskContext, TaskHandler};
use crate::store::{AuthorIngest, AuthorMerger, AuthorStore, LibraryStore};

use super::completion::CompletionStage;
use super::context::{ScanContext, TaskProgress};
use super::crawl::CrawlStage;
use super::dedup_stage::DeduplicateStage;
use super::executor::PipelineExecutor;
use super::ingest::IngestStage;
use super::link::LinkStage;
use super::match_stage::MatchStage;
use super::score::ScoreStage;
use super::stage::PipelineStage;

/// Handler for `library_scan` tasks: crawls the catalog, matches and
/// ingests authors, links mappings, deduplicates, and scores, all in
/// one process.
pub struct LibraryScanTaskHandler {
    libraries: Arc<dyn LibraryStore>,
    authors: Arc<dyn AuthorStore>,
    ingest: Arc<dyn AuthorIngest>,
    merger: Arc<dyn AuthorMerger>,
    opener: Arc<dyn CatalogOpener>,
    registry: DataSourceRegistry,
    config: ScanConfig,
}

impl std::fmt::Debug for LibraryScanTaskHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryScanTaskHandler")
            .field("registry", &self.registry)
            .finish()
    }
}

impl LibraryScanTaskHandler {
    pub fn new(
        libraries: Arc<dyn LibraryStore>,
        authors: Arc<dyn AuthorStore>,
        ingest: Arc<dyn AuthorIngest>,
        merger: Arc<dyn AuthorMerger>,
        opener: Arc<dyn CatalogOpener>,
        registry: DataSourceRegistry,
        config: ScanConfig,
    ) -> Self {
        Self {
            libraries,
            authors,
            ingest,
            merger,
            opener,
            registry,
            config,
        }
    }

    fn stages(&self) -> Vec<Box<dyn PipelineStage>> {
        vec![
            Box::new(CrawlStage::new()),
            Box::new(MatchStage::new(
                self.config.min_confidence,
                self.config.stale_data_max_age_days,
            )),
            Box::new(IngestStage::new(
                self.config.stale_data_max_age_days,
                self.config.stale_data_refresh_interval_days,
                self.config.max_works_per_author.map(|n| n as usize),
            )),
            Box::new(LinkStage::new()),
            Box::new(DeduplicateStage::new(self.config.duplicate_name_similarity)),
            Box::new(ScoreStage::new(
                self.config.score_min_similarity,
                self.config.stale_data_max_age_days,
            )),
            Box::new(CompletionStage::new()),
        ]
    }
}

fn field<'a>(payload: &'a Value, metadata: Option<&'a Value>, key: &str) -> Option<&'a Value> {
    payload
        .get(key)
        .or_else(|| metadata.and_then(|meta| meta.get(key)))
}

#[async_trait]
impl TaskHandler for LibraryScanTaskHandler {
    async fn run(
        &self,
        ctx: &TaskContext,
        payload: Value,
        metadata: Option<Value>,
    ) -> Result<()> {
        let library_id = field(&payload, metadata.as_ref(), "library_id")
            .and_then(Value::as_i64)
            .map(LibraryId)
            .ok_or_else(|| {
                CoreError::InvalidInput("library_id is required in task metadata".to_string())
            })?;

        let source_config: DataSourceConfig =
            match field(&payload, metadata.as_ref(), "data_source_config") {
                Some(value) => serde_json::from_value(value.clone())?,
                None => DataSourceConfig::named(&self.config.data_source),
            };

        let library = self
            .libraries
            .get(library_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("library {library_id}")))?;

        let catalog = self
            .opener
            .open(&library.calibre_db_path, &library.calibre_db_file)
            .await?;
        let data_source = self.registry.create_source(&source_config)?;

        info!(
            "Starting library scan for {} ({}) with source {}",
            library.name, library_id, data_source.name()
        );

        let progress = Arc::new(TaskProgress::new(Arc::clone(&ctx.store), ctx.task_id));
        let mut scan_ctx = ScanContext::new(
            library,
            Arc::clone(&self.authors),
            Arc::clone(&self.ingest),
            Arc::clone(&self.merger),
            catalog,
            data_source,
            progress,
            ctx.cancellation_token(),
        );

        let mut executor = PipelineExecutor::new(self.stages());
        let outcome = executor.execute(&mut scan_ctx).await?;

        if outcome.success {
            info!(
                "Library scan completed successfully for library {}",
                library_id
            );
            Ok(())
        } else {
            Err(CoreError::Internal(format!(
                "library scan failed: {}",
                outcome.message
            )))
        }
    }
}
