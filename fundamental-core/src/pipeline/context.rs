//! Shared scan context.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use fundamental_model::{Library, LibraryId, TaskId};

use crate::catalog::{Author, CalibreCatalog};
use crate::datasource::DataSource;
use crate::matching::MatchResult;
use crate::store::{AuthorIngest, AuthorMerger, AuthorStore, TaskStore};

/// Receives stage progress. Injected so stages never talk to the task
/// store directly.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn update(&self, progress: f64, meta: Option<Value>);
}

/// Progress sink that writes into a task row.
pub struct TaskProgress {
    store: Arc<dyn TaskStore>,
    task_id: TaskId,
}

impl TaskProgress {
    pub fn new(store: Arc<dyn TaskStore>, task_id: TaskId) -> Self {
        Self { store, task_id }
    }
}

impl fmt::Debug for TaskProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskProgress")
            .field("task_id", &self.task_id)
            .finish()
    }
}

#[async_trait]
impl ProgressSink for TaskProgress {
    async fn update(&self, progress: f64, meta: Option<Value>) {
        if let Err(err) = self.store.update_progress(self.task_id, progress, meta).await {
            warn!("Failed to update progress for task {}: {}", self.task_id, err);
        }
    }
}

/// Progress sink that discards updates (manual refreshes, tests).
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProgress;

#[async_trait]
impl ProgressSink for NoopProgress {
    async fn update(&self, _progress: f64, _meta: Option<Value>) {}
}

/// State shared by all stages of one scan.
pub struct ScanContext {
    pub library_id: LibraryId,
    pub library: Library,
    pub authors: Arc<dyn AuthorStore>,
    pub ingest: Arc<dyn AuthorIngest>,
    pub merger: Arc<dyn AuthorMerger>,
    pub catalog: Arc<dyn CalibreCatalog>,
    pub data_source: Arc<dyn DataSource>,
    cancel: CancellationToken,
    progress: Arc<dyn ProgressSink>,

    /// Filled by crawl, consumed by match.
    pub crawled_authors: Vec<Author>,
    /// Filled by match, consumed by ingest and link.
    pub match_results: Vec<MatchResult>,
    /// Authors the orchestrator found no match for.
    pub unmatched_authors: Vec<Author>,
    /// Messages from stages that failed; completion surfaces them.
    pub stage_failures: Vec<String>,
}

impl fmt::Debug for ScanContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanContext")
            .field("library_id", &self.library_id)
            .field("crawled_authors", &self.crawled_authors.len())
            .field("match_results", &self.match_results.len())
            .field("unmatched_authors", &self.unmatched_authors.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl ScanContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        library: Library,
        authors: Arc<dyn AuthorStore>,
        ingest: Arc<dyn AuthorIngest>,
        merger: Arc<dyn AuthorMerger>,
        catalog: Arc<dyn CalibreCatalog>,
        data_source: Arc<dyn DataSource>,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            library_id: library.id,
            library,
            authors,
            ingest,
            merger,
            catalog,
            data_source,
            cancel,
            progress,
            crawled_authors: Vec::new(),
            match_results: Vec::new(),
            unmatched_authors: Vec::new(),
            stage_failures: Vec::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn update_progress(&self, progress: f64, meta: Option<Value>) {
        self.progress.update(progress, meta).await;
    }
}
