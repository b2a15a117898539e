//! Crawl stage: enumerate catalog authors.

use async_trait::async_trait;
use tracing::info;

use super::context::ScanContext;
use super::stage::{PipelineStage, StageResult};

/// Reads every author from the Calibre catalog into the context.
#[derive(Debug, Default)]
pub struct CrawlStage {
    progress: f64,
}

impl CrawlStage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PipelineStage for CrawlStage {
    fn name(&self) -> &'static str {
        "crawl"
    }

    fn progress(&self) -> f64 {
        self.progress
    }

    async fn execute(&mut self, ctx: &mut ScanContext) -> StageResult {
        if ctx.is_cancelled() {
            return StageResult::failed("Crawl cancelled");
        }

        let authors = match ctx.catalog.list_authors().await {
            Ok(authors) => authors,
            Err(err) => return StageResult::failed(format!("Crawl failed: {err}")),
        };

        let count = authors.len();
        info!(
            "Crawled {} authors from library {} ({})",
            count, ctx.library_id, ctx.library.name
        );

        ctx.crawled_authors = authors;
        self.progress = 1.0;

        ctx.update_progress(
            self.progress,
            Some(serde_json::json!({
                "current_stage": {
                    "name": "crawl",
                    "status": "completed",
                    "total_items": count,
                },
            })),
        )
        .await;

        StageResult::ok_with_stats(
            format!("Crawled {count} authors"),
            serde_json::json!({"authors": count}),
        )
    }
}
