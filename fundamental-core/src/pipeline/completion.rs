//! Completion stage: finalize the scan outcome.

use async_trait::async_trait;
use tracing::{info, warn};

use super::context::ScanContext;
use super::stage::{PipelineStage, StageResult};

/// Reports the overall scan outcome. Any critical upstream failure makes
/// the whole scan fail; otherwise the task completes with a final
/// summary in its progress metadata.
#[derive(Debug, Default)]
pub struct CompletionStage {
    progress: f64,
}

impl CompletionStage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PipelineStage for CompletionStage {
    fn name(&self) -> &'static str {
        "completion"
    }

    fn progress(&self) -> f64 {
        self.progress
    }

    async fn execute(&mut self, ctx: &mut ScanContext) -> StageResult {
        self.progress = 1.0;

        if !ctx.stage_failures.is_empty() {
            let message = ctx.stage_failures.join("; ");
            warn!(
                "Library {} scan finished with failures: {}",
                ctx.library_id, message
            );
            return StageResult::failed(message);
        }

        ctx.update_progress(
            1.0,
            Some(serde_json::json!({
                "current_stage": {
                    "name": "completion",
                    "status": "completed",
                    "total_items": ctx.crawled_authors.len(),
                    "matched": ctx.match_results.len(),
                    "unmatched": ctx.unmatched_authors.len(),
                },
            })),
        )
        .await;

        info!("Library {} scan completed", ctx.library_id);
        StageResult::ok("Scan completed")
    }
}
