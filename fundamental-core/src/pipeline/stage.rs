//! Pipeline stage contract.

use async_trait::async_trait;
use serde_json::Value;

use super::context::ScanContext;

/// Result of executing a pipeline stage. Stages capture their own
/// errors; `success = false` carries the reason in `message`.
#[derive(Clone, Debug)]
pub struct StageResult {
    pub success: bool,
    pub message: Option<String>,
    pub stats: Option<Value>,
}

impl StageResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            stats: None,
        }
    }

    pub fn ok_with_stats(message: impl Into<String>, stats: Value) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            stats: Some(stats),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            stats: None,
        }
    }
}

/// One unit of the scan workflow.
///
/// Stages check cancellation at least once per processed item and at
/// their boundaries, and report progress through the context.
#[async_trait]
pub trait PipelineStage: Send {
    fn name(&self) -> &'static str;

    /// Progress of this stage in `[0.0, 1.0]`.
    fn progress(&self) -> f64;

    async fn execute(&mut self, ctx: &mut ScanContext) -> StageResult;
}
