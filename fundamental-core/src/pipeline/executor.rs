//! Sequential stage executor.

use tracing::{info, warn};

use crate::error::{CoreError, Result};

use super::context::ScanContext;
use super::stage::{PipelineStage, StageResult};

/// Outcome of running the whole pipeline.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub success: bool,
    pub message: String,
    pub stage_results: Vec<(&'static str, StageResult)>,
}

/// Runs stages in order against a shared context.
///
/// A failed stage records its message and the remaining work stages are
/// skipped; the completion stage always runs so the failure is
/// surfaced in one place.
pub struct PipelineExecutor {
    stages: Vec<Box<dyn PipelineStage>>,
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.stages.iter().map(|s| s.name()).collect();
        f.debug_struct("PipelineExecutor")
            .field("stages", &names)
            .finish()
    }
}

impl PipelineExecutor {
    pub fn new(stages: Vec<Box<dyn PipelineStage>>) -> Self {
        Self { stages }
    }

    pub async fn execute(&mut self, ctx: &mut ScanContext) -> Result<PipelineOutcome> {
        let mut stage_results = Vec::with_capacity(self.stages.len());

        for stage in &mut self.stages {
            if ctx.is_cancelled() {
                return Err(CoreError::Cancelled("library scan cancelled".to_string()));
            }

            let name = stage.name();
            if !ctx.stage_failures.is_empty() && name != "completion" {
                info!("Skipping stage {} after earlier failure", name);
                continue;
            }

            info!("Executing pipeline stage: {}", name);
            let result = stage.execute(ctx).await;

            if !result.success {
                let message = result
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("{name} failed"));
                warn!("Stage {} failed: {}", name, message);
                if name != "completion" {
                    ctx.stage_failures.push(message);
                }
            }

            stage_results.push((name, result));
        }

        let success = stage_results
            .last()
            .map(|(_, result)| result.success)
            .unwrap_or(false);
        let message = stage_results
            .last()
            .and_then(|(_, result)| result.message.clone())
            .unwrap_or_default();

        Ok(PipelineOutcome {
            success,
            message,
            stage_results,
        })
    }
}
