//! Score stage: compute author-similarity edges.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use fundamental_model::{AuthorMetadataId, LibraryId};

use crate::error::{CoreError, Result};
use crate::store::AuthorStore;

use super::context::ScanContext;
use super::stage::{PipelineStage, StageResult};

const SIMILARITY_SOURCE: &str = "subject_overlap";
const SUBJECT_WEIGHT: f64 = 0.7;
const WORK_WEIGHT: f64 = 0.3;

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

struct AuthorFeatures {
    subjects: HashSet<String>,
    works: HashSet<String>,
}

/// Score all author pairs of a library from shared subjects and works,
/// writing edges at or above `min_similarity`. Returns `(pairs_scored,
/// edges_written)`. Shared between the in-process stage and the score
/// worker.
pub(crate) async fn score_library(
    authors: &dyn AuthorStore,
    library_id: LibraryId,
    min_similarity: f64,
    cancel: &CancellationToken,
) -> Result<(usize, usize)> {
    let metadata = authors.list_metadata_for_library(library_id).await?;

    // Placeholders have no works or subjects to compare.
    let ids: Vec<AuthorMetadataId> = metadata
        .iter()
        .filter(|m| m.external_key.is_some())
        .map(|m| m.id)
        .collect();

    let mut features: HashMap<i64, AuthorFeatures> = HashMap::new();
    for id in &ids {
        let subjects = authors.subjects_for(*id).await.unwrap_or_default();
        let works = authors.work_keys_for(*id).await.unwrap_or_default();
        features.insert(
            id.as_i64(),
            AuthorFeatures {
                subjects: subjects.into_iter().collect(),
                works: works.into_iter().collect(),
            },
        );
    }

    let mut pairs_scored = 0usize;
    let mut edges_written = 0usize;

    for i in 0..ids.len() {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled("score cancelled".to_string()));
        }
        for j in (i + 1)..ids.len() {
            let a = &features[&ids[i].as_i64()];
            let b = &features[&ids[j].as_i64()];

            let score = SUBJECT_WEIGHT * jaccard(&a.subjects, &b.subjects)
                + WORK_WEIGHT * jaccard(&a.works, &b.works);
            pairs_scored += 1;

            if score >= min_similarity {
                debug!("Similarity {:.3} between {} and {}", score, ids[i], ids[j]);
                authors
                    .upsert_similarity(ids[i], ids[j], score, SIMILARITY_SOURCE)
                    .await?;
                edges_written += 1;
            }
        }
    }

    info!(
        "Scored {} author pairs in library {} ({} similarity edges)",
        pairs_scored, library_id, edges_written
    );

    Ok((pairs_scored, edges_written))
}

/// Whether a library's similarity edges are still fresh enough to skip
/// re-scoring.
pub(crate) async fn scores_are_fresh(
    authors: &dyn AuthorStore,
    library_id: LibraryId,
    stale_data_max_age_days: Option<i64>,
) -> bool {
    let Some(max_age_days) = stale_data_max_age_days else {
        return false;
    };
    match authors.latest_similarity_at(library_id).await {
        Ok(Some(latest)) => {
            Utc::now().signed_duration_since(latest).num_days() < max_age_days
        }
        _ => false,
    }
}

/// Pipeline stage wrapper around [`score_library`].
#[derive(Debug)]
pub struct ScoreStage {
    min_similarity: f64,
    stale_data_max_age_days: Option<i64>,
    progress: f64,
}

impl ScoreStage {
    pub fn new(min_similarity: f64, stale_data_max_age_days: Option<i64>) -> Self {
        Self {
            min_similarity,
            stale_data_max_age_days,
            progress: 0.0,
        }
    }
}

#[async_trait]
impl PipelineStage for ScoreStage {
    fn name(&self) -> &'static str {
        "score"
    }

    fn progress(&self) -> f64 {
        self.progress
    }

    async fn execute(&mut self, ctx: &mut ScanContext) -> StageResult {
        if ctx.is_cancelled() {
            return StageResult::failed("Score cancelled");
        }

        if scores_are_fresh(
            ctx.authors.as_ref(),
            ctx.library_id,
            self.stale_data_max_age_days,
        )
        .await
        {
            info!(
                "Similarity scores for library {} are fresh, skipping",
                ctx.library_id
            );
            self.progress = 1.0;
            return StageResult::ok_with_stats(
                "Similarity scores are fresh",
                serde_json::json!({"skipped": 1}),
            );
        }

        let outcome = score_library(
            ctx.authors.as_ref(),
            ctx.library_id,
            self.min_similarity,
            &ctx.cancellation_token(),
        )
        .await;

        let (pairs_scored, edges_written) = match outcome {
            Ok(counts) => counts,
            Err(CoreError::Cancelled(_)) => return StageResult::failed("Score cancelled"),
            Err(err) => return StageResult::failed(format!("Score failed: {err}")),
        };

        self.progress = 1.0;
        ctx.update_progress(
            self.progress,
            Some(serde_json::json!({
                "current_stage": {
                    "name": "score",
                    "status": "completed",
                    "pairs_scored": pairs_scored,
                    "similarities_created": edges_written,
                },
            })),
        )
        .await;

        StageResult::ok_with_stats(
            format!("Scored {pairs_scored} pairs"),
            serde_json::json!({
                "pairs_scored": pairs_scored,
                "similarities_created": edges_written,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jaccard_of_disjoint_sets_is_zero() {
        let a: HashSet<String> = ["fantasy"].iter().map(ToString::to_string).collect();
        let b: HashSet<String> = ["horror"].iter().map(ToString::to_string).collect();
        assert_eq!(jaccard(&a, &b), 0.0);
    }

    #[test]
    fn jaccard_of_identical_sets_is_one() {
        let a: HashSet<String> =
            ["fantasy", "horror"].iter().map(ToString::to_string).collect();
        assert_eq!(jaccard(&a, &a.clone()), 1.0);
    }

    #[test]
    fn jaccard_of_empty_sets_is_zero() {
        assert_eq!(jaccard(&HashSet::new(), &HashSet::new()), 0.0);
    }

    #[test]
    fn jaccard_counts_overlap() {
        let a: HashSet<String> = ["a", "b", "c"].iter().map(ToString::to_string).collect();
        let b: HashSet<String> = ["b", "c", "d"].iter().map(ToString::to_string).collect();
        assert!((jaccard(&a, &b) - 0.5).abs() < 1e-9);
    }
}
