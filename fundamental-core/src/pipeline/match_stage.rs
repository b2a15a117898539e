//! Match stage: bridge crawled authors to external author data.

use chrono::Utc;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::matching::MatchingOrchestrator;

use super::context::ScanContext;
use super::stage::{PipelineStage, StageResult};

/// Matches each crawled author through the orchestrator's strategies,
/// collecting results and unmatched authors in the context.
///
/// Network errors abort only the current author; existing mappings
/// younger than `stale_data_max_age_days` are skipped without touching
/// the data source.
pub struct MatchStage {
    orchestrator: MatchingOrchestrator,
    stale_data_max_age_days: Option<i64>,
    author_limit: Option<usize>,
    progress: f64,
}

impl std::fmt::Debug for MatchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchStage")
            .field("stale_data_max_age_days", &self.stale_data_max_age_days)
            .field("author_limit", &self.author_limit)
            .finish()
    }
}

impl MatchStage {
    pub fn new(min_confidence: f64, stale_data_max_age_days: Option<i64>) -> Self {
        Self {
            orchestrator: MatchingOrchestrator::new(min_confidence),
            stale_data_max_age_days,
            author_limit: None,
            progress: 0.0,
        }
    }

    /// Cap processed authors; used by tests and manual partial scans.
    pub fn with_author_limit(mut self, limit: usize) -> Self {
        self.author_limit = Some(limit);
        self
    }

    /// An existing mapping younger than the staleness bound means the
    /// author is skipped this scan.
    async fn should_skip(&self, ctx: &ScanContext, calibre_author_id: i64) -> bool {
        let Some(max_age_days) = self.stale_data_max_age_days else {
            return false;
        };

        match ctx
            .authors
            .find_mapping_with_metadata(calibre_author_id, ctx.library_id)
            .await
        {
            Ok(Some((mapping, _))) => {
                let mapping_date = mapping.updated_at.max(mapping.created_at);
                let days_since = Utc::now().signed_duration_since(mapping_date).num_days();
                days_since < max_age_days
            }
            Ok(None) => false,
            Err(err) => {
                warn!(
                    "Mapping lookup failed for author {}: {}",
                    calibre_author_id, err
                );
                false
            }
        }
    }
}

#[async_trait]
impl PipelineStage for MatchStage {
    fn name(&self) -> &'static str {
        "match"
    }

    fn progress(&self) -> f64 {
        self.progress
    }

    async fn execute(&mut self, ctx: &mut ScanContext) -> StageResult {
        if ctx.is_cancelled() {
            return StageResult::failed("Match cancelled");
        }

        let mut authors = ctx.crawled_authors.clone();
        if let Some(limit) = self.author_limit {
            authors.truncate(limit);
        }
        let total = authors.len();

        info!(
            "Starting match stage for library {} ({} authors to match)",
            ctx.library_id, total
        );

        if total == 0 {
            warn!("No authors to match in library {}", ctx.library_id);
            return StageResult::ok_with_stats(
                "No authors to match",
                serde_json::json!({"matched": 0, "unmatched": 0}),
            );
        }

        let mut matched = 0usize;
        let mut unmatched = 0usize;
        let mut skipped = 0usize;

        // Log every 10% or 25 authors, whichever is more frequent.
        let log_interval = (total / 10).clamp(1, 25);

        for (idx, author) in authors.iter().enumerate() {
            if ctx.is_cancelled() {
                return StageResult::failed("Match cancelled");
            }

            if self.should_skip(ctx, author.id).await {
                skipped += 1;
                debug!(
                    "Skipping match for author '{}' (ID: {}) - existing mapping is fresh",
                    author.name, author.id
                );
            } else {
                match self
                    .orchestrator
                    .match_author(author, ctx.data_source.as_ref())
                    .await
                {
                    Ok(Some(mut result)) => {
                        result.calibre_author_id = Some(author.id);
                        debug!(
                            "Matched author '{}' (ID: {}) via {} (confidence: {:.2})",
                            author.name,
                            author.id,
                            result.match_method,
                            result.confidence_score
                        );
                        ctx.match_results.push(result);
                        matched += 1;
                    }
                    Ok(None) => {
                        ctx.unmatched_authors.push(author.clone());
                        unmatched += 1;
                    }
                    Err(err) => {
                        warn!("Error matching author '{}': {}", author.name, err);
                        ctx.unmatched_authors.push(author.clone());
                        unmatched += 1;
                    }
                }
            }

            if (idx + 1) % log_interval == 0 || idx + 1 == total {
                info!(
                    "Match progress: {}/{} authors processed ({} matched, {} unmatched, {} skipped)",
                    idx + 1,
                    total,
                    matched,
                    unmatched,
                    skipped
                );
            }

            self.progress = (idx + 1) as f64 / total as f64;
            ctx.update_progress(
                self.progress,
                Some(serde_json::json!({
                    "current_stage": {
                        "name": "match",
                        "status": "in_progress",
                        "current_item": author.name,
                        "current_index": idx + 1,
                        "total_items": total,
                        "matched": matched,
                        "unmatched": unmatched,
                        "skipped": skipped,
                    },
                })),
            )
            .await;
        }

        StageResult::ok_with_stats(
            format!("Matched {matched}/{total} authors"),
            serde_json::json!({
                "matched": matched,
                "unmatched": unmatched,
                "skipped": skipped,
                "total": total,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use fundamental_model::{AuthorMapping, AuthorMetadata, AuthorMetadataId, MatchMethod};

    use crate::catalog::Author;
    use crate::datasource::{AuthorData, MockDataSource};
    use crate::pipeline::test_support;
    use crate::store::{MockAuthorIngest, MockAuthorStore};

    use super::*;

    fn fresh_mapping(age_days: i64) -> (AuthorMapping, AuthorMetadata) {
        let at = Utc::now() - TimeDelta::days(age_days);
        (
            AuthorMapping {
                id: 1,
                calibre_author_id: 1,
                author_metadata_id: AuthorMetadataId(1),
                library_id: fundamental_model::LibraryId(1),
                confidence_score: Some(0.9),
                is_verified: false,
                matched_by: Some(MatchMethod::Exact),
                created_at: at,
                updated_at: at,
            },
            AuthorMetadata {
                id: AuthorMetadataId(1),
                external_key: Some("OL1A".into()),
                name: "John Doe".into(),
                personal_name: None,
                fuller_name: None,
                title: None,
                birth_date: None,
                death_date: None,
                entity_type: None,
                biography: None,
                location: None,
                photo_url: None,
                work_count: None,
                ratings_average: None,
                ratings_count: None,
                top_work: None,
                created_at: at,
                updated_at: at,
                last_synced_at: None,
            },
        )
    }

    #[tokio::test]
    async fn fresh_mappings_are_skipped_without_touching_the_source() {
        let mut authors = MockAuthorStore::new();
        authors
            .expect_find_mapping_with_metadata()
            .returning(|_, _| Ok(Some(fresh_mapping(5))));

        // Freshness means zero HTTP traffic.
        let mut source = MockDataSource::new();
        source.expect_search_author().never();

        let mut ctx = test_support::context(authors, MockAuthorIngest::new(), source);
        ctx.crawled_authors = vec![Author::new(1, "John Doe"), Author::new(2, "Jane Roe")];

        let mut stage = MatchStage::new(0.5, Some(30));
        let result = stage.execute(&mut ctx).await;

        assert!(result.success);
        let stats = result.stats.unwrap();
        assert_eq!(stats["skipped"], 2);
        assert_eq!(stats["matched"], 0);
        assert!(ctx.match_results.is_empty());
    }

    #[tokio::test]
    async fn network_failure_aborts_only_the_current_author() {
        let authors = MockAuthorStore::new();

        let mut source = MockDataSource::new();
        source.expect_search_author().returning(|name, _| {
            if name == "Broken Author" {
                Err(crate::datasource::DataSourceError::Network("reset".into()))
            } else {
                Ok(vec![AuthorData {
                    key: format!("OL{name}A"),
                    name: name.to_string(),
                    ..AuthorData::default()
                }])
            }
        });

        let mut ctx = test_support::context(authors, MockAuthorIngest::new(), source);
        ctx.crawled_authors = vec![
            Author::new(1, "First Author"),
            Author::new(2, "Broken Author"),
            Author::new(3, "Third Author"),
        ];

        let mut stage = MatchStage::new(0.5, None);
        let result = stage.execute(&mut ctx).await;

        assert!(result.success);
        let stats = result.stats.unwrap();
        assert_eq!(stats["matched"], 2);
        assert_eq!(stats["unmatched"], 1);
        assert_eq!(ctx.match_results.len(), 2);
        assert_eq!(ctx.unmatched_authors.len(), 1);
        assert_eq!(ctx.unmatched_authors[0].name, "Broken Author");
    }

    #[tokio::test]
    async fn cancellation_stops_the_stage() {
        let mut ctx = test_support::context(
            MockAuthorStore::new(),
            MockAuthorIngest::new(),
            MockDataSource::new(),
        );
        ctx.crawled_authors = vec![Author::new(1, "John Doe")];
        ctx.cancellation_token().cancel();

        let mut stage = MatchStage::new(0.5, None);
        let result = stage.execute(&mut ctx).await;
        assert!(!result.success);
    }
}
