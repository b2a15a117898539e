//! Ingest stage: fetch full author data and persist it.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::matching::MatchResult;

use super::context::ScanContext;
use super::stage::{PipelineStage, StageResult};
use super::staleness::should_skip_refresh;

/// Fetches full metadata for each unique matched author and stores it
/// through the ingestion unit of work. Commits happen per author, so
/// partial progress survives a crash.
#[derive(Debug)]
pub struct IngestStage {
    stale_data_max_age_days: Option<i64>,
    stale_data_refresh_interval_days: Option<i64>,
    max_works_per_author: Option<usize>,
    author_limit: Option<usize>,
    progress: f64,
}

impl IngestStage {
    pub fn new(
        stale_data_max_age_days: Option<i64>,
        stale_data_refresh_interval_days: Option<i64>,
        max_works_per_author: Option<usize>,
    ) -> Self {
        Self {
            stale_data_max_age_days,
            stale_data_refresh_interval_days,
            max_works_per_author,
            author_limit: None,
            progress: 0.0,
        }
    }

    pub fn with_author_limit(mut self, limit: usize) -> Self {
        self.author_limit = Some(limit);
        self
    }

    async fn should_skip_fetch(&self, ctx: &ScanContext, key: &str) -> bool {
        if self.stale_data_max_age_days.is_none()
            && self.stale_data_refresh_interval_days.is_none()
        {
            return false;
        }
        let last_synced = match ctx.ingest.last_synced_at(key).await {
            Ok(last_synced) => last_synced,
            Err(err) => {
                warn!("Sync-date lookup failed for {}: {}", key, err);
                return false;
            }
        };
        should_skip_refresh(
            last_synced,
            self.stale_data_max_age_days,
            self.stale_data_refresh_interval_days,
            Utc::now(),
        )
    }

    /// Fetch the full author record plus its work keys; transient errors
    /// surface to the caller and count as a per-author failure.
    async fn ingest_one(&self, ctx: &ScanContext, result: &MatchResult) -> crate::Result<bool> {
        let key = &result.matched_entity.key;

        let Some(author_data) = ctx.data_source.get_author(key).await? else {
            return Ok(false);
        };

        let work_keys = ctx
            .data_source
            .get_author_works(key, self.max_works_per_author, "eng")
            .await?;

        ctx.ingest
            .ingest_author(result, &author_data, &work_keys)
            .await?;
        Ok(true)
    }
}

#[async_trait]
impl PipelineStage for IngestStage {
    fn name(&self) -> &'static str {
        "ingest"
    }

    fn progress(&self) -> f64 {
        self.progress
    }

    async fn execute(&mut self, ctx: &mut ScanContext) -> StageResult {
        if ctx.is_cancelled() {
            return StageResult::failed("Ingest cancelled");
        }

        let mut results = ctx.match_results.clone();
        if let Some(limit) = self.author_limit {
            results.truncate(limit);
        }
        let before_dedup = results.len();

        // Several Calibre authors can match the same external author;
        // ingest each external key once.
        let mut seen: HashSet<String> = HashSet::new();
        results.retain(|r| seen.insert(r.matched_entity.key.clone()));
        let deduplicated = before_dedup - results.len();
        let total = results.len();

        info!(
            "Starting ingest stage for library {} ({} matched authors to ingest)",
            ctx.library_id, total
        );

        if total == 0 {
            warn!("No matches to ingest in library {}", ctx.library_id);
            return StageResult::ok_with_stats(
                "No matches to ingest",
                serde_json::json!({"ingested": 0}),
            );
        }

        let mut ingested = 0usize;
        let mut failed = 0usize;

        for (idx, result) in results.iter().enumerate() {
            if ctx.is_cancelled() {
                break;
            }

            let key = &result.matched_entity.key;
            let name = &result.matched_entity.name;

            if self.should_skip_fetch(ctx, key).await {
                debug!("Skipping fetch for '{}' (key: {}) - data is fresh", name, key);
                ingested += 1;
            } else {
                match self.ingest_one(ctx, result).await {
                    Ok(true) => {
                        ingested += 1;
                        info!(
                            "Successfully ingested author '{}' ({}/{})",
                            name,
                            idx + 1,
                            total
                        );
                    }
                    Ok(false) => {
                        failed += 1;
                        warn!(
                            "Could not fetch full author data for '{}' (key: {}) ({}/{})",
                            name,
                            key,
                            idx + 1,
                            total
                        );
                    }
                    Err(CoreError::DataSource(err)) if err.is_transient() => {
                        failed += 1;
                        warn!(
                            "Network error ingesting author '{}' (key: {}) ({}/{}): {}",
                            name,
                            key,
                            idx + 1,
                            total,
                            err
                        );
                    }
                    Err(err) => {
                        failed += 1;
                        warn!(
                            "Error ingesting author '{}' (key: {}) ({}/{}): {}",
                            name,
                            key,
                            idx + 1,
                            total,
                            err
                        );
                    }
                }
            }

            self.progress = (idx + 1) as f64 / total as f64;
            ctx.update_progress(
                self.progress,
                Some(serde_json::json!({
                    "current_stage": {
                        "name": "ingest",
                        "status": "in_progress",
                        "current_item": name,
                        "current_index": idx + 1,
                        "total_items": total,
                        "ingested": ingested,
                        "failed": failed,
                    },
                })),
            )
            .await;
        }

        info!(
            "Ingested {}/{} unique authors in library {} (deduplicated from {} match results)",
            ingested, total, ctx.library_id, before_dedup
        );

        StageResult::ok_with_stats(
            format!("Ingested {ingested}/{total} unique authors"),
            serde_json::json!({
                "ingested": ingested,
                "failed": failed,
                "total": total,
                "deduplicated": deduplicated,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use fundamental_model::{AuthorMetadataId, MatchMethod};

    use crate::datasource::{AuthorData, DataSourceError, MockDataSource};
    use crate::pipeline::test_support;
    use crate::store::{MockAuthorIngest, MockAuthorStore};

    use super::*;

    fn match_result(key: &str, name: &str) -> MatchResult {
        MatchResult {
            confidence_score: 0.9,
            matched_entity: AuthorData {
                key: key.to_string(),
                name: name.to_string(),
                ..AuthorData::default()
            },
            match_method: MatchMethod::Exact,
            calibre_author_id: Some(1),
        }
    }

    #[tokio::test]
    async fn a_network_failure_counts_as_failed_and_the_stage_continues() {
        let mut source = MockDataSource::new();
        source.expect_get_author().returning(|key| {
            if key == "K3" {
                Err(DataSourceError::Network("connection reset".into()))
            } else {
                Ok(Some(AuthorData {
                    key: key.to_string(),
                    name: format!("Author {key}"),
                    ..AuthorData::default()
                }))
            }
        });
        source
            .expect_get_author_works()
            .returning(|_, _, _| Ok(vec!["W1".to_string()]));

        let mut ingest = MockAuthorIngest::new();
        ingest
            .expect_ingest_author()
            .times(4)
            .returning(|_, _, _| Ok(AuthorMetadataId(1)));

        let mut ctx = test_support::context(MockAuthorStore::new(), ingest, source);
        ctx.match_results = (1..=5).map(|n| match_result(&format!("K{n}"), "A")).collect();

        let mut stage = IngestStage::new(None, None, None);
        let result = stage.execute(&mut ctx).await;

        assert!(result.success);
        let stats = result.stats.unwrap();
        assert_eq!(stats["ingested"], 4);
        assert_eq!(stats["failed"], 1);
        assert_eq!(stats["total"], 5);
    }

    #[tokio::test]
    async fn duplicate_keys_are_ingested_once() {
        let mut source = MockDataSource::new();
        source.expect_get_author().times(1).returning(|key| {
            Ok(Some(AuthorData {
                key: key.to_string(),
                name: "Shared Author".to_string(),
                ..AuthorData::default()
            }))
        });
        source
            .expect_get_author_works()
            .returning(|_, _, _| Ok(Vec::new()));

        let mut ingest = MockAuthorIngest::new();
        ingest
            .expect_ingest_author()
            .times(1)
            .returning(|_, _, _| Ok(AuthorMetadataId(1)));

        let mut ctx = test_support::context(MockAuthorStore::new(), ingest, source);
        // Two Calibre authors matched the same external author.
        ctx.match_results = vec![match_result("K1", "A"), match_result("K1", "A")];

        let mut stage = IngestStage::new(None, None, None);
        let result = stage.execute(&mut ctx).await;

        assert!(result.success);
        let stats = result.stats.unwrap();
        assert_eq!(stats["deduplicated"], 1);
        assert_eq!(stats["ingested"], 1);
    }

    #[tokio::test]
    async fn fresh_data_skips_the_fetch_but_still_counts() {
        let mut source = MockDataSource::new();
        source.expect_get_author().never();

        let mut ingest = MockAuthorIngest::new();
        ingest
            .expect_last_synced_at()
            .returning(|_| Ok(Some(Utc::now() - TimeDelta::days(2))));
        ingest.expect_ingest_author().never();

        let mut ctx = test_support::context(MockAuthorStore::new(), ingest, source);
        ctx.match_results = vec![match_result("K1", "A")];

        let mut stage = IngestStage::new(Some(30), None, None);
        let result = stage.execute(&mut ctx).await;

        assert!(result.success);
        let stats = result.stats.unwrap();
        assert_eq!(stats["ingested"], 1);
        assert_eq!(stats["failed"], 0);
    }

    #[tokio::test]
    async fn the_works_cap_is_passed_to_the_source() {
        let mut source = MockDataSource::new();
        source.expect_get_author().returning(|key| {
            Ok(Some(AuthorData {
                key: key.to_string(),
                name: "A".to_string(),
                ..AuthorData::default()
            }))
        });
        source
            .expect_get_author_works()
            .withf(|_, limit, _| *limit == Some(25))
            .returning(|_, _, _| Ok(Vec::new()));

        let mut ingest = MockAuthorIngest::new();
        ingest
            .expect_ingest_author()
            .returning(|_, _, _| Ok(AuthorMetadataId(1)));

        let mut ctx = test_support::context(MockAuthorStore::new(), ingest, source);
        ctx.match_results = vec![match_result("K1", "A")];

        let mut stage = IngestStage::new(None, None, Some(25));
        let result = stage.execute(&mut ctx).await;
        assert!(result.success);
    }
}
