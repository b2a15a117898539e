//! Matching orchestrator.
//!
//! Runs strategies in priority order and stops at the first result above
//! the confidence threshold, then layers the full matching lifecycle on
//! top: skip-gating on existing valid matches, staleness gating, forced
//! direct-key matching, and unmatched-placeholder bookkeeping.

use chrono::Utc;
use tracing::{debug, info, warn};

use fundamental_model::{LibraryId, MatchMethod};

use crate::catalog::Author;
use crate::datasource::DataSource;
use crate::error::Result;
use crate::store::{AuthorStore, MappingData};

use super::exact::ExactNameStrategy;
use super::fuzzy::FuzzyNameStrategy;
use super::identifier::IdentifierStrategy;
use super::strategy::{MatchResult, MatchStrategy};

const DEFAULT_MIN_CONFIDENCE: f64 = 0.5;

/// Options for [`MatchingOrchestrator::process_match_request`].
#[derive(Clone, Debug, Default)]
pub struct MatchRequestOptions {
    /// Rematch even when a fresh valid mapping exists.
    pub force_rematch: bool,
    /// With `force_rematch`, fetch this exact provider key instead of
    /// searching.
    pub external_key: Option<String>,
    /// Existing mappings younger than this many days are left alone.
    pub stale_max_age_days: Option<i64>,
}

/// Coordinates matching strategies and mapping bookkeeping.
pub struct MatchingOrchestrator {
    strategies: Vec<Box<dyn MatchStrategy>>,
    min_confidence: f64,
}

impl std::fmt::Debug for MatchingOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.strategies.iter().map(|s| s.name()).collect();
        f.debug_struct("MatchingOrchestrator")
            .field("strategies", &names)
            .field("min_confidence", &self.min_confidence)
            .finish()
    }
}

impl Default for MatchingOrchestrator {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_CONFIDENCE)
    }
}

impl MatchingOrchestrator {
    /// Orchestrator with the default strategy order: identifier, exact,
    /// fuzzy.
    pub fn new(min_confidence: f64) -> Self {
        Self::with_strategies(
            vec![
                Box::new(IdentifierStrategy),
                Box::new(ExactNameStrategy),
                Box::new(FuzzyNameStrategy::default()),
            ],
            min_confidence,
        )
    }

    pub fn with_strategies(
        strategies: Vec<Box<dyn MatchStrategy>>,
        min_confidence: f64,
    ) -> Self {
        Self {
            strategies,
            min_confidence,
        }
    }

    /// Try every strategy in priority order; transient source failures
    /// move on to the next strategy.
    pub async fn match_author(
        &self,
        author: &Author,
        source: &dyn DataSource,
    ) -> Result<Option<MatchResult>> {
        for strategy in &self.strategies {
            match strategy.match_author(author, source).await {
                Ok(Some(result)) if result.confidence_score >= self.min_confidence => {
                    return Ok(Some(result));
                }
                Ok(_) => {}
                Err(err) if err.is_transient() => {
                    debug!("Strategy {} failed, trying next: {}", strategy.name(), err);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(None)
    }

    /// Full lifecycle around [`Self::match_author`].
    ///
    /// Returns the match result when a new match was found and should be
    /// linked; `None` when the request was skipped (existing valid or
    /// fresh mapping) or recorded as unmatched.
    pub async fn process_match_request(
        &self,
        authors: &dyn AuthorStore,
        author: &Author,
        library_id: LibraryId,
        source: &dyn DataSource,
        options: &MatchRequestOptions,
    ) -> Result<Option<MatchResult>> {
        if !options.force_rematch
            && self
                .should_skip(authors, author.id, library_id, options.stale_max_age_days)
                .await?
        {
            info!(
                "Skipping match for author {} (ID: {}) - already matched or fresh",
                author.name, author.id
            );
            return Ok(None);
        }

        let mut matched = match (&options.external_key, options.force_rematch) {
            (Some(key), true) => {
                info!("Force rematching author {} to key {}", author.name, key);
                match source.get_author(key).await? {
                    Some(data) => Some(MatchResult {
                        confidence_score: 1.0,
                        matched_entity: data,
                        match_method: MatchMethod::DirectKey,
                        calibre_author_id: None,
                    }),
                    None => {
                        warn!("Author not found in data source for key: {}", key);
                        None
                    }
                }
            }
            _ => self.match_author(author, source).await?,
        };

        if let Some(result) = matched.as_mut() {
            result.calibre_author_id = Some(author.id);
            info!(
                "Matched author {} -> {} (confidence: {:.2})",
                author.name, result.matched_entity.name, result.confidence_score
            );
            return Ok(matched);
        }

        self.record_unmatched(authors, author, library_id).await?;
        Ok(None)
    }

    /// A mapping gates re-matching when it is a valid match (non-null
    /// external key, not recorded as unmatched) or still younger than the
    /// staleness bound.
    async fn should_skip(
        &self,
        authors: &dyn AuthorStore,
        calibre_author_id: i64,
        library_id: LibraryId,
        stale_max_age_days: Option<i64>,
    ) -> Result<bool> {
        let Some((mapping, metadata)) = authors
            .find_mapping_with_metadata(calibre_author_id, library_id)
            .await?
        else {
            return Ok(false);
        };

        let valid_match = mapping.matched_by != Some(MatchMethod::Unmatched)
            && metadata.external_key.is_some();
        if valid_match {
            return Ok(true);
        }

        let Some(max_age_days) = stale_max_age_days else {
            return Ok(false);
        };

        let mapping_date = mapping.updated_at.max(mapping.created_at);
        let days_since = Utc::now().signed_duration_since(mapping_date).num_days();
        Ok(days_since < max_age_days)
    }

    /// Record a failed match attempt: an unmatched placeholder metadata
    /// row linked through a `matched_by = "unmatched"` mapping. This is
    /// what lets skip-gating distinguish "tried and failed" from "never
    /// attempted".
    async fn record_unmatched(
        &self,
        authors: &dyn AuthorStore,
        author: &Author,
        library_id: LibraryId,
    ) -> Result<()> {
        info!(
            "No match found for {} - creating unmatched record",
            author.name
        );

        let existing = authors
            .find_mapping_with_metadata(author.id, library_id)
            .await?;

        // Reuse an existing placeholder rather than stacking new rows,
        // tracking renames on the Calibre side.
        let placeholder = match existing {
            Some((_, metadata)) if metadata.external_key.is_none() => {
                if metadata.name != author.name {
                    authors.rename_metadata(metadata.id, &author.name).await?;
                }
                metadata
            }
            _ => authors.create_unmatched_metadata(&author.name).await?,
        };

        authors
            .upsert_mapping(&MappingData {
                library_id,
                calibre_author_id: author.id,
                author_metadata_id: placeholder.id,
                confidence_score: 0.0,
                matched_by: MatchMethod::Unmatched,
            })
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{TimeDelta, Utc};

    use fundamental_model::{AuthorMapping, AuthorMetadata, AuthorMetadataId};

    use crate::datasource::types::AuthorData;
    use crate::datasource::{DataSourceError, MockDataSource, SourceResult};
    use crate::store::MockAuthorStore;

    use super::*;

    fn candidate(key: &str, name: &str) -> AuthorData {
        AuthorData {
            key: key.to_string(),
            name: name.to_string(),
            ..AuthorData::default()
        }
    }

    fn metadata(id: i64, key: Option<&str>) -> AuthorMetadata {
        AuthorMetadata {
            id: AuthorMetadataId(id),
            external_key: key.map(ToString::to_string),
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
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_synced_at: None,
        }
    }

    fn mapping(matched_by: MatchMethod, age_days: i64) -> AuthorMapping {
        let at = Utc::now() - TimeDelta::days(age_days);
        AuthorMapping {
            id: 1,
            calibre_author_id: 1,
            author_metadata_id: AuthorMetadataId(1),
            library_id: LibraryId(1),
            confidence_score: Some(0.9),
            is_verified: false,
            matched_by: Some(matched_by),
            created_at: at,
            updated_at: at,
        }
    }

    struct FailingStrategy;

    #[async_trait]
    impl MatchStrategy for FailingStrategy {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn match_author(
            &self,
            _author: &Author,
            _source: &dyn DataSource,
        ) -> SourceResult<Option<MatchResult>> {
            Err(DataSourceError::Network("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn transient_strategy_failures_fall_through() {
        let orchestrator = MatchingOrchestrator::with_strategies(
            vec![Box::new(FailingStrategy), Box::new(ExactNameStrategy)],
            0.5,
        );

        let mut source = MockDataSource::new();
        source
            .expect_search_author()
            .returning(|_, _| Ok(vec![candidate("OL1A", "John Doe")]));

        let result = orchestrator
            .match_author(&Author::new(1, "John Doe"), &source)
            .await
            .unwrap()
            .expect("exact strategy should run after the failing one");
        assert_eq!(result.match_method, MatchMethod::Exact);
    }

    #[tokio::test]
    async fn low_confidence_results_are_rejected() {
        let orchestrator = MatchingOrchestrator::with_strategies(
            vec![Box::new(FuzzyNameStrategy::default())],
            0.95,
        );

        let mut source = MockDataSource::new();
        source
            .expect_search_author()
            .returning(|_, _| Ok(vec![candidate("OL1A", "John Doe")]));

        let result = orchestrator
            .match_author(&Author::new(1, "John Doe"), &source)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn existing_valid_match_skips_the_request() {
        let orchestrator = MatchingOrchestrator::default();
        let mut authors = MockAuthorStore::new();
        authors
            .expect_find_mapping_with_metadata()
            .returning(|_, _| {
                Ok(Some((
                    mapping(MatchMethod::Exact, 1),
                    metadata(1, Some("OL1A")),
                )))
            });

        let source = MockDataSource::new();
        let result = orchestrator
            .process_match_request(
                &authors,
                &Author::new(1, "John Doe"),
                LibraryId(1),
                &source,
                &MatchRequestOptions::default(),
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn fresh_unmatched_mapping_skips_under_staleness_gate() {
        let orchestrator = MatchingOrchestrator::default();
        let mut authors = MockAuthorStore::new();
        authors
            .expect_find_mapping_with_metadata()
            .returning(|_, _| {
                Ok(Some((mapping(MatchMethod::Unmatched, 5), metadata(1, None))))
            });

        let source = MockDataSource::new();
        let result = orchestrator
            .process_match_request(
                &authors,
                &Author::new(1, "John Doe"),
                LibraryId(1),
                &source,
                &MatchRequestOptions {
                    stale_max_age_days: Some(30),
                    ..MatchRequestOptions::default()
                },
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn force_with_key_matches_directly() {
        let orchestrator = MatchingOrchestrator::default();
        let authors = MockAuthorStore::new();

        let mut source = MockDataSource::new();
        source
            .expect_get_author()
            .returning(|key| Ok(Some(candidate(key, "John Doe"))));

        let result = orchestrator
            .process_match_request(
                &authors,
                &Author::new(7, "John Doe"),
                LibraryId(1),
                &source,
                &MatchRequestOptions {
                    force_rematch: true,
                    external_key: Some("OL9A".into()),
                    ..MatchRequestOptions::default()
                },
            )
            .await
            .unwrap()
            .expect("direct key match");

        assert_eq!(result.confidence_score, 1.0);
        assert_eq!(result.match_method, MatchMethod::DirectKey);
        assert_eq!(result.calibre_author_id, Some(7));
    }

    #[tokio::test]
    async fn no_match_records_an_unmatched_placeholder() {
        let orchestrator = MatchingOrchestrator::default();

        let mut authors = MockAuthorStore::new();
        authors
            .expect_find_mapping_with_metadata()
            .returning(|_, _| Ok(None));
        authors
            .expect_create_unmatched_metadata()
            .withf(|name| name == "John Doe")
            .returning(|name| Ok(metadata_with_name(5, name)));
        authors
            .expect_upsert_mapping()
            .withf(|data| {
                data.matched_by == MatchMethod::Unmatched
                    && data.confidence_score == 0.0
                    && data.author_metadata_id == AuthorMetadataId(5)
            })
            .returning(|data| {
                Ok((
                    AuthorMapping {
                        id: 9,
                        calibre_author_id: data.calibre_author_id,
                        author_metadata_id: data.author_metadata_id,
                        library_id: data.library_id,
                        confidence_score: Some(data.confidence_score),
                        is_verified: false,
                        matched_by: Some(data.matched_by),
                        created_at: Utc::now(),
                        updated_at: Utc::now(),
                    },
                    true,
                ))
            });

        let mut source = MockDataSource::new();
        source.expect_search_author().returning(|_, _| Ok(vec![]));

        let result = orchestrator
            .process_match_request(
                &authors,
                &Author::new(1, "John Doe"),
                LibraryId(1),
                &source,
                &MatchRequestOptions::default(),
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    fn metadata_with_name(id: i64, name: &str) -> AuthorMetadata {
        let mut m = metadata(id, None);
        m.name = name.to_string();
        m
    }
}
