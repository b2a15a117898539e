//! Exact name matching with normalization.

use async_trait::async_trait;

use fundamental_model::MatchMethod;

use crate::catalog::Author;
use crate::datasource::{DataSource, SourceResult};

use super::normalize::normalize_name;
use super::strategy::{MatchResult, MatchStrategy};

const EXACT_CONFIDENCE: f64 = 0.90;
const EXACT_ALTERNATE_CONFIDENCE: f64 = 0.88;

/// Matches by normalized name equality against the candidate's primary
/// and alternate names.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExactNameStrategy;

#[async_trait]
impl MatchStrategy for ExactNameStrategy {
    fn name(&self) -> &'static str {
        "exact"
    }

    async fn match_author(
        &self,
        author: &Author,
        source: &dyn DataSource,
    ) -> SourceResult<Option<MatchResult>> {
        let normalized = normalize_name(&author.name);
        if normalized.is_empty() {
            return Ok(None);
        }

        let candidates = source
            .search_author(&author.name, author.identifiers.as_ref())
            .await?;

        for candidate in candidates {
            if normalize_name(&candidate.name) == normalized {
                return Ok(Some(MatchResult {
                    confidence_score: EXACT_CONFIDENCE,
                    matched_entity: candidate,
                    match_method: MatchMethod::Exact,
                    calibre_author_id: None,
                }));
            }

            let alternate_hit = candidate
                .alternate_names
                .iter()
                .any(|alt| normalize_name(alt) == normalized);
            if alternate_hit {
                return Ok(Some(MatchResult {
                    confidence_score: EXACT_ALTERNATE_CONFIDENCE,
                    matched_entity: candidate,
                    match_method: MatchMethod::ExactAlternate,
                    calibre_author_id: None,
                }));
            }
        }

        Ok(None)
    }
}
