//! Fuzzy name matching over Levenshtein similarity.

use async_trait::async_trait;

use fundamental_model::MatchMethod;

use crate::catalog::Author;
use crate::datasource::{DataSource, SourceResult};

use super::normalize::{normalize_name, similarity};
use super::strategy::{MatchResult, MatchStrategy};

const DEFAULT_MIN_SIMILARITY: f64 = 0.7;
const CONFIDENCE_FLOOR: f64 = 0.5;
const CONFIDENCE_CEILING: f64 = 0.85;

/// Matches by normalized-name similarity, picking the best candidate at
/// or above `min_similarity`. The similarity is mapped linearly onto the
/// 0.50–0.85 confidence band so fuzzy results always rank below exact
/// ones.
#[derive(Clone, Copy, Debug)]
pub struct FuzzyNameStrategy {
    min_similarity: f64,
}

impl FuzzyNameStrategy {
    pub fn new(min_similarity: f64) -> Self {
        Self { min_similarity }
    }

    fn confidence_for(&self, similarity: f64) -> f64 {
        if self.min_similarity >= 1.0 {
            return CONFIDENCE_CEILING;
        }
        let span = (similarity - self.min_similarity) / (1.0 - self.min_similarity);
        CONFIDENCE_FLOOR + span * (CONFIDENCE_CEILING - CONFIDENCE_FLOOR)
    }
}

impl Default for FuzzyNameStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SIMILARITY)
    }
}

#[async_trait]
impl MatchStrategy for FuzzyNameStrategy {
    fn name(&self) -> &'static str {
        "fuzzy"
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

        let mut best: Option<(f64, _)> = None;
        for candidate in candidates {
            let score = similarity(&normalized, &normalize_name(&candidate.name));
            if score < self.min_similarity {
                continue;
            }
            if best.as_ref().is_none_or(|(current, _)| score > *current) {
                best = Some((score, candidate));
            }
        }

        Ok(best.map(|(score, candidate)| MatchResult {
            confidence_score: self.confidence_for(score),
            matched_entity: candidate,
            match_method: MatchMethod::Fuzzy,
            calibre_author_id: None,
        }))
    }
}
