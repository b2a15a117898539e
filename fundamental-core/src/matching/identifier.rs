//! Identifier-based matching, highest confidence.

use async_trait::async_trait;

use fundamental_model::MatchMethod;

use crate::catalog::Author;
use crate::datasource::{DataSource, SourceResult};

use super::strategy::{MatchResult, MatchStrategy};

const IDENTIFIER_CONFIDENCE: f64 = 0.98;

/// Matches by external identifiers (VIAF, Goodreads, Wikidata, ISNI, ...).
///
/// Searches by name and returns the first candidate sharing an identifier
/// value with the Calibre author. Abstains when the author carries no
/// identifiers so the name-based strategies get their turn.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentifierStrategy;

#[async_trait]
impl MatchStrategy for IdentifierStrategy {
    fn name(&self) -> &'static str {
        "identifier"
    }

    async fn match_author(
        &self,
        author: &Author,
        source: &dyn DataSource,
    ) -> SourceResult<Option<MatchResult>> {
        let Some(identifiers) = author.identifiers.as_ref().filter(|ids| !ids.is_empty())
        else {
            return Ok(None);
        };

        let candidates = source
            .search_author(&author.name, Some(identifiers))
            .await?;

        for candidate in candidates {
            let shares = candidate
                .identifiers
                .as_ref()
                .is_some_and(|theirs| identifiers.shares_identifier_with(theirs));
            if shares {
                return Ok(Some(MatchResult {
                    confidence_score: IDENTIFIER_CONFIDENCE,
                    matched_entity: candidate,
                    match_method: MatchMethod::Identifier,
                    calibre_author_id: None,
                }));
            }
        }

        Ok(None)
    }
}
