//! Strategy contract and match results.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use fundamental_model::MatchMethod;

use crate::catalog::Author;
use crate::datasource::{AuthorData, DataSource, SourceResult};

/// Outcome of a successful strategy application.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchResult {
    pub confidence_score: f64,
    pub matched_entity: AuthorData,
    pub match_method: MatchMethod,
    /// Calibre author the result belongs to, attached by the caller once
    /// the match is accepted.
    #[serde(default)]
    pub calibre_author_id: Option<i64>,
}

/// One way of bridging a Calibre author to external author data.
///
/// Strategies are tried in priority order; transient source failures make
/// the orchestrator move on to the next strategy.
#[async_trait]
pub trait MatchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn match_author(
        &self,
        author: &Author,
        source: &dyn DataSource,
    ) -> SourceResult<Option<MatchResult>>;
}
