//! Inert data source for job-level stages that only touch the database.

use async_trait::async_trait;

use super::types::{AuthorData, BookData, IdentifierSet};
use super::{DataSource, SourceResult};

/// Data source that returns nothing. Used where a stage requires a source
/// handle but performs no external lookups (deduplicate, score).
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpDataSource;

#[async_trait]
impl DataSource for NoOpDataSource {
    fn name(&self) -> &str {
        "noop"
    }

    async fn search_author<'a>(
        &self,
        _name: &str,
        _identifiers: Option<&'a IdentifierSet>,
    ) -> SourceResult<Vec<AuthorData>> {
        Ok(Vec::new())
    }

    async fn get_author(&self, _key: &str) -> SourceResult<Option<AuthorData>> {
        Ok(None)
    }

    async fn get_author_works(
        &self,
        _author_key: &str,
        _limit: Option<usize>,
        _lang: &str,
    ) -> SourceResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn search_book<'a>(
        &self,
        _title: Option<&'a str>,
        _isbn: Option<&'a str>,
        _authors: Option<&'a [String]>,
    ) -> SourceResult<Vec<BookData>> {
        Ok(Vec::new())
    }

    async fn get_book(&self, _key: &str, _skip_authors: bool) -> SourceResult<Option<BookData>> {
        Ok(None)
    }
}
