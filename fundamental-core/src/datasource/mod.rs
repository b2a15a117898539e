//! External author/book lookup behind one interface.
//!
//! Production sources are the rate-limited OpenLibrary HTTP backend and
//! the local OpenLibrary dump backend; consumers always resolve a source
//! by name through the [`DataSourceRegistry`] so wiring stays
//! configuration-driven.

mod dump;
mod noop;
mod openlibrary;
mod registry;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;

pub use dump::OpenLibraryDumpDataSource;
pub use noop::NoOpDataSource;
pub use openlibrary::OpenLibraryDataSource;
pub use registry::{DataSourceConfig, DataSourceRegistry};
pub use types::{AuthorData, BookData, IdentifierSet};

/// Failure taxonomy mapped at the source boundary. Matching treats
/// `Network`/`RateLimit` as transient (try the next strategy); `NotFound`
/// surfaces as "no match".
#[derive(Error, Debug)]
pub enum DataSourceError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limit exceeded")]
    RateLimit,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl DataSourceError {
    /// Transient failures are retried or skipped by callers; they never
    /// abort a scan stage.
    pub fn is_transient(&self) -> bool {
        matches!(self, DataSourceError::Network(_) | DataSourceError::RateLimit)
    }
}

pub type SourceResult<T> = std::result::Result<T, DataSourceError>;

/// Unified interface over external metadata providers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataSource: Send + Sync + std::fmt::Debug {
    /// Source name as registered (e.g. `"openlibrary"`).
    fn name(&self) -> &str;

    /// Search for authors by name and optional identifiers. Empty when
    /// nothing matches.
    async fn search_author<'a>(
        &self,
        name: &str,
        identifiers: Option<&'a IdentifierSet>,
    ) -> SourceResult<Vec<AuthorData>>;

    /// Full author details by provider key.
    async fn get_author(&self, key: &str) -> SourceResult<Option<AuthorData>>;

    /// Work keys for an author, optionally capped, filtered by language.
    async fn get_author_works(
        &self,
        author_key: &str,
        limit: Option<usize>,
        lang: &str,
    ) -> SourceResult<Vec<String>>;

    /// Search for books by title, ISBN, or author names.
    async fn search_book<'a>(
        &self,
        title: Option<&'a str>,
        isbn: Option<&'a str>,
        authors: Option<&'a [String]>,
    ) -> SourceResult<Vec<BookData>>;

    /// Full book details by provider key. `skip_authors` avoids the extra
    /// author fetches when only subjects are needed.
    async fn get_book(&self, key: &str, skip_authors: bool) -> SourceResult<Option<BookData>>;
}
