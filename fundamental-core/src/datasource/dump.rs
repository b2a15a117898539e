//! Local OpenLibrary dump data source.
//!
//! Queries the ingested dump tables instead of the network: exact
//! equality for author names, trigram similarity for book titles. Rows
//! keep the provider's JSON document, so parsing is shared with the HTTP
//! backend.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::debug;

use super::openlibrary::{parse_author_document, parse_work_document};
use super::types::{AuthorData, BookData, IdentifierSet};
use super::{DataSource, DataSourceError, SourceResult};

/// Minimum trigram similarity for title search.
const MIN_TRIGRAM_SIMILARITY: f64 = 0.6;
const SEARCH_LIMIT: i64 = 25;

/// Data source over locally ingested OpenLibrary dump tables.
#[derive(Clone, Debug)]
pub struct OpenLibraryDumpDataSource {
    pool: PgPool,
}

impl OpenLibraryDumpDataSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_db_error(err: sqlx::Error) -> DataSourceError {
        DataSourceError::Network(format!("dump query failed: {err}"))
    }
}

#[async_trait]
impl DataSource for OpenLibraryDumpDataSource {
    fn name(&self) -> &str {
        "openlibrary_dump"
    }

    async fn search_author<'a>(
        &self,
        name: &str,
        _identifiers: Option<&'a IdentifierSet>,
    ) -> SourceResult<Vec<AuthorData>> {
        debug!("Dump author search: {}", name);

        let rows = sqlx::query(
            r#"
            SELECT key, data
            FROM openlibrary_dump_authors
            WHERE name = $1
            ORDER BY key
            LIMIT $2
            "#,
        )
        .bind(name)
        .bind(SEARCH_LIMIT)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_db_error)?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let key: String = row.try_get("key").ok()?;
                let data: Value = row.try_get("data").ok()?;
                parse_author_document(&key, &data)
            })
            .collect())
    }

    async fn get_author(&self, key: &str) -> SourceResult<Option<AuthorData>> {
        let row = sqlx::query(
            r#"
            SELECT key, data
            FROM openlibrary_dump_authors
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::map_db_error)?;

        Ok(row.and_then(|row| {
            let key: String = row.try_get("key").ok()?;
            let data: Value = row.try_get("data").ok()?;
            parse_author_document(&key, &data)
        }))
    }

    async fn get_author_works(
        &self,
        author_key: &str,
        limit: Option<usize>,
        _lang: &str,
    ) -> SourceResult<Vec<String>> {
        let cap = limit.map(|l| l as i64).unwrap_or(i64::MAX);

        let rows = sqlx::query(
            r#"
            SELECT key
            FROM openlibrary_dump_works
            WHERE author_key = $1
            ORDER BY key
            LIMIT $2
            "#,
        )
        .bind(author_key)
        .bind(cap)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_db_error)?;

        Ok(rows
            .into_iter()
            .filter_map(|row| row.try_get::<String, _>("key").ok())
            .collect())
    }

    async fn search_book<'a>(
        &self,
        title: Option<&'a str>,
        isbn: Option<&'a str>,
        _authors: Option<&'a [String]>,
    ) -> SourceResult<Vec<BookData>> {
        if let Some(isbn) = isbn {
            let rows = sqlx::query(
                r#"
                SELECT key, data
                FROM openlibrary_dump_works
                WHERE data -> 'isbn_13' ? $1 OR data -> 'isbn_10' ? $1
                LIMIT $2
                "#,
            )
            .bind(isbn)
            .bind(SEARCH_LIMIT)
            .fetch_all(&self.pool)
            .await
            .map_err(Self::map_db_error)?;

            return Ok(rows
                .into_iter()
                .filter_map(|row| {
                    let key: String = row.try_get("key").ok()?;
                    let data: Value = row.try_get("data").ok()?;
                    parse_work_document(&key, &data)
                })
                .collect());
        }

        let Some(title) = title else {
            return Ok(Vec::new());
        };

        // Uses the GIN trigram index on title.
        let rows = sqlx::query(
            r#"
            SELECT key, data, similarity(title, $1) AS title_similarity
            FROM openlibrary_dump_works
            WHERE similarity(title, $1) >= $2
            ORDER BY title_similarity DESC
            LIMIT $3
            "#,
        )
        .bind(title)
        .bind(MIN_TRIGRAM_SIMILARITY as f32)
        .bind(SEARCH_LIMIT)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_db_error)?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let key: String = row.try_get("key").ok()?;
                let data: Value = row.try_get("data").ok()?;
                parse_work_document(&key, &data)
            })
            .collect())
    }

    async fn get_book(&self, key: &str, _skip_authors: bool) -> SourceResult<Option<BookData>> {
        let row = sqlx::query(
            r#"
            SELECT key, data
            FROM openlibrary_dump_works
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::map_db_error)?;

        Ok(row.and_then(|row| {
            let key: String = row.try_get("key").ok()?;
            let data: Value = row.try_get("data").ok()?;
            parse_work_document(&key, &data)
        }))
    }
}
