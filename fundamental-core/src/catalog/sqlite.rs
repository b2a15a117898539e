//! SQLite implementation over Calibre's `metadata.db`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::debug;

use crate::error::{CoreError, Result};

use super::{Author, CalibreCatalog, CatalogOpener};

/// Read-only pool over one Calibre database file.
#[derive(Clone, Debug)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub async fn open(database_path: &Path) -> Result<Self> {
        if !database_path.is_file() {
            return Err(CoreError::NotFound(format!(
                "calibre database not found: {}",
                database_path.display()
            )));
        }

        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .read_only(true)
            .immutable(false);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;

        debug!("Opened calibre catalog at {}", database_path.display());
        Ok(Self { pool })
    }
}

#[async_trait]
impl CalibreCatalog for SqliteCatalog {
    async fn list_authors(&self) -> Result<Vec<Author>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, sort
            FROM authors
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Author {
                id: row.get::<i64, _>("id"),
                name: row.get::<String, _>("name"),
                sort: row.try_get::<Option<String>, _>("sort").unwrap_or(None),
                identifiers: None,
            })
            .collect())
    }

    async fn count_books_for_author(&self, author_id: i64) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS book_count
            FROM books_authors_link
            WHERE author = $1
            "#,
        )
        .bind(author_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("book_count"))
    }
}

/// Production [`CatalogOpener`] for Calibre SQLite databases.
#[derive(Clone, Copy, Debug, Default)]
pub struct SqliteCatalogOpener;

#[async_trait]
impl CatalogOpener for SqliteCatalogOpener {
    async fn open(&self, db_path: &str, db_file: &str) -> Result<Arc<dyn CalibreCatalog>> {
        let path = Path::new(db_path).join(db_file);
        Ok(Arc::new(SqliteCatalog::open(&path).await?))
    }
}
