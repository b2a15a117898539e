//! Library rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::postgres::PgPool;
use uuid::Uuid;

use fundamental_model::{Library, LibraryId};

use crate::error::{CoreError, Result};
use crate::store::ports::LibraryStore;

#[derive(Debug, FromRow)]
struct LibraryRow {
    id: i64,
    name: String,
    calibre_db_path: String,
    calibre_db_file: String,
    uuid: Option<Uuid>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<LibraryRow> for Library {
    fn from(row: LibraryRow) -> Self {
        Library {
            id: LibraryId(row.id),
            name: row.name,
            calibre_db_path: row.calibre_db_path,
            calibre_db_file: row.calibre_db_file,
            uuid: row.uuid,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const SELECT_COLUMNS: &str = "id, name, calibre_db_path, calibre_db_file, uuid, \
                              is_active, created_at, updated_at";

#[derive(Clone, Debug)]
pub struct PgLibraryStore {
    pool: PgPool,
}

impl PgLibraryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LibraryStore for PgLibraryStore {
    async fn get(&self, id: LibraryId) -> Result<Option<Library>> {
        let row = sqlx::query_as::<_, LibraryRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM libraries WHERE id = $1"
        ))
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Library::from))
    }

    async fn get_active(&self) -> Result<Option<Library>> {
        let row = sqlx::query_as::<_, LibraryRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM libraries WHERE is_active LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Library::from))
    }

    async fn list(&self) -> Result<Vec<Library>> {
        let rows = sqlx::query_as::<_, LibraryRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM libraries ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Library::from).collect())
    }

    async fn set_active(&self, id: LibraryId) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE libraries SET is_active = FALSE, updated_at = NOW() WHERE is_active")
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            "UPDATE libraries SET is_active = TRUE, updated_at = NOW() WHERE id = $1",
        )
        .bind(id.as_i64())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(CoreError::NotFound(format!("library {id}")));
        }

        tx.commit().await?;
        Ok(())
    }
}
