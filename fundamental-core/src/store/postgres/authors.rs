//! Author metadata graph queries and mapping upserts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::{FromRow, Row};

use fundamental_model::{
    AuthorMapping, AuthorMetadata, AuthorMetadataId, LibraryId, MatchMethod,
};

use crate::error::{CoreError, Result};
use crate::store::ports::{AuthorStore, MappingData};

#[derive(Debug, FromRow)]
pub(super) struct MetadataRow {
    pub id: i64,
    pub external_key: Option<String>,
    pub name: String,
    pub personal_name: Option<String>,
    pub fuller_name: Option<String>,
    pub title: Option<String>,
    pub birth_date: Option<String>,
    pub death_date: Option<String>,
    pub entity_type: Option<String>,
    pub biography: Option<String>,
    pub location: Option<String>,
    pub photo_url: Option<String>,
    pub work_count: Option<i32>,
    pub ratings_average: Option<f64>,
    pub ratings_count: Option<i32>,
    pub top_work: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl From<MetadataRow> for AuthorMetadata {
    fn from(row: MetadataRow) -> Self {
        AuthorMetadata {
            id: AuthorMetadataId(row.id),
            external_key: row.external_key,
            name: row.name,
            personal_name: row.personal_name,
            fuller_name: row.fuller_name,
            title: row.title,
            birth_date: row.birth_date,
            death_date: row.death_date,
            entity_type: row.entity_type,
            biography: row.biography,
            location: row.location,
            photo_url: row.photo_url,
            work_count: row.work_count,
            ratings_average: row.ratings_average,
            ratings_count: row.ratings_count,
            top_work: row.top_work,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_synced_at: row.last_synced_at,
        }
    }
}

pub(super) const METADATA_COLUMNS: &str =
    "id, external_key, name, personal_name, fuller_name, title, birth_date, \
     death_date, entity_type, biography, location, photo_url, work_count, \
     ratings_average, ratings_count, top_work, created_at, updated_at, last_synced_at";

#[derive(Debug, FromRow)]
struct MappingRow {
    id: i64,
    calibre_author_id: i64,
    author_metadata_id: i64,
    library_id: i64,
    confidence_score: Option<f64>,
    is_verified: bool,
    matched_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl MappingRow {
    fn into_mapping(self) -> Result<AuthorMapping> {
        let matched_by = self
            .matched_by
            .as_deref()
            .map(str::parse::<MatchMethod>)
            .transpose()
            .map_err(|e| CoreError::Internal(format!("corrupt mapping row: {e}")))?;

        Ok(AuthorMapping {
            id: self.id,
            calibre_author_id: self.calibre_author_id,
            author_metadata_id: AuthorMetadataId(self.author_metadata_id),
            library_id: LibraryId(self.library_id),
            confidence_score: self.confidence_score,
            is_verified: self.is_verified,
            matched_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const MAPPING_COLUMNS: &str = "id, calibre_author_id, author_metadata_id, library_id, \
                               confidence_score, is_verified, matched_by, created_at, updated_at";

#[derive(Clone, Debug)]
pub struct PgAuthorStore {
    pool: PgPool,
}

impl PgAuthorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuthorStore for PgAuthorStore {
    async fn find_mapping_with_metadata(
        &self,
        calibre_author_id: i64,
        library_id: LibraryId,
    ) -> Result<Option<(AuthorMapping, AuthorMetadata)>> {
        let mapping = sqlx::query_as::<_, MappingRow>(&format!(
            "SELECT {MAPPING_COLUMNS} FROM author_mappings \
             WHERE calibre_author_id = $1 AND library_id = $2"
        ))
        .bind(calibre_author_id)
        .bind(library_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        let Some(mapping) = mapping else {
            return Ok(None);
        };
        let mapping = mapping.into_mapping()?;

        let metadata = self
            .get_metadata(mapping.author_metadata_id)
            .await?
            .ok_or_else(|| {
                CoreError::Internal(format!(
                    "mapping {} references missing metadata {}",
                    mapping.id, mapping.author_metadata_id
                ))
            })?;

        Ok(Some((mapping, metadata)))
    }

    async fn get_metadata(&self, id: AuthorMetadataId) -> Result<Option<AuthorMetadata>> {
        let row = sqlx::query_as::<_, MetadataRow>(&format!(
            "SELECT {METADATA_COLUMNS} FROM author_metadata WHERE id = $1"
        ))
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(AuthorMetadata::from))
    }

    async fn find_metadata_by_key(&self, key: &str) -> Result<Option<AuthorMetadata>> {
        let row = sqlx::query_as::<_, MetadataRow>(&format!(
            "SELECT {METADATA_COLUMNS} FROM author_metadata WHERE external_key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(AuthorMetadata::from))
    }

    async fn create_unmatched_metadata(&self, name: &str) -> Result<AuthorMetadata> {
        let row = sqlx::query_as::<_, MetadataRow>(&format!(
            "INSERT INTO author_metadata (external_key, name) VALUES (NULL, $1) \
             RETURNING {METADATA_COLUMNS}"
        ))
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(AuthorMetadata::from(row))
    }

    async fn rename_metadata(&self, id: AuthorMetadataId, name: &str) -> Result<()> {
        sqlx::query("UPDATE author_metadata SET name = $2, updated_at = NOW() WHERE id = $1")
            .bind(id.as_i64())
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_mapping(&self, data: &MappingData) -> Result<(AuthorMapping, bool)> {
        // xmax = 0 only for freshly inserted tuples, which distinguishes
        // insert from update in a single round trip.
        let row = sqlx::query(&format!(
            "INSERT INTO author_mappings \
                 (calibre_author_id, author_metadata_id, library_id, confidence_score, matched_by) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (calibre_author_id, library_id) DO UPDATE SET \
                 author_metadata_id = EXCLUDED.author_metadata_id, \
                 confidence_score = EXCLUDED.confidence_score, \
                 matched_by = EXCLUDED.matched_by, \
                 updated_at = NOW() \
             RETURNING {MAPPING_COLUMNS}, (xmax = 0) AS inserted"
        ))
        .bind(data.calibre_author_id)
        .bind(data.author_metadata_id.as_i64())
        .bind(data.library_id.as_i64())
        .bind(data.confidence_score)
        .bind(data.matched_by.as_str())
        .fetch_one(&self.pool)
        .await?;

        let inserted: bool = row.get("inserted");
        let mapping = MappingRow {
            id: row.get("id"),
            calibre_author_id: row.get("calibre_author_id"),
            author_metadata_id: row.get("author_metadata_id"),
            library_id: row.get("library_id"),
            confidence_score: row.get("confidence_score"),
            is_verified: row.get("is_verified"),
            matched_by: row.get("matched_by"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
        .into_mapping()?;

        Ok((mapping, inserted))
    }

    async fn list_metadata_for_library(
        &self,
        library_id: LibraryId,
    ) -> Result<Vec<AuthorMetadata>> {
        let rows = sqlx::query_as::<_, MetadataRow>(&format!(
            "SELECT {METADATA_COLUMNS} FROM author_metadata \
             WHERE id IN (SELECT author_metadata_id FROM author_mappings WHERE library_id = $1) \
             ORDER BY id"
        ))
        .bind(library_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AuthorMetadata::from).collect())
    }

    async fn alternate_names_for(&self, id: AuthorMetadataId) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT name FROM author_alternate_names WHERE author_metadata_id = $1 ORDER BY id",
        )
        .bind(id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.get::<String, _>("name")).collect())
    }

    async fn work_keys_for(&self, id: AuthorMetadataId) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT work_key FROM author_works WHERE author_metadata_id = $1 ORDER BY rank, id",
        )
        .bind(id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("work_key"))
            .collect())
    }

    async fn subjects_for(&self, id: AuthorMetadataId) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ws.subject_name
            FROM work_subjects ws
            JOIN author_works aw ON aw.id = ws.author_work_id
            WHERE aw.author_metadata_id = $1
            ORDER BY ws.subject_name
            "#,
        )
        .bind(id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("subject_name"))
            .collect())
    }

    async fn upsert_similarity(
        &self,
        author1_id: AuthorMetadataId,
        author2_id: AuthorMetadataId,
        score: f64,
        source: &str,
    ) -> Result<()> {
        // Canonical edge order keeps the pair unique regardless of the
        // direction it was computed in.
        let (low, high) = if author1_id.as_i64() <= author2_id.as_i64() {
            (author1_id, author2_id)
        } else {
            (author2_id, author1_id)
        };

        sqlx::query(
            r#"
            INSERT INTO author_similarities (author1_id, author2_id, similarity_score, similarity_source)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (author1_id, author2_id) DO UPDATE SET
                similarity_score = EXCLUDED.similarity_score,
                similarity_source = EXCLUDED.similarity_source,
                created_at = NOW()
            "#,
        )
        .bind(low.as_i64())
        .bind(high.as_i64())
        .bind(score.clamp(0.0, 1.0))
        .bind(source)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest_similarity_at(
        &self,
        library_id: LibraryId,
    ) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            r#"
            SELECT MAX(s.created_at) AS latest
            FROM author_similarities s
            WHERE s.author1_id IN (SELECT author_metadata_id FROM author_mappings WHERE library_id = $1)
               OR s.author2_id IN (SELECT author_metadata_id FROM author_mappings WHERE library_id = $1)
            "#,
        )
        .bind(library_id.as_i64())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<Option<DateTime<Utc>>, _>("latest").unwrap_or(None))
    }
}
