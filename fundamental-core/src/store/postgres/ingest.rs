//! Full-author ingestion unit of work.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, Postgres};
use sqlx::{Row, Transaction};
use tracing::debug;

use fundamental_model::AuthorMetadataId;

use crate::datasource::types::AuthorData;
use crate::datasource::OpenLibraryDataSource;
use crate::error::Result;
use crate::matching::MatchResult;
use crate::store::ports::AuthorIngest;

/// Writes a fetched author and its owned children as one transaction, so
/// a crash mid-scan leaves whole authors rather than fragments.
#[derive(Clone, Debug)]
pub struct PgAuthorIngest {
    pool: PgPool,
}

impl PgAuthorIngest {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert_metadata(
        tx: &mut Transaction<'_, Postgres>,
        data: &AuthorData,
    ) -> Result<i64> {
        let photo_url = data
            .photo_ids
            .first()
            .map(|id| OpenLibraryDataSource::photo_url(*id));

        let row = sqlx::query(
            r#"
            INSERT INTO author_metadata (
                external_key, name, personal_name, fuller_name, title,
                birth_date, death_date, entity_type, biography, location,
                photo_url, work_count, ratings_average, ratings_count,
                top_work, last_synced_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, NOW())
            ON CONFLICT (external_key) DO UPDATE SET
                name = EXCLUDED.name,
                personal_name = EXCLUDED.personal_name,
                fuller_name = EXCLUDED.fuller_name,
                title = EXCLUDED.title,
                birth_date = EXCLUDED.birth_date,
                death_date = EXCLUDED.death_date,
                entity_type = EXCLUDED.entity_type,
                biography = EXCLUDED.biography,
                location = EXCLUDED.location,
                photo_url = COALESCE(EXCLUDED.photo_url, author_metadata.photo_url),
                work_count = EXCLUDED.work_count,
                ratings_average = EXCLUDED.ratings_average,
                ratings_count = EXCLUDED.ratings_count,
                top_work = EXCLUDED.top_work,
                updated_at = NOW(),
                last_synced_at = NOW()
            RETURNING id
            "#,
        )
        .bind(&data.key)
        .bind(&data.name)
        .bind(&data.personal_name)
        .bind(&data.fuller_name)
        .bind(&data.title)
        .bind(&data.birth_date)
        .bind(&data.death_date)
        .bind(&data.entity_type)
        .bind(&data.biography)
        .bind(&data.location)
        .bind(&photo_url)
        .bind(data.work_count)
        .bind(data.ratings_average)
        .bind(data.ratings_count)
        .bind(&data.top_work)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.get::<i64, _>("id"))
    }

    async fn replace_children(
        tx: &mut Transaction<'_, Postgres>,
        metadata_id: i64,
        data: &AuthorData,
        work_keys: &[String],
    ) -> Result<()> {
        if let Some(identifiers) = &data.identifiers {
            for (kind, value) in identifiers.entries() {
                sqlx::query(
                    r#"
                    INSERT INTO author_remote_ids (author_metadata_id, identifier_type, identifier_value)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (author_metadata_id, identifier_type)
                        DO UPDATE SET identifier_value = EXCLUDED.identifier_value
                    "#,
                )
                .bind(metadata_id)
                .bind(kind)
                .bind(value)
                .execute(&mut **tx)
                .await?;
            }
        }

        for name in &data.alternate_names {
            sqlx::query(
                r#"
                INSERT INTO author_alternate_names (author_metadata_id, name)
                VALUES ($1, $2)
                ON CONFLICT (author_metadata_id, name) DO NOTHING
                "#,
            )
            .bind(metadata_id)
            .bind(name)
            .execute(&mut **tx)
            .await?;
        }

        sqlx::query("DELETE FROM author_photos WHERE author_metadata_id = $1")
            .bind(metadata_id)
            .execute(&mut **tx)
            .await?;
        for (position, photo_id) in data.photo_ids.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO author_photos
                    (author_metadata_id, remote_photo_id, photo_url, is_primary, position)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(metadata_id)
            .bind(photo_id)
            .bind(OpenLibraryDataSource::photo_url(*photo_id))
            .bind(position == 0)
            .bind(position as i32)
            .execute(&mut **tx)
            .await?;
        }

        sqlx::query("DELETE FROM author_links WHERE author_metadata_id = $1")
            .bind(metadata_id)
            .execute(&mut **tx)
            .await?;
        let mut seen_urls = std::collections::HashSet::new();
        for link in &data.links {
            if !seen_urls.insert(link.url.as_str()) {
                continue;
            }
            sqlx::query(
                r#"
                INSERT INTO author_links (author_metadata_id, title, url, link_type)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(metadata_id)
            .bind(&link.title)
            .bind(&link.url)
            .bind(&link.link_type)
            .execute(&mut **tx)
            .await?;
        }

        let mut first_work_id: Option<i64> = None;
        for (rank, work_key) in work_keys.iter().enumerate() {
            let row = sqlx::query(
                r#"
                INSERT INTO author_works (author_metadata_id, work_key, rank)
                VALUES ($1, $2, $3)
                ON CONFLICT (author_metadata_id, work_key) DO UPDATE SET rank = EXCLUDED.rank
                RETURNING id
                "#,
            )
            .bind(metadata_id)
            .bind(work_key)
            .bind(rank as i32)
            .fetch_one(&mut **tx)
            .await?;
            if rank == 0 {
                first_work_id = Some(row.get::<i64, _>("id"));
            }
        }

        // Author-level subjects hang off the top-ranked work; the
        // subjects query reads distinct names across all works anyway.
        if let Some(work_id) = first_work_id {
            for (rank, subject) in data.subjects.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO work_subjects (author_work_id, subject_name, rank)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (author_work_id, subject_name) DO UPDATE SET rank = EXCLUDED.rank
                    "#,
                )
                .bind(work_id)
                .bind(subject)
                .bind(rank as i32)
                .execute(&mut **tx)
                .await?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl AuthorIngest for PgAuthorIngest {
    async fn last_synced_at(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT last_synced_at FROM author_metadata WHERE external_key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|row| {
            row.try_get::<Option<DateTime<Utc>>, _>("last_synced_at")
                .unwrap_or(None)
        }))
    }

    async fn ingest_author(
        &self,
        result: &MatchResult,
        data: &AuthorData,
        work_keys: &[String],
    ) -> Result<AuthorMetadataId> {
        let mut tx = self.pool.begin().await?;

        let metadata_id = Self::upsert_metadata(&mut tx, data).await?;
        Self::replace_children(&mut tx, metadata_id, data, work_keys).await?;

        tx.commit().await?;

        debug!(
            "Ingested author {} ({}) via {}",
            data.name, data.key, result.match_method
        );
        Ok(AuthorMetadataId(metadata_id))
    }
}
