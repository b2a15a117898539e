//! Relation-preserving author merge.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, Postgres};
use sqlx::{Row, Transaction};
use tracing::{debug, info};

use fundamental_model::AuthorMetadataId;

use crate::error::{CoreError, Result};
use crate::store::AuthorMerger;

/// Merges one author metadata row into another inside a single
/// transaction: owned children transfer (deduplicated by natural key),
/// mappings and similarity edges repoint, scalar fields merge preferring
/// non-null, and the merged row is deleted.
#[derive(Clone, Debug)]
pub struct PgAuthorMerger {
    pool: PgPool,
}

impl PgAuthorMerger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Transfer children rows that do not collide on the natural key,
    /// then drop the leftovers still attached to the merge side.
    async fn transfer_children(
        tx: &mut Transaction<'_, Postgres>,
        keep: i64,
        merge: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE author_remote_ids SET author_metadata_id = $1
            WHERE author_metadata_id = $2
              AND identifier_type NOT IN
                  (SELECT identifier_type FROM author_remote_ids WHERE author_metadata_id = $1)
            "#,
        )
        .bind(keep)
        .bind(merge)
        .execute(&mut **tx)
        .await?;
        sqlx::query("DELETE FROM author_remote_ids WHERE author_metadata_id = $1")
            .bind(merge)
            .execute(&mut **tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE author_alternate_names SET author_metadata_id = $1
            WHERE author_metadata_id = $2
              AND name NOT IN
                  (SELECT name FROM author_alternate_names WHERE author_metadata_id = $1)
            "#,
        )
        .bind(keep)
        .bind(merge)
        .execute(&mut **tx)
        .await?;
        sqlx::query("DELETE FROM author_alternate_names WHERE author_metadata_id = $1")
            .bind(merge)
            .execute(&mut **tx)
            .await?;

        // Photos have no natural key; transferred ones lose primary
        // status so the keep side retains a single primary.
        sqlx::query(
            r#"
            UPDATE author_photos SET author_metadata_id = $1, is_primary = FALSE
            WHERE author_metadata_id = $2
            "#,
        )
        .bind(keep)
        .bind(merge)
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE author_links SET author_metadata_id = $1
            WHERE author_metadata_id = $2
              AND url NOT IN (SELECT url FROM author_links WHERE author_metadata_id = $1)
            "#,
        )
        .bind(keep)
        .bind(merge)
        .execute(&mut **tx)
        .await?;
        sqlx::query("DELETE FROM author_links WHERE author_metadata_id = $1")
            .bind(merge)
            .execute(&mut **tx)
            .await?;

        // Work subjects follow their work row.
        sqlx::query(
            r#"
            UPDATE author_works SET author_metadata_id = $1
            WHERE author_metadata_id = $2
              AND work_key NOT IN
                  (SELECT work_key FROM author_works WHERE author_metadata_id = $1)
            "#,
        )
        .bind(keep)
        .bind(merge)
        .execute(&mut **tx)
        .await?;
        sqlx::query("DELETE FROM author_works WHERE author_metadata_id = $1")
            .bind(merge)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    /// Repoint mappings, collapsing `(calibre_author, library)` pairs
    /// that end up duplicated, preferring the verified side.
    async fn repoint_mappings(
        tx: &mut Transaction<'_, Postgres>,
        keep: i64,
        merge: i64,
    ) -> Result<()> {
        let merge_mappings = sqlx::query(
            r#"
            SELECT id, calibre_author_id, library_id, is_verified
            FROM author_mappings
            WHERE author_metadata_id = $1
            "#,
        )
        .bind(merge)
        .fetch_all(&mut **tx)
        .await?;

        for mapping in merge_mappings {
            let mapping_id: i64 = mapping.get("id");
            let calibre_author_id: i64 = mapping.get("calibre_author_id");
            let library_id: i64 = mapping.get("library_id");
            let merge_verified: bool = mapping.get("is_verified");

            let existing = sqlx::query(
                r#"
                SELECT id, is_verified FROM author_mappings
                WHERE calibre_author_id = $1 AND library_id = $2 AND author_metadata_id = $3
                "#,
            )
            .bind(calibre_author_id)
            .bind(library_id)
            .bind(keep)
            .fetch_optional(&mut **tx)
            .await?;

            match existing {
                Some(keep_mapping) => {
                    let keep_verified: bool = keep_mapping.get("is_verified");
                    if merge_verified && !keep_verified {
                        let keep_mapping_id: i64 = keep_mapping.get("id");
                        sqlx::query("DELETE FROM author_mappings WHERE id = $1")
                            .bind(keep_mapping_id)
                            .execute(&mut **tx)
                            .await?;
                        sqlx::query(
                            "UPDATE author_mappings SET author_metadata_id = $1, updated_at = NOW() WHERE id = $2",
                        )
                        .bind(keep)
                        .bind(mapping_id)
                        .execute(&mut **tx)
                        .await?;
                    } else {
                        sqlx::query("DELETE FROM author_mappings WHERE id = $1")
                            .bind(mapping_id)
                            .execute(&mut **tx)
                            .await?;
                    }
                }
                None => {
                    sqlx::query(
                        "UPDATE author_mappings SET author_metadata_id = $1, updated_at = NOW() WHERE id = $2",
                    )
                    .bind(keep)
                    .bind(mapping_id)
                    .execute(&mut **tx)
                    .await?;
                }
            }
        }

        Ok(())
    }

    async fn repoint_similarities(
        tx: &mut Transaction<'_, Postgres>,
        keep: i64,
        merge: i64,
    ) -> Result<()> {
        // An edge between the two sides becomes a self-edge; drop it.
        sqlx::query(
            r#"
            DELETE FROM author_similarities
            WHERE (author1_id = $1 AND author2_id = $2)
               OR (author1_id = $2 AND author2_id = $1)
            "#,
        )
        .bind(keep)
        .bind(merge)
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE author_similarities s SET author1_id = $1
            WHERE s.author1_id = $2
              AND NOT EXISTS (
                  SELECT 1 FROM author_similarities k
                  WHERE k.author1_id = $1 AND k.author2_id = s.author2_id
              )
            "#,
        )
        .bind(keep)
        .bind(merge)
        .execute(&mut **tx)
        .await?;
        sqlx::query("DELETE FROM author_similarities WHERE author1_id = $1")
            .bind(merge)
            .execute(&mut **tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE author_similarities s SET author2_id = $1
            WHERE s.author2_id = $2
              AND NOT EXISTS (
                  SELECT 1 FROM author_similarities k
                  WHERE k.author2_id = $1 AND k.author1_id = s.author1_id
              )
            "#,
        )
        .bind(keep)
        .bind(merge)
        .execute(&mut **tx)
        .await?;
        sqlx::query("DELETE FROM author_similarities WHERE author2_id = $1")
            .bind(merge)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    /// Fill the keep side's null scalars from the merge side. The merge
    /// row's external key must be released first or the unique
    /// constraint blocks the transfer.
    async fn merge_scalars(
        tx: &mut Transaction<'_, Postgres>,
        keep: i64,
        merge: i64,
    ) -> Result<()> {
        let merge_key: Option<String> =
            sqlx::query("SELECT external_key FROM author_metadata WHERE id = $1")
                .bind(merge)
                .fetch_one(&mut **tx)
                .await?
                .try_get("external_key")
                .unwrap_or(None);

        sqlx::query("UPDATE author_metadata SET external_key = NULL WHERE id = $1")
            .bind(merge)
            .execute(&mut **tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE author_metadata k SET
                external_key = COALESCE(k.external_key, $3),
                personal_name = COALESCE(k.personal_name, m.personal_name),
                fuller_name = COALESCE(k.fuller_name, m.fuller_name),
                title = COALESCE(k.title, m.title),
                birth_date = COALESCE(k.birth_date, m.birth_date),
                death_date = COALESCE(k.death_date, m.death_date),
                entity_type = COALESCE(k.entity_type, m.entity_type),
                biography = COALESCE(k.biography, m.biography),
                location = COALESCE(k.location, m.location),
                photo_url = COALESCE(k.photo_url, m.photo_url),
                work_count = COALESCE(k.work_count, m.work_count),
                ratings_average = COALESCE(k.ratings_average, m.ratings_average),
                ratings_count = COALESCE(k.ratings_count, m.ratings_count),
                top_work = COALESCE(k.top_work, m.top_work),
                last_synced_at = GREATEST(k.last_synced_at, m.last_synced_at),
                updated_at = NOW()
            FROM author_metadata m
            WHERE k.id = $1 AND m.id = $2
            "#,
        )
        .bind(keep)
        .bind(merge)
        .bind(merge_key)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl AuthorMerger for PgAuthorMerger {
    async fn merge(&self, keep: AuthorMetadataId, merge: AuthorMetadataId) -> Result<()> {
        if keep == merge {
            return Err(CoreError::InvalidInput(
                "cannot merge an author into itself".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let merge_exists =
            sqlx::query("SELECT id FROM author_metadata WHERE id = $1 FOR UPDATE")
                .bind(merge.as_i64())
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
        if !merge_exists {
            // Already merged away; re-running is a no-op.
            debug!("Merge source {} no longer exists, nothing to do", merge);
            return Ok(());
        }

        let keep_exists =
            sqlx::query("SELECT id FROM author_metadata WHERE id = $1 FOR UPDATE")
                .bind(keep.as_i64())
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
        if !keep_exists {
            return Err(CoreError::NotFound(format!("author metadata {keep}")));
        }

        Self::transfer_children(&mut tx, keep.as_i64(), merge.as_i64()).await?;
        Self::repoint_mappings(&mut tx, keep.as_i64(), merge.as_i64()).await?;
        Self::repoint_similarities(&mut tx, keep.as_i64(), merge.as_i64()).await?;
        Self::merge_scalars(&mut tx, keep.as_i64(), merge.as_i64()).await?;

        sqlx::query("DELETE FROM author_metadata WHERE id = $1")
            .bind(merge.as_i64())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!("Merged author metadata {} into {}", merge, keep);
        Ok(())
    }
}
