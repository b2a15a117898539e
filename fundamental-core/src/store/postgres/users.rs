//! System-user resolution.
//!
//! The users table is owned by the embedding application; the scheduler
//! only needs to attribute scheduled tasks to somebody sensible.

use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::PgPool;

use crate::error::Result;
use crate::store::ports::UserStore;

#[derive(Clone, Debug)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_system_user(&self) -> Result<Option<i64>> {
        let admin = sqlx::query("SELECT id FROM users WHERE is_admin ORDER BY id LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = admin {
            return Ok(Some(row.get::<i64, _>("id")));
        }

        let any = sqlx::query("SELECT id FROM users ORDER BY id LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        Ok(any.map(|row| row.get::<i64, _>("id")))
    }
}
