//! Scheduled job definitions.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::FromRow;
use sqlx::postgres::PgPool;
use tracing::warn;

use fundamental_model::ScheduledJobDefinition;

use crate::error::Result;
use crate::store::ports::ScheduledJobStore;

#[derive(Debug, FromRow)]
struct ScheduledJobRow {
    id: i64,
    job_name: String,
    task_type: String,
    cron_expression: String,
    enabled: bool,
    user_id: Option<i64>,
    arguments: Option<Value>,
    job_metadata: Option<Value>,
}

#[derive(Clone, Debug)]
pub struct PgScheduledJobStore {
    pool: PgPool,
}

impl PgScheduledJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduledJobStore for PgScheduledJobStore {
    async fn list_enabled(&self) -> Result<Vec<ScheduledJobDefinition>> {
        let rows = sqlx::query_as::<_, ScheduledJobRow>(
            r#"
            SELECT id, job_name, task_type, cron_expression, enabled,
                   user_id, arguments, job_metadata
            FROM scheduled_jobs
            WHERE enabled
            ORDER BY job_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        // Rows with an unknown task type are skipped rather than failing
        // the whole refresh.
        Ok(rows
            .into_iter()
            .filter_map(|row| match row.task_type.parse() {
                Ok(task_type) => Some(ScheduledJobDefinition {
                    id: row.id,
                    job_name: row.job_name,
                    task_type,
                    cron_expression: row.cron_expression,
                    enabled: row.enabled,
                    user_id: row.user_id,
                    arguments: row.arguments,
                    job_metadata: row.job_metadata,
                }),
                Err(err) => {
                    warn!("Skipping scheduled job {}: {}", row.job_name, err);
                    None
                }
            })
            .collect())
    }
}
