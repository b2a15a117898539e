//! Task rows, lifecycle transitions, and statistics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, Postgres};
use sqlx::{FromRow, QueryBuilder, Transaction};
use tracing::debug;

use fundamental_model::{
    Task, TaskId, TaskStatistics, TaskStatus, TaskType,
};

use crate::error::{CoreError, Result};
use crate::store::ports::{TaskFilter, TaskStore};

/// Error messages are bounded by the column width.
pub const ERROR_MESSAGE_MAX_LEN: usize = 2000;

#[derive(Debug, FromRow)]
struct TaskRow {
    id: i64,
    task_type: String,
    status: String,
    progress: f64,
    user_id: i64,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    task_data: Option<Value>,
}

impl TaskRow {
    fn into_task(self) -> Result<Task> {
        Ok(Task {
            id: TaskId(self.id),
            task_type: self
                .task_type
                .parse()
                .map_err(|e| CoreError::Internal(format!("corrupt task row: {e}")))?,
            status: self
                .status
                .parse()
                .map_err(|e| CoreError::Internal(format!("corrupt task row: {e}")))?,
            progress: self.progress,
            user_id: self.user_id,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            cancelled_at: self.cancelled_at,
            error_message: self.error_message,
            task_data: self.task_data,
        })
    }
}

#[derive(Debug, FromRow)]
struct StatisticsRow {
    task_type: String,
    avg_duration: Option<f64>,
    min_duration: Option<f64>,
    max_duration: Option<f64>,
    total_count: i64,
    success_count: i64,
    failure_count: i64,
    last_run_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl StatisticsRow {
    fn into_statistics(self) -> Result<TaskStatistics> {
        Ok(TaskStatistics {
            task_type: self
                .task_type
                .parse()
                .map_err(|e| CoreError::Internal(format!("corrupt statistics row: {e}")))?,
            avg_duration: self.avg_duration,
            min_duration: self.min_duration,
            max_duration: self.max_duration,
            total_count: self.total_count,
            success_count: self.success_count,
            failure_count: self.failure_count,
            last_run_at: self.last_run_at,
            updated_at: self.updated_at,
        })
    }
}

/// Terminal outcome, for the statistics update.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Outcome {
    Success,
    Failure,
    Cancelled,
}

#[derive(Clone, Debug)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fold a finished task into its type's statistics row, inside the
    /// caller's transaction so the terminal transition and the stats
    /// update land together.
    async fn record_statistics(
        tx: &mut Transaction<'_, Postgres>,
        task_type: &str,
        duration: Option<f64>,
        outcome: Outcome,
        finished_at: DateTime<Utc>,
    ) -> Result<()> {
        let existing = sqlx::query_as::<_, StatisticsRow>(
            r#"
            SELECT task_type, avg_duration, min_duration, max_duration,
                   total_count, success_count, failure_count, last_run_at, updated_at
            FROM task_statistics
            WHERE task_type = $1
            FOR UPDATE
            "#,
        )
        .bind(task_type)
        .fetch_optional(&mut **tx)
        .await?;

        let (mut avg, mut min, mut max, total, success, failure) = match &existing {
            Some(row) => (
                row.avg_duration,
                row.min_duration,
                row.max_duration,
                row.total_count,
                row.success_count,
                row.failure_count,
            ),
            None => (None, None, None, 0, 0, 0),
        };

        let total = total + 1;
        if let Some(duration) = duration {
            // Incremental mean: avg' = avg + (d - avg) / n.
            let previous = avg.unwrap_or(0.0);
            avg = Some(previous + (duration - previous) / total as f64);
            min = Some(min.map_or(duration, |m| m.min(duration)));
            max = Some(max.map_or(duration, |m| m.max(duration)));
        }

        let success = success + i64::from(outcome == Outcome::Success);
        let failure = failure + i64::from(outcome == Outcome::Failure);

        sqlx::query(
            r#"
            INSERT INTO task_statistics (
                task_type, avg_duration, min_duration, max_duration,
                total_count, success_count, failure_count, last_run_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            ON CONFLICT (task_type) DO UPDATE SET
                avg_duration = EXCLUDED.avg_duration,
                min_duration = EXCLUDED.min_duration,
                max_duration = EXCLUDED.max_duration,
                total_count = EXCLUDED.total_count,
                success_count = EXCLUDED.success_count,
                failure_count = EXCLUDED.failure_count,
                last_run_at = EXCLUDED.last_run_at,
                updated_at = NOW()
            "#,
        )
        .bind(task_type)
        .bind(avg)
        .bind(min)
        .bind(max)
        .bind(total)
        .bind(success)
        .bind(failure)
        .bind(finished_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create_task(
        &self,
        task_type: TaskType,
        user_id: i64,
        task_data: Option<Value>,
    ) -> Result<Task> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            INSERT INTO tasks (task_type, status, progress, user_id, task_data)
            VALUES ($1, 'pending', 0.0, $2, $3)
            RETURNING id, task_type, status, progress, user_id, created_at,
                      started_at, completed_at, cancelled_at, error_message, task_data
            "#,
        )
        .bind(task_type.as_str())
        .bind(user_id)
        .bind(task_data)
        .fetch_one(&self.pool)
        .await?;

        debug!("Created task {} ({})", row.id, task_type);
        row.into_task()
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, task_type, status, progress, user_id, created_at,
                   started_at, completed_at, cancelled_at, error_message, task_data
            FROM tasks
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TaskRow::into_task).transpose()
    }

    async fn list_tasks(
        &self,
        filter: &TaskFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Task>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT id, task_type, status, progress, user_id, created_at, \
             started_at, completed_at, cancelled_at, error_message, task_data \
             FROM tasks WHERE TRUE",
        );

        if let Some(user_id) = filter.user_id {
            builder.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(task_type) = filter.task_type {
            builder.push(" AND task_type = ").push_bind(task_type.as_str());
        }
        builder
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = builder
            .build_query_as::<TaskRow>()
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TaskRow::into_task).collect()
    }

    async fn start_task(&self, id: TaskId) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'running', started_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id.as_i64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!("start_task: task {} not pending", id);
        }
        Ok(())
    }

    async fn update_progress(
        &self,
        id: TaskId,
        progress: f64,
        meta: Option<Value>,
    ) -> Result<()> {
        let progress = progress.clamp(0.0, 1.0);
        match meta {
            Some(meta) => {
                sqlx::query(
                    r#"
                    UPDATE tasks
                    SET progress = $2,
                        task_data = COALESCE(task_data, '{}'::jsonb) || $3::jsonb
                    WHERE id = $1
                    "#,
                )
                .bind(id.as_i64())
                .bind(progress)
                .bind(meta)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query("UPDATE tasks SET progress = $2 WHERE id = $1")
                    .bind(id.as_i64())
                    .bind(progress)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    async fn complete_task(&self, id: TaskId) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            UPDATE tasks
            SET status = 'completed', progress = 1.0, completed_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'running')
            RETURNING id, task_type, status, progress, user_id, created_at,
                      started_at, completed_at, cancelled_at, error_message, task_data
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = row {
            let task_type = row.task_type.clone();
            let finished = row.completed_at.unwrap_or_else(Utc::now);
            let duration = row.into_task()?.duration();
            Self::record_statistics(
                &mut tx,
                &task_type,
                duration,
                Outcome::Success,
                finished,
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn fail_task(&self, id: TaskId, message: &str) -> Result<()> {
        let message: String = message.chars().take(ERROR_MESSAGE_MAX_LEN).collect();

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            UPDATE tasks
            SET status = 'failed', error_message = $2, completed_at = NULL, cancelled_at = NULL
            WHERE id = $1 AND status IN ('pending', 'running')
            RETURNING id, task_type, status, progress, user_id, created_at,
                      started_at, completed_at, cancelled_at, error_message, task_data
            "#,
        )
        .bind(id.as_i64())
        .bind(&message)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = row {
            let task_type = row.task_type.clone();
            let duration = row.into_task()?.duration();
            Self::record_statistics(
                &mut tx,
                &task_type,
                duration,
                Outcome::Failure,
                Utc::now(),
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn cancel_task(&self, id: TaskId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            UPDATE tasks
            SET status = 'cancelled', cancelled_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'running')
            RETURNING id, task_type, status, progress, user_id, created_at,
                      started_at, completed_at, cancelled_at, error_message, task_data
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&mut *tx)
        .await?;

        let changed = row.is_some();
        if let Some(row) = row {
            let task_type = row.task_type.clone();
            let finished = row.cancelled_at.unwrap_or_else(Utc::now);
            let duration = row.into_task()?.duration();
            Self::record_statistics(
                &mut tx,
                &task_type,
                duration,
                Outcome::Cancelled,
                finished,
            )
            .await?;
        }

        tx.commit().await?;
        Ok(changed)
    }

    async fn get_statistics(
        &self,
        task_type: Option<TaskType>,
    ) -> Result<Vec<TaskStatistics>> {
        let rows = match task_type {
            Some(task_type) => {
                sqlx::query_as::<_, StatisticsRow>(
                    r#"
                    SELECT task_type, avg_duration, min_duration, max_duration,
                           total_count, success_count, failure_count, last_run_at, updated_at
                    FROM task_statistics
                    WHERE task_type = $1
                    "#,
                )
                .bind(task_type.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, StatisticsRow>(
                    r#"
                    SELECT task_type, avg_duration, min_duration, max_duration,
                           total_count, success_count, failure_count, last_run_at, updated_at
                    FROM task_statistics
                    ORDER BY task_type
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(StatisticsRow::into_statistics).collect()
    }
}
