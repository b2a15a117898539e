//! Postgres implementations of the storage ports.

mod authors;
mod ingest;
mod libraries;
mod scheduled_jobs;
mod tasks;
mod users;

use sqlx::postgres::PgPool;

use crate::error::Result;

pub use authors::PgAuthorStore;
pub use ingest::PgAuthorIngest;
pub use libraries::PgLibraryStore;
pub use scheduled_jobs::PgScheduledJobStore;
pub use tasks::{ERROR_MESSAGE_MAX_LEN, PgTaskStore};
pub use users::PgUserStore;

/// Apply the embedded schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
