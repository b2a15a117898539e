//! Storage ports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use fundamental_model::{
    AuthorMapping, AuthorMetadata, AuthorMetadataId, Library, LibraryId,
    MatchMethod, ScheduledJobDefinition, Task, TaskId, TaskStatistics,
    TaskStatus, TaskType,
};

use crate::datasource::AuthorData;
use crate::error::Result;
use crate::matching::MatchResult;

/// Filters for task listing. All fields are conjunctive.
#[derive(Clone, Debug, Default)]
pub struct TaskFilter {
    pub user_id: Option<i64>,
    pub status: Option<TaskStatus>,
    pub task_type: Option<TaskType>,
}

/// Task rows, lifecycle transitions, and per-type statistics.
///
/// Terminal transitions (`complete_task`, `fail_task`, `cancel_task`)
/// update the statistics row for the task's type in the same operation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(
        &self,
        task_type: TaskType,
        user_id: i64,
        task_data: Option<Value>,
    ) -> Result<Task>;

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>>;

    async fn list_tasks(
        &self,
        filter: &TaskFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Task>>;

    /// PENDING → RUNNING, recording `started_at`.
    async fn start_task(&self, id: TaskId) -> Result<()>;

    /// Write `progress` and merge `meta` into `task_data` when given.
    async fn update_progress(
        &self,
        id: TaskId,
        progress: f64,
        meta: Option<Value>,
    ) -> Result<()>;

    async fn complete_task(&self, id: TaskId) -> Result<()>;

    /// Mark FAILED with a message truncated to the column bound.
    async fn fail_task(&self, id: TaskId, message: &str) -> Result<()>;

    /// PENDING or RUNNING → CANCELLED. Idempotent; returns whether the
    /// row changed.
    async fn cancel_task(&self, id: TaskId) -> Result<bool>;

    async fn get_statistics(
        &self,
        task_type: Option<TaskType>,
    ) -> Result<Vec<TaskStatistics>>;
}

/// Registered libraries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LibraryStore: Send + Sync {
    async fn get(&self, id: LibraryId) -> Result<Option<Library>>;

    async fn get_active(&self) -> Result<Option<Library>>;

    async fn list(&self) -> Result<Vec<Library>>;

    /// Activate one library, deactivating every other (at most one
    /// library is active).
    async fn set_active(&self, id: LibraryId) -> Result<()>;
}

/// System-user resolution for scheduler-triggered tasks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    /// First admin, falling back to the first user; `None` when the
    /// users table is empty.
    async fn find_system_user(&self) -> Result<Option<i64>>;
}

/// Cron job definitions for the scheduler.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScheduledJobStore: Send + Sync {
    async fn list_enabled(&self) -> Result<Vec<ScheduledJobDefinition>>;
}

/// Input for creating or updating an author mapping.
#[derive(Clone, Debug)]
pub struct MappingData {
    pub library_id: LibraryId,
    pub calibre_author_id: i64,
    pub author_metadata_id: AuthorMetadataId,
    pub confidence_score: f64,
    pub matched_by: MatchMethod,
}

/// Author metadata graph access used by matching, linking,
/// deduplication, and scoring.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthorStore: Send + Sync {
    /// Mapping for `(calibre_author, library)` joined with its metadata.
    async fn find_mapping_with_metadata(
        &self,
        calibre_author_id: i64,
        library_id: LibraryId,
    ) -> Result<Option<(AuthorMapping, AuthorMetadata)>>;

    async fn get_metadata(
        &self,
        id: AuthorMetadataId,
    ) -> Result<Option<AuthorMetadata>>;

    async fn find_metadata_by_key(&self, key: &str) -> Result<Option<AuthorMetadata>>;

    /// Create an unmatched placeholder (metadata row with a null
    /// external key).
    async fn create_unmatched_metadata(&self, name: &str) -> Result<AuthorMetadata>;

    async fn rename_metadata(&self, id: AuthorMetadataId, name: &str) -> Result<()>;

    /// Create or update the `(calibre_author, library)` mapping. Returns
    /// the mapping and whether a row was created.
    async fn upsert_mapping(&self, data: &MappingData) -> Result<(AuthorMapping, bool)>;

    /// Metadata rows mapped into a library.
    async fn list_metadata_for_library(
        &self,
        library_id: LibraryId,
    ) -> Result<Vec<AuthorMetadata>>;

    async fn alternate_names_for(&self, id: AuthorMetadataId) -> Result<Vec<String>>;

    /// Work keys owned by a metadata row, in rank order.
    async fn work_keys_for(&self, id: AuthorMetadataId) -> Result<Vec<String>>;

    /// Distinct subject names across a metadata row's works.
    async fn subjects_for(&self, id: AuthorMetadataId) -> Result<Vec<String>>;

    /// Insert or refresh a similarity edge. Pairs are stored with
    /// `author1_id < author2_id`.
    async fn upsert_similarity(
        &self,
        author1_id: AuthorMetadataId,
        author2_id: AuthorMetadataId,
        score: f64,
        source: &str,
    ) -> Result<()>;

    /// Creation time of the newest similarity edge touching a library's
    /// authors; gates re-scoring.
    async fn latest_similarity_at(
        &self,
        library_id: LibraryId,
    ) -> Result<Option<DateTime<Utc>>>;
}

/// Full-author ingestion: writing fetched author data and its owned
/// children under one unit of work.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthorIngest: Send + Sync {
    /// When the author identified by `key` was last synced; `None` when
    /// unknown to the store.
    async fn last_synced_at(&self, key: &str) -> Result<Option<DateTime<Utc>>>;

    /// Upsert the metadata row and children (remote ids, photos,
    /// alternate names, links, works) from fetched data, committing as
    /// one unit.
    async fn ingest_author(
        &self,
        result: &MatchResult,
        data: &AuthorData,
        work_keys: &[String],
    ) -> Result<AuthorMetadataId>;
}

/// Relation-preserving merge of one metadata row into another.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthorMerger: Send + Sync {
    /// Merge `merge` into `keep` atomically. Re-running after success is
    /// a no-op.
    async fn merge(
        &self,
        keep: AuthorMetadataId,
        merge: AuthorMetadataId,
    ) -> Result<()>;
}
