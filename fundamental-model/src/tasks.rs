//! Task rows and lifecycle enums.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::TaskId;

/// Lifecycle state of a task. `Completed`, `Failed` and `Cancelled` are
/// terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(UnknownVariant {
                kind: "task status",
                value: other.to_string(),
            }),
        }
    }
}

/// Kind of work a task performs. The string forms are persisted in the
/// database and must stay stable.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    BookUpload,
    MultiBookUpload,
    BookConvert,
    BookStripDrm,
    EmailSend,
    MetadataBackup,
    ThumbnailGenerate,
    LibraryScan,
    AuthorMetadataFetch,
    OpenlibraryDumpDownload,
    OpenlibraryDumpIngest,
    EpubFixSingle,
    EpubFixBatch,
    EpubFixDailyScan,
    IngestDiscovery,
    IngestBook,
    PvrDownloadMonitor,
    ProwlarrSync,
    IndexerHealthCheck,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::BookUpload => "book_upload",
            TaskType::MultiBookUpload => "multi_book_upload",
            TaskType::BookConvert => "book_convert",
            TaskType::BookStripDrm => "book_strip_drm",
            TaskType::EmailSend => "email_send",
            TaskType::MetadataBackup => "metadata_backup",
            TaskType::ThumbnailGenerate => "thumbnail_generate",
            TaskType::LibraryScan => "library_scan",
            TaskType::AuthorMetadataFetch => "author_metadata_fetch",
            TaskType::OpenlibraryDumpDownload => "openlibrary_dump_download",
            TaskType::OpenlibraryDumpIngest => "openlibrary_dump_ingest",
            TaskType::EpubFixSingle => "epub_fix_single",
            TaskType::EpubFixBatch => "epub_fix_batch",
            TaskType::EpubFixDailyScan => "epub_fix_daily_scan",
            TaskType::IngestDiscovery => "ingest_discovery",
            TaskType::IngestBook => "ingest_book",
            TaskType::PvrDownloadMonitor => "pvr_download_monitor",
            TaskType::ProwlarrSync => "prowlarr_sync",
            TaskType::IndexerHealthCheck => "indexer_health_check",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "book_upload" => Ok(TaskType::BookUpload),
            "multi_book_upload" => Ok(TaskType::MultiBookUpload),
            "book_convert" => Ok(TaskType::BookConvert),
            "book_strip_drm" => Ok(TaskType::BookStripDrm),
            "email_send" => Ok(TaskType::EmailSend),
            "metadata_backup" => Ok(TaskType::MetadataBackup),
            "thumbnail_generate" => Ok(TaskType::ThumbnailGenerate),
            "library_scan" => Ok(TaskType::LibraryScan),
            "author_metadata_fetch" => Ok(TaskType::AuthorMetadataFetch),
            "openlibrary_dump_download" => Ok(TaskType::OpenlibraryDumpDownload),
            "openlibrary_dump_ingest" => Ok(TaskType::OpenlibraryDumpIngest),
            "epub_fix_single" => Ok(TaskType::EpubFixSingle),
            "epub_fix_batch" => Ok(TaskType::EpubFixBatch),
            "epub_fix_daily_scan" => Ok(TaskType::EpubFixDailyScan),
            "ingest_discovery" => Ok(TaskType::IngestDiscovery),
            "ingest_book" => Ok(TaskType::IngestBook),
            "pvr_download_monitor" => Ok(TaskType::PvrDownloadMonitor),
            "prowlarr_sync" => Ok(TaskType::ProwlarrSync),
            "indexer_health_check" => Ok(TaskType::IndexerHealthCheck),
            other => Err(UnknownVariant {
                kind: "task type",
                value: other.to_string(),
            }),
        }
    }
}

/// Error returned when decoding a persisted enum string fails.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

/// A persisted unit of background work.
///
/// Invariants the store upholds: `progress` stays in `[0.0, 1.0]`; at most
/// one of `completed_at` / `cancelled_at` is set; `error_message` is only
/// set when the status is `Failed`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub progress: f64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub task_data: Option<Value>,
}

impl Task {
    /// Seconds between start and finish. Running tasks measure against the
    /// current time; tasks that never started have no duration.
    pub fn duration(&self) -> Option<f64> {
        let started = self.started_at?;
        let end = self
            .completed_at
            .or(self.cancelled_at)
            .unwrap_or_else(Utc::now);
        let millis = end.signed_duration_since(started).num_milliseconds();
        Some(millis as f64 / 1000.0)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Aggregate execution statistics, one row per task type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskStatistics {
    pub task_type: TaskType,
    pub avg_duration: Option<f64>,
    pub min_duration: Option<f64>,
    pub max_duration: Option<f64>,
    pub total_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn task(status: TaskStatus) -> Task {
        Task {
            id: TaskId(1),
            task_type: TaskType::LibraryScan,
            status,
            progress: 0.0,
            user_id: 1,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            error_message: None,
            task_data: None,
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("paused".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn task_type_round_trips_through_strings() {
        assert_eq!(
            "library_scan".parse::<TaskType>().unwrap(),
            TaskType::LibraryScan
        );
        assert_eq!(
            "pvr_download_monitor".parse::<TaskType>().unwrap(),
            TaskType::PvrDownloadMonitor
        );
        assert!("telepathy".parse::<TaskType>().is_err());
    }

    #[test]
    fn duration_requires_a_start_time() {
        assert_eq!(task(TaskStatus::Pending).duration(), None);
    }

    #[test]
    fn duration_uses_the_terminal_timestamp() {
        let mut t = task(TaskStatus::Completed);
        let started = Utc::now();
        t.started_at = Some(started);
        t.completed_at = Some(started + TimeDelta::seconds(90));
        assert_eq!(t.duration(), Some(90.0));
    }

    #[test]
    fn terminal_states() {
        assert!(!task(TaskStatus::Pending).is_terminal());
        assert!(!task(TaskStatus::Running).is_terminal());
        assert!(task(TaskStatus::Completed).is_terminal());
        assert!(task(TaskStatus::Failed).is_terminal());
        assert!(task(TaskStatus::Cancelled).is_terminal());
    }
}
