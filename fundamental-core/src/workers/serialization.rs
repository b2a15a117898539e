//! Message payloads exchanged between scan workers.
//!
//! Every payload is a flat JSON object; the broker adds a `message_id`
//! on publish. Match results round-trip through JSON so the per-author
//! chain can hand them across process boundaries.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use fundamental_model::{LibraryId, TaskId};

use crate::catalog::Author;
use crate::datasource::DataSourceConfig;
use crate::error::Result;
use crate::matching::MatchResult;

/// Job kickoff message on `scan_jobs`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanJobPayload {
    pub task_id: Option<TaskId>,
    pub library_id: LibraryId,
    pub calibre_db_path: String,
    pub calibre_db_file: String,
    #[serde(default)]
    pub data_source_config: DataSourceConfig,
}

/// Per-author message on `match_queue`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorMatchPayload {
    pub task_id: Option<TaskId>,
    pub library_id: LibraryId,
    pub author: Author,
}

/// Per-author message on `ingest_queue` and `link_queue`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchResultPayload {
    pub task_id: Option<TaskId>,
    pub library_id: LibraryId,
    pub match_result: MatchResult,
    pub calibre_author_id: i64,
    pub author_name: String,
}

/// Job-level message on `deduplicate_jobs`, `score_jobs`, and
/// `completion_jobs`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobStagePayload {
    pub task_id: Option<TaskId>,
    pub library_id: LibraryId,
}

/// Decode a payload. Workers log and drop malformed messages rather
/// than nacking them.
pub fn decode<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T> {
    Ok(serde_json::from_value(payload)?)
}

/// Encode a payload for publishing.
pub fn encode<T: Serialize>(payload: &T) -> Result<Value> {
    Ok(serde_json::to_value(payload)?)
}

#[cfg(test)]
mod tests {
    use fundamental_model::MatchMethod;

    use crate::datasource::AuthorData;

    use super::*;

    #[test]
    fn scan_job_payload_round_trips() {
        let payload = ScanJobPayload {
            task_id: Some(TaskId(4)),
            library_id: LibraryId(2),
            calibre_db_path: "/books".into(),
            calibre_db_file: "metadata.db".into(),
            data_source_config: DataSourceConfig::named("openlibrary"),
        };
        let value = encode(&payload).unwrap();
        let back: ScanJobPayload = decode(value).unwrap();
        assert_eq!(back.task_id, Some(TaskId(4)));
        assert_eq!(back.library_id, LibraryId(2));
        assert_eq!(back.data_source_config.name, "openlibrary");
    }

    #[test]
    fn scan_job_payload_defaults_the_source_config() {
        let value = serde_json::json!({
            "task_id": 1,
            "library_id": 2,
            "calibre_db_path": "/books",
            "calibre_db_file": "metadata.db",
        });
        let payload: ScanJobPayload = decode(value).unwrap();
        assert_eq!(payload.data_source_config.name, "openlibrary");
    }

    #[test]
    fn match_result_payload_round_trips() {
        let payload = MatchResultPayload {
            task_id: None,
            library_id: LibraryId(1),
            match_result: MatchResult {
                confidence_score: 0.9,
                matched_entity: AuthorData {
                    key: "OL1A".into(),
                    name: "John Doe".into(),
                    ..AuthorData::default()
                },
                match_method: MatchMethod::Exact,
                calibre_author_id: Some(11),
            },
            calibre_author_id: 11,
            author_name: "John Doe".into(),
        };
        let value = encode(&payload).unwrap();
        let back: MatchResultPayload = decode(value).unwrap();
        assert_eq!(back.match_result.match_method, MatchMethod::Exact);
        assert_eq!(back.match_result.calibre_author_id, Some(11));
        assert_eq!(back.match_result.matched_entity.key, "OL1A");
    }

    #[test]
    fn malformed_payloads_are_an_error() {
        let value = serde_json::json!({"library_id": "not a number"});
        assert!(decode::<JobStagePayload>(value).is_err());
    }
}
