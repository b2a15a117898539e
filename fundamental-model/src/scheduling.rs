//! Cron-driven scheduled job definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tasks::TaskType;

/// A recurring job stored in the database and registered with the
/// scheduler on refresh.
///
/// `cron_expression` is standard 5-field cron (`m h dom mon dow`),
/// evaluated in UTC. `arguments` becomes the enqueued task's payload;
/// `job_metadata` is merged over the scheduler-provided metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduledJobDefinition {
    pub id: i64,
    pub job_name: String,
    pub task_type: TaskType,
    pub cron_expression: String,
    pub enabled: bool,
    pub user_id: Option<i64>,
    pub arguments: Option<Value>,
    pub job_metadata: Option<Value>,
}
