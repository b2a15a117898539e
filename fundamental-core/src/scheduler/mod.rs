//! Cron-driven task scheduling.
//!
//! Job definitions live in the database; `refresh_jobs` reloads them so
//! schedules change without a restart. Each registered job runs as one
//! loop that sleeps until the next UTC occurrence, which gives the two
//! required policies for free: missed runs coalesce into a single run
//! (the next occurrence is always computed from now) and at most one
//! instance of a job is in flight.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use cron::Schedule;
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fundamental_model::ScheduledJobDefinition;

use crate::error::{CoreError, Result};
use crate::runtime::TaskRuntime;
use crate::store::{ScheduledJobStore, UserStore};

/// Parse a standard 5-field cron expression (`m h dom mon dow`) in UTC.
///
/// The schedule crate wants a seconds field, so second zero is
/// prepended; anything that is not exactly five fields is rejected
/// before it can be misread.
pub fn parse_cron(expression: &str) -> Result<Schedule> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(CoreError::InvalidInput(format!(
            "cron expression must have 5 fields, got {}: '{expression}'",
            fields.len()
        )));
    }
    let with_seconds = format!("0 {}", fields.join(" "));
    Schedule::from_str(&with_seconds).map_err(|err| {
        CoreError::InvalidInput(format!("invalid cron expression '{expression}': {err}"))
    })
}

struct RegisteredJob {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the cron job set and triggers tasks through the runtime.
pub struct SchedulerService {
    jobs_store: Arc<dyn ScheduledJobStore>,
    users: Arc<dyn UserStore>,
    runtime: Arc<dyn TaskRuntime>,
    jobs: Mutex<HashMap<String, RegisteredJob>>,
}

impl fmt::Debug for SchedulerService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let job_count = self.jobs.try_lock().map(|jobs| jobs.len()).unwrap_or(0);
        f.debug_struct("SchedulerService")
            .field("registered_jobs", &job_count)
            .finish()
    }
}

impl SchedulerService {
    pub fn new(
        jobs_store: Arc<dyn ScheduledJobStore>,
        users: Arc<dyn UserStore>,
        runtime: Arc<dyn TaskRuntime>,
    ) -> Self {
        Self {
            jobs_store,
            users,
            runtime,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Activate the scheduler and register the current job set.
    pub async fn start(&self) -> Result<()> {
        info!("Scheduler started");
        self.refresh_jobs().await;
        Ok(())
    }

    /// Reload job definitions from the database and re-register them.
    ///
    /// No enabled definitions clears every registered job. A missing
    /// system user leaves the current set untouched. A job with an
    /// invalid cron expression is logged and skipped; the others
    /// register normally.
    pub async fn refresh_jobs(&self) {
        let definitions = match self.jobs_store.list_enabled().await {
            Ok(definitions) => definitions,
            Err(err) => {
                error!("Failed to refresh scheduled jobs: {}", err);
                return;
            }
        };

        if definitions.is_empty() {
            warn!("No enabled scheduled jobs found");
            self.clear_jobs().await;
            return;
        }

        let system_user = match self.users.find_system_user().await {
            Ok(Some(user_id)) => user_id,
            Ok(None) => {
                warn!("No system user found, skipping job registration");
                return;
            }
            Err(err) => {
                error!("System user lookup failed: {}", err);
                return;
            }
        };

        self.clear_jobs().await;

        let mut registered = Vec::new();
        for definition in definitions {
            let schedule = match parse_cron(&definition.cron_expression) {
                Ok(schedule) => schedule,
                Err(err) => {
                    error!(
                        "Invalid cron expression '{}' for job {}: {}",
                        definition.cron_expression, definition.job_name, err
                    );
                    continue;
                }
            };

            registered.push(definition.job_name.clone());
            self.register_job(definition, schedule, system_user).await;
        }

        info!("Refreshed scheduled jobs: {:?}", registered);
    }

    /// Cancel the job loops; with `wait`, join them before returning.
    pub async fn shutdown(&self, wait: bool) {
        let jobs: Vec<(String, RegisteredJob)> =
            self.jobs.lock().await.drain().collect();
        for (name, job) in jobs {
            job.token.cancel();
            if wait && job.handle.await.is_err() {
                warn!("Scheduled job loop {} did not stop cleanly", name);
            }
        }
        info!("Scheduler shut down");
    }

    async fn clear_jobs(&self) {
        let jobs: Vec<RegisteredJob> =
            self.jobs.lock().await.drain().map(|(_, job)| job).collect();
        for job in jobs {
            job.token.cancel();
        }
    }

    async fn register_job(
        &self,
        definition: ScheduledJobDefinition,
        schedule: Schedule,
        system_user: i64,
    ) {
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let runtime = Arc::clone(&self.runtime);
        let job_name = definition.job_name.clone();

        let handle = tokio::spawn(async move {
            job_loop(runtime, definition, schedule, system_user, loop_token).await;
        });

        self.jobs
            .lock()
            .await
            .insert(job_name, RegisteredJob { token, handle });
    }
}

/// Scheduler metadata merged under the job's own metadata.
fn trigger_metadata(definition: &ScheduledJobDefinition) -> Value {
    let mut metadata = Map::new();
    metadata.insert(
        "task_type".to_string(),
        json!(definition.task_type.as_str()),
    );
    metadata.insert("scheduled".to_string(), json!(true));
    if let Some(Value::Object(extra)) = &definition.job_metadata {
        for (key, value) in extra {
            metadata.insert(key.clone(), value.clone());
        }
    }
    Value::Object(metadata)
}

async fn job_loop(
    runtime: Arc<dyn TaskRuntime>,
    definition: ScheduledJobDefinition,
    schedule: Schedule,
    system_user: i64,
    token: CancellationToken,
) {
    let user_id = definition.user_id.unwrap_or(system_user);

    loop {
        // Computing from now after every run coalesces any occurrences
        // missed while the previous run was in flight.
        let Some(next) = schedule.upcoming(Utc).next() else {
            warn!(
                "Schedule for job {} has no upcoming occurrences",
                definition.job_name
            );
            return;
        };

        let wait = match (next - Utc::now()).to_std() {
            Ok(wait) => wait,
            Err(_) => continue,
        };
        debug!(
            "Job {} sleeping until {} ({:?})",
            definition.job_name, next, wait
        );

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        let payload = definition.arguments.clone().unwrap_or_else(|| json!({}));
        let metadata = trigger_metadata(&definition);

        match runtime
            .enqueue(definition.task_type, payload, user_id, Some(metadata))
            .await
        {
            Ok(task_id) => {
                info!(
                    "Scheduled task {} triggered (id={})",
                    definition.task_type, task_id
                );
            }
            Err(err) => {
                error!(
                    "Failed to trigger scheduled task {}: {}",
                    definition.task_type, err
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Timelike};

    use fundamental_model::TaskType;

    use super::*;

    #[test]
    fn five_field_expressions_parse() {
        assert!(parse_cron("*/5 * * * *").is_ok());
        assert!(parse_cron("0 4 * * *").is_ok());
        assert!(parse_cron("30 2 1 * *").is_ok());
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        assert!(parse_cron("not a cron").is_err());
        assert!(parse_cron("* * * *").is_err());
        assert!(parse_cron("0 0 * * * *").is_err());
        assert!(parse_cron("99 * * * *").is_err());
    }

    #[test]
    fn every_five_minutes_fires_on_multiples_of_five() {
        let schedule = parse_cron("*/5 * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2025, 6, 1, 12, 1, 30).unwrap();
        let occurrences: Vec<DateTime<Utc>> =
            schedule.after(&after).take(3).collect();

        assert_eq!(occurrences[0].minute(), 5);
        assert_eq!(occurrences[1].minute(), 10);
        assert_eq!(occurrences[2].minute(), 15);
        assert!(occurrences.iter().all(|at| at.second() == 0));
    }

    #[test]
    fn daily_at_four_utc() {
        let schedule = parse_cron("0 4 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
        let next = schedule.after(&after).next().unwrap();

        assert_eq!(next.hour(), 4);
        assert_eq!(next.minute(), 0);
        assert_eq!(
            next.date_naive(),
            Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap().date_naive()
        );
    }

    #[test]
    fn trigger_metadata_merges_job_metadata_over_defaults() {
        let definition = ScheduledJobDefinition {
            id: 1,
            job_name: "pvr-monitor".into(),
            task_type: TaskType::PvrDownloadMonitor,
            cron_expression: "*/5 * * * *".into(),
            enabled: true,
            user_id: None,
            arguments: None,
            job_metadata: Some(json!({"max_runtime_seconds": 120})),
        };

        let metadata = trigger_metadata(&definition);
        assert_eq!(metadata["task_type"], "pvr_download_monitor");
        assert_eq!(metadata["scheduled"], true);
        assert_eq!(metadata["max_runtime_seconds"], 120);
    }
}
