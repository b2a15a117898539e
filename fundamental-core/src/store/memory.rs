//! In-memory task store.
//!
//! Implements the full task lifecycle including statistics, so the task
//! runtime and scheduler can run without Postgres. Used by the test
//! suite and by embedded single-process deployments.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use fundamental_model::{
    Task, TaskId, TaskStatistics, TaskStatus, TaskType,
};

use crate::error::{CoreError, Result};
use crate::store::ports::{TaskFilter, TaskStore};

use super::postgres::ERROR_MESSAGE_MAX_LEN;

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    tasks: HashMap<i64, Task>,
    statistics: HashMap<&'static str, TaskStatistics>,
}

/// Mutex-guarded map-backed [`TaskStore`].
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    state: Mutex<State>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    fn record_statistics(state: &mut State, task: &Task) {
        let entry = state
            .statistics
            .entry(task.task_type.as_str())
            .or_insert_with(|| TaskStatistics {
                task_type: task.task_type,
                avg_duration: None,
                min_duration: None,
                max_duration: None,
                total_count: 0,
                success_count: 0,
                failure_count: 0,
                last_run_at: None,
                updated_at: Utc::now(),
            });

        entry.total_count += 1;
        match task.status {
            TaskStatus::Completed => entry.success_count += 1,
            TaskStatus::Failed => entry.failure_count += 1,
            _ => {}
        }
        if let Some(duration) = task.duration() {
            let previous = entry.avg_duration.unwrap_or(0.0);
            entry.avg_duration =
                Some(previous + (duration - previous) / entry.total_count as f64);
            entry.min_duration = Some(entry.min_duration.map_or(duration, |m| m.min(duration)));
            entry.max_duration = Some(entry.max_duration.map_or(duration, |m| m.max(duration)));
        }
        entry.last_run_at = Some(Utc::now());
        entry.updated_at = Utc::now();
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create_task(
        &self,
        task_type: TaskType,
        user_id: i64,
        task_data: Option<Value>,
    ) -> Result<Task> {
        self.with_state(|state| {
            state.next_id += 1;
            let task = Task {
                id: TaskId(state.next_id),
                task_type,
                status: TaskStatus::Pending,
                progress: 0.0,
                user_id,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
                cancelled_at: None,
                error_message: None,
                task_data,
            };
            state.tasks.insert(task.id.as_i64(), task.clone());
            Ok(task)
        })
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        self.with_state(|state| Ok(state.tasks.get(&id.as_i64()).cloned()))
    }

    async fn list_tasks(
        &self,
        filter: &TaskFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Task>> {
        self.with_state(|state| {
            let mut tasks: Vec<Task> = state
                .tasks
                .values()
                .filter(|task| {
                    filter.user_id.is_none_or(|u| task.user_id == u)
                        && filter.status.is_none_or(|s| task.status == s)
                        && filter.task_type.is_none_or(|t| task.task_type == t)
                })
                .cloned()
                .collect();
            tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(tasks
                .into_iter()
                .skip(offset.max(0) as usize)
                .take(limit.max(0) as usize)
                .collect())
        })
    }

    async fn start_task(&self, id: TaskId) -> Result<()> {
        self.with_state(|state| {
            if let Some(task) = state.tasks.get_mut(&id.as_i64())
                && task.status == TaskStatus::Pending
            {
                task.status = TaskStatus::Running;
                task.started_at = Some(Utc::now());
            }
            Ok(())
        })
    }

    async fn update_progress(
        &self,
        id: TaskId,
        progress: f64,
        meta: Option<Value>,
    ) -> Result<()> {
        self.with_state(|state| {
            let task = state
                .tasks
                .get_mut(&id.as_i64())
                .ok_or_else(|| CoreError::NotFound(format!("task {id}")))?;
            task.progress = progress.clamp(0.0, 1.0);
            if let Some(Value::Object(meta)) = meta {
                let data = task
                    .task_data
                    .get_or_insert_with(|| Value::Object(Default::default()));
                if let Value::Object(existing) = data {
                    for (key, value) in meta {
                        existing.insert(key, value);
                    }
                }
            }
            Ok(())
        })
    }

    async fn complete_task(&self, id: TaskId) -> Result<()> {
        self.with_state(|state| {
            let Some(task) = state.tasks.get_mut(&id.as_i64()) else {
                return Ok(());
            };
            if task.is_terminal() {
                return Ok(());
            }
            task.status = TaskStatus::Completed;
            task.progress = 1.0;
            task.completed_at = Some(Utc::now());
            let task = task.clone();
            Self::record_statistics(state, &task);
            Ok(())
        })
    }

    async fn fail_task(&self, id: TaskId, message: &str) -> Result<()> {
        self.with_state(|state| {
            let Some(task) = state.tasks.get_mut(&id.as_i64()) else {
                return Ok(());
            };
            if task.is_terminal() {
                return Ok(());
            }
            task.status = TaskStatus::Failed;
            task.error_message =
                Some(message.chars().take(ERROR_MESSAGE_MAX_LEN).collect());
            let task = task.clone();
            Self::record_statistics(state, &task);
            Ok(())
        })
    }

    async fn cancel_task(&self, id: TaskId) -> Result<bool> {
        self.with_state(|state| {
            let Some(task) = state.tasks.get_mut(&id.as_i64()) else {
                return Ok(false);
            };
            if task.is_terminal() {
                return Ok(false);
            }
            task.status = TaskStatus::Cancelled;
            task.cancelled_at = Some(Utc::now());
            let task = task.clone();
            Self::record_statistics(state, &task);
            Ok(true)
        })
    }

    async fn get_statistics(
        &self,
        task_type: Option<TaskType>,
    ) -> Result<Vec<TaskStatistics>> {
        self.with_state(|state| {
            let mut stats: Vec<TaskStatistics> = state
                .statistics
                .values()
                .filter(|s| task_type.is_none_or(|t| s.task_type == t))
                .cloned()
                .collect();
            stats.sort_by_key(|s| s.task_type.as_str());
            Ok(stats)
        })
    }
}
