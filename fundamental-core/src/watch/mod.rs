//! Ingest directory watcher.
//!
//! Watches the ingest directory for new book files and triggers
//! `ingest_discovery` tasks through the runtime. Uses native
//! notifications where available and a polling watcher on network
//! mounts (or when `WATCHFILES_FORCE_POLLING` is set), with a slow poll
//! fallback loop either way. Bursts of filesystem events are debounced
//! into a single discovery task.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fundamental_model::TaskType;

use crate::error::{CoreError, Result};
use crate::runtime::TaskRuntime;

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Watcher settings resolved by the embedding process.
#[derive(Clone, Debug)]
pub struct WatcherConfig {
    pub ingest_dir: PathBuf,
    /// Quiet window after a burst of events before triggering discovery.
    pub debounce: Duration,
    /// Cadence of the poll fallback loop.
    pub poll_interval: Duration,
    /// Use the polling watcher instead of native notifications.
    pub force_polling: bool,
    /// User the discovery tasks are attributed to.
    pub user_id: i64,
}

impl WatcherConfig {
    pub fn new(ingest_dir: PathBuf, user_id: i64) -> Self {
        Self {
            ingest_dir,
            debounce: Duration::from_secs(5),
            poll_interval: Duration::from_secs(30),
            force_polling: false,
            user_id,
        }
    }
}

/// Keep the platform watcher alive for the lifetime of the session.
enum DirectoryWatcher {
    Native(RecommendedWatcher),
    Poll(PollWatcher),
}

struct WatchState {
    _watcher: DirectoryWatcher,
    stop: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Filesystem + poll directory change detector with debounce.
pub struct IngestWatcher {
    runtime: Arc<dyn TaskRuntime>,
    config: WatcherConfig,
    state: Mutex<Option<WatchState>>,
    /// Redundant restart requests bounce off this lock.
    restart_lock: Mutex<()>,
    last_trigger: std::sync::Mutex<Option<Instant>>,
}

impl fmt::Debug for IngestWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestWatcher")
            .field("ingest_dir", &self.config.ingest_dir)
            .field("force_polling", &self.config.force_polling)
            .finish()
    }
}

impl IngestWatcher {
    pub fn new(runtime: Arc<dyn TaskRuntime>, config: WatcherConfig) -> Self {
        Self {
            runtime,
            config,
            state: Mutex::new(None),
            restart_lock: Mutex::new(()),
            last_trigger: std::sync::Mutex::new(None),
        }
    }

    /// Start watching the ingest directory. Idempotent.
    pub async fn start_watching(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            warn!("Ingest watcher already running");
            return Ok(());
        }

        let dir = self.config.ingest_dir.clone();
        if !dir.is_dir() {
            return Err(CoreError::NotFound(format!(
                "ingest directory does not exist: {}",
                dir.display()
            )));
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();
        let watcher = self.spawn_watcher(event_tx, &dir)?;

        let stop = CancellationToken::new();
        let mut tasks = Vec::new();

        {
            let watcher_self = Arc::clone(self);
            let stop = stop.clone();
            tasks.push(tokio::spawn(async move {
                watcher_self.debounce_loop(event_rx, stop).await;
            }));
        }
        {
            let watcher_self = Arc::clone(self);
            let stop = stop.clone();
            let dir = dir.clone();
            tasks.push(tokio::spawn(async move {
                watcher_self.poll_loop(dir, stop).await;
            }));
        }

        *state = Some(WatchState {
            _watcher: watcher,
            stop,
            tasks,
        });
        drop(state);

        info!("Ingest watcher started for {}", dir.display());

        // Pick up files that arrived while nothing was watching.
        if directory_has_entries(&dir) {
            self.trigger_discovery(true).await;
        }

        Ok(())
    }

    /// Stop watching and join the loops.
    pub async fn stop_watching(&self) {
        let state = self.state.lock().await.take();
        let Some(state) = state else {
            return;
        };

        state.stop.cancel();
        for task in state.tasks {
            if tokio::time::timeout(JOIN_TIMEOUT, task).await.is_err() {
                warn!("Ingest watcher loop did not stop within {:?}", JOIN_TIMEOUT);
            }
        }
        info!("Ingest watcher stopped");
    }

    /// Restart the watcher (e.g. after the ingest directory moved).
    /// Redundant requests while a restart is already running are
    /// ignored; returns whether this call performed the restart.
    pub async fn restart_watching(self: &Arc<Self>) -> Result<bool> {
        let Ok(_guard) = self.restart_lock.try_lock() else {
            debug!("Ingest watcher restart already in progress, ignoring");
            return Ok(false);
        };

        info!("Restarting ingest watcher");
        self.stop_watching().await;
        self.start_watching().await?;
        Ok(true)
    }

    fn spawn_watcher(
        &self,
        event_tx: mpsc::UnboundedSender<Event>,
        dir: &PathBuf,
    ) -> Result<DirectoryWatcher> {
        let handler = move |result: std::result::Result<Event, notify::Error>| match result {
            Ok(event) => {
                if is_relevant(&event) {
                    let _ = event_tx.send(event);
                }
            }
            Err(err) => error!("Watch error: {}", err),
        };

        if self.config.force_polling {
            info!("Using polling watcher for {}", dir.display());
            let mut watcher = PollWatcher::new(
                handler,
                Config::default().with_poll_interval(self.config.poll_interval),
            )
            .map_err(|e| CoreError::Internal(format!("failed to create poll watcher: {e}")))?;
            watcher
                .watch(dir, RecursiveMode::Recursive)
                .map_err(|e| CoreError::Internal(format!("failed to watch path: {e}")))?;
            Ok(DirectoryWatcher::Poll(watcher))
        } else {
            let mut watcher = notify::recommended_watcher(handler)
                .map_err(|e| CoreError::Internal(format!("failed to create watcher: {e}")))?;
            watcher
                .watch(dir, RecursiveMode::Recursive)
                .map_err(|e| CoreError::Internal(format!("failed to watch path: {e}")))?;
            Ok(DirectoryWatcher::Native(watcher))
        }
    }

    /// Collapse bursts of events into one discovery trigger per quiet
    /// window.
    async fn debounce_loop(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<Event>,
        stop: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                event = events.recv() => {
                    if event.is_none() {
                        break;
                    }
                    // Burst started; wait until it quiets down.
                    loop {
                        tokio::select! {
                            _ = stop.cancelled() => return,
                            more = events.recv() => {
                                if more.is_none() {
                                    return;
                                }
                            }
                            _ = tokio::time::sleep(self.config.debounce) => break,
                        }
                    }
                    self.trigger_discovery(false).await;
                }
            }
        }
    }

    /// Fallback for mounts that drop native notifications: periodically
    /// check the directory and trigger when files are present.
    async fn poll_loop(self: Arc<Self>, dir: PathBuf, stop: CancellationToken) {
        info!(
            "Poll loop started for directory: {} (every {:?})",
            dir.display(),
            self.config.poll_interval
        );
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            if !dir.is_dir() {
                debug!("Ingest directory does not exist, skipping poll");
                continue;
            }
            if directory_has_entries(&dir) {
                self.trigger_discovery(false).await;
            }
        }
    }

    async fn trigger_discovery(&self, bypass_debounce: bool) {
        {
            let mut last = self
                .last_trigger
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !bypass_debounce
                && let Some(previous) = *last
                && previous.elapsed() < self.config.debounce
            {
                debug!("Discovery triggered recently, skipping");
                return;
            }
            *last = Some(Instant::now());
        }

        match self
            .runtime
            .enqueue(
                TaskType::IngestDiscovery,
                serde_json::json!({}),
                self.config.user_id,
                None,
            )
            .await
        {
            Ok(task_id) => info!("Ingest discovery task {} triggered", task_id),
            Err(err) => error!("Failed to trigger ingest discovery: {}", err),
        }
    }
}

fn is_relevant(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn directory_has_entries(dir: &PathBuf) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::Value;

    use fundamental_model::{TaskId, TaskStatus};

    use crate::runtime::TaskEnqueuer;

    use super::*;

    #[derive(Default)]
    struct RecordingRuntime {
        enqueued: std::sync::Mutex<Vec<TaskType>>,
    }

    #[async_trait]
    impl TaskEnqueuer for RecordingRuntime {
        async fn enqueue(
            &self,
            task_type: TaskType,
            _payload: Value,
            _user_id: i64,
            _metadata: Option<Value>,
        ) -> crate::Result<TaskId> {
            self.enqueued.lock().unwrap().push(task_type);
            Ok(TaskId(1))
        }
    }

    #[async_trait]
    impl TaskRuntime for RecordingRuntime {
        async fn cancel(&self, _id: TaskId) -> crate::Result<bool> {
            Ok(false)
        }
        async fn status(&self, _id: TaskId) -> crate::Result<TaskStatus> {
            Ok(TaskStatus::Pending)
        }
        async fn progress(&self, _id: TaskId) -> crate::Result<f64> {
            Ok(0.0)
        }
        async fn shutdown(&self) -> crate::Result<()> {
            Ok(())
        }
    }

    fn watcher_with(dir: PathBuf) -> (Arc<IngestWatcher>, Arc<RecordingRuntime>) {
        let runtime = Arc::new(RecordingRuntime::default());
        let mut config = WatcherConfig::new(dir, 1);
        config.debounce = Duration::from_millis(50);
        // Long enough that the poll fallback never fires mid-test.
        config.poll_interval = Duration::from_secs(30);
        config.force_polling = true;
        (
            Arc::new(IngestWatcher::new(
                Arc::clone(&runtime) as Arc<dyn TaskRuntime>,
                config,
            )),
            runtime,
        )
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let (watcher, _runtime) = watcher_with(PathBuf::from("/definitely/not/here"));
        assert!(watcher.start_watching().await.is_err());
    }

    #[tokio::test]
    async fn existing_files_trigger_an_initial_discovery() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("book.epub"), b"epub").unwrap();

        let (watcher, runtime) = watcher_with(dir.path().to_path_buf());
        watcher.start_watching().await.unwrap();

        assert_eq!(
            runtime.enqueued.lock().unwrap().as_slice(),
            &[TaskType::IngestDiscovery]
        );
        watcher.stop_watching().await;
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let (watcher, _runtime) = watcher_with(dir.path().to_path_buf());

        watcher.start_watching().await.unwrap();
        watcher.start_watching().await.unwrap();
        watcher.stop_watching().await;
        // A second stop on an already stopped watcher is a no-op.
        watcher.stop_watching().await;
    }

    #[tokio::test]
    async fn restart_goes_through_the_try_lock() {
        let dir = tempfile::tempdir().unwrap();
        let (watcher, _runtime) = watcher_with(dir.path().to_path_buf());

        watcher.start_watching().await.unwrap();
        assert!(watcher.restart_watching().await.unwrap());
        watcher.stop_watching().await;
    }
}
