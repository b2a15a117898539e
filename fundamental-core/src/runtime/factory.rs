//! Runtime backend selection.

use std::sync::Arc;

use fundamental_config::{RunnerBackend, RunnerConfig};

use crate::error::{CoreError, Result};
use crate::messaging::ScanBroker;
use crate::store::TaskStore;

use super::broker::BrokerTaskRunner;
use super::thread::ThreadTaskRunner;
use super::{TaskHandlerRegistry, TaskRuntime};

/// Build the configured task runtime.
///
/// The broker backend requires a broker; asking for it without one is a
/// user-visible configuration error rather than a crash at first
/// enqueue.
pub fn build_runtime(
    config: &RunnerConfig,
    store: Arc<dyn TaskStore>,
    registry: Arc<TaskHandlerRegistry>,
    broker: Option<Arc<dyn ScanBroker>>,
) -> Result<Arc<dyn TaskRuntime>> {
    match config.backend {
        RunnerBackend::Thread => Ok(Arc::new(ThreadTaskRunner::with_workers(
            store,
            registry,
            config.max_workers,
        ))),
        RunnerBackend::Broker => {
            let broker = broker.ok_or_else(|| {
                CoreError::Configuration(
                    "broker task runner selected but no message broker is configured"
                        .to_string(),
                )
            })?;
            Ok(Arc::new(BrokerTaskRunner::new(store, broker)))
        }
    }
}
