//! Worker contract and broker wiring.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info};

use crate::error::Result;
use crate::messaging::{BrokerMessage, MessageHandler, ScanBroker};

/// One scan stage driven by broker messages.
///
/// `process` returns the payload for the output topic, or `None` when
/// the message ends here (skips, drops, job-level fan-in).
#[async_trait]
pub trait ScanWorker: Send + Sync {
    fn name(&self) -> &'static str;

    fn input_topic(&self) -> &'static str;

    fn output_topic(&self) -> Option<&'static str> {
        None
    }

    async fn process(&self, payload: Value) -> Result<Option<Value>>;
}

struct WorkerSubscription {
    worker: Arc<dyn ScanWorker>,
    broker: Arc<dyn ScanBroker>,
}

#[async_trait]
impl MessageHandler for WorkerSubscription {
    async fn handle(&self, message: BrokerMessage) -> Result<()> {
        let result = self.worker.process(message.payload).await;
        match result {
            Ok(Some(output)) => {
                if let Some(topic) = self.worker.output_topic() {
                    self.broker.publish(topic, output).await?;
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => {
                error!("Error processing message in {}: {}", self.worker.name(), err);
                Err(err)
            }
        }
    }
}

/// Subscribe a worker to its input topic on the broker.
pub async fn attach_worker(
    broker: &Arc<dyn ScanBroker>,
    worker: Arc<dyn ScanWorker>,
) -> Result<()> {
    info!(
        "Worker {} subscribing to {}",
        worker.name(),
        worker.input_topic()
    );
    let topic = worker.input_topic();
    let subscription = Arc::new(WorkerSubscription {
        worker,
        broker: Arc::clone(broker),
    });
    broker.subscribe(topic, subscription).await
}
