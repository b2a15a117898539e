//! Durable FIFO messaging between scan stages.
//!
//! The broker contract is deliberately small: FIFO per topic, long-poll
//! consumers with cooperative shutdown, and an auxiliary key-value side
//! used for atomic progress counters. The Redis implementation backs
//! production; the in-memory implementation backs tests and single-node
//! deployments without changing any worker code.
//!
//! Delivery is at-least-once. Handler errors are caught and logged and the
//! message is considered delivered; the scan pipeline recovers through its
//! per-job progress counters rather than redelivery.

mod memory;
mod redis_broker;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

pub use memory::MemoryBroker;
pub use redis_broker::RedisBroker;

/// Queue key prefix shared by all broker implementations.
pub const QUEUE_PREFIX: &str = "fundamental:queue:";

/// A message delivered to a consumer.
#[derive(Clone, Debug)]
pub struct BrokerMessage {
    pub id: String,
    pub payload: Value,
}

/// Consumer callback registered through [`MessageBroker::subscribe`].
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: BrokerMessage) -> Result<()>;
}

/// Durable FIFO topics with long-poll consumers.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Append a message to a topic. A `message_id` is assigned when the
    /// payload does not carry one. Returns the message id.
    async fn publish(&self, topic: &str, payload: Value) -> Result<String>;

    /// Register a consumer for a topic. Consumers start polling once
    /// [`MessageBroker::start`] runs; registrations made after `start`
    /// begin consuming immediately.
    async fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> Result<()>;

    /// Spawn one long-poll consumer per registration.
    async fn start(&self) -> Result<()>;

    /// Cooperative shutdown: signal consumers, let in-flight handlers
    /// finish, join with a bounded wait.
    async fn stop(&self) -> Result<()>;
}

/// Atomic key-value operations used for per-job progress accounting.
#[async_trait]
pub trait BrokerKv: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    /// Set if absent; returns whether the key was set.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;
    async fn incr(&self, key: &str) -> Result<i64>;
    async fn delete(&self, keys: &[String]) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
}

/// Full broker surface needed by scan workers: topics plus counters.
pub trait ScanBroker: MessageBroker + BrokerKv {}

impl<T: MessageBroker + BrokerKv> ScanBroker for T {}

/// Ensure a JSON payload carries a `message_id`, assigning one if needed.
pub(crate) fn ensure_message_id(payload: &mut Value) -> String {
    if let Some(object) = payload.as_object_mut() {
        if let Some(existing) = object.get("message_id").and_then(Value::as_str) {
            return existing.to_string();
        }
        let id = uuid::Uuid::new_v4().to_string();
        object.insert("message_id".to_string(), Value::String(id.clone()));
        return id;
    }
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigns_message_id_when_missing() {
        let mut payload = serde_json::json!({"library_id": 7});
        let id = ensure_message_id(&mut payload);
        assert_eq!(payload["message_id"], Value::String(id));
    }

    #[test]
    fn keeps_existing_message_id() {
        let mut payload = serde_json::json!({"message_id": "abc"});
        assert_eq!(ensure_message_id(&mut payload), "abc");
        assert_eq!(payload["message_id"], "abc");
    }
}
