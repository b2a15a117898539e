//! In-memory broker with the same operational contract as the Redis one:
//! FIFO per topic plus atomic key-value counters.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{CoreError, Result};

use super::{
    BrokerKv, BrokerMessage, MessageBroker, MessageHandler, ensure_message_id,
};

const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct TopicQueue {
    items: StdMutex<VecDeque<String>>,
    notify: Notify,
}

impl TopicQueue {
    fn push(&self, item: String) {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(item);
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<String> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }

    async fn pop_wait(&self) -> String {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            self.notify.notified().await;
        }
    }
}

struct KvEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn live(&self) -> bool {
        self.expires_at.is_none_or(|at| Instant::now() < at)
    }
}

struct Subscription {
    topic: String,
    handler: Arc<dyn MessageHandler>,
}

/// Process-local broker. Used by the test suite and by single-node
/// deployments that run workers in the same process as the API.
pub struct MemoryBroker {
    topics: StdMutex<HashMap<String, Arc<TopicQueue>>>,
    kv: StdMutex<HashMap<String, KvEntry>>,
    running: AtomicBool,
    shutdown: CancellationToken,
    subscriptions: Mutex<Vec<Subscription>>,
    consumer_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topic_count = self.topics.lock().map(|map| map.len()).unwrap_or(0);
        f.debug_struct("MemoryBroker")
            .field("topic_count", &topic_count)
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            topics: StdMutex::new(HashMap::new()),
            kv: StdMutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            subscriptions: Mutex::new(Vec::new()),
            consumer_handles: Mutex::new(Vec::new()),
        }
    }

    fn topic(&self, name: &str) -> Arc<TopicQueue> {
        let mut topics = self
            .topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(topics.entry(name.to_string()).or_default())
    }

    /// Number of undelivered messages on a topic.
    pub fn queue_len(&self, topic: &str) -> usize {
        self.topic(topic)
            .items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    async fn spawn_consumer(&self, topic: &str, handler: Arc<dyn MessageHandler>) {
        let queue = self.topic(topic);
        let topic = topic.to_string();
        let token = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            loop {
                let data = tokio::select! {
                    _ = token.cancelled() => break,
                    data = queue.pop_wait() => data,
                };
                let payload: Value = match serde_json::from_str(&data) {
                    Ok(payload) => payload,
                    Err(err) => {
                        error!("Dropping undecodable message on {}: {}", topic, err);
                        continue;
                    }
                };
                let id = payload
                    .get("message_id")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                if let Err(err) = handler.handle(BrokerMessage { id, payload }).await {
                    error!("Error handling message in {}: {}", topic, err);
                }
            }
        });

        self.consumer_handles.lock().await.push(handle);
    }

    fn with_kv<T>(&self, f: impl FnOnce(&mut HashMap<String, KvEntry>) -> T) -> T {
        let mut kv = self
            .kv
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut kv)
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn publish(&self, topic: &str, mut payload: Value) -> Result<String> {
        let id = ensure_message_id(&mut payload);
        let data = serde_json::to_string(&payload)?;
        self.topic(topic).push(data);
        debug!("Published message to {}: {}", topic, id);
        Ok(id)
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            self.spawn_consumer(topic, handler).await;
        } else {
            self.subscriptions.lock().await.push(Subscription {
                topic: topic.to_string(),
                handler,
            });
        }
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let pending: Vec<Subscription> =
            std::mem::take(&mut *self.subscriptions.lock().await);
        for subscription in pending {
            self.spawn_consumer(&subscription.topic, subscription.handler)
                .await;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.consumer_handles.lock().await);
        for handle in handles {
            let _ = tokio::time::timeout(JOIN_TIMEOUT, handle).await;
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerKv for MemoryBroker {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.with_kv(|kv| {
            let state = kv.get(key).map(|entry| (entry.live(), entry.value.clone()));
            match state {
                Some((true, value)) => Some(value),
                Some((false, _)) => {
                    kv.remove(key);
                    None
                }
                None => None,
            }
        }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.with_kv(|kv| {
            kv.insert(
                key.to_string(),
                KvEntry {
                    value: value.to_string(),
                    expires_at: ttl.map(|ttl| Instant::now() + ttl),
                },
            );
        });
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        Ok(self.with_kv(|kv| {
            if kv.get(key).is_some_and(KvEntry::live) {
                return false;
            }
            kv.insert(
                key.to_string(),
                KvEntry {
                    value: value.to_string(),
                    expires_at: ttl.map(|ttl| Instant::now() + ttl),
                },
            );
            true
        }))
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.with_kv(|kv| {
            let entry = kv.entry(key.to_string()).or_insert_with(|| KvEntry {
                value: "0".to_string(),
                expires_at: None,
            });
            if !entry.live() {
                entry.value = "0".to_string();
                entry.expires_at = None;
            }
            let current: i64 = entry.value.parse().map_err(|_| {
                CoreError::InvalidInput(format!(
                    "counter {key} holds a non-integer value"
                ))
            })?;
            entry.value = (current + 1).to_string();
            Ok(current + 1)
        })
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        self.with_kv(|kv| {
            for key in keys {
                kv.remove(key);
            }
        });
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.with_kv(|kv| kv.get(key).is_some_and(KvEntry::live)))
    }
}
