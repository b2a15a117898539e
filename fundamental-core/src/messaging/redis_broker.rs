//! Redis-backed message broker using lists for queues.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{CoreError, Result};

use super::{
    BrokerKv, BrokerMessage, MessageBroker, MessageHandler, QUEUE_PREFIX,
    ensure_message_id,
};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
const LONG_POLL_SECONDS: usize = 1;
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

struct Subscription {
    topic: String,
    handler: Arc<dyn MessageHandler>,
}

/// Message broker over Redis lists (LPUSH producer, BRPOP consumers) with
/// the key-value side shared for progress counters.
pub struct RedisBroker {
    client: redis::Client,
    kv: Mutex<ConnectionManager>,
    prefix: String,
    workers_per_topic: usize,
    running: AtomicBool,
    shutdown: CancellationToken,
    subscriptions: Mutex<Vec<Subscription>>,
    consumer_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBroker")
            .field("prefix", &self.prefix)
            .field("workers_per_topic", &self.workers_per_topic)
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish()
    }
}

impl RedisBroker {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        Self::connect_with(redis_url, 1).await
    }

    /// Connect with a configurable consumer count per topic registration.
    pub async fn connect_with(redis_url: &str, workers_per_topic: usize) -> Result<Self> {
        info!("Connecting to Redis broker at {}", redis_url);

        let client = redis::Client::open(redis_url).map_err(CoreError::Redis)?;
        let kv = ConnectionManager::new(client.clone())
            .await
            .map_err(CoreError::Redis)?;

        Ok(Self {
            client,
            kv: Mutex::new(kv),
            prefix: QUEUE_PREFIX.to_string(),
            workers_per_topic: workers_per_topic.max(1),
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            subscriptions: Mutex::new(Vec::new()),
            consumer_handles: Mutex::new(Vec::new()),
        })
    }

    fn queue_name(&self, topic: &str) -> String {
        format!("{}{}", self.prefix, topic)
    }

    async fn spawn_consumers(&self, topic: &str, handler: Arc<dyn MessageHandler>) {
        let mut handles = self.consumer_handles.lock().await;
        for _ in 0..self.workers_per_topic {
            let queue = self.queue_name(topic);
            let topic = topic.to_string();
            // Blocking pops must not share the multiplexed connection used
            // for publishes, so every consumer owns its own manager.
            let client = self.client.clone();
            let handler = Arc::clone(&handler);
            let token = self.shutdown.clone();

            handles.push(tokio::spawn(async move {
                consumer_loop(client, queue, topic, handler, token).await;
            }));
        }
    }
}

async fn consumer_loop(
    client: redis::Client,
    queue: String,
    topic: String,
    handler: Arc<dyn MessageHandler>,
    token: CancellationToken,
) {
    info!("Started worker for queue: {}", queue);

    let mut conn: Option<ConnectionManager> = None;

    while !token.is_cancelled() {
        if conn.is_none() {
            match ConnectionManager::new(client.clone()).await {
                Ok(manager) => conn = Some(manager),
                Err(err) => {
                    error!("Redis connection error on {}: {}, retrying", topic, err);
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
                    }
                    continue;
                }
            }
        }
        let Some(manager) = conn.as_mut() else {
            continue;
        };

        let popped: redis::RedisResult<Option<(String, String)>> = redis::cmd("BRPOP")
            .arg(&queue)
            .arg(LONG_POLL_SECONDS)
            .query_async(manager)
            .await;

        match popped {
            Ok(Some((_, data))) => {
                let payload: Value = match serde_json::from_str(&data) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!("Dropping undecodable message on {}: {}", topic, err);
                        continue;
                    }
                };
                let id = payload
                    .get("message_id")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                if let Err(err) = handler.handle(BrokerMessage { id, payload }).await {
                    // At-least-once with no redelivery: the pipeline
                    // recovers through its progress counters.
                    error!("Error handling message in {}: {}", topic, err);
                }
            }
            Ok(None) => {
                // Poll timeout; loop to observe the shutdown token.
            }
            Err(err) => {
                error!("Redis connection error on {}: {}, retrying", topic, err);
                conn = None;
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
                }
            }
        }
    }

    debug!("Worker for queue {} stopped", queue);
}

#[async_trait]
impl MessageBroker for RedisBroker {
    async fn publish(&self, topic: &str, mut payload: Value) -> Result<String> {
        let id = ensure_message_id(&mut payload);
        let data = serde_json::to_string(&payload)?;
        let queue = self.queue_name(topic);

        let mut kv = self.kv.lock().await;
        kv.lpush::<_, _, ()>(&queue, data).await?;
        debug!("Published message to {}: {}", topic, id);
        Ok(id)
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            self.spawn_consumers(topic, handler).await;
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
            self.spawn_consumers(&subscription.topic, subscription.handler)
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
            if tokio::time::timeout(JOIN_TIMEOUT, handle).await.is_err() {
                warn!("Broker consumer did not stop within {:?}", JOIN_TIMEOUT);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerKv for RedisBroker {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut kv = self.kv.lock().await;
        Ok(kv.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut kv = self.kv.lock().await;
        match ttl {
            Some(ttl) => kv.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?,
            None => kv.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let mut kv = self.kv.lock().await;
        let was_set: bool = kv.set_nx(key, value).await?;
        if was_set && let Some(ttl) = ttl {
            kv.expire::<_, ()>(key, ttl.as_secs() as i64).await?;
        }
        Ok(was_set)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut kv = self.kv.lock().await;
        Ok(kv.incr(key, 1i64).await?)
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut kv = self.kv.lock().await;
        kv.del::<_, ()>(keys).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut kv = self.kv.lock().await;
        Ok(kv.exists(key).await?)
    }
}
