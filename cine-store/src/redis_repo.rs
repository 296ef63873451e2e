use std::time::Duration;

use async_trait::async_trait;
use cine_core::coordination::{InFlightGuard, LeaseToken, ReconciliationOutbox};
use cine_core::{CoreError, CoreResult};
use cine_shared::ReconciliationEntry;
use redis::{AsyncCommands, RedisResult};
use tracing::info;

const IN_FLIGHT_PREFIX: &str = "payment:inflight";
const OUTBOX_KEY: &str = "payment:reconciliation";

/// Deletes the key only while it still holds the caller's owner value.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    /// `SET key owner NX PX ttl`; true when this caller now holds the key.
    pub async fn acquire_lock(&self, key: &str, owner: &str, ttl_millis: u64) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis)
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    /// True when the key was still owned by `owner` and is now gone.
    pub async fn release_lock(&self, key: &str, owner: &str) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let removed: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(owner)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    pub async fn push_back(&self, list: &str, value: &str) -> RedisResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.rpush(list, value).await
    }

    pub async fn head(&self, list: &str, limit: usize) -> RedisResult<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.lrange(list, 0, limit as isize - 1).await
    }
}

fn unavailable(e: redis::RedisError) -> CoreError {
    CoreError::PersistenceError(format!("redis: {}", e))
}

fn lease_key(user_id: &str, movie_id: &str) -> String {
    format!("{}:{}:{}", IN_FLIGHT_PREFIX, user_id, movie_id)
}

/// Leases shared by every API instance.
pub struct RedisInFlightGuard {
    redis: RedisClient,
}

impl RedisInFlightGuard {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl InFlightGuard for RedisInFlightGuard {
    async fn try_acquire(
        &self,
        user_id: &str,
        movie_id: &str,
        ttl: Duration,
    ) -> CoreResult<Option<LeaseToken>> {
        // PX rejects 0.
        let ttl_millis = (ttl.as_millis() as u64).max(1);
        let token = LeaseToken::generate();
        let acquired = self
            .redis
            .acquire_lock(&lease_key(user_id, movie_id), token.as_str(), ttl_millis)
            .await
            .map_err(unavailable)?;
        Ok(acquired.then_some(token))
    }

    async fn release(&self, user_id: &str, movie_id: &str, token: &LeaseToken) -> CoreResult<()> {
        let released = self
            .redis
            .release_lock(&lease_key(user_id, movie_id), token.as_str())
            .await
            .map_err(unavailable)?;
        if !released {
            info!(
                "Lease for {}/{} had already lapsed or changed hands",
                user_id, movie_id
            );
        }
        Ok(())
    }
}

/// Outbox kept as a JSON list, oldest entry first.
pub struct RedisOutbox {
    redis: RedisClient,
}

impl RedisOutbox {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl ReconciliationOutbox for RedisOutbox {
    async fn enqueue(&self, entry: ReconciliationEntry) -> CoreResult<()> {
        let payload = serde_json::to_string(&entry)
            .map_err(|e| CoreError::PersistenceError(e.to_string()))?;
        self.redis
            .push_back(OUTBOX_KEY, &payload)
            .await
            .map_err(unavailable)?;
        info!("Reconciliation entry {} queued", entry.entry_id);
        Ok(())
    }

    async fn pending(&self, limit: usize) -> CoreResult<Vec<ReconciliationEntry>> {
        let raw = self.redis.head(OUTBOX_KEY, limit).await.map_err(unavailable)?;
        raw.iter()
            .map(|payload| {
                serde_json::from_str(payload)
                    .map_err(|e| CoreError::PersistenceError(format!("corrupt outbox entry: {}", e)))
            })
            .collect()
    }
}
