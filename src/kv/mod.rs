//! Key-value gateway (spec.md §4.3): one command client, one publisher, one
//! subscriber, all namespaced `{prefix}:{purpose}:{key}`. Grounded in the
//! teacher's `redis::Client` usage in `shared::state::AppState.cache`,
//! generalized from a bare client handle into the full cache/session/
//! rate-limit/pubsub/queue surface the spec calls for.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use crate::config::RedisConfig;
use crate::error::{AppError, AppResult};

#[derive(Clone, Copy, Debug)]
enum Purpose {
    Cache,
    Session,
    RateLimit,
    Channel,
    Queue,
}

impl Purpose {
    fn segment(self) -> &'static str {
        match self {
            Purpose::Cache => "cache",
            Purpose::Session => "session",
            Purpose::RateLimit => "ratelimit",
            Purpose::Channel => "channel",
            Purpose::Queue => "queue",
        }
    }
}

#[derive(Clone)]
pub struct KvGateway {
    conn: ConnectionManager,
    prefix: String,
    default_ttl: Duration,
}

impl KvGateway {
    pub async fn connect(config: &RedisConfig) -> AppResult<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| AppError::StorageFailure(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::StorageFailure(e.to_string()))?;
        Ok(Self {
            conn,
            prefix: config.prefix.clone(),
            default_ttl: Duration::from_secs(config.ttl_secs),
        })
    }

    fn key(&self, purpose: Purpose, key: &str) -> String {
        namespaced_key(&self.prefix, purpose, key)
    }

    // -- cache -----------------------------------------------------------

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.key(Purpose::Cache, key)).await?;
        Ok(match raw {
            Some(s) => Some(serde_json::from_str(&s)?),
            None => None,
        })
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(value)?;
        let ttl = ttl.unwrap_or(self.default_ttl);
        let _: () = conn
            .set_ex(self.key(Purpose::Cache, key), payload, ttl.as_secs())
            .await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.key(Purpose::Cache, key)).await?;
        Ok(())
    }

    pub async fn delete_pattern(&self, pattern: &str) -> AppResult<u64> {
        let mut conn = self.conn.clone();
        let full = self.key(Purpose::Cache, pattern);
        let keys: Vec<String> = conn.keys(full).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let deleted: u64 = conn.del(keys.clone()).await?;
        Ok(deleted.max(keys.len() as u64))
    }

    pub async fn get_or_set<T, F, Fut>(&self, key: &str, ttl: Option<Duration>, compute: F) -> AppResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = AppResult<T>>,
    {
        if let Some(cached) = self.get::<T>(key).await? {
            return Ok(cached);
        }
        let value = compute().await?;
        self.set(key, &value, ttl).await?;
        Ok(value)
    }

    // -- remote auth / session state --------------------------------------

    pub async fn set_session_state(&self, session_id: Uuid, blob: &[u8]) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(self.key(Purpose::Session, &session_id.to_string()), blob)
            .await?;
        Ok(())
    }

    pub async fn get_session_state(&self, session_id: Uuid) -> AppResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let blob: Option<Vec<u8>> = conn.get(self.key(Purpose::Session, &session_id.to_string())).await?;
        Ok(blob)
    }

    // -- rate limiting (sliding window, spec.md §4.3/§8) ------------------

    /// Fixed-window counter keyed `(team_id, action, kind)`. Returns the
    /// count after incrementing; callers compare against their own limit.
    pub async fn rate_limit_increment(&self, team_id: Uuid, action: &str, kind: &str, window: Duration) -> AppResult<u64> {
        let mut conn = self.conn.clone();
        let full = self.key(Purpose::RateLimit, &format!("{team_id}:{action}:{kind}"));
        let count: u64 = conn.incr(&full, 1).await?;
        if count == 1 {
            let _: () = conn.expire(&full, window.as_secs() as i64).await?;
        }
        Ok(count)
    }

    // -- pub/sub -----------------------------------------------------------

    pub async fn publish<T: Serialize>(&self, channel: &str, envelope: &T) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(envelope)?;
        let _: () = conn.publish(self.key(Purpose::Channel, channel), payload).await?;
        Ok(())
    }

    // -- FIFO queue (event batching, spec.md §4.6) ------------------------

    pub async fn queue_push<T: Serialize>(&self, queue: &str, item: &T) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(item)?;
        let _: () = conn.rpush(self.key(Purpose::Queue, queue), payload).await?;
        Ok(())
    }

    pub async fn queue_pop_batch<T: DeserializeOwned>(&self, queue: &str, max: usize) -> AppResult<Vec<T>> {
        let mut conn = self.conn.clone();
        let full = self.key(Purpose::Queue, queue);
        let mut items = Vec::with_capacity(max);
        for _ in 0..max {
            let raw: Option<String> = conn.lpop(&full, None).await?;
            match raw {
                Some(s) => items.push(serde_json::from_str(&s)?),
                None => break,
            }
        }
        Ok(items)
    }
}

fn namespaced_key(prefix: &str, purpose: Purpose, key: &str) -> String {
    format!("{}:{}:{}", prefix, purpose.segment(), key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_namespacing_matches_prefix_purpose_key() {
        assert_eq!(namespaced_key("wa", Purpose::Cache, "foo"), "wa:cache:foo");
        assert_eq!(
            namespaced_key("wa", Purpose::RateLimit, "t1:send:msg"),
            "wa:ratelimit:t1:send:msg"
        );
    }
}
