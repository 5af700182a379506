//! Redis short-term cache.
//!
//! Values are stored as JSON strings with `SET key value EX ttl`. Expiry is
//! enforced by Redis itself.

use std::time::Duration;

use ::redis::AsyncCommands;
use ::redis::aio::MultiplexedConnection;
use serde_json::Value;
use steward_core::memory::ShortTermBackend;
use steward_types::error::RepositoryError;

/// Redis-backed implementation of `ShortTermBackend`.
#[derive(Clone)]
pub struct RedisCache {
    conn: MultiplexedConnection,
}

impl RedisCache {
    /// Connect to Redis at `url`.
    pub async fn new(url: &str) -> Result<Self, RepositoryError> {
        let client = ::redis::Client::open(url)
            .map_err(|e| RepositoryError::Query(format!("failed to create Redis client: {e}")))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "failed to connect to Redis");
                RepositoryError::Connection
            })?;
        Ok(Self { conn })
    }

    /// Wrap a pre-built multiplexed connection.
    pub fn with_connection(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache").finish_non_exhaustive()
    }
}

fn map_redis_error(err: ::redis::RedisError, key: &str) -> RepositoryError {
    if err.is_io_error() {
        RepositoryError::Connection
    } else {
        RepositoryError::Query(format!("Redis error for key {key}: {err}"))
    }
}

impl ShortTermBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, RepositoryError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await.map_err(|e| map_redis_error(e, key))?;

        match raw {
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| RepositoryError::Query(format!("invalid JSON value for {key}: {e}"))),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), RepositoryError> {
        let text = serde_json::to_string(value)
            .map_err(|e| RepositoryError::Query(format!("failed to serialize value: {e}")))?;
        let mut conn = self.conn.clone();
        // Redis rejects EX 0.
        let seconds = ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(key, text, seconds)
            .await
            .map_err(|e| map_redis_error(e, key))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.map_err(|e| map_redis_error(e, key))?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        let mut conn = self.conn.clone();
        let _: String = ::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|_| RepositoryError::Connection)?;
        Ok(())
    }
}
