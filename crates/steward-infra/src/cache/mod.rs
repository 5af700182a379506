//! Short-term memory caches.
//!
//! [`ShortTermCache`] picks the backend from configuration: Redis when a URL
//! is set and the `redis` feature is enabled, otherwise the in-process cache.

pub mod in_process;
#[cfg(feature = "redis")]
pub mod redis;

use std::time::Duration;

use serde_json::Value;
use steward_core::memory::ShortTermBackend;
use steward_types::config::MemoryConfig;
use steward_types::error::RepositoryError;

pub use in_process::InProcessCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisCache;

/// Configured short-term backend.
#[derive(Debug, Clone)]
pub enum ShortTermCache {
    InProcess(InProcessCache),
    #[cfg(feature = "redis")]
    Redis(RedisCache),
}

impl ShortTermCache {
    /// Build the short-term tier from configuration.
    ///
    /// Returns `None` when Redis is configured but unreachable; the memory
    /// manager then skips short-term operations.
    pub async fn from_config(config: &MemoryConfig) -> Option<Self> {
        let Some(url) = config.redis_url.as_deref() else {
            return Some(Self::InProcess(InProcessCache::new()));
        };
        Self::connect(url).await
    }

    #[cfg(feature = "redis")]
    async fn connect(url: &str) -> Option<Self> {
        match RedisCache::new(url).await {
            Ok(cache) => {
                tracing::info!("short-term memory backed by Redis");
                Some(Self::Redis(cache))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable, short-term memory disabled");
                None
            }
        }
    }

    #[cfg(not(feature = "redis"))]
    async fn connect(_url: &str) -> Option<Self> {
        tracing::warn!("redis_url is set but Redis support is not compiled in, using in-process cache");
        Some(Self::InProcess(InProcessCache::new()))
    }

    /// Backend name for status output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InProcess(_) => "in-process",
            #[cfg(feature = "redis")]
            Self::Redis(_) => "redis",
        }
    }
}

impl ShortTermBackend for ShortTermCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, RepositoryError> {
        match self {
            Self::InProcess(cache) => cache.get(key).await,
            #[cfg(feature = "redis")]
            Self::Redis(cache) => cache.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), RepositoryError> {
        match self {
            Self::InProcess(cache) => cache.set(key, value, ttl).await,
            #[cfg(feature = "redis")]
            Self::Redis(cache) => cache.set(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        match self {
            Self::InProcess(cache) => cache.delete(key).await,
            #[cfg(feature = "redis")]
            Self::Redis(cache) => cache.delete(key).await,
        }
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        match self {
            Self::InProcess(cache) => cache.ping().await,
            #[cfg(feature = "redis")]
            Self::Redis(cache) => cache.ping().await,
        }
    }
}
