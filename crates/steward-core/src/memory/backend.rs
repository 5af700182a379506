//! Storage ports for the short-term and long-term memory tiers.
//!
//! Implementations live in steward-infra (`InProcessCache`, `RedisCache`,
//! `SqliteLongTermStore`). Uses RPITIT (native async fn in traits, Rust 2024
//! edition).

use std::time::Duration;

use serde_json::Value;
use steward_types::error::RepositoryError;
use steward_types::memory::LongTermEntry;

/// TTL key/value cache. Last write wins.
pub trait ShortTermBackend: Send + Sync {
    /// Get a live value. Expired keys read as `None`.
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<Value>, RepositoryError>> + Send;

    /// Set a value that expires after `ttl`.
    fn set(
        &self,
        key: &str,
        value: &Value,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn delete(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Cheap availability probe.
    fn ping(&self) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}

/// Persistent insight store, scoped by namespace.
pub trait LongTermBackend: Send + Sync {
    /// Whether any record in `namespace` has this fingerprint.
    fn fingerprint_exists(
        &self,
        namespace: &str,
        fingerprint: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Number of records in `namespace`.
    fn count(
        &self,
        namespace: &str,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Delete the `count` oldest records in `namespace`. Returns how many were
    /// deleted.
    fn evict_oldest(
        &self,
        namespace: &str,
        count: u64,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Insert, or update the record with the same
    /// `(namespace, memory_type, storage_key)`.
    fn upsert(
        &self,
        entry: &LongTermEntry,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Newest record whose logical key matches.
    fn latest_by_key(
        &self,
        namespace: &str,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<LongTermEntry>, RepositoryError>> + Send;

    /// Records of one memory type, newest first.
    fn search(
        &self,
        namespace: &str,
        memory_type: &str,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<LongTermEntry>, RepositoryError>> + Send;

    fn ping(&self) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
