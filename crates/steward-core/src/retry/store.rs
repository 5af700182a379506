//! RetryStore trait definition.
//!
//! The retry queue writes through this port on every state change so that
//! active operations survive a restart. Implementations live in
//! steward-infra (`FileRetryStore`, `SqliteRetryStore`).

use steward_types::error::RepositoryError;
use steward_types::retry::{DeadLetter, RetryOperation};
use uuid::Uuid;

/// Durable storage for active retry operations and dead letters.
///
/// A store location is owned by a single process. Uses RPITIT (native async
/// fn in traits, Rust 2024 edition).
pub trait RetryStore: Send + Sync + 'static {
    /// Insert or replace an active operation. Must be durable on return.
    fn save(
        &self,
        operation: &RetryOperation,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Remove an active operation. Removing an unknown id is not an error.
    fn remove(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Load every active operation. Unreadable records are skipped.
    fn load_active(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<RetryOperation>, RepositoryError>> + Send;

    /// Append an immutable dead-letter record.
    fn write_dead_letter(
        &self,
        letter: &DeadLetter,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// All dead-letter records, oldest first.
    fn list_dead_letters(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<DeadLetter>, RepositoryError>> + Send;

    /// Human-readable location (directory or database URL) for stats output.
    fn location(&self) -> String;
}
