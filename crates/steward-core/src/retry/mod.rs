//! Durable retries for failed external-service calls.
//!
//! - [`RetryQueue`] persists each failed operation, re-invokes its handler on
//!   an exponential backoff schedule, and dead-letters it once exhausted.
//! - [`RetryStore`] is the persistence port; adapters live in steward-infra.
//! - [`retry_with_backoff`] covers short, in-process retries that do not need
//!   to survive a restart.

pub mod backoff;
pub mod inline;
pub mod queue;
pub mod store;

pub use backoff::RetryPolicy;
pub use inline::{InlineRetry, retry_call, retry_with_backoff};
pub use queue::{RetryQueue, RetryTicket};
pub use store::RetryStore;
