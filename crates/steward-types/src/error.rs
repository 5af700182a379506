use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the workflow sequencer at enqueue time.
///
/// Both variants are programmer errors: the call is rejected and nothing is
/// retried.
#[derive(Debug, Error)]
pub enum SequencerError {
    #[error("no handler registered for task type '{0}'")]
    UnregisteredTask(String),

    #[error("unknown dependency task {0}")]
    UnknownDependency(Uuid),
}

/// Errors raised by the retry queue when accepting an operation.
#[derive(Debug, Error)]
pub enum RetryQueueError {
    #[error("no handler registered for operation '{0}'")]
    UnregisteredOperation(String),

    #[error("retry storage error: {0}")]
    Storage(String),
}

/// A handler's call to an external collaborator failed.
///
/// This is the expected failure mode of workflow and retry handlers; it is
/// what drives retry scheduling.
#[derive(Debug, Clone, Error)]
#[error("{service} failed: {message}")]
pub struct ExternalOperationError {
    /// Collaborator that failed (e.g. "scraper", "sheets").
    pub service: String,
    pub message: String,
}

impl ExternalOperationError {
    pub fn new(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            message: message.into(),
        }
    }
}

/// All attempts for a retry operation were consumed.
///
/// Terminal for that operation: the record has been moved to dead-letter
/// storage and will never be processed again automatically.
#[derive(Debug, Clone, Error)]
#[error("operation '{operation}' ({operation_id}) failed after {attempts} attempts: {final_error}")]
pub struct RetryExhaustedError {
    pub operation_id: Uuid,
    pub operation: String,
    pub attempts: u32,
    pub final_error: String,
}

/// Errors from storage adapters (retry stores, memory backends).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("io error: {0}")]
    Io(String),
}

/// Errors from loading configuration strictly.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },
}
