//! SQLite retry queue store.
//!
//! Implements `RetryStore` from `steward-core`. Active operations live in
//! `retry_operations`, one row per operation; dead letters are appended to
//! `retry_dead_letters` in the same transaction that removes the active row.

use serde_json::{Map, Value};
use sqlx::Row;
use steward_core::retry::RetryStore;
use steward_types::error::RepositoryError;
use steward_types::retry::{DeadLetter, RetryOperation};
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime};

/// SQLite-backed implementation of `RetryStore`.
#[derive(Debug, Clone)]
pub struct SqliteRetryStore {
    pool: DatabasePool,
}

impl SqliteRetryStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct OperationRow {
    id: String,
    operation: String,
    payload: String,
    last_error: String,
    attempt: i64,
    max_attempts: i64,
    next_retry_at: String,
    created_at: String,
    last_attempt_at: Option<String>,
}

impl OperationRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Self::from_row_with_id(row, "id")
    }

    fn from_row_with_id(
        row: &sqlx::sqlite::SqliteRow,
        id_column: &str,
    ) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get(id_column)?,
            operation: row.try_get("operation")?,
            payload: row.try_get("payload")?,
            last_error: row.try_get("last_error")?,
            attempt: row.try_get("attempt")?,
            max_attempts: row.try_get("max_attempts")?,
            next_retry_at: row.try_get("next_retry_at")?,
            created_at: row.try_get("created_at")?,
            last_attempt_at: row.try_get("last_attempt_at")?,
        })
    }

    fn into_operation(self) -> Result<RetryOperation, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid operation id: {e}")))?;
        let payload: Map<String, Value> = serde_json::from_str(&self.payload)
            .map_err(|e| RepositoryError::Query(format!("invalid JSON payload: {e}")))?;
        let attempt = u32::try_from(self.attempt)
            .map_err(|e| RepositoryError::Query(format!("invalid attempt: {e}")))?;
        let max_attempts = u32::try_from(self.max_attempts)
            .map_err(|e| RepositoryError::Query(format!("invalid max_attempts: {e}")))?;
        let last_attempt_at = self
            .last_attempt_at
            .as_deref()
            .map(parse_datetime)
            .transpose()?;

        Ok(RetryOperation {
            id,
            operation: self.operation,
            payload,
            last_error: self.last_error,
            attempt,
            max_attempts,
            next_retry_at: parse_datetime(&self.next_retry_at)?,
            created_at: parse_datetime(&self.created_at)?,
            last_attempt_at,
        })
    }
}

fn dead_letter_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<DeadLetter, RepositoryError> {
    let op_row = OperationRow::from_row_with_id(row, "operation_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let final_error: String = row
        .try_get("final_error")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let failed_at: String = row
        .try_get("failed_at")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

    Ok(DeadLetter {
        operation: op_row.into_operation()?,
        final_error,
        failed_at: parse_datetime(&failed_at)?,
    })
}

fn payload_text(payload: &Map<String, Value>) -> Result<String, RepositoryError> {
    serde_json::to_string(payload)
        .map_err(|e| RepositoryError::Query(format!("failed to serialize payload: {e}")))
}

// ---------------------------------------------------------------------------
// RetryStore implementation
// ---------------------------------------------------------------------------

impl RetryStore for SqliteRetryStore {
    async fn save(&self, operation: &RetryOperation) -> Result<(), RepositoryError> {
        let payload = payload_text(&operation.payload)?;

        sqlx::query(
            "INSERT INTO retry_operations
                (id, operation, payload, last_error, attempt, max_attempts, next_retry_at, created_at, last_attempt_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                payload = excluded.payload,
                last_error = excluded.last_error,
                attempt = excluded.attempt,
                max_attempts = excluded.max_attempts,
                next_retry_at = excluded.next_retry_at,
                last_attempt_at = excluded.last_attempt_at",
        )
        .bind(operation.id.to_string())
        .bind(&operation.operation)
        .bind(&payload)
        .bind(&operation.last_error)
        .bind(i64::from(operation.attempt))
        .bind(i64::from(operation.max_attempts))
        .bind(format_datetime(&operation.next_retry_at))
        .bind(format_datetime(&operation.created_at))
        .bind(operation.last_attempt_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn remove(&self, id: &Uuid) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM retry_operations WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }

    async fn load_active(&self) -> Result<Vec<RetryOperation>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM retry_operations ORDER BY next_retry_at ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut operations = Vec::with_capacity(rows.len());
        for row in &rows {
            let parsed = OperationRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))
                .and_then(OperationRow::into_operation);
            match parsed {
                Ok(op) => operations.push(op),
                Err(e) => tracing::warn!(error = %e, "skipping unreadable retry operation row"),
            }
        }
        Ok(operations)
    }

    async fn write_dead_letter(&self, letter: &DeadLetter) -> Result<(), RepositoryError> {
        let op = &letter.operation;
        let payload = payload_text(&op.payload)?;

        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            "INSERT INTO retry_dead_letters
                (record_id, operation_id, operation, payload, last_error, attempt, max_attempts,
                 next_retry_at, created_at, last_attempt_at, final_error, failed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(letter.record_id())
        .bind(op.id.to_string())
        .bind(&op.operation)
        .bind(&payload)
        .bind(&op.last_error)
        .bind(i64::from(op.attempt))
        .bind(i64::from(op.max_attempts))
        .bind(format_datetime(&op.next_retry_at))
        .bind(format_datetime(&op.created_at))
        .bind(op.last_attempt_at.as_ref().map(format_datetime))
        .bind(&letter.final_error)
        .bind(format_datetime(&letter.failed_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                RepositoryError::Conflict(format!("dead letter {} already exists", letter.record_id()))
            }
            other => RepositoryError::Query(other.to_string()),
        })?;

        sqlx::query("DELETE FROM retry_operations WHERE id = ?")
            .bind(op.id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn list_dead_letters(&self) -> Result<Vec<DeadLetter>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM retry_dead_letters ORDER BY failed_at ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(dead_letter_from_row).collect()
    }

    fn location(&self) -> String {
        self.pool.url().to_string()
    }
}
