//! Retry operation and dead-letter records.
//!
//! These are the records the durable retry queue persists. Both serialize to
//! JSON so file-based and SQLite-based stores share one representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Payload field carrying the attempt index handed to retry handlers.
pub const ATTEMPT_FIELD: &str = "_attempt";

/// A failed external-service call awaiting another attempt.
///
/// Invariant: `attempt <= max_attempts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryOperation {
    pub id: Uuid,
    /// Registered operation name used to look up the handler.
    pub operation: String,
    pub payload: Map<String, Value>,
    pub last_error: String,
    /// 1-based number of the attempt that will run next.
    pub attempt: u32,
    pub max_attempts: u32,
    pub next_retry_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl RetryOperation {
    /// Attempt index recorded in the payload by the caller (defaults to 0).
    pub fn payload_attempt_index(payload: &Map<String, Value>) -> u32 {
        payload
            .get(ATTEMPT_FIELD)
            .and_then(Value::as_u64)
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .unwrap_or(0)
    }

    /// Whether another failure would exhaust the attempt budget.
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Whether the operation is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_at <= now
    }
}

/// An immutable record of a permanently failed retry operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    #[serde(flatten)]
    pub operation: RetryOperation,
    pub final_error: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(operation: RetryOperation, final_error: impl Into<String>) -> Self {
        Self {
            operation,
            final_error: final_error.into(),
            failed_at: Utc::now(),
        }
    }

    /// Record identifier: `{operation_id}_{YYYYmmdd_HHMMSS}`.
    pub fn record_id(&self) -> String {
        format!(
            "{}_{}",
            self.operation.id,
            self.failed_at.format("%Y%m%d_%H%M%S")
        )
    }
}

/// Observability snapshot of a retry queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryQueueStats {
    pub pending_count: usize,
    pub registered_operations: Vec<String>,
    pub is_processing: bool,
    pub storage_location: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_operation() -> RetryOperation {
        RetryOperation {
            id: Uuid::nil(),
            operation: "sheets.append_rows".to_string(),
            payload: Map::new(),
            last_error: "HTTP 503".to_string(),
            attempt: 1,
            max_attempts: 3,
            next_retry_at: Utc::now(),
            created_at: Utc::now(),
            last_attempt_at: None,
        }
    }

    #[test]
    fn test_payload_attempt_index_defaults_to_zero() {
        assert_eq!(RetryOperation::payload_attempt_index(&Map::new()), 0);

        let mut payload = Map::new();
        payload.insert(ATTEMPT_FIELD.to_string(), Value::from(2));
        assert_eq!(RetryOperation::payload_attempt_index(&payload), 2);
    }

    #[test]
    fn test_payload_attempt_index_saturates() {
        let mut payload = Map::new();
        payload.insert(ATTEMPT_FIELD.to_string(), Value::from(4_294_967_297_u64));
        assert_eq!(RetryOperation::payload_attempt_index(&payload), u32::MAX);
    }

    #[test]
    fn test_is_final_attempt() {
        let mut op = sample_operation();
        assert!(!op.is_final_attempt());
        op.attempt = 3;
        assert!(op.is_final_attempt());
    }

    #[test]
    fn test_dead_letter_record_id_has_timestamp_suffix() {
        let mut letter = DeadLetter::new(sample_operation(), "timeout");
        letter.failed_at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(
            letter.record_id(),
            "00000000-0000-0000-0000-000000000000_20260304_050607"
        );
    }

    #[test]
    fn test_dead_letter_flattens_operation() {
        let letter = DeadLetter::new(sample_operation(), "timeout");
        let json = serde_json::to_value(&letter).unwrap();
        assert_eq!(json["operation"], "sheets.append_rows");
        assert_eq!(json["final_error"], "timeout");

        let parsed: DeadLetter = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, letter);
    }
}
