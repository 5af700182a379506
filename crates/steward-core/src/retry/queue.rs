//! RetryQueue -- durable, single-consumer retry processor.
//!
//! Operations are written to the [`RetryStore`] before `submit` returns and
//! on every later state change. A background loop re-invokes each operation's
//! handler once it is due. On failure the operation is rescheduled with
//! exponential backoff until `max_attempts` is reached, then moved to
//! dead-letter storage. An exhausted operation stays active until its dead
//! letter is written, so a failed write is retried on the next tick instead of
//! losing the record. The loop sleeps until the earliest due time (capped by
//! the poll interval), wakes early on `submit`, and exits once nothing is
//! active.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};
use steward_types::config::RetryConfig;
use steward_types::error::{RetryExhaustedError, RetryQueueError};
use steward_types::retry::{ATTEMPT_FIELD, DeadLetter, RetryOperation, RetryQueueStats};
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::backoff::RetryPolicy;
use super::store::RetryStore;
use crate::handler::Handler;

type Outcome = Result<Value, RetryExhaustedError>;

// ---------------------------------------------------------------------------
// RetryTicket
// ---------------------------------------------------------------------------

/// Resolves when a tracked operation finally succeeds or is dead-lettered.
///
/// Tickets do not survive a restart: an operation reloaded from storage is
/// still retried, but nobody is waiting on it.
#[derive(Debug)]
pub struct RetryTicket {
    operation_id: Uuid,
    receiver: oneshot::Receiver<Outcome>,
}

impl RetryTicket {
    pub fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    /// Wait for the final outcome.
    ///
    /// Returns `None` if the queue was dropped before the operation finished.
    pub async fn wait(self) -> Option<Outcome> {
        self.receiver.await.ok()
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

struct LoopControl {
    processing: bool,
    stopped: bool,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

struct QueueInner<S: RetryStore> {
    store: S,
    policy: RetryPolicy,
    default_max_attempts: u32,
    poll_interval: Duration,
    handlers: DashMap<String, Handler>,
    active: DashMap<Uuid, RetryOperation>,
    watchers: DashMap<Uuid, oneshot::Sender<Outcome>>,
    /// Exhausted operations whose dead letter could not be written yet.
    unwritten: DashMap<Uuid, DeadLetter>,
    wake: Notify,
    control: Mutex<LoopControl>,
}

impl<S: RetryStore> QueueInner<S> {
    fn control(&self) -> MutexGuard<'_, LoopControl> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_processing(self: &Arc<Self>) {
        let mut control = self.control();
        if control.stopped || control.processing {
            return;
        }
        control.processing = true;
        control.handle = Some(tokio::spawn(process_loop(
            Arc::clone(self),
            control.cancel.clone(),
        )));
    }

    /// Mark the loop idle if nothing is active. Checked under the control
    /// lock so a concurrent `submit` either sees `processing` or respawns.
    fn finish_if_idle(&self) -> bool {
        let mut control = self.control();
        if self.active.is_empty() {
            control.processing = false;
            true
        } else {
            false
        }
    }

    fn ready_operations(&self, now: DateTime<Utc>) -> Vec<RetryOperation> {
        self.active
            .iter()
            .filter(|entry| entry.is_due(now) && !self.unwritten.contains_key(entry.key()))
            .filter(|entry| {
                let registered = self.handlers.contains_key(&entry.operation);
                if !registered {
                    tracing::debug!(
                        operation_id = %entry.id,
                        operation = %entry.operation,
                        "skipping retry operation with no registered handler"
                    );
                }
                registered
            })
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Time until the earliest runnable operation is due, capped by the poll
    /// interval.
    fn next_wake(&self, now: DateTime<Utc>) -> Duration {
        self.active
            .iter()
            .filter(|entry| {
                self.handlers.contains_key(&entry.operation) && !self.unwritten.contains_key(entry.key())
            })
            .map(|entry| (entry.next_retry_at - now).to_std().unwrap_or(Duration::ZERO))
            .min()
            .map_or(self.poll_interval, |wait| wait.min(self.poll_interval))
    }

    fn resolve(&self, id: &Uuid, outcome: Outcome) {
        if let Some((_, sender)) = self.watchers.remove(id) {
            let _ = sender.send(outcome);
        }
    }

    async fn execute(&self, mut op: RetryOperation) {
        let Some(handler) = self
            .handlers
            .get(&op.operation)
            .map(|entry| Arc::clone(entry.value()))
        else {
            return;
        };

        op.payload
            .insert(ATTEMPT_FIELD.to_string(), Value::from(op.attempt));
        op.last_attempt_at = Some(Utc::now());

        tracing::info!(
            operation_id = %op.id,
            operation = %op.operation,
            attempt = op.attempt,
            max_attempts = op.max_attempts,
            "attempting retry"
        );

        let outcome = match tokio::spawn(handler(op.payload.clone())).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(join_err) => Err(format!("handler panicked: {join_err}")),
        };

        match outcome {
            Ok(value) => {
                self.active.remove(&op.id);
                if let Err(e) = self.store.remove(&op.id).await {
                    tracing::error!(operation_id = %op.id, error = %e, "failed to remove completed retry operation");
                }
                tracing::info!(operation_id = %op.id, operation = %op.operation, "retry succeeded");
                self.resolve(&op.id, Ok(value));
            }
            Err(error) if !op.is_final_attempt() => {
                op.next_retry_at = self.policy.next_retry_at(Utc::now(), op.attempt);
                op.attempt += 1;
                op.last_error = error;

                tracing::warn!(
                    operation_id = %op.id,
                    operation = %op.operation,
                    next_attempt = op.attempt,
                    next_retry_at = %op.next_retry_at,
                    error = %op.last_error,
                    "retry failed, rescheduled"
                );

                if let Err(e) = self.store.save(&op).await {
                    tracing::error!(operation_id = %op.id, error = %e, "failed to persist rescheduled retry operation");
                }
                self.active.insert(op.id, op);
            }
            Err(error) => {
                op.last_error = error.clone();
                let letter = DeadLetter::new(op, error);
                self.dead_letter(letter).await;
            }
        }
    }

    /// Move an exhausted operation to dead-letter storage.
    ///
    /// If the write fails the operation stays active, persisted with its final
    /// error, and the write is retried by [`flush_dead_letters`](Self::flush_dead_letters).
    async fn dead_letter(&self, letter: DeadLetter) {
        let op = &letter.operation;

        if let Err(e) = self.store.write_dead_letter(&letter).await {
            tracing::error!(
                operation_id = %op.id,
                operation = %op.operation,
                error = %e,
                "failed to write dead letter, keeping operation active"
            );
            if let Err(e) = self.store.save(op).await {
                tracing::error!(operation_id = %op.id, error = %e, "failed to persist exhausted retry operation");
            }
            self.active.insert(op.id, op.clone());
            self.unwritten.insert(op.id, letter);
            return;
        }

        self.unwritten.remove(&op.id);
        self.active.remove(&op.id);
        if let Err(e) = self.store.remove(&op.id).await {
            tracing::error!(operation_id = %op.id, error = %e, "failed to remove exhausted retry operation");
        }

        tracing::error!(
            operation_id = %op.id,
            operation = %op.operation,
            attempts = op.attempt,
            error = %letter.final_error,
            dead_letter = %letter.record_id(),
            "retry attempts exhausted, operation dead-lettered"
        );

        self.resolve(
            &op.id,
            Err(RetryExhaustedError {
                operation_id: op.id,
                operation: op.operation.clone(),
                attempts: op.attempt,
                final_error: letter.final_error.clone(),
            }),
        );
    }

    /// Retry dead-letter writes that failed on an earlier tick.
    async fn flush_dead_letters(&self) {
        let pending: Vec<DeadLetter> = self
            .unwritten
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for letter in pending {
            self.dead_letter(letter).await;
        }
    }
}

async fn process_loop<S: RetryStore>(inner: Arc<QueueInner<S>>, cancel: CancellationToken) {
    tracing::info!("retry queue processor started");

    loop {
        if cancel.is_cancelled() {
            inner.control().processing = false;
            break;
        }
        if inner.finish_if_idle() {
            break;
        }

        inner.flush_dead_letters().await;
        for op in inner.ready_operations(Utc::now()) {
            inner.execute(op).await;
        }

        let wait = inner.next_wake(Utc::now());
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = inner.wake.notified() => {}
            _ = tokio::time::sleep(wait) => {}
        }
    }

    tracing::info!("retry queue processor stopped");
}

// ---------------------------------------------------------------------------
// RetryQueue
// ---------------------------------------------------------------------------

/// Durable retry queue over a [`RetryStore`].
///
/// Cloning yields another handle to the same queue. Call
/// [`start`](Self::start) once at startup to pick up operations persisted by
/// a previous run.
pub struct RetryQueue<S: RetryStore> {
    inner: Arc<QueueInner<S>>,
}

impl<S: RetryStore> Clone for RetryQueue<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: RetryStore> RetryQueue<S> {
    pub fn new(store: S, config: &RetryConfig) -> Self {
        Self::with_policy(
            store,
            RetryPolicy::from_config(config),
            config.default_max_attempts,
            config.poll_interval(),
        )
    }

    pub fn with_policy(
        store: S,
        policy: RetryPolicy,
        default_max_attempts: u32,
        poll_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                store,
                policy,
                default_max_attempts: default_max_attempts.max(1),
                poll_interval,
                handlers: DashMap::new(),
                active: DashMap::new(),
                watchers: DashMap::new(),
                unwritten: DashMap::new(),
                wake: Notify::new(),
                control: Mutex::new(LoopControl {
                    processing: false,
                    stopped: false,
                    cancel: CancellationToken::new(),
                    handle: None,
                }),
            }),
        }
    }

    /// Register the handler for an operation name. Re-registering replaces it.
    ///
    /// See [`Handler`] for the at-least-once contract.
    pub fn register(&self, operation: impl Into<String>, handler: Handler) {
        let operation = operation.into();
        tracing::debug!(operation = %operation, "registered retry handler");
        self.inner.handlers.insert(operation, handler);
        self.inner.wake.notify_one();
    }

    /// Queue a failed call for retry.
    ///
    /// The attempt index is read from the payload's `_attempt` field
    /// (default 0). When `next_retry_at` is `None` the first retry is
    /// scheduled `backoff(index)` from now. The record is durable when this
    /// returns.
    pub async fn submit(
        &self,
        operation: &str,
        payload: Map<String, Value>,
        error: impl Into<String>,
        max_attempts: Option<u32>,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<Uuid, RetryQueueError> {
        let op = self.build(operation, payload, error.into(), max_attempts, next_retry_at)?;
        self.accept(op, None).await
    }

    /// Like [`submit`](Self::submit), also returning a ticket that resolves
    /// with the operation's final outcome.
    pub async fn submit_tracked(
        &self,
        operation: &str,
        payload: Map<String, Value>,
        error: impl Into<String>,
        max_attempts: Option<u32>,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(Uuid, RetryTicket), RetryQueueError> {
        let op = self.build(operation, payload, error.into(), max_attempts, next_retry_at)?;
        let (sender, receiver) = oneshot::channel();
        let id = self.accept(op, Some(sender)).await?;
        Ok((
            id,
            RetryTicket {
                operation_id: id,
                receiver,
            },
        ))
    }

    fn build(
        &self,
        operation: &str,
        payload: Map<String, Value>,
        last_error: String,
        max_attempts: Option<u32>,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<RetryOperation, RetryQueueError> {
        if !self.inner.handlers.contains_key(operation) {
            return Err(RetryQueueError::UnregisteredOperation(
                operation.to_string(),
            ));
        }

        let now = Utc::now();
        let index = RetryOperation::payload_attempt_index(&payload);
        let max_attempts = max_attempts
            .unwrap_or(self.inner.default_max_attempts)
            .max(1);

        Ok(RetryOperation {
            id: Uuid::now_v7(),
            operation: operation.to_string(),
            payload,
            last_error,
            attempt: index.saturating_add(1).min(max_attempts),
            max_attempts,
            next_retry_at: next_retry_at
                .unwrap_or_else(|| self.inner.policy.next_retry_at(now, index)),
            created_at: now,
            last_attempt_at: None,
        })
    }

    async fn accept(
        &self,
        op: RetryOperation,
        watcher: Option<oneshot::Sender<Outcome>>,
    ) -> Result<Uuid, RetryQueueError> {
        self.inner
            .store
            .save(&op)
            .await
            .map_err(|e| RetryQueueError::Storage(e.to_string()))?;

        let id = op.id;
        tracing::info!(
            operation_id = %id,
            operation = %op.operation,
            attempt = op.attempt,
            max_attempts = op.max_attempts,
            next_retry_at = %op.next_retry_at,
            error = %op.last_error,
            "queued operation for retry"
        );

        if let Some(watcher) = watcher {
            self.inner.watchers.insert(id, watcher);
        }
        self.inner.active.insert(id, op);
        self.inner.ensure_processing();
        self.inner.wake.notify_one();

        Ok(id)
    }

    /// Load operations persisted by a previous run into the active set.
    ///
    /// Past-due operations become due now. Operations already active are left
    /// untouched. Returns the number of operations added.
    pub async fn load_persisted(&self) -> Result<usize, RetryQueueError> {
        let operations = self
            .inner
            .store
            .load_active()
            .await
            .map_err(|e| RetryQueueError::Storage(e.to_string()))?;

        let now = Utc::now();
        let mut loaded = 0;
        for mut op in operations {
            if self.inner.active.contains_key(&op.id) {
                continue;
            }
            if op.next_retry_at < now {
                op.next_retry_at = now;
            }
            if !self.inner.handlers.contains_key(&op.operation) {
                tracing::warn!(
                    operation_id = %op.id,
                    operation = %op.operation,
                    "loaded retry operation has no registered handler, it will wait for one"
                );
            }
            self.inner.active.insert(op.id, op);
            loaded += 1;
        }

        if loaded > 0 {
            tracing::info!(loaded, location = %self.inner.store.location(), "loaded persisted retry operations");
        }
        Ok(loaded)
    }

    /// Load persisted operations and start the background processor.
    ///
    /// Also resumes a queue halted by [`stop`](Self::stop).
    pub async fn start(&self) -> Result<usize, RetryQueueError> {
        {
            let mut control = self.inner.control();
            control.stopped = false;
            if control.cancel.is_cancelled() {
                control.cancel = CancellationToken::new();
            }
        }

        let loaded = self.load_persisted().await?;
        self.inner.ensure_processing();
        self.inner.wake.notify_one();
        Ok(loaded)
    }

    /// Stop the processor after its current batch.
    ///
    /// In-flight records stay persisted and are picked up by the next
    /// [`start`](Self::start). Submissions while stopped are persisted only.
    pub async fn stop(&self) {
        let handle = {
            let mut control = self.inner.control();
            control.stopped = true;
            control.cancel.cancel();
            control.handle.take()
        };

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "retry queue processor ended abnormally");
            }
        }

        self.inner.control().processing = false;
        tracing::info!("retry queue stopped");
    }

    pub fn stats(&self) -> RetryQueueStats {
        let mut registered_operations: Vec<String> = self
            .inner
            .handlers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        registered_operations.sort();

        RetryQueueStats {
            pending_count: self.inner.active.len(),
            registered_operations,
            is_processing: self.inner.control().processing,
            storage_location: self.inner.store.location(),
        }
    }

    /// Snapshot of active operations, soonest due first.
    pub fn pending(&self) -> Vec<RetryOperation> {
        let mut operations: Vec<RetryOperation> = self
            .inner
            .active
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        operations.sort_by_key(|op| op.next_retry_at);
        operations
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>, RetryQueueError> {
        self.inner
            .store
            .list_dead_letters()
            .await
            .map_err(|e| RetryQueueError::Storage(e.to_string()))
    }
}
