//! WorkflowSequencer -- single-consumer task runner with dependency gating.
//!
//! Tasks live in one table keyed by id plus an enqueue-order list. The run
//! loop is spawned lazily by `enqueue` and exits once nothing is pending. It
//! sleeps on a `Notify` instead of polling, so a newly enqueued task is picked
//! up as soon as the current one finishes.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value};
use steward_types::config::SequencerConfig;
use steward_types::error::SequencerError;
use steward_types::task::{SequencerEvent, TaskStatus, WorkflowTask};
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::handler::Handler;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

struct SequencerState {
    tasks: HashMap<Uuid, WorkflowTask>,
    /// Enqueue order; scheduling scans this front to back.
    order: Vec<Uuid>,
    loop_active: bool,
    stopped: bool,
    cancel: CancellationToken,
    run_loop: Option<JoinHandle<()>>,
}

/// A task moved to `Running`, detached from the table so the lock can be
/// released while its handler runs.
struct ClaimedTask {
    id: Uuid,
    task_type: String,
    payload: Map<String, Value>,
}

enum Step {
    Run(ClaimedTask),
    Wait,
    Exit,
}

impl SequencerState {
    fn has_pending(&self) -> bool {
        self.tasks
            .values()
            .any(|task| task.status == TaskStatus::Pending)
    }

    fn status_of(&self, id: &Uuid) -> Option<TaskStatus> {
        self.tasks.get(id).map(|task| task.status)
    }

    /// Fail every pending task that depends on a failed task.
    ///
    /// Dependencies always precede their dependents in `order`, so a single
    /// pass covers transitive chains.
    fn propagate_failures(&mut self) -> Vec<SequencerEvent> {
        let mut events = Vec::new();

        for id in &self.order {
            let failed_dep = match self.tasks.get(id) {
                Some(task) if task.status == TaskStatus::Pending => task
                    .dependencies
                    .iter()
                    .copied()
                    .find(|dep| self.status_of(dep) == Some(TaskStatus::Failed)),
                _ => None,
            };

            let Some(dep) = failed_dep else { continue };
            let Some(task) = self.tasks.get_mut(id) else { continue };

            let error = format!("dependency {dep} failed");
            tracing::warn!(task_id = %id, dependency = %dep, "failing task with failed dependency");
            task.status = TaskStatus::Failed;
            task.completed_at = Some(Utc::now());
            task.error = Some(error.clone());
            events.push(SequencerEvent::TaskFailed {
                task_id: *id,
                task_type: task.task_type.clone(),
                error,
            });
        }

        events
    }

    /// Claim the first pending task (in enqueue order) whose dependencies
    /// have all completed.
    fn claim_next(&mut self) -> Option<ClaimedTask> {
        let id = self.order.iter().copied().find(|id| {
            self.tasks.get(id).is_some_and(|task| {
                task.status == TaskStatus::Pending
                    && task
                        .dependencies
                        .iter()
                        .all(|dep| self.status_of(dep) == Some(TaskStatus::Completed))
            })
        })?;

        let task = self.tasks.get_mut(&id)?;
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());

        Some(ClaimedTask {
            id,
            task_type: task.task_type.clone(),
            payload: task.payload.clone(),
        })
    }
}

struct SequencerInner {
    handlers: DashMap<String, Handler>,
    state: Mutex<SequencerState>,
    wake: Notify,
    events: EventBus,
}

impl SequencerInner {
    fn state(&self) -> MutexGuard<'_, SequencerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_step(&self, cancel: &CancellationToken) -> (Step, Vec<SequencerEvent>) {
        let mut state = self.state();

        if cancel.is_cancelled() {
            state.loop_active = false;
            return (Step::Exit, Vec::new());
        }

        let mut events = state.propagate_failures();

        if let Some(claimed) = state.claim_next() {
            events.push(SequencerEvent::TaskStarted {
                task_id: claimed.id,
                task_type: claimed.task_type.clone(),
            });
            return (Step::Run(claimed), events);
        }

        if state.has_pending() {
            (Step::Wait, events)
        } else {
            state.loop_active = false;
            (Step::Exit, events)
        }
    }

    async fn execute(&self, claimed: ClaimedTask) {
        let ClaimedTask {
            id,
            task_type,
            payload,
        } = claimed;

        tracing::info!(task_id = %id, task_type = %task_type, "running workflow task");

        let handler = self
            .handlers
            .get(&task_type)
            .map(|entry| Arc::clone(entry.value()));

        let outcome = match handler {
            // Spawned so a panicking handler fails its task instead of the loop.
            Some(handler) => match tokio::spawn(handler(payload)).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(join_err) => Err(format!("handler panicked: {join_err}")),
            },
            None => Err(SequencerError::UnregisteredTask(task_type.clone()).to_string()),
        };

        let event = {
            let mut state = self.state();
            let Some(task) = state.tasks.get_mut(&id) else {
                return;
            };
            task.completed_at = Some(Utc::now());

            match outcome {
                Ok(value) => {
                    tracing::info!(task_id = %id, task_type = %task_type, "workflow task completed");
                    task.status = TaskStatus::Completed;
                    task.result = Some(value);
                    SequencerEvent::TaskCompleted {
                        task_id: id,
                        task_type,
                    }
                }
                Err(error) => {
                    tracing::warn!(task_id = %id, task_type = %task_type, error = %error, "workflow task failed");
                    task.status = TaskStatus::Failed;
                    task.error = Some(error.clone());
                    SequencerEvent::TaskFailed {
                        task_id: id,
                        task_type,
                        error,
                    }
                }
            }
        };

        self.events.publish(event);
    }
}

async fn run_loop(inner: Arc<SequencerInner>, cancel: CancellationToken) {
    tracing::debug!("workflow sequencer loop started");

    loop {
        let (step, events) = inner.next_step(&cancel);
        for event in events {
            inner.events.publish(event);
        }

        match step {
            Step::Run(claimed) => inner.execute(claimed).await,
            Step::Wait => {
                tokio::select! {
                    _ = inner.wake.notified() => {}
                    _ = cancel.cancelled() => {}
                }
            }
            Step::Exit => break,
        }
    }

    tracing::debug!("workflow sequencer loop exited");
}

fn spawn_loop(inner: &Arc<SequencerInner>, state: &mut SequencerState) {
    if state.stopped || state.loop_active {
        return;
    }
    state.loop_active = true;
    state.run_loop = Some(tokio::spawn(run_loop(
        Arc::clone(inner),
        state.cancel.clone(),
    )));
}

// ---------------------------------------------------------------------------
// WorkflowSequencer
// ---------------------------------------------------------------------------

/// Runs registered task handlers in dependency order, one at a time.
///
/// Cloning yields another handle to the same sequencer. `enqueue` and
/// `start` spawn onto the ambient Tokio runtime and must be called from
/// within one.
#[derive(Clone)]
pub struct WorkflowSequencer {
    inner: Arc<SequencerInner>,
}

impl WorkflowSequencer {
    pub fn new(config: &SequencerConfig) -> Self {
        Self {
            inner: Arc::new(SequencerInner {
                handlers: DashMap::new(),
                state: Mutex::new(SequencerState {
                    tasks: HashMap::new(),
                    order: Vec::new(),
                    loop_active: false,
                    stopped: false,
                    cancel: CancellationToken::new(),
                    run_loop: None,
                }),
                wake: Notify::new(),
                events: EventBus::new(config.event_capacity),
            }),
        }
    }

    /// Register the handler for a task type. Re-registering replaces it.
    pub fn register(&self, task_type: impl Into<String>, handler: Handler) {
        let task_type = task_type.into();
        tracing::debug!(task_type = %task_type, "registered task handler");
        self.inner.handlers.insert(task_type, handler);
    }

    /// Add a pending task and make sure the run loop is active.
    ///
    /// Every dependency must name a task this sequencer already knows about.
    /// Returns the new task's id without waiting for it to run.
    pub fn enqueue(
        &self,
        task_type: &str,
        payload: Map<String, Value>,
        dependencies: Vec<Uuid>,
    ) -> Result<Uuid, SequencerError> {
        if !self.inner.handlers.contains_key(task_type) {
            return Err(SequencerError::UnregisteredTask(task_type.to_string()));
        }

        let mut state = self.inner.state();
        if let Some(missing) = dependencies
            .iter()
            .find(|dep| !state.tasks.contains_key(*dep))
        {
            return Err(SequencerError::UnknownDependency(*missing));
        }

        let task = WorkflowTask::new(task_type, payload, dependencies);
        let id = task.id;
        tracing::info!(
            task_id = %id,
            task_type = %task_type,
            dependencies = task.dependencies.len(),
            "enqueued workflow task"
        );
        state.tasks.insert(id, task);
        state.order.push(id);
        spawn_loop(&self.inner, &mut state);
        drop(state);

        self.inner.wake.notify_one();
        Ok(id)
    }

    /// Snapshot of a task, or `None` if the id is unknown or was cleared.
    pub fn status(&self, id: &Uuid) -> Option<WorkflowTask> {
        self.inner.state().tasks.get(id).cloned()
    }

    /// Snapshot of every known task in enqueue order.
    pub fn tasks(&self) -> Vec<WorkflowTask> {
        let state = self.inner.state();
        state
            .order
            .iter()
            .filter_map(|id| state.tasks.get(id).cloned())
            .collect()
    }

    /// Drop finished tasks that no pending task still depends on.
    ///
    /// Returns the number of tasks removed.
    pub fn clear_finished(&self) -> usize {
        let mut state = self.inner.state();
        let SequencerState { tasks, order, .. } = &mut *state;

        let referenced: HashSet<Uuid> = tasks
            .values()
            .filter(|task| task.status == TaskStatus::Pending)
            .flat_map(|task| task.dependencies.iter().copied())
            .collect();

        let before = tasks.len();
        tasks.retain(|id, task| !task.status.is_terminal() || referenced.contains(id));
        order.retain(|id| tasks.contains_key(id));

        let removed = before - tasks.len();
        if removed > 0 {
            tracing::debug!(removed, "cleared finished workflow tasks");
        }
        removed
    }

    /// Receive lifecycle events for tasks run after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SequencerEvent> {
        self.inner.events.subscribe()
    }

    /// Whether the run loop is currently active.
    pub fn is_running(&self) -> bool {
        self.inner.state().loop_active
    }

    /// Stop the run loop after the task it is currently executing.
    ///
    /// Pending tasks stay pending. Enqueueing after `stop` records tasks but
    /// does not run them until [`start`](Self::start) is called.
    pub async fn stop(&self) {
        let handle = {
            let mut state = self.inner.state();
            state.stopped = true;
            state.cancel.cancel();
            state.run_loop.take()
        };

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "workflow sequencer loop ended abnormally");
            }
        }

        self.inner.state().loop_active = false;
        tracing::info!("workflow sequencer stopped");
    }

    /// Resume after [`stop`](Self::stop), running any pending tasks.
    pub fn start(&self) {
        let mut state = self.inner.state();
        if !state.stopped {
            return;
        }
        state.stopped = false;
        state.cancel = CancellationToken::new();
        if state.has_pending() {
            spawn_loop(&self.inner, &mut state);
        }
        drop(state);

        self.inner.wake.notify_one();
        tracing::info!("workflow sequencer started");
    }
}

impl std::fmt::Debug for WorkflowSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state();
        f.debug_struct("WorkflowSequencer")
            .field("tasks", &state.tasks.len())
            .field("loop_active", &state.loop_active)
            .field("stopped", &state.stopped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use steward_types::error::ExternalOperationError;

    use super::*;
    use crate::handler::handler_fn;

    fn sequencer() -> WorkflowSequencer {
        WorkflowSequencer::new(&SequencerConfig::default())
    }

    fn echo_handler(log: Arc<Mutex<Vec<String>>>, name: &'static str) -> Handler {
        handler_fn(move |payload: Map<String, Value>| {
            let log = Arc::clone(&log);
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                log.lock().unwrap().push(name.to_string());
                Ok(Value::Object(payload))
            }
        })
    }

    fn failing_handler() -> Handler {
        handler_fn(|_payload| async move {
            Err::<Value, _>(ExternalOperationError::new("scraper", "connection reset"))
        })
    }

    async fn wait_terminal(seq: &WorkflowSequencer, id: Uuid) -> WorkflowTask {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(task) = seq.status(&id) {
                    if task.status.is_terminal() {
                        return task;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("task did not reach a terminal state")
    }

    #[tokio::test]
    async fn enqueue_unregistered_type_is_rejected() {
        let seq = sequencer();
        let err = seq.enqueue("scrape", Map::new(), vec![]).unwrap_err();
        assert!(matches!(err, SequencerError::UnregisteredTask(ref t) if t == "scrape"));
        assert!(seq.tasks().is_empty());
    }

    #[tokio::test]
    async fn enqueue_unknown_dependency_is_rejected() {
        let seq = sequencer();
        seq.register("scrape", failing_handler());
        let ghost = Uuid::now_v7();
        let err = seq.enqueue("scrape", Map::new(), vec![ghost]).unwrap_err();
        assert!(matches!(err, SequencerError::UnknownDependency(id) if id == ghost));
    }

    #[tokio::test]
    async fn task_without_dependencies_completes() {
        let seq = sequencer();
        let log = Arc::new(Mutex::new(Vec::new()));
        seq.register("scrape", echo_handler(Arc::clone(&log), "scrape"));

        let mut payload = Map::new();
        payload.insert("query".to_string(), Value::from("laptops"));
        let id = seq.enqueue("scrape", payload, vec![]).unwrap();

        let task = wait_terminal(&seq, id).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.unwrap()["query"], "laptops");
        assert!(task.started_at.is_some());
        assert!(task.completed_at.is_some());
    }

    #[tokio::test]
    async fn dependents_run_after_dependencies_complete() {
        let seq = sequencer();
        let log = Arc::new(Mutex::new(Vec::new()));
        seq.register("scrape", echo_handler(Arc::clone(&log), "scrape"));
        seq.register("normalize", echo_handler(Arc::clone(&log), "normalize"));
        seq.register("persist", echo_handler(Arc::clone(&log), "persist"));

        let scrape = seq.enqueue("scrape", Map::new(), vec![]).unwrap();
        let normalize = seq.enqueue("normalize", Map::new(), vec![scrape]).unwrap();
        let persist = seq.enqueue("persist", Map::new(), vec![normalize]).unwrap();

        let persisted = wait_terminal(&seq, persist).await;
        let normalized = seq.status(&normalize).unwrap();
        let scraped = seq.status(&scrape).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["scrape".to_string(), "normalize".to_string(), "persist".to_string()]
        );
        assert!(normalized.started_at.unwrap() >= scraped.completed_at.unwrap());
        assert!(persisted.started_at.unwrap() >= normalized.completed_at.unwrap());
    }

    #[tokio::test]
    async fn ready_tasks_run_in_enqueue_order() {
        let seq = sequencer();
        let log = Arc::new(Mutex::new(Vec::new()));
        seq.register("slow", echo_handler(Arc::clone(&log), "slow"));
        seq.register("dependent", echo_handler(Arc::clone(&log), "dependent"));
        seq.register("independent", echo_handler(Arc::clone(&log), "independent"));

        let slow = seq.enqueue("slow", Map::new(), vec![]).unwrap();
        let dependent = seq.enqueue("dependent", Map::new(), vec![slow]).unwrap();
        let independent = seq.enqueue("independent", Map::new(), vec![]).unwrap();

        wait_terminal(&seq, dependent).await;
        wait_terminal(&seq, independent).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "slow".to_string(),
                "dependent".to_string(),
                "independent".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn handler_failure_does_not_stop_the_loop() {
        let seq = sequencer();
        let log = Arc::new(Mutex::new(Vec::new()));
        seq.register("scrape", failing_handler());
        seq.register("report", echo_handler(Arc::clone(&log), "report"));

        let failed = seq.enqueue("scrape", Map::new(), vec![]).unwrap();
        let ok = seq.enqueue("report", Map::new(), vec![]).unwrap();

        let failed = wait_terminal(&seq, failed).await;
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(
            failed.error.as_deref(),
            Some("scraper failed: connection reset")
        );
        assert_eq!(wait_terminal(&seq, ok).await.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn failed_dependency_fails_dependents_transitively() {
        let seq = sequencer();
        let log = Arc::new(Mutex::new(Vec::new()));
        seq.register("scrape", failing_handler());
        seq.register("normalize", echo_handler(Arc::clone(&log), "normalize"));

        let scrape = seq.enqueue("scrape", Map::new(), vec![]).unwrap();
        let normalize = seq.enqueue("normalize", Map::new(), vec![scrape]).unwrap();
        let persist = seq.enqueue("normalize", Map::new(), vec![normalize]).unwrap();

        let normalized = wait_terminal(&seq, normalize).await;
        let persisted = wait_terminal(&seq, persist).await;

        assert_eq!(normalized.status, TaskStatus::Failed);
        assert_eq!(
            normalized.error,
            Some(format!("dependency {scrape} failed"))
        );
        assert!(normalized.started_at.is_none());
        assert_eq!(persisted.error, Some(format!("dependency {normalize} failed")));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn panicking_handler_fails_task() {
        let seq = sequencer();
        seq.register(
            "explode",
            handler_fn(|_payload| async move {
                if true {
                    panic!("boom");
                }
                Ok(Value::Null)
            }),
        );

        let id = seq.enqueue("explode", Map::new(), vec![]).unwrap();
        let task = wait_terminal(&seq, id).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn subscribers_receive_lifecycle_events() {
        let seq = sequencer();
        let log = Arc::new(Mutex::new(Vec::new()));
        seq.register("scrape", echo_handler(Arc::clone(&log), "scrape"));
        let mut rx = seq.subscribe();

        let id = seq.enqueue("scrape", Map::new(), vec![]).unwrap();

        let started = rx.recv().await.unwrap();
        let completed = rx.recv().await.unwrap();
        assert!(matches!(started, SequencerEvent::TaskStarted { task_id, .. } if task_id == id));
        assert!(matches!(completed, SequencerEvent::TaskCompleted { task_id, .. } if task_id == id));
    }

    #[tokio::test]
    async fn stop_leaves_tasks_pending_until_start() {
        let seq = sequencer();
        let log = Arc::new(Mutex::new(Vec::new()));
        seq.register("scrape", echo_handler(Arc::clone(&log), "scrape"));

        seq.stop().await;
        let id = seq.enqueue("scrape", Map::new(), vec![]).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(seq.status(&id).unwrap().status, TaskStatus::Pending);
        assert!(!seq.is_running());

        seq.start();
        assert_eq!(wait_terminal(&seq, id).await.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn clear_finished_keeps_referenced_tasks() {
        let seq = sequencer();
        let log = Arc::new(Mutex::new(Vec::new()));
        seq.register("scrape", echo_handler(Arc::clone(&log), "scrape"));

        let a = seq.enqueue("scrape", Map::new(), vec![]).unwrap();
        let b = seq.enqueue("scrape", Map::new(), vec![]).unwrap();
        wait_terminal(&seq, a).await;
        wait_terminal(&seq, b).await;

        // Hold a pending dependent on `a` by stopping first.
        seq.stop().await;
        let c = seq.enqueue("scrape", Map::new(), vec![a]).unwrap();

        assert_eq!(seq.clear_finished(), 1);
        assert!(seq.status(&a).is_some());
        assert!(seq.status(&b).is_none());
        assert!(seq.status(&c).is_some());
    }
}
