//! Tasks, execution results, and the orchestrator's result store.
//!
//! A [`Task`] is the unit of work the orchestrator hands to an agent on the
//! opposite tract. Results come back through a [`ResultStore`]: the
//! orchestrator registers a pending slot keyed by task id before routing, the
//! consuming agent writes exactly one [`ExecutionResult`] into that slot, and
//! the orchestrator awaits it under the task's timeout.
//!
//! The back-reference from a routed message to its orchestrator is a
//! [`ResultHandle`] — a cheap cloneable handle into the orchestrator-owned
//! store, not a shared-ownership cycle.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// Terminal state of a task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// `process_message` returned successfully.
    Completed,
    /// `process_message` raised an error (including consumer-side timeouts).
    Failed,
    /// The orchestrator's wait on the result slot expired.
    Timeout,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Completed => f.write_str("completed"),
            TaskState::Failed => f.write_str("failed"),
            TaskState::Timeout => f.write_str("timeout"),
        }
    }
}

/// A unit of work targeted at a specific agent.
///
/// # Example
///
/// ```rust
/// use callosum::task::Task;
///
/// let task = Task::new("task-1", "file_writer", "write_file")
///     .with_description("Write the greeting file")
///     .with_timeout_secs(5.0)
///     .with_priority(8);
/// assert_eq!(task.agent, "file_writer");
/// assert_eq!(task.priority, 8);
/// ```
#[derive(Debug, Clone)]
pub struct Task {
    /// Unique task id; also the key into the result store.
    pub id: String,
    /// Target agent symbol (e.g. a particle name).
    pub agent: String,
    /// Action symbol the agent should perform.
    pub action: String,
    /// Human-readable description.
    pub description: String,
    /// Free-form context forwarded to the agent.
    pub context: Value,
    /// Ids of tasks that must complete before this one.
    pub dependencies: Vec<String>,
    /// Seconds the orchestrator waits for a result before timing out.
    pub timeout_secs: f64,
    /// Priority on the orchestrator's 1..=10 scale.
    pub priority: u8,
}

impl Task {
    /// Create a task with default context, no dependencies, a 30 second
    /// timeout, and normal (5) priority.
    pub fn new(
        id: impl Into<String>,
        agent: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            agent: agent.into(),
            action: action.into(),
            description: String::new(),
            context: Value::Null,
            dependencies: Vec::new(),
            timeout_secs: 30.0,
            priority: 5,
        }
    }

    /// Set the description (builder pattern).
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the context payload (builder pattern).
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    /// Set the result timeout in seconds (builder pattern).
    pub fn with_timeout_secs(mut self, timeout_secs: f64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Set the task priority on the 1..=10 scale (builder pattern).
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

/// Outcome of a single task execution, written back by the consuming agent
/// (or synthesized by the orchestrator on timeout).
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Id of the task this result answers.
    pub task_id: String,
    /// Id of the agent that executed (or should have executed) the task.
    pub agent: String,
    /// Terminal state.
    pub status: TaskState,
    /// Structured output on success.
    pub output: Option<Value>,
    /// Error description on failure or timeout.
    pub error: Option<String>,
    /// Measured wall time in seconds.
    pub execution_time_secs: f64,
}

impl ExecutionResult {
    /// Build a completed result.
    pub fn completed(
        task_id: impl Into<String>,
        agent: impl Into<String>,
        output: Value,
        execution_time_secs: f64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent: agent.into(),
            status: TaskState::Completed,
            output: Some(output),
            error: None,
            execution_time_secs,
        }
    }

    /// Build a failed result.
    pub fn failed(
        task_id: impl Into<String>,
        agent: impl Into<String>,
        error: impl Into<String>,
        execution_time_secs: f64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent: agent.into(),
            status: TaskState::Failed,
            output: None,
            error: Some(error.into()),
            execution_time_secs,
        }
    }

    /// Build a synthetic timeout result.
    pub fn timed_out(
        task_id: impl Into<String>,
        agent: impl Into<String>,
        timeout_secs: f64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent: agent.into(),
            status: TaskState::Timeout,
            output: None,
            error: Some(format!("timeout after {}s awaiting result", timeout_secs)),
            execution_time_secs: timeout_secs,
        }
    }
}

/// Correlation map from task id to a pending result slot.
///
/// `store_task_result` is the sole writer for completed/failed outcomes and
/// is safe to call from any agent-consumer task. Awaiting and storing observe
/// happens-before ordering through the underlying oneshot channel.
#[derive(Default)]
pub struct ResultStore {
    pending: Mutex<HashMap<String, oneshot::Sender<ExecutionResult>>>,
}

impl ResultStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a pending slot for `task_id` and return the receiving end.
    ///
    /// One pending slot per task id: registering again for the same id
    /// replaces the previous slot (whose awaiter then observes a closed
    /// channel).
    pub fn register(&self, task_id: &str) -> oneshot::Receiver<ExecutionResult> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().unwrap();
        if pending.insert(task_id.to_string(), tx).is_some() {
            log::warn!("replaced pending result slot for task {}", task_id);
        }
        rx
    }

    /// Remove the pending slot for `task_id` without fulfilling it.
    ///
    /// Called when the awaiter gives up (timeout); a result stored afterwards
    /// is treated as late and discarded.
    pub fn abandon(&self, task_id: &str) {
        self.pending.lock().unwrap().remove(task_id);
    }

    /// Write a result into the slot for `task_id`.
    ///
    /// A result for an unknown or already-expired task id is discarded with a
    /// warning; it is never an error for the caller.
    pub fn store_task_result(&self, task_id: &str, result: ExecutionResult) {
        let sender = self.pending.lock().unwrap().remove(task_id);
        match sender {
            Some(tx) => {
                if tx.send(result).is_err() {
                    log::warn!("result for task {} arrived after awaiter left", task_id);
                }
            }
            None => {
                log::warn!(
                    "discarding late result for task {} (status {})",
                    task_id,
                    result.status
                );
            }
        }
    }

    /// Number of still-pending slots.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

/// Cloneable handle into an orchestrator-owned [`ResultStore`].
///
/// Carried inside [`TaskEnvelope`]s so consumers can write results back
/// without holding a reference to the orchestrator itself.
#[derive(Clone)]
pub struct ResultHandle {
    store: Arc<ResultStore>,
}

impl ResultHandle {
    pub fn new(store: Arc<ResultStore>) -> Self {
        Self { store }
    }

    /// Write a result through the handle. See [`ResultStore::store_task_result`].
    pub fn store_task_result(&self, task_id: &str, result: ExecutionResult) {
        self.store.store_task_result(task_id, result);
    }
}

impl fmt::Debug for ResultHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResultHandle")
    }
}

/// The conventional payload shape for orchestrator-bound traffic: a task
/// descriptor plus the handle through which the result flows back.
#[derive(Debug, Clone)]
pub struct TaskEnvelope {
    pub task: Task,
    pub reply: ResultHandle,
}

impl TaskEnvelope {
    pub fn new(task: Task, reply: ResultHandle) -> Self {
        Self { task, reply }
    }
}
