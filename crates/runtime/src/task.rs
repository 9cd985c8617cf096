//! Tasks: async function invocations on the pool
//!
//! A task handle bundles the async function value, its deep-copied
//! arguments, a state machine (`Ready → Running → Completed`, with
//! `Blocked` as an advisory state), a result/exception slot, and one
//! mutex+condvar pair for joining. Deep-copying the arguments at spawn is
//! mandatory: a task must never share a mutable structure with its parent —
//! channels are the sanctioned cross-task data path.
//!
//! The completed transition is published under the task mutex and the
//! condvar is broadcast, so a joiner that observes `Completed` also
//! observes the written result.

use crate::error::{ErrorKind, RillError};
use crate::value::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Ready,
    Running,
    /// Advisory only: a worker may set it around a blocking operation, but
    /// transitions are driven by the worker that dequeued the task.
    Blocked,
    Completed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug)]
struct TaskState {
    status: TaskStatus,
    result: Option<Value>,
    exception: Option<RillError>,
    joined: bool,
    detached: bool,
}

/// A task handle. Shared between the spawner (through the task value) and
/// the worker executing it.
#[derive(Debug)]
pub struct TaskObj {
    id: u64,
    /// The async function value being run.
    func: Value,
    /// Deep-copied at spawn; taken once by the worker.
    args: Mutex<Option<Vec<Value>>>,
    state: Mutex<TaskState>,
    cond: Condvar,
}

impl TaskObj {
    /// Create a handle in the `Ready` state. `args` must already be deep
    /// copies (see [`Value::deep_copy`]).
    pub fn new(func: Value, args: Vec<Value>) -> TaskObj {
        TaskObj {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            func,
            args: Mutex::new(Some(args)),
            state: Mutex::new(TaskState {
                status: TaskStatus::Ready,
                result: None,
                exception: None,
                joined: false,
                detached: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn func(&self) -> &Value {
        &self.func
    }

    /// The worker takes the argument array exactly once.
    pub fn take_args(&self) -> Vec<Value> {
        self.args
            .lock()
            .expect("task args lock poisoned")
            .take()
            .unwrap_or_default()
    }

    pub fn status(&self) -> TaskStatus {
        self.state.lock().expect("task state lock poisoned").status
    }

    /// Worker-side: mark the task running.
    pub fn mark_running(&self) {
        let mut state = self.state.lock().expect("task state lock poisoned");
        state.status = TaskStatus::Running;
    }

    /// Worker-side: store the outcome, transition to `Completed`, and wake
    /// every joiner.
    pub fn complete(&self, outcome: Result<Value, RillError>) {
        let mut state = self.state.lock().expect("task state lock poisoned");
        match outcome {
            Ok(v) => state.result = Some(v),
            Err(e) => state.exception = Some(e),
        }
        state.status = TaskStatus::Completed;
        self.cond.notify_all();
        tracing::trace!(task = self.id, "task completed");
    }

    /// Join: block until completion, then return the result (with a fresh
    /// retain) or re-raise the task's exception in the joining context.
    /// Fails with `TaskError` on an already-joined or detached handle.
    pub fn join(&self) -> Result<Value, RillError> {
        let mut state = self.state.lock().expect("task state lock poisoned");
        if state.joined {
            return Err(RillError::new(
                ErrorKind::Task,
                format!("task {} already joined", self.id),
            ));
        }
        if state.detached {
            return Err(RillError::new(
                ErrorKind::Task,
                format!("cannot join detached task {}", self.id),
            ));
        }
        state.joined = true;
        while state.status != TaskStatus::Completed {
            state = self
                .cond
                .wait(state)
                .expect("task join wait failed");
        }
        if let Some(err) = state.exception.clone() {
            return Err(err);
        }
        Ok(state.result.clone().unwrap_or(Value::Null))
    }

    /// Detach: the handle stops being joinable; the worker's final release
    /// of the task structure reclaims it. Fails on an already-joined
    /// handle.
    pub fn detach(&self) -> Result<(), RillError> {
        let mut state = self.state.lock().expect("task state lock poisoned");
        if state.joined {
            return Err(RillError::new(
                ErrorKind::Task,
                format!("cannot detach joined task {}", self.id),
            ));
        }
        state.detached = true;
        Ok(())
    }

    /// Human-readable handle state for the `task_debug_info` builtin.
    pub fn debug_info(self: &Arc<TaskObj>) -> String {
        let state = self.state.lock().expect("task state lock poisoned");
        format!(
            "task id={} state={} joined={} detached={} refcount={} has_result={}",
            self.id,
            state.status,
            state.joined,
            state.detached,
            Arc::strong_count(self),
            state.result.is_some()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn dummy_func() -> Value {
        // Tasks in these tests never run their function; any value works
        // as the handle's func slot.
        Value::Null
    }

    #[test]
    fn test_state_machine_and_join() {
        let task = Arc::new(TaskObj::new(dummy_func(), vec![Value::I32(1)]));
        assert_eq!(task.status(), TaskStatus::Ready);
        let worker_task = Arc::clone(&task);
        let worker = thread::spawn(move || {
            worker_task.mark_running();
            thread::sleep(Duration::from_millis(20));
            worker_task.complete(Ok(Value::I32(42)));
        });
        let joined = task.join().unwrap();
        assert!(matches!(joined, Value::I32(42)));
        assert_eq!(task.status(), TaskStatus::Completed);
        worker.join().unwrap();
    }

    #[test]
    fn test_join_twice_is_task_error() {
        let task = Arc::new(TaskObj::new(dummy_func(), vec![]));
        task.complete(Ok(Value::Null));
        task.join().unwrap();
        let err = task.join().unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Task));
    }

    #[test]
    fn test_join_detached_is_task_error() {
        let task = Arc::new(TaskObj::new(dummy_func(), vec![]));
        task.detach().unwrap();
        let err = task.join().unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Task));
    }

    #[test]
    fn test_detach_after_join_is_task_error() {
        let task = Arc::new(TaskObj::new(dummy_func(), vec![]));
        task.complete(Ok(Value::Null));
        task.join().unwrap();
        let err = task.detach().unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Task));
    }

    #[test]
    fn test_join_reraises_task_exception() {
        let task = Arc::new(TaskObj::new(dummy_func(), vec![]));
        task.complete(Err(RillError::new(ErrorKind::Index, "boom")));
        let err = task.join().unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Index));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_take_args_once() {
        let task = TaskObj::new(dummy_func(), vec![Value::I32(1), Value::I32(2)]);
        assert_eq!(task.take_args().len(), 2);
        assert!(task.take_args().is_empty());
    }

    #[test]
    fn test_ids_unique() {
        let a = TaskObj::new(dummy_func(), vec![]);
        let b = TaskObj::new(dummy_func(), vec![]);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_debug_info_fields() {
        let task = Arc::new(TaskObj::new(dummy_func(), vec![]));
        let info = task.debug_info();
        assert!(info.contains(&format!("id={}", task.id())));
        assert!(info.contains("state=ready"));
        assert!(info.contains("joined=false"));
        assert!(info.contains("has_result=false"));
    }
}
