//! Task/status handshake between callers and the sampling worker
//!
//! ```text
//!   caller ── submit(task) ──▶ [ pending slot ] ──▶ worker
//!   caller ◀─ wait_for_status ◀─ [ status ] ◀── set_status
//! ```
//!
//! The pending slot holds one task; a newer submit overwrites an unconsumed
//! one. Each side has its own mutex/condvar pair so a caller blocked on a
//! status never holds the lock the worker needs to take a task.

use std::sync::{Condvar, LockResult, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::counters::CounterKind;
use crate::domain::{Pid, TaskError};

/// How long `wait_for_status` blocks before giving up
pub const STATUS_TIMEOUT: Duration = Duration::from_secs(60);

/// Observable state of the sampling worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerStatus {
    Idle,
    ProfilingStarted,
    ProfilingPartStarted,
    ProfilingMultiStarted,
    ProfilingFailed,
    MaplistStarted,
    MaplistFailed,
}

impl WorkerStatus {
    #[must_use]
    pub fn is_failed(self) -> bool {
        matches!(self, WorkerStatus::ProfilingFailed | WorkerStatus::MaplistFailed)
    }

    /// Counting is live (fully or with some counters paused)
    #[must_use]
    pub fn is_profiling(self) -> bool {
        matches!(self, WorkerStatus::ProfilingStarted | WorkerStatus::ProfilingPartStarted)
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            WorkerStatus::Idle => "IDLE",
            WorkerStatus::ProfilingStarted => "PROFILING_STARTED",
            WorkerStatus::ProfilingPartStarted => "PROFILING_PART_STARTED",
            WorkerStatus::ProfilingMultiStarted => "PROFILING_MULTI_STARTED",
            WorkerStatus::ProfilingFailed => "PROFILING_FAILED",
            WorkerStatus::MaplistStarted => "MAPLIST_STARTED",
            WorkerStatus::MaplistFailed => "MAPLIST_FAILED",
        }
    }
}

/// Work item for the sampling worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Start,
    /// Decode and merge pending samples; `notify` publishes a `WorkerEvent`
    Sample { notify: bool },
    PartPause(CounterKind),
    MultiPause(Vec<CounterKind>),
    Restore(CounterKind),
    MultiRestore(Vec<CounterKind>),
    MaplistStart(Pid),
    MaplistSample(Pid),
    Stop,
    Quit,
}

/// Shared handshake state; wrap in an `Arc` to share with the worker
#[derive(Debug)]
pub struct TaskChannel {
    pending: Mutex<Option<Task>>,
    task_ready: Condvar,
    status: Mutex<WorkerStatus>,
    status_changed: Condvar,
    exit_message: Mutex<Option<String>>,
}

impl Default for TaskChannel {
    fn default() -> Self {
        Self::new()
    }
}

fn relock<'a, T>(result: LockResult<MutexGuard<'a, T>>) -> MutexGuard<'a, T> {
    result.unwrap_or_else(PoisonError::into_inner)
}

impl TaskChannel {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            task_ready: Condvar::new(),
            status: Mutex::new(WorkerStatus::Idle),
            status_changed: Condvar::new(),
            exit_message: Mutex::new(None),
        }
    }

    // =========================================================================
    // CALLER SIDE
    // =========================================================================

    /// Hand a task to the worker, replacing any task it has not taken yet
    pub fn submit(&self, task: Task) {
        let mut slot = relock(self.pending.lock());
        if let Some(old) = slot.replace(task) {
            log::debug!("task {old:?} overwritten before the worker took it");
        }
        self.task_ready.notify_one();
    }

    /// Block until the worker reports `target`, using [`STATUS_TIMEOUT`]
    ///
    /// # Errors
    /// See [`TaskChannel::wait_for_status_timeout`].
    pub fn wait_for_status(&self, target: WorkerStatus) -> Result<(), TaskError> {
        self.wait_for_status_timeout(target, STATUS_TIMEOUT)
    }

    /// Block until the worker reports `target`
    ///
    /// # Errors
    /// Returns [`TaskError::Failed`] as soon as a failed status is published,
    /// or [`TaskError::Timeout`] when `timeout` elapses first.
    pub fn wait_for_status_timeout(&self, target: WorkerStatus, timeout: Duration) -> Result<(), TaskError> {
        let deadline = Instant::now() + timeout;
        let mut status = relock(self.status.lock());

        loop {
            if *status == target {
                return Ok(());
            }
            if status.is_failed() {
                return Err(TaskError::Failed(status.name()));
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(TaskError::Timeout(target.name()));
            }

            status = match self.status_changed.wait_timeout(status, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    #[must_use]
    pub fn status(&self) -> WorkerStatus {
        *relock(self.status.lock())
    }

    /// Message the user should see after the terminal is restored
    #[must_use]
    pub fn take_exit_message(&self) -> Option<String> {
        relock(self.exit_message.lock()).take()
    }

    // =========================================================================
    // WORKER SIDE
    // =========================================================================

    /// Wait for the next task
    ///
    /// Returns `None` if nothing arrives within `timeout`.
    pub fn take_task(&self, timeout: Duration) -> Option<Task> {
        let deadline = Instant::now() + timeout;
        let mut slot = relock(self.pending.lock());

        loop {
            if let Some(task) = slot.take() {
                return Some(task);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            slot = match self.task_ready.wait_timeout(slot, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Publish a new status and wake every waiter
    pub fn set_status(&self, status: WorkerStatus) {
        let mut current = relock(self.status.lock());
        *current = status;
        self.status_changed.notify_all();
    }

    /// Record a fatal message; the first one wins
    pub fn put_exit_message(&self, message: impl Into<String>) {
        let mut slot = relock(self.exit_message.lock());
        if slot.is_none() {
            *slot = Some(message.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_last_submit_wins() {
        let chan = TaskChannel::new();
        chan.submit(Task::Start);
        chan.submit(Task::Stop);

        assert_eq!(chan.take_task(Duration::from_millis(1)), Some(Task::Stop));
        assert_eq!(chan.take_task(Duration::from_millis(1)), None);
    }

    #[test]
    fn test_wait_returns_when_target_reached() {
        let chan = Arc::new(TaskChannel::new());
        let worker = {
            let chan = Arc::clone(&chan);
            thread::spawn(move || {
                let task = chan.take_task(Duration::from_secs(5));
                assert_eq!(task, Some(Task::Start));
                chan.set_status(WorkerStatus::ProfilingStarted);
            })
        };

        chan.submit(Task::Start);
        chan.wait_for_status(WorkerStatus::ProfilingStarted).unwrap();
        assert_eq!(chan.status(), WorkerStatus::ProfilingStarted);
        worker.join().unwrap();
    }

    #[test]
    fn test_wait_returns_early_on_failure() {
        let chan = Arc::new(TaskChannel::new());
        let worker = {
            let chan = Arc::clone(&chan);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                chan.set_status(WorkerStatus::ProfilingFailed);
            })
        };

        let started = Instant::now();
        let err = chan.wait_for_status(WorkerStatus::ProfilingStarted).unwrap_err();
        assert_eq!(err, TaskError::Failed("PROFILING_FAILED"));
        assert!(started.elapsed() < Duration::from_secs(5));
        worker.join().unwrap();
    }

    #[test]
    fn test_wait_times_out() {
        let chan = TaskChannel::new();
        let err = chan
            .wait_for_status_timeout(WorkerStatus::MaplistStarted, Duration::from_millis(20))
            .unwrap_err();
        assert_eq!(err, TaskError::Timeout("MAPLIST_STARTED"));
    }

    #[test]
    fn test_exit_message_first_wins() {
        let chan = TaskChannel::new();
        chan.put_exit_message("first");
        chan.put_exit_message("second");
        assert_eq!(chan.take_exit_message().as_deref(), Some("first"));
        assert_eq!(chan.take_exit_message(), None);
    }
}
