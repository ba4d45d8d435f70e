// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A single render task: one worker's slice of a job.

use crate::types::{Slot, TaskName};
use serde::{Deserialize, Serialize};

/// A task's place in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Constructed, not yet visible to the assignment loop.
    Initialized,
    /// Waiting in the LIFO queue for an available worker.
    Queued,
    /// Assigned to a worker and its child process is expected to run.
    Running,
    /// The worker's child process exited zero.
    Completed,
    /// Told to stop (the owning job is being torn down) but the worker
    /// has not yet confirmed.
    Terminating,
    /// Stopped, confirmed or not: a job tear-down reaches this state
    /// directly for tasks that never started running.
    Terminated,
}

/// One task belonging to a [`crate::entities::job::Job`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// `{job_name}-{index}`.
    pub name: TaskName,
    /// Index within the job, `0..num_workers`.
    pub index: usize,
    /// Current lifecycle state.
    pub state: TaskState,
    /// The coordinator slot this task's job was admitted onto. `None`
    /// until the job is admitted.
    pub slot: Option<Slot>,
    /// The worker address this task is currently assigned to, if any.
    pub worker_addr: Option<String>,
}

impl Task {
    /// Construct an unqueued task at the given index of its job.
    #[must_use]
    pub fn new(job_name: &str, index: usize) -> Self {
        Self {
            name: format!("{job_name}-{index}"),
            index,
            state: TaskState::Initialized,
            slot: None,
            worker_addr: None,
        }
    }

    /// Host this task's job's coordinator is bound to, once admitted.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.slot.as_ref().map(|s| s.host.as_str())
    }

    /// Port this task's job's coordinator is bound to, once admitted.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.slot.as_ref().map(|s| s.port)
    }

    /// Move to [`TaskState::Queued`]. Valid only from `Initialized`.
    ///
    /// # Panics
    /// Panics if called from any state other than `Initialized` — a
    /// task is queued exactly once, by the admission loop.
    pub fn state_queued(&mut self) {
        assert_eq!(
            self.state,
            TaskState::Initialized,
            "task {} queued from unexpected state {:?}",
            self.name,
            self.state
        );
        self.state = TaskState::Queued;
    }

    /// Move to [`TaskState::Running`] and record the assigned worker.
    ///
    /// # Panics
    /// Panics if called from any state other than `Queued`.
    pub fn state_running(&mut self, worker_addr: impl Into<String>) {
        assert_eq!(
            self.state,
            TaskState::Queued,
            "task {} started from unexpected state {:?}",
            self.name,
            self.state
        );
        self.state = TaskState::Running;
        self.worker_addr = Some(worker_addr.into());
    }

    /// Move to [`TaskState::Completed`]. Valid only from `Running`.
    ///
    /// # Panics
    /// Panics if called from any state other than `Running`.
    pub fn state_completed(&mut self) {
        assert_eq!(
            self.state,
            TaskState::Running,
            "task {} completed from unexpected state {:?}",
            self.name,
            self.state
        );
        self.state = TaskState::Completed;
    }

    /// Move to [`TaskState::Terminating`]. Only meaningful from
    /// `Running`; idempotent if already `Terminating`.
    pub fn state_terminating(&mut self) {
        match self.state {
            TaskState::Running | TaskState::Terminating => {
                self.state = TaskState::Terminating;
            }
            other => panic!("task {} terminating from unexpected state {other:?}", self.name),
        }
    }

    /// Move to [`TaskState::Terminated`]. Idempotent: a task already
    /// `Terminated` stays `Terminated` (mirrors the source's
    /// tolerant tear-down path, since `terminate_job` may reach the
    /// same task twice on overlapping worker reports and job deletes).
    pub fn state_terminated(&mut self) {
        self.state = TaskState::Terminated;
    }

    /// A small JSON view handed to the worker that picks this task up,
    /// so it knows where to connect its child process.
    #[must_use]
    pub fn worker_dict(&self, job_name: &str, context_folder: &str, input_file: &str) -> serde_json::Value {
        serde_json::json!({
            "task_name": self.name,
            "job_name": job_name,
            "context_folder": context_folder,
            "input_file": input_file,
            "host": self.host(),
            "port": self.port(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_job_and_index() {
        let task = Task::new("render-01", 3);
        assert_eq!(task.name, "render-01-3");
    }

    #[test]
    fn happy_path_transitions() {
        let mut task = Task::new("render-01", 0);
        task.state_queued();
        assert_eq!(task.state, TaskState::Queued);
        task.state_running("tcp://worker-a:9000");
        assert_eq!(task.state, TaskState::Running);
        assert_eq!(task.worker_addr.as_deref(), Some("tcp://worker-a:9000"));
        task.state_completed();
        assert_eq!(task.state, TaskState::Completed);
    }

    #[test]
    fn terminated_is_idempotent() {
        let mut task = Task::new("render-01", 0);
        task.state_terminated();
        task.state_terminated();
        assert_eq!(task.state, TaskState::Terminated);
    }

    #[test]
    #[should_panic(expected = "unexpected state")]
    fn completed_from_queued_panics() {
        let mut task = Task::new("render-01", 0);
        task.state_queued();
        task.state_completed();
    }
}
