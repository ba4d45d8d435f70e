// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A render job: a `pbrt` coordinator process plus `num_workers` tasks.

use super::task::{Task, TaskState};
use crate::types::Slot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A job's place in its lifecycle. There is deliberately no terminal
/// "completed" state: a job that finishes cleanly is reaped and
/// removed from the scheduler's tables the same as one that is torn
/// down early (`spec.md` §3, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Constructed, not yet visible to the admission loop.
    Initialized,
    /// Waiting in the FIFO queue for a free coordinator slot.
    Queued,
    /// Admitted: holds a slot, its coordinator process is running.
    Running,
    /// Tearing down: `terminate_job` has been invoked, some tasks may
    /// still be in flight.
    Terminating,
}

/// A render job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job name.
    pub name: String,
    /// Absolute path to the job's working/context directory.
    pub context_folder: String,
    /// The `.pbrt` scene file to render, relative to `context_folder`.
    pub input_file: String,
    /// Number of worker tasks this job spreads across.
    pub num_workers: usize,
    /// Rendering threads each worker's `pbrt` child should use.
    pub cores_per_worker: usize,
    /// The coordinator slot this job is bound to, once admitted.
    pub slot: Option<Slot>,
    /// Current lifecycle state.
    pub state: JobState,
    /// When the job was queued.
    pub queued_at: DateTime<Utc>,
    /// When the job was admitted (moved to `Running`), if it has been.
    pub started_at: Option<DateTime<Utc>>,
    /// Human-readable status detail surfaced by `query_job`/`query_jobs`.
    pub info: String,
    /// Whether the coordinator child process is known to still be
    /// running (or expected to start). Reaping requires this to be
    /// false as well as every task terminal.
    pub has_coordinator_process: bool,
    /// This job's tasks, `num_workers` of them, indices `0..num_workers`.
    pub tasks: Vec<Task>,
}

impl Job {
    /// Construct a freshly admitted-for-queueing job with
    /// `num_workers` tasks, all `Initialized`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        context_folder: impl Into<String>,
        input_file: impl Into<String>,
        num_workers: usize,
        cores_per_worker: usize,
    ) -> Self {
        let name = name.into();
        let tasks = (0..num_workers).map(|i| Task::new(&name, i)).collect();
        Self {
            name,
            context_folder: context_folder.into(),
            input_file: input_file.into(),
            num_workers,
            cores_per_worker,
            slot: None,
            state: JobState::Initialized,
            queued_at: Utc::now(),
            started_at: None,
            info: String::new(),
            has_coordinator_process: false,
            tasks,
        }
    }

    /// The `{job_name}-logs` directory this job's coordinator and task
    /// stdout/stderr are redirected into.
    #[must_use]
    pub fn log_dir(&self) -> String {
        format!("{}/{}-logs", self.context_folder, self.name)
    }

    /// Argv for the coordinator (`--dist-master`) child process.
    #[must_use]
    pub fn coordinator_args(&self) -> Vec<String> {
        let slot = self.slot.as_ref().expect("coordinator_args before admission");
        vec![
            self.input_file.clone(),
            "--dist-master".to_string(),
            "--dist-nworkers".to_string(),
            self.num_workers.to_string(),
            "--dist-port".to_string(),
            slot.port.to_string(),
            "--dist-context".to_string(),
            self.name.clone(),
        ]
    }

    /// Move to [`JobState::Queued`].
    ///
    /// # Panics
    /// Panics if called from any state other than `Initialized`.
    pub fn state_queued(&mut self) {
        assert_eq!(self.state, JobState::Initialized);
        self.state = JobState::Queued;
    }

    /// Move to [`JobState::Running`], claim `slot`, and queue every
    /// task (each moves `Initialized -> Queued`).
    ///
    /// # Panics
    /// Panics if called from any state other than `Queued`.
    pub fn state_running(&mut self, slot: Slot) {
        assert_eq!(self.state, JobState::Queued);
        self.state = JobState::Running;
        self.started_at = Some(Utc::now());
        self.has_coordinator_process = true;
        for task in &mut self.tasks {
            task.slot = Some(slot.clone());
            task.state_queued();
        }
        self.slot = Some(slot);
    }

    /// Move to [`JobState::Terminating`]. Idempotent.
    pub fn state_terminating(&mut self) {
        self.state = JobState::Terminating;
    }

    /// Count of tasks in the given state.
    fn count_in(&self, state: TaskState) -> usize {
        self.tasks.iter().filter(|t| t.state == state).count()
    }

    /// Tasks that have reached `Completed`.
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.count_in(TaskState::Completed)
    }

    /// Tasks that have reached `Terminated`.
    #[must_use]
    pub fn terminated_count(&self) -> usize {
        self.count_in(TaskState::Terminated)
    }

    /// Tasks currently `Terminating`.
    #[must_use]
    pub fn terminating_count(&self) -> usize {
        self.count_in(TaskState::Terminating)
    }

    /// Tasks currently `Running`.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.count_in(TaskState::Running)
    }

    /// Tasks currently `Queued`.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.count_in(TaskState::Queued)
    }

    /// True once every task has reached a terminal state
    /// (`Completed` or `Terminated`) and the coordinator process is no
    /// longer running — the condition `try_reap` waits for before
    /// releasing this job's slot.
    #[must_use]
    pub fn is_reapable(&self) -> bool {
        !self.has_coordinator_process
            && self.completed_count() + self.terminated_count() == self.tasks.len()
    }

    /// A compact view for `query_jobs`.
    #[must_use]
    pub fn summary_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "state": self.state,
            "info": self.info,
            "num_workers": self.num_workers,
            "completed": self.completed_count(),
            "running": self.running_count(),
            "queued": self.queued_count(),
        })
    }

    /// A detailed view for `query_job`, including every task.
    #[must_use]
    pub fn detail_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "state": self.state,
            "info": self.info,
            "context_folder": self.context_folder,
            "input_file": self.input_file,
            "num_workers": self.num_workers,
            "cores_per_worker": self.cores_per_worker,
            "slot": self.slot,
            "queued_at": self.queued_at,
            "started_at": self.started_at,
            "tasks": self.tasks.iter().map(|t| serde_json::json!({
                "name": t.name,
                "state": t.state,
                "worker_addr": t.worker_addr,
            })).collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        Job::new("render-01", "/scenes/01", "scene.pbrt", 3, 4)
    }

    #[test]
    fn construction_fans_out_tasks() {
        let job = sample_job();
        assert_eq!(job.tasks.len(), 3);
        assert_eq!(job.tasks[2].name, "render-01-2");
    }

    #[test]
    fn admission_queues_every_task() {
        let mut job = sample_job();
        job.state_queued();
        job.state_running(Slot::new("127.0.0.1", 14001));
        assert_eq!(job.queued_count(), 3);
        assert!(job.tasks.iter().all(|t| t.slot.is_some()));
    }

    #[test]
    fn reapable_once_all_tasks_terminal_and_no_coordinator() {
        let mut job = sample_job();
        job.state_queued();
        job.state_running(Slot::new("127.0.0.1", 14001));
        for task in &mut job.tasks {
            task.state_running("tcp://worker:1");
            task.state_completed();
        }
        assert!(!job.is_reapable(), "coordinator process still marked running");
        job.has_coordinator_process = false;
        assert!(job.is_reapable());
    }

    #[test]
    fn coordinator_args_carries_slot_port() {
        let mut job = sample_job();
        job.state_queued();
        job.state_running(Slot::new("127.0.0.1", 14009));
        let args = job.coordinator_args();
        assert!(args.contains(&"14009".to_string()));
        assert!(args.contains(&"--dist-master".to_string()));
    }
}
