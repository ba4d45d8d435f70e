// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The scheduler core: the event loop, the admission and assignment
//! loops, and every API/system message handler. Grounded on the
//! source's `SchedulerMaster`.

pub mod tables;

use crate::coordinator_runner::{self, CoordinatorHandle};
use crate::entities::{Job, JobState, TaskState};
use crate::message::{ack_message, error_message, heartbeat_terminate_message, success_message, Message, MessageType};
use crate::transport::TransportServer;
use crate::types::{SchedulerError, SchedulerResult, Slot};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tables::SchedulerTables;

/// Scheduler startup configuration.
pub struct SchedulerConfig {
    /// Address the API channel listens on (default port 13480).
    pub api_addr: SocketAddr,
    /// Address the system channel listens on (default port 13481).
    pub system_addr: SocketAddr,
    /// Coordinator slot pool, in the order slots should be claimed
    /// (last element claimed first; see `spec.md` §12).
    pub slots: Vec<Slot>,
    /// `--nthreads` every task's `pbrt` child process is started with.
    pub cores_per_worker: usize,
    /// How long the event loop blocks per tick when both channels are
    /// idle.
    pub poll_interval: Duration,
}

/// The scheduler process: owns both channels and every in-memory
/// table, and runs the single long-lived event loop described in
/// `spec.md` §4.2.
pub struct Scheduler {
    api_server: TransportServer,
    system_server: TransportServer,
    tables: SchedulerTables,
    cores_per_worker: usize,
    poll_interval: Duration,
    coordinator_runners: HashMap<String, CoordinatorHandle>,
    system_addr: SocketAddr,
}

impl Scheduler {
    /// Bind both channels and construct a scheduler ready to [`run`](Self::run).
    pub async fn bind(config: SchedulerConfig) -> std::io::Result<Self> {
        let api_server = TransportServer::bind(config.api_addr).await?;
        let system_server = TransportServer::bind(config.system_addr).await?;
        let system_addr = system_server.local_addr();
        Ok(Self {
            api_server,
            system_server,
            tables: SchedulerTables::new(config.slots),
            cores_per_worker: config.cores_per_worker,
            poll_interval: config.poll_interval,
            coordinator_runners: HashMap::new(),
            system_addr,
        })
    }

    /// The address the system channel actually bound to.
    #[must_use]
    pub fn system_addr(&self) -> SocketAddr {
        self.system_addr
    }

    /// The address the API channel actually bound to.
    #[must_use]
    pub fn api_addr(&self) -> SocketAddr {
        self.api_server.local_addr()
    }

    /// Run the event loop forever: drain both channels, run the
    /// admission and assignment loops, then block until more work
    /// shows up. Mirrors the source's
    /// `while True: _handle_api_msgs(); _handle_system_msgs();
    /// _start_jobs(); _start_tasks(); self.poller.poll()`.
    pub async fn run(&mut self) -> SchedulerResult<()> {
        loop {
            let mut did_work = false;

            while let Some((identity, msg)) = self.api_server.recv_nonblocking() {
                did_work = true;
                let reply = self.handle_api_message(&msg).await;
                if let Err(err) = self.api_server.send(&identity, reply) {
                    tracing::debug!(error = %err, "api reply delivery failed");
                }
            }

            while let Some((identity, msg)) = self.system_server.recv_nonblocking() {
                did_work = true;
                if let Some(reply) = self.handle_system_message(&identity, &msg).await {
                    if let Err(err) = self.system_server.send(&identity, reply) {
                        tracing::debug!(error = %err, "system reply delivery failed");
                    }
                }
            }

            self.start_jobs();
            self.start_tasks();
            self.warn_on_stalled_coordinators();

            if !did_work {
                self.system_server.poll(self.poll_interval).await;
            }
        }
    }

    /// Surface jobs whose coordinator task has already exited without
    /// reporting back (crash, severed loopback connection): they will
    /// sit in `Running` with `has_coordinator_process == true` forever
    /// since nothing will ever call `handle_job_complete`/
    /// `handle_job_terminate` for them. No automatic recovery is
    /// attempted; an operator decides whether to `delete_job` it.
    fn warn_on_stalled_coordinators(&self) {
        for (name, handle) in &self.coordinator_runners {
            let stuck = self
                .tables
                .jobs
                .get(name)
                .is_some_and(|j| j.state == JobState::Running && j.has_coordinator_process);
            if stuck && handle.is_finished() {
                tracing::warn!(job = %name, "coordinator task exited without reporting back; job will not reap on its own");
            }
        }
    }

    // ---- API handlers -------------------------------------------------

    async fn handle_api_message(&mut self, msg: &Message) -> Message {
        match msg.msg_type {
            MessageType::AssignJob => self.handle_assign_job(&msg.data),
            MessageType::DeleteJob => self.handle_delete_job(&msg.data).await,
            MessageType::QueryJobs => self.handle_query_jobs(),
            MessageType::QueryJob => self.handle_query_job(&msg.data),
            MessageType::QueryWorkers => self.handle_query_workers(),
            other => error_message(format!("{other:?} is not a valid API message")),
        }
    }

    fn handle_assign_job(&mut self, data: &serde_json::Value) -> Message {
        let (name, context_folder, input_file, num_workers) =
            match required_job_fields(data) {
                Ok(fields) => fields,
                Err(err) => return error_message(err),
            };

        if self.tables.jobs.contains_key(&name) {
            return error_message(format!("Duplicate job {name}"));
        }

        let mut job = Job::new(name.clone(), context_folder, input_file, num_workers, self.cores_per_worker);
        job.state_queued();
        self.tables.queued_jobs.push_back(name.clone());
        self.tables.jobs.insert(name, job);
        success_message(serde_json::json!({}))
    }

    async fn handle_delete_job(&mut self, data: &serde_json::Value) -> Message {
        let Some(name) = data.get("name").and_then(|v| v.as_str()) else {
            return error_message("missing field: name");
        };
        if !self.tables.jobs.contains_key(name) {
            return error_message(format!("No such job {name}"));
        }
        if let Some(job) = self.tables.jobs.get_mut(name) {
            job.info = "Terminated by User".to_string();
        }
        let name = name.to_string();
        self.terminate_job(&name).await;
        success_message(serde_json::json!({}))
    }

    fn handle_query_jobs(&self) -> Message {
        let jobs: Vec<_> = self.tables.jobs.values().map(Job::summary_dict).collect();
        success_message(serde_json::json!({ "jobs": jobs }))
    }

    fn handle_query_job(&self, data: &serde_json::Value) -> Message {
        let Some(name) = data.get("name").and_then(|v| v.as_str()) else {
            return error_message("missing field: name");
        };
        match self.tables.jobs.get(name) {
            Some(job) => success_message(job.detail_dict()),
            None => error_message(format!("No such job {name}")),
        }
    }

    fn handle_query_workers(&self) -> Message {
        let workers: Vec<_> = self.tables.workers.values().map(|w| w.detail_dict()).collect();
        success_message(serde_json::json!({ "workers": workers }))
    }

    // ---- system handlers ------------------------------------------------

    async fn handle_system_message(&mut self, identity: &str, msg: &Message) -> Option<Message> {
        match msg.msg_type {
            MessageType::WorkerAvailable => {
                self.handle_worker_available(identity);
                None
            }
            MessageType::WorkerHeartbeat => Some(self.handle_worker_heartbeat(identity, &msg.data)),
            MessageType::WorkerComplete => Some(self.handle_worker_complete(identity, &msg.data).await),
            MessageType::WorkerTerminate => Some(self.handle_worker_terminate(identity, &msg.data).await),
            MessageType::JobComplete => Some(self.handle_job_complete(&msg.data).await),
            MessageType::JobTerminate => Some(self.handle_job_terminate(&msg.data).await),
            other => Some(error_message(format!("{other:?} is not a valid system message"))),
        }
    }

    fn handle_worker_available(&mut self, identity: &str) {
        self.tables.worker_mut(identity).touch();
        self.tables.queued_workers.push(identity.to_string());
    }

    fn verify_worker_report(&self, identity: &str, task_name: &str) -> SchedulerResult<()> {
        let worker = self
            .tables
            .workers
            .get(identity)
            .ok_or_else(|| SchedulerError::invariant(format!("report from unknown worker {identity}")))?;
        match &worker.current_task {
            Some(current) if current == task_name => Ok(()),
            Some(current) => Err(SchedulerError::invariant(format!(
                "worker {identity} reported on {task_name} but is assigned {current}"
            ))),
            None => Err(SchedulerError::invariant(format!(
                "worker {identity} reported on {task_name} but has no assignment"
            ))),
        }
    }

    fn handle_worker_heartbeat(&mut self, identity: &str, data: &serde_json::Value) -> Message {
        let Some(task_name) = data.get("task_name").and_then(|v| v.as_str()) else {
            return error_message("missing field: task_name");
        };
        if let Err(err) = self.verify_worker_report(identity, task_name) {
            return error_message(err.to_string());
        }
        self.tables.worker_mut(identity).touch();

        let task_state = self
            .tables
            .jobs
            .values()
            .flat_map(|j| j.tasks.iter())
            .find(|t| t.name == task_name)
            .map(|t| t.state);

        match task_state {
            Some(TaskState::Terminating) => heartbeat_terminate_message(),
            _ => ack_message(),
        }
    }

    async fn handle_worker_complete(&mut self, identity: &str, data: &serde_json::Value) -> Message {
        let Some(task_name) = data.get("task_name").and_then(|v| v.as_str()).map(str::to_string) else {
            return error_message("missing field: task_name");
        };
        if let Err(err) = self.verify_worker_report(identity, &task_name) {
            return error_message(err.to_string());
        }

        let job_name = self.job_name_for_task(&task_name);
        if let Some(job_name) = &job_name {
            if let Some(job) = self.tables.jobs.get_mut(job_name) {
                if let Some(task) = job.tasks.iter_mut().find(|t| t.name == task_name) {
                    task.state_completed();
                }
            }
        }
        self.tables.running_tasks.remove(&task_name);
        self.tables.worker_mut(identity).clear();

        if let Some(job_name) = job_name {
            self.try_reap(&job_name);
        }
        ack_message()
    }

    async fn handle_worker_terminate(&mut self, identity: &str, data: &serde_json::Value) -> Message {
        let Some(task_name) = data.get("task_name").and_then(|v| v.as_str()).map(str::to_string) else {
            return error_message("missing field: task_name");
        };
        let returncode = data.get("returncode").and_then(serde_json::Value::as_i64).unwrap_or(-1);
        if let Err(err) = self.verify_worker_report(identity, &task_name) {
            return error_message(err.to_string());
        }

        let job_name = self.job_name_for_task(&task_name);
        if let Some(job_name) = &job_name {
            if let Some(job) = self.tables.jobs.get_mut(job_name) {
                if let Some(task) = job.tasks.iter_mut().find(|t| t.name == task_name) {
                    task.state_terminated();
                }
            }
        }
        self.tables.running_tasks.remove(&task_name);
        self.tables.worker_mut(identity).clear();

        if let Some(job_name) = &job_name {
            let already_terminating = self
                .tables
                .jobs
                .get(job_name)
                .is_some_and(|j| j.state == JobState::Terminating);
            if !already_terminating {
                if let Some(job) = self.tables.jobs.get_mut(job_name) {
                    job.info = format!("Worker side error ({returncode})");
                }
                self.terminate_job(job_name).await;
            }
            self.try_reap(job_name);
        }
        ack_message()
    }

    async fn handle_job_complete(&mut self, data: &serde_json::Value) -> Message {
        let Some(job_name) = data.get("job_name").and_then(|v| v.as_str()).map(str::to_string) else {
            return error_message("missing field: job_name");
        };
        if let Some(job) = self.tables.jobs.get_mut(&job_name) {
            job.has_coordinator_process = false;
            job.info = "Completed (0)".to_string();
        }
        self.try_reap(&job_name);
        ack_message()
    }

    async fn handle_job_terminate(&mut self, data: &serde_json::Value) -> Message {
        let Some(job_name) = data.get("job_name").and_then(|v| v.as_str()).map(str::to_string) else {
            return error_message("missing field: job_name");
        };
        let returncode = data.get("returncode").and_then(serde_json::Value::as_i64).unwrap_or(-1);
        if let Some(job) = self.tables.jobs.get_mut(&job_name) {
            job.has_coordinator_process = false;
            job.info = format!("Terminated ({returncode})");
        }
        self.terminate_job(&job_name).await;
        self.try_reap(&job_name);
        ack_message()
    }

    fn job_name_for_task(&self, task_name: &str) -> Option<String> {
        self.tables
            .jobs
            .values()
            .find(|j| j.tasks.iter().any(|t| t.name == task_name))
            .map(|j| j.name.clone())
    }

    // ---- tear-down and reaping ------------------------------------------

    /// Tear a job down: drop it from the admission queue if it never
    /// started, stop its coordinator if it did, mark every non-terminal
    /// task `Terminating`/`Terminated` as appropriate, then attempt to
    /// reap it immediately in case nothing was ever in flight.
    async fn terminate_job(&mut self, name: &str) {
        let Some(job) = self.tables.jobs.get(name) else {
            return;
        };

        match job.state {
            JobState::Queued => {
                self.tables.queued_jobs.retain(|n| n != name);
            }
            JobState::Running | JobState::Terminating => {
                if let Some(handle) = self.coordinator_runners.remove(name) {
                    handle.terminate().await;
                }
            }
            JobState::Initialized => {}
        }

        let Some(job) = self.tables.jobs.get_mut(name) else {
            return;
        };
        job.state_terminating();

        let mut terminated_task_names = Vec::new();
        for task in &mut job.tasks {
            match task.state {
                TaskState::Queued => {
                    terminated_task_names.push(task.name.clone());
                    task.state_terminated();
                }
                TaskState::Running => task.state_terminating(),
                TaskState::Terminating | TaskState::Completed | TaskState::Terminated => {}
                TaskState::Initialized => task.state_terminated(),
            }
        }
        self.tables.queued_tasks.retain(|t| !terminated_task_names.contains(t));

        self.try_reap(name);
    }

    /// If `name`'s job has no tasks left in flight and no coordinator
    /// process running, release its slot and drop it from the tables.
    fn try_reap(&mut self, name: &str) {
        let Some(job) = self.tables.jobs.get(name) else {
            return;
        };
        if !job.is_reapable() {
            return;
        }
        if let Some(slot) = job.slot.clone() {
            self.tables.slot_job_map.remove(&slot.to_string());
            self.tables.release_slot(slot);
        }
        tracing::info!(job = %name, "reaped");
        self.tables.jobs.remove(name);
    }

    // ---- admission and assignment loops ---------------------------------

    /// Admit queued jobs onto free coordinator slots, FIFO, and spawn
    /// each one's coordinator process.
    fn start_jobs(&mut self) {
        while !self.tables.available_slots.is_empty() {
            let Some(job_name) = self.tables.pop_queued_job() else {
                break;
            };
            let Some(slot) = self.tables.claim_slot() else {
                // No slots freed between the loop guard and the pop;
                // put the job back at the front and stop.
                self.tables.queued_jobs.push_front(job_name);
                break;
            };
            self.start_job(&job_name, slot);
        }
    }

    fn start_job(&mut self, job_name: &str, slot: Slot) {
        let Some(job) = self.tables.jobs.get_mut(job_name) else {
            return;
        };
        job.state_running(slot.clone());
        self.tables.slot_job_map.insert(slot.to_string(), job_name.to_string());
        for task in job.tasks.iter().rev() {
            self.tables.queued_tasks.push(task.name.clone());
        }

        let handle = coordinator_runner::spawn(job, self.system_addr);
        self.coordinator_runners.insert(job_name.to_string(), handle);
        tracing::info!(job = %job_name, slot = %slot, "admitted");
    }

    /// Match queued workers to queued tasks, LIFO on both sides, and
    /// hand each matched worker its `worker_newtask` message.
    fn start_tasks(&mut self) {
        while !self.tables.queued_workers.is_empty() && !self.tables.queued_tasks.is_empty() {
            let Some(worker_addr) = self.tables.pop_queued_worker() else {
                break;
            };
            let Some(task_name) = self.tables.pop_queued_task() else {
                self.tables.queued_workers.push(worker_addr);
                break;
            };
            self.start_task(&worker_addr, &task_name);
        }
    }

    fn start_task(&mut self, worker_addr: &str, task_name: &str) {
        let Some(job_name) = self.job_name_for_task(task_name) else {
            return;
        };
        let Some(job) = self.tables.jobs.get_mut(&job_name) else {
            return;
        };
        let Some(task) = job.tasks.iter_mut().find(|t| t.name == task_name) else {
            return;
        };
        task.state_running(worker_addr.to_string());
        let payload = task.worker_dict(&job.name, &job.context_folder, &job.input_file);

        self.tables.running_tasks.insert(task_name.to_string(), worker_addr.to_string());
        self.tables.worker_mut(worker_addr).assign(task_name.to_string());

        if let Err(err) = self
            .system_server
            .send(worker_addr, Message::new(MessageType::WorkerNewTask, payload))
        {
            tracing::warn!(worker = %worker_addr, error = %err, "failed to deliver task assignment");
        }
    }
}

fn required_job_fields(data: &serde_json::Value) -> Result<(String, String, String, usize), String> {
    let name = data
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or("missing field: name")?
        .to_string();
    let context_folder = data
        .get("context_folder")
        .and_then(|v| v.as_str())
        .ok_or("missing field: context_folder")?
        .to_string();
    let input_file = data
        .get("input_file")
        .and_then(|v| v.as_str())
        .ok_or("missing field: input_file")?
        .to_string();
    let num_workers = data
        .get("num_workers")
        .and_then(serde_json::Value::as_u64)
        .ok_or("missing field: num_workers")? as usize;
    Ok((name, context_folder, input_file, num_workers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    async fn scheduler_with_one_slot() -> Scheduler {
        Scheduler {
            api_server: TransportServer::bind("127.0.0.1:0").await.unwrap(),
            system_server: TransportServer::bind("127.0.0.1:0").await.unwrap(),
            tables: SchedulerTables::new(vec![Slot::new("127.0.0.1", 19001)]),
            cores_per_worker: 4,
            poll_interval: Duration::from_millis(50),
            coordinator_runners: HashMap::new(),
            system_addr: "127.0.0.1:0".parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn assign_job_rejects_duplicates() {
        let mut scheduler = scheduler_with_one_slot().await;
        let payload = serde_json::json!({
            "name": "render-01",
            "context_folder": "/scenes/01",
            "input_file": "scene.pbrt",
            "num_workers": 2,
        });
        let first = scheduler.handle_assign_job(&payload);
        assert_eq!(first.msg_type, MessageType::Success);

        let second = scheduler.handle_assign_job(&payload);
        assert_eq!(second.msg_type, MessageType::Error);
        assert_eq!(second.data["reason"], "Duplicate job render-01");
    }

    #[tokio::test]
    async fn query_job_reports_missing_job() {
        let scheduler = scheduler_with_one_slot().await;
        let reply = scheduler.handle_query_job(&serde_json::json!({ "name": "nope" }));
        assert_eq!(reply.msg_type, MessageType::Error);
    }

    #[tokio::test]
    async fn assign_job_requires_every_field() {
        let mut scheduler = scheduler_with_one_slot().await;
        let reply = scheduler.handle_assign_job(&serde_json::json!({ "name": "render-02" }));
        assert_eq!(reply.msg_type, MessageType::Error);
    }

    #[tokio::test]
    async fn admission_claims_a_slot_and_queues_tasks() {
        let mut scheduler = scheduler_with_one_slot().await;
        let payload = serde_json::json!({
            "name": "render-03",
            "context_folder": "/scenes/03",
            "input_file": "scene.pbrt",
            "num_workers": 2,
        });
        scheduler.handle_assign_job(&payload);
        scheduler.start_jobs();
        assert!(scheduler.tables.available_slots.is_empty());
        assert_eq!(scheduler.tables.queued_tasks.len(), 2);
        assert_eq!(
            scheduler.tables.jobs.get("render-03").unwrap().state,
            JobState::Running
        );
    }
}
