// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The worker agent's main loop: block for a task, run it, report the
//! outcome, repeat. Mirrors the source's `SchedulerSlave`.

use crate::message::{Message, MessageType};
use crate::transport::TransportClient;
use crate::types::{SchedulerError, SchedulerResult};
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

/// Startup configuration for a worker agent process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Scheduler's system-channel address to connect to.
    pub scheduler_addr: std::net::SocketAddr,
    /// Seconds to sleep between heartbeats while a task is running.
    pub heartbeat_interval: Duration,
    /// `--nthreads` passed to each task's `pbrt` child process.
    pub nthreads: usize,
}

/// The payload a `worker_newtask` message carries, matching
/// [`crate::entities::task::Task::worker_dict`].
#[derive(Debug, Deserialize)]
struct NewTaskPayload {
    task_name: String,
    job_name: String,
    context_folder: String,
    input_file: String,
    host: String,
    port: u16,
}

/// Run the worker agent loop until the process is asked to stop (never
/// returns under normal operation — callers wrap this in their own
/// signal-handling `select!`).
pub async fn run(config: WorkerConfig) -> SchedulerResult<()> {
    let mut client = TransportClient::connect(config.scheduler_addr)
        .await
        .map_err(|e| SchedulerError::Transport(e.to_string()))?;

    loop {
        let task = request_task(&mut client).await?;
        run_task(&mut client, &config, task).await?;
    }
}

async fn request_task(client: &mut TransportClient) -> SchedulerResult<NewTaskPayload> {
    loop {
        let reply = client
            .request(Message::new(MessageType::WorkerAvailable, serde_json::json!({})))
            .await?;
        if reply.msg_type != MessageType::WorkerNewTask {
            tracing::warn!(reply = ?reply.msg_type, "expected worker_newtask, retrying");
            continue;
        }
        let payload: NewTaskPayload = serde_json::from_value(reply.data)?;
        return Ok(payload);
    }
}

async fn run_task(client: &mut TransportClient, config: &WorkerConfig, task: NewTaskPayload) -> SchedulerResult<()> {
    let log_dir = format!("{}/{}-logs", task.context_folder, task.job_name);
    std::fs::create_dir_all(&log_dir).map_err(SchedulerError::ChildProcess)?;
    let log_path = format!("{log_dir}/{}.log", task.task_name);
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&log_path)
        .map_err(SchedulerError::ChildProcess)?;
    let stderr_file = log_file.try_clone().map_err(SchedulerError::ChildProcess)?;

    let mut child: Child = Command::new("pbrt")
        .current_dir(&task.context_folder)
        .arg(&task.input_file)
        .args([
            "--dist-slave",
            "--dist-host",
            &task.host,
            "--dist-port",
            &task.port.to_string(),
            "--dist-context",
            &task.job_name,
            "--nthreads",
            &config.nthreads.to_string(),
        ])
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(stderr_file))
        .spawn()
        .map_err(SchedulerError::ChildProcess)?;

    loop {
        match child.try_wait().map_err(SchedulerError::ChildProcess)? {
            Some(status) => {
                let returncode = status.code().unwrap_or(-1);
                let (msg_type, field) = if returncode == 0 {
                    (MessageType::WorkerComplete, "returncode")
                } else {
                    (MessageType::WorkerTerminate, "returncode")
                };
                let reply = client
                    .request(Message::new(
                        msg_type,
                        serde_json::json!({ "task_name": task.task_name, field: returncode }),
                    ))
                    .await?;
                if reply.msg_type != MessageType::Ack {
                    return Err(SchedulerError::invariant(format!(
                        "scheduler replied {:?} to task report, expected ack",
                        reply.msg_type
                    )));
                }
                return Ok(());
            }
            None => {
                let reply = client
                    .request(Message::new(
                        MessageType::WorkerHeartbeat,
                        serde_json::json!({ "task_name": task.task_name }),
                    ))
                    .await?;
                match reply.msg_type {
                    MessageType::HeartbeatTerminate => {
                        let _ = child.start_kill();
                    }
                    MessageType::Ack => {
                        tokio::time::sleep(config.heartbeat_interval).await;
                    }
                    other => {
                        return Err(SchedulerError::invariant(format!(
                            "scheduler replied {other:?} to heartbeat, expected ack or heartbeat_terminate"
                        )));
                    }
                }
            }
        }
    }
}
