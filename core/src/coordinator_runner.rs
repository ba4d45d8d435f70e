// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! One task per admitted job: spawns and waits on the job's `pbrt`
//! coordinator child process, then reports the outcome back to the
//! scheduler over the system channel — the async-task analogue of the
//! source's `JobRunner` thread.

use crate::entities::Job;
use crate::message::{Message, MessageType};
use crate::transport::TransportClient;
use std::fs::OpenOptions;
use std::os::unix::fs::PermissionsExt;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, Notify};

/// A handle to a running coordinator task, used to request early
/// termination (job deletion, worker-side fatal error).
pub struct CoordinatorHandle {
    child: Arc<Mutex<Option<Child>>>,
    spawned: Arc<Notify>,
    terminated: Arc<AtomicBool>,
    join: tokio::task::JoinHandle<()>,
}

impl CoordinatorHandle {
    /// Send the coordinator's child process a kill signal. Safe to
    /// call before the child has actually been spawned yet — waits on
    /// `spawned` instead of the source's `time.sleep(1)` busy-loop —
    /// and safe to call twice: the second call is a no-op
    /// (`spec.md` §4.3's idempotent-terminate requirement).
    pub async fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        self.spawned.notified().await;
        if let Some(child) = self.child.lock().await.as_mut() {
            let _ = child.start_kill();
        }
    }

    /// Wait for the coordinator task itself (spawn, run, report) to
    /// finish. Used only by tests and graceful-shutdown paths.
    pub async fn join(self) {
        let _ = self.join.await;
    }

    /// True if the coordinator task has already exited. A job stuck in
    /// `Running` with `has_coordinator_process == true` whose handle
    /// reports finished here has lost its report-back message (crash,
    /// severed connection) and will never reap on its own; the
    /// scheduler surfaces this rather than trying to recover it.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Spawn the coordinator process for `job` and report its outcome back
/// to the scheduler's system channel once it exits.
///
/// `job` must already be in [`crate::entities::JobState::Running`]
/// (i.e. `state_running` has been called, so `job.slot` is set).
/// `system_addr` is the scheduler's own system-channel listen address,
/// used as a loopback client connection the same way a worker connects.
pub fn spawn(job: &Job, system_addr: std::net::SocketAddr) -> CoordinatorHandle {
    let job_name = job.name.clone();
    let log_dir = job.log_dir();
    let args = job.coordinator_args();
    let context_folder = job.context_folder.clone();

    let child_slot: Arc<Mutex<Option<Child>>> = Arc::new(Mutex::new(None));
    let spawned = Arc::new(Notify::new());
    let terminated = Arc::new(AtomicBool::new(false));

    let task_child = child_slot.clone();
    let task_spawned = spawned.clone();

    let join = tokio::spawn(async move {
        if let Err(err) = std::fs::create_dir_all(&log_dir) {
            tracing::error!(job = %job_name, error = %err, "failed to create log directory");
        } else if let Ok(meta) = std::fs::metadata(&log_dir) {
            let mut perms = meta.permissions();
            perms.set_mode(0o777);
            let _ = std::fs::set_permissions(&log_dir, perms);
        }

        let log_path = format!("{log_dir}/coordinator.log");
        let log_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&log_path);

        let mut command = Command::new("pbrt");
        command.current_dir(&context_folder).args(&args);
        match log_file {
            Ok(file) => {
                let stderr_file = file.try_clone().unwrap_or_else(|_| {
                    OpenOptions::new().create(true).append(true).open(&log_path).expect("reopen log")
                });
                command.stdout(Stdio::from(file)).stderr(Stdio::from(stderr_file));
            }
            Err(err) => {
                tracing::warn!(job = %job_name, error = %err, "could not open coordinator log file");
            }
        }

        let spawn_result = command.spawn();
        let returncode = match spawn_result {
            Ok(child) => {
                *task_child.lock().await = Some(child);
                task_spawned.notify_waiters();
                let mut guard = task_child.lock().await;
                match guard.as_mut().expect("just inserted").wait().await {
                    Ok(status) => status.code().unwrap_or(-1),
                    Err(err) => {
                        tracing::error!(job = %job_name, error = %err, "coordinator wait failed");
                        -1
                    }
                }
            }
            Err(err) => {
                tracing::error!(job = %job_name, error = %err, "failed to spawn coordinator process");
                task_spawned.notify_waiters();
                -1
            }
        };

        report(&job_name, returncode, system_addr).await;
    });

    CoordinatorHandle {
        child: child_slot,
        spawned,
        terminated,
        join,
    }
}

async fn report(job_name: &str, returncode: i32, system_addr: std::net::SocketAddr) {
    let msg_type = if returncode == 0 {
        MessageType::JobComplete
    } else {
        MessageType::JobTerminate
    };
    let msg = Message::new(
        msg_type,
        serde_json::json!({ "job_name": job_name, "returncode": returncode }),
    );

    match TransportClient::connect(system_addr).await {
        Ok(mut client) => match client.request(msg).await {
            Ok(reply) if reply.msg_type == MessageType::Ack => {}
            Ok(other) => {
                tracing::warn!(job = %job_name, reply = ?other.msg_type, "unexpected reply to job report");
            }
            Err(err) => {
                tracing::error!(job = %job_name, error = %err, "failed to report job outcome");
            }
        },
        Err(err) => {
            tracing::error!(job = %job_name, error = %err, "failed to connect to report job outcome");
        }
    }
}
