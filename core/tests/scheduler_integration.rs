// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Black-box scenarios against a real scheduler process, driven over
//! the same wire protocol the CLI bridge and worker agent use: no
//! access to scheduler internals, just `assign_job`/`delete_job`/
//! `query_*` on the API channel and `worker_available`/
//! `worker_heartbeat`/`worker_complete`/`worker_terminate` on the
//! system channel. Scenarios are named after the literal cases this
//! system's design was checked against: the happy path, queueing,
//! user-initiated deletion of a queued and of a running job,
//! worker-side failure propagation, and duplicate-job rejection.
//!
//! Every job here runs a real coordinator child process — a `pbrt`
//! stand-in script placed on `PATH` for the test binary, since the
//! actual renderer is never present in a test environment. The stub
//! exits zero quickly, standing in for a successful render.

use render_scheduler_core::prelude::*;
use std::os::unix::fs::PermissionsExt;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::time::sleep;

fn pbrt_stub_dir() -> &'static std::path::Path {
    static DIR: OnceLock<tempfile::TempDir> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = tempfile::tempdir().expect("tempdir for pbrt stub");
        let script = dir.path().join("pbrt");
        std::fs::write(&script, "#!/bin/sh\nsleep 0.15\nexit 0\n").expect("write pbrt stub");
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).unwrap();

        let existing = std::env::var("PATH").unwrap_or_default();
        std::env::set_var("PATH", format!("{}:{existing}", dir.path().display()));
        dir
    })
    .path()
}

/// Bind a scheduler on ephemeral ports with the given slot pool and run
/// its event loop in the background for the rest of the test.
async fn spawn_scheduler(slots: Vec<Slot>) -> (std::net::SocketAddr, std::net::SocketAddr) {
    pbrt_stub_dir();
    let config = SchedulerConfig {
        api_addr: "127.0.0.1:0".parse().unwrap(),
        system_addr: "127.0.0.1:0".parse().unwrap(),
        slots,
        cores_per_worker: 1,
        poll_interval: Duration::from_millis(20),
    };
    let mut scheduler = Scheduler::bind(config).await.expect("bind scheduler");
    let api_addr = scheduler.api_addr();
    let system_addr = scheduler.system_addr();
    tokio::spawn(async move {
        let _ = scheduler.run().await;
    });
    (api_addr, system_addr)
}

async fn api_call(addr: std::net::SocketAddr, msg_type: MessageType, data: serde_json::Value) -> Message {
    let mut client = TransportClient::connect(addr).await.expect("connect to api channel");
    client.request(Message::new(msg_type, data)).await.expect("api round trip")
}

async fn assign_job(addr: std::net::SocketAddr, name: &str, num_workers: usize) -> Message {
    api_call(
        addr,
        MessageType::AssignJob,
        serde_json::json!({
            "name": name,
            "context_folder": "/tmp/scheduler-it",
            "input_file": "scene.pbrt",
            "num_workers": num_workers,
        }),
    )
    .await
}

async fn query_jobs(addr: std::net::SocketAddr) -> Vec<serde_json::Value> {
    let reply = api_call(addr, MessageType::QueryJobs, serde_json::json!({})).await;
    reply.data["jobs"].as_array().cloned().unwrap_or_default()
}

fn job_state<'a>(jobs: &'a [serde_json::Value], name: &str) -> Option<&'a str> {
    jobs.iter().find(|j| j["name"] == name).and_then(|j| j["state"].as_str())
}

/// Poll `check` every 10ms until it returns `true`, or panic once
/// `timeout` elapses — the standard shape for asserting on an
/// asynchronous system without a dedicated event to wait on.
async fn wait_for<F, Fut>(timeout: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition did not become true within {timeout:?}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// A simulated worker: one persistent connection to the system
/// channel, used exactly the way `worker_agent::run` drives it.
struct FakeWorker {
    client: TransportClient,
}

struct AssignedTask {
    task_name: String,
    host: String,
    port: u16,
}

impl FakeWorker {
    async fn connect(system_addr: std::net::SocketAddr) -> Self {
        Self {
            client: TransportClient::connect(system_addr).await.expect("connect to system channel"),
        }
    }

    async fn become_available(&mut self) -> AssignedTask {
        let reply = self
            .client
            .request(Message::new(MessageType::WorkerAvailable, serde_json::json!({})))
            .await
            .expect("worker_available round trip");
        assert_eq!(reply.msg_type, MessageType::WorkerNewTask);
        AssignedTask {
            task_name: reply.data["task_name"].as_str().unwrap().to_string(),
            host: reply.data["host"].as_str().unwrap().to_string(),
            port: reply.data["port"].as_u64().unwrap() as u16,
        }
    }

    async fn heartbeat(&mut self, task_name: &str) -> MessageType {
        let reply = self
            .client
            .request(Message::new(MessageType::WorkerHeartbeat, serde_json::json!({ "task_name": task_name })))
            .await
            .expect("heartbeat round trip");
        reply.msg_type
    }

    async fn complete(&mut self, task_name: &str) {
        let reply = self
            .client
            .request(Message::new(MessageType::WorkerComplete, serde_json::json!({ "task_name": task_name })))
            .await
            .expect("worker_complete round trip");
        assert_eq!(reply.msg_type, MessageType::Ack);
    }

    async fn fail(&mut self, task_name: &str, returncode: i64) {
        let reply = self
            .client
            .request(Message::new(
                MessageType::WorkerTerminate,
                serde_json::json!({ "task_name": task_name, "returncode": returncode }),
            ))
            .await
            .expect("worker_terminate round trip");
        assert_eq!(reply.msg_type, MessageType::Ack);
    }
}

#[tokio::test]
async fn s1_happy_path_reaps_and_frees_the_slot() {
    let (api_addr, system_addr) = spawn_scheduler(vec![Slot::new("127.0.0.1", 15000)]).await;

    let reply = assign_job(api_addr, "s1-job", 2).await;
    assert_eq!(reply.msg_type, MessageType::Success);

    let mut w1 = FakeWorker::connect(system_addr).await;
    let mut w2 = FakeWorker::connect(system_addr).await;
    let t1 = w1.become_available().await;
    let t2 = w2.become_available().await;

    assert_eq!(t1.host, "127.0.0.1");
    assert_eq!(t1.port, 15000);
    assert_eq!(t2.port, 15000);

    w1.complete(&t1.task_name).await;
    w2.complete(&t2.task_name).await;

    wait_for(Duration::from_secs(2), move || async move { query_jobs(api_addr).await.is_empty() }).await;
}

#[tokio::test]
async fn s2_queueing_admits_the_second_job_once_the_slot_frees() {
    let (api_addr, system_addr) = spawn_scheduler(vec![Slot::new("127.0.0.1", 15001)]).await;

    assert_eq!(assign_job(api_addr, "s2-a", 1).await.msg_type, MessageType::Success);
    assert_eq!(assign_job(api_addr, "s2-b", 1).await.msg_type, MessageType::Success);

    let jobs = query_jobs(api_addr).await;
    assert_eq!(job_state(&jobs, "s2-a"), Some("running"));
    assert_eq!(job_state(&jobs, "s2-b"), Some("queued"));

    let mut w1 = FakeWorker::connect(system_addr).await;
    let t1 = w1.become_available().await;
    assert!(t1.task_name.starts_with("s2-a"));
    w1.complete(&t1.task_name).await;

    let mut w2 = FakeWorker::connect(system_addr).await;
    wait_for(Duration::from_secs(2), move || async move {
        let jobs = query_jobs(api_addr).await;
        job_state(&jobs, "s2-b") == Some("running")
    })
    .await;
    let assigned = w2.become_available().await;
    assert!(assigned.task_name.starts_with("s2-b"));
}

#[tokio::test]
async fn s3_delete_of_a_queued_job_is_immediate_and_leaves_the_slot_untouched() {
    let (api_addr, _system_addr) = spawn_scheduler(vec![]).await;

    assert_eq!(assign_job(api_addr, "s3-c", 1).await.msg_type, MessageType::Success);
    let jobs = query_jobs(api_addr).await;
    assert_eq!(job_state(&jobs, "s3-c"), Some("queued"));

    let reply = api_call(api_addr, MessageType::DeleteJob, serde_json::json!({ "name": "s3-c" })).await;
    assert_eq!(reply.msg_type, MessageType::Success);

    let jobs = query_jobs(api_addr).await;
    assert!(job_state(&jobs, "s3-c").is_none(), "deleted job must leave Jobs immediately");
}

#[tokio::test]
async fn s4_delete_of_a_running_job_terminates_its_workers() {
    let (api_addr, system_addr) = spawn_scheduler(vec![Slot::new("127.0.0.1", 15002)]).await;

    assert_eq!(assign_job(api_addr, "s4-d", 2).await.msg_type, MessageType::Success);
    let mut w1 = FakeWorker::connect(system_addr).await;
    let mut w2 = FakeWorker::connect(system_addr).await;
    let t1 = w1.become_available().await;
    let t2 = w2.become_available().await;

    assert_eq!(w1.heartbeat(&t1.task_name).await, MessageType::Ack);

    let reply = api_call(api_addr, MessageType::DeleteJob, serde_json::json!({ "name": "s4-d" })).await;
    assert_eq!(reply.msg_type, MessageType::Success);

    assert_eq!(w1.heartbeat(&t1.task_name).await, MessageType::HeartbeatTerminate);
    assert_eq!(w2.heartbeat(&t2.task_name).await, MessageType::HeartbeatTerminate);

    w1.fail(&t1.task_name, -1).await;
    w2.fail(&t2.task_name, -1).await;

    wait_for(Duration::from_secs(2), move || async move {
        let jobs = query_jobs(api_addr).await;
        job_state(&jobs, "s4-d").is_none()
    })
    .await;
}

#[tokio::test]
async fn s5_worker_side_failure_terminates_the_rest_of_the_job() {
    let (api_addr, system_addr) = spawn_scheduler(vec![Slot::new("127.0.0.1", 15003)]).await;

    assert_eq!(assign_job(api_addr, "s5-e", 3).await.msg_type, MessageType::Success);
    let mut w1 = FakeWorker::connect(system_addr).await;
    let mut w2 = FakeWorker::connect(system_addr).await;
    let mut w3 = FakeWorker::connect(system_addr).await;
    let t1 = w1.become_available().await;
    let t2 = w2.become_available().await;
    let t3 = w3.become_available().await;

    w2.fail(&t2.task_name, 1).await;

    let jobs = query_jobs(api_addr).await;
    assert_eq!(job_state(&jobs, "s5-e"), Some("terminating"));
    assert_eq!(jobs.iter().find(|j| j["name"] == "s5-e").unwrap()["info"], "Worker side error (1)");

    assert_eq!(w1.heartbeat(&t1.task_name).await, MessageType::HeartbeatTerminate);
    assert_eq!(w3.heartbeat(&t3.task_name).await, MessageType::HeartbeatTerminate);
}

#[tokio::test]
async fn s6_duplicate_job_name_is_rejected_without_disturbing_the_first() {
    let (api_addr, _system_addr) = spawn_scheduler(vec![]).await;

    assert_eq!(assign_job(api_addr, "s6-f", 1).await.msg_type, MessageType::Success);
    let second = assign_job(api_addr, "s6-f", 1).await;
    assert_eq!(second.msg_type, MessageType::Error);
    assert_eq!(second.data["reason"], "Duplicate job s6-f");

    let jobs = query_jobs(api_addr).await;
    assert_eq!(job_state(&jobs, "s6-f"), Some("queued"));
}

#[tokio::test]
async fn deleting_an_already_terminating_job_twice_is_a_no_op() {
    let (api_addr, system_addr) = spawn_scheduler(vec![Slot::new("127.0.0.1", 15004)]).await;

    assert_eq!(assign_job(api_addr, "idem-g", 1).await.msg_type, MessageType::Success);
    let mut w1 = FakeWorker::connect(system_addr).await;
    let _task = w1.become_available().await;

    let first = api_call(api_addr, MessageType::DeleteJob, serde_json::json!({ "name": "idem-g" })).await;
    assert_eq!(first.msg_type, MessageType::Success);

    let jobs = query_jobs(api_addr).await;
    assert_eq!(job_state(&jobs, "idem-g"), Some("terminating"));

    let second = api_call(api_addr, MessageType::DeleteJob, serde_json::json!({ "name": "idem-g" })).await;
    assert_eq!(second.msg_type, MessageType::Success);

    let jobs = query_jobs(api_addr).await;
    assert_eq!(job_state(&jobs, "idem-g"), Some("terminating"));
}
