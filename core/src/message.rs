// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The wire message envelope shared by the API channel and the system
//! channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of message kinds this system ever exchanges. API
/// clients send `AssignJob`/`DeleteJob`/`QueryJobs`/`QueryJob`/
/// `QueryWorkers`; workers send the rest over the system channel except
/// `WorkerNewTask`, `Ack`, `Success`, `Error`, and `HeartbeatTerminate`,
/// which the scheduler sends back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// API: admit a new job.
    AssignJob,
    /// API: terminate and reap a job.
    DeleteJob,
    /// API: list all tracked jobs.
    QueryJobs,
    /// API: detail on a single job.
    QueryJob,
    /// API: list all registered workers.
    QueryWorkers,

    /// System, from worker: blocks until a task is assigned.
    WorkerAvailable,
    /// System, from worker: periodic liveness report for its running task.
    WorkerHeartbeat,
    /// System, from worker: its task's child process exited 0.
    WorkerComplete,
    /// System, from worker: its task's child process exited non-zero.
    WorkerTerminate,
    /// System, from coordinator runner: the job's coordinator process exited 0.
    JobComplete,
    /// System, from coordinator runner: the job's coordinator process exited non-zero.
    JobTerminate,

    /// System, to worker: here is your next task.
    WorkerNewTask,
    /// Generic acknowledgement.
    Ack,
    /// A handler's successful reply payload.
    Success,
    /// A handler's failure reply; `data.reason` carries the message.
    Error,
    /// Told to a worker whose task is terminating: kill your child now.
    HeartbeatTerminate,
}

impl MessageType {
    /// True for every message type a worker process originates over
    /// the system channel. Distinguishing this lets the scheduler
    /// implicitly register a [`crate::entities::worker::Worker`] the
    /// first time it sees a given return address, the same way the
    /// source system never has an explicit "register worker" message.
    #[must_use]
    pub fn is_from_worker(self) -> bool {
        matches!(
            self,
            Self::WorkerAvailable
                | Self::WorkerHeartbeat
                | Self::WorkerComplete
                | Self::WorkerTerminate
        )
    }
}

/// An envelope carried over either channel: a closed message kind plus
/// an arbitrary JSON payload shaped by that kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// What kind of message this is.
    pub msg_type: MessageType,
    /// The kind-specific payload.
    pub data: Value,
}

impl Message {
    /// Construct a message of the given kind with the given payload.
    pub fn new(msg_type: MessageType, data: Value) -> Self {
        Self { msg_type, data }
    }
}

/// A bare acknowledgement with no payload.
pub fn ack_message() -> Message {
    Message::new(MessageType::Ack, serde_json::json!({}))
}

/// A successful handler reply carrying `data`.
pub fn success_message(data: Value) -> Message {
    Message::new(MessageType::Success, data)
}

/// A failed handler reply; `reason` becomes `data.reason`.
pub fn error_message(reason: impl Into<String>) -> Message {
    Message::new(MessageType::Error, serde_json::json!({ "reason": reason.into() }))
}

/// Told to a worker whose current task is terminating: stop the child
/// process now instead of waiting for it to exit on its own.
pub fn heartbeat_terminate_message() -> Message {
    Message::new(MessageType::HeartbeatTerminate, serde_json::json!({}))
}

/// Returns the `reason` field of an [`MessageType::Error`] message, if
/// the message is in fact an error and carries one.
#[must_use]
pub fn error_reason(msg: &Message) -> Option<&str> {
    if msg.msg_type != MessageType::Error {
        return None;
    }
    msg.data.get("reason").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_originated_classification() {
        assert!(MessageType::WorkerHeartbeat.is_from_worker());
        assert!(MessageType::WorkerComplete.is_from_worker());
        assert!(!MessageType::JobComplete.is_from_worker());
        assert!(!MessageType::AssignJob.is_from_worker());
    }

    #[test]
    fn error_message_round_trip() {
        let msg = error_message("Duplicate job render-01");
        assert_eq!(error_reason(&msg), Some("Duplicate job render-01"));

        let ok = ack_message();
        assert_eq!(error_reason(&ok), None);
    }

    #[test]
    fn serializes_as_snake_case() {
        let msg = success_message(serde_json::json!({"ok": true}));
        let encoded = serde_json::to_string(&msg).unwrap();
        assert!(encoded.contains("\"success\""));
    }
}
