// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A worker, as the scheduler sees it: identified purely by its
//! transport return-address, never explicitly registered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A worker known to the scheduler. Workers are never registered by a
/// dedicated message — the scheduler creates a `Worker` the first time
/// it sees a message whose [`crate::message::MessageType::is_from_worker`]
/// is true from a return-address it hasn't seen before.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    /// The transport return-address this worker connects from. Doubles
    /// as its identity and as the destination `send` targets.
    pub address: String,
    /// The task currently assigned to this worker, if any.
    pub current_task: Option<String>,
    /// Last time this worker sent any message.
    pub last_heartbeat: DateTime<Utc>,
}

impl Worker {
    /// Construct a newly seen worker with no assigned task.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            current_task: None,
            last_heartbeat: Utc::now(),
        }
    }

    /// Record a liveness report.
    pub fn touch(&mut self) {
        self.last_heartbeat = Utc::now();
    }

    /// Assign a task to this worker.
    pub fn assign(&mut self, task_name: impl Into<String>) {
        self.current_task = Some(task_name.into());
    }

    /// Clear this worker's assignment, making it eligible for
    /// `worker_available` re-queueing again.
    pub fn clear(&mut self) {
        self.current_task = None;
    }

    /// A compact view for `query_workers`.
    #[must_use]
    pub fn detail_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "address": self.address,
            "current_task": self.current_task,
            "last_heartbeat": self.last_heartbeat,
        })
    }
}
