// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Core identifiers and the scheduler error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A job's name, unique among jobs the scheduler currently tracks.
pub type JobName = String;

/// A task's name, always `{job_name}-{index}`.
pub type TaskName = String;

/// A worker's transport return-address, used as its implicit identity.
pub type WorkerAddr = String;

/// Result type threaded through scheduler, transport, and runner code.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Errors raised anywhere in the scheduler, transport, or runner stack.
///
/// Variants group along the five categories this system distinguishes
/// between: a caller sending a malformed API request recovers by
/// correcting the request; a worker violating the protocol the
/// scheduler assigned it is a fatal, non-retryable condition; transport
/// and child-process failures are environmental.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// An API request was missing a required field or referenced an
    /// unknown job/worker. The caller can retry with a corrected request.
    #[error("validation error: {0}")]
    Validation(String),

    /// A worker reported state inconsistent with what the scheduler
    /// has on record for it (wrong task name, wrong state). This
    /// indicates a bug in the worker or a split-brain condition and is
    /// treated as fatal for the affected job, never silently retried.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The identity-addressed transport could not deliver or receive
    /// a frame (connection reset, malformed frame, serialization
    /// failure on the wire).
    #[error("transport error: {0}")]
    Transport(String),

    /// Spawning, waiting on, or signaling the `pbrt` child process
    /// failed.
    #[error("child process error: {0}")]
    ChildProcess(#[from] std::io::Error),

    /// A message's JSON payload did not deserialize into the shape its
    /// `MessageType` requires.
    #[error("message decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl SchedulerError {
    /// Build a [`SchedulerError::Validation`] from a display value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`SchedulerError::InvariantViolation`] from a display value.
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }
}

/// A coordinator slot: an address a coordinator/task process binds its
/// system-channel connection to. Slots are handed out and reclaimed as
/// a LIFO pool per job admission (`spec.md` §3, §12).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Slot {
    /// Construct a slot from a host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_display() {
        let slot = Slot::new("127.0.0.1", 14001);
        assert_eq!(slot.to_string(), "127.0.0.1:14001");
    }

    #[test]
    fn error_constructors() {
        let e = SchedulerError::validation("missing field: name");
        assert!(e.to_string().contains("missing field"));
    }
}
