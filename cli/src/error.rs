// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! CLI-specific errors with contextual messages and exit codes.

use colored::Colorize;
use thiserror::Error;

/// Errors the CLI itself raises, as opposed to errors relayed from the
/// scheduler's `error{reason}` replies (which are printed as-is, not
/// wrapped in this type).
#[derive(Debug, Error)]
pub enum CliError {
    /// Could not connect to the scheduler's API or system channel.
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The scheduler replied with an unexpected message type for the
    /// request sent (protocol mismatch, never a normal user error).
    #[error("unexpected reply from scheduler: expected {expected}, got {got:?}")]
    UnexpectedReply {
        expected: &'static str,
        got: render_scheduler_core::message::MessageType,
    },

    /// The scheduler's `error{reason}` reply, surfaced as a CLI error
    /// so `main` can set a non-zero exit code.
    #[error("{reason}")]
    SchedulerError { reason: String },

    /// A CLI argument was malformed (bad `--addresses` syntax, etc).
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The scheduler or worker event loop exited with an error after
    /// startup (not a usage mistake — the process was running).
    #[error("{0}")]
    Fatal(String),
}

impl CliError {
    /// Print the error with minimal formatting; the CLI bridge has no
    /// suggestions to offer beyond the scheduler's own `reason` text.
    pub fn print_error(&self) {
        eprintln!("{} {}", "Error:".red().bold(), self);
    }
}

/// Exit codes the CLI's `main` returns.
pub mod exit_codes {
    /// Successful execution.
    pub const SUCCESS: i32 = 0;
    /// General error (connection failure, malformed argument).
    pub const ERROR: i32 = 1;
    /// The scheduler replied with `error{reason}`.
    pub const SCHEDULER_ERROR: i32 = 2;
}
