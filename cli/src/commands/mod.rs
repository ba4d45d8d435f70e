// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! One module per subcommand, mirroring `render-scheduler`'s flat
//! command surface: three runnable processes (`scheduler`, `worker`)
//! plus the API bridge (`jobs`, `job`, `workers`, `create`,
//! `delete-job`).

pub mod create;
pub mod delete_job;
pub mod job;
pub mod jobs;
pub mod scheduler;
pub mod worker;
pub mod workers;

use crate::error::CliError;
use render_scheduler_core::message::{error_reason, Message, MessageType};
use render_scheduler_core::transport::TransportClient;
use std::net::SocketAddr;

/// Default host:port the API-bridge subcommands dial, matching
/// `spec.md` §6's default API channel port.
pub const DEFAULT_API_ADDR: &str = "127.0.0.1:13480";

/// Send one API request and return its `success` payload, turning an
/// `error{reason}` reply into a [`CliError::SchedulerError`].
pub async fn call_api(addr: SocketAddr, msg: Message) -> Result<serde_json::Value, CliError> {
    let mut client = TransportClient::connect(addr)
        .await
        .map_err(|source| CliError::Connect {
            addr: addr.to_string(),
            source,
        })?;

    let reply = client
        .request(msg)
        .await
        .map_err(|source| CliError::Connect {
            addr: addr.to_string(),
            source: std::io::Error::other(source.to_string()),
        })?;

    match reply.msg_type {
        MessageType::Success => Ok(reply.data),
        MessageType::Error => Err(CliError::SchedulerError {
            reason: error_reason(&reply).unwrap_or("unknown error").to_string(),
        }),
        other => Err(CliError::UnexpectedReply {
            expected: "success or error",
            got: other,
        }),
    }
}
