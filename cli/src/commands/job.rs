// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `render-scheduler job <name>` — detail on a single job.

use crate::error::CliError;
use clap::Args;
use render_scheduler_core::message::{Message, MessageType};

use super::{call_api, DEFAULT_API_ADDR};

/// Arguments for `job`.
#[derive(Args)]
pub struct JobArgs {
    /// Job name to query.
    name: String,

    /// Scheduler API channel address.
    #[arg(long, default_value = DEFAULT_API_ADDR)]
    api_addr: std::net::SocketAddr,
}

/// Print full detail on `name`, including every task.
pub async fn execute(args: JobArgs) -> Result<(), CliError> {
    let reply = call_api(
        args.api_addr,
        Message::new(MessageType::QueryJob, serde_json::json!({ "name": args.name })),
    )
    .await?;
    println!("{}", serde_json::to_string_pretty(&reply).unwrap_or_default());
    Ok(())
}
