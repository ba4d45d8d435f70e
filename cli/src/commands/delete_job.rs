// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `render-scheduler delete-job <name>` — terminate and reap a job.

use crate::error::CliError;
use clap::Args;
use render_scheduler_core::message::{Message, MessageType};

use super::{call_api, DEFAULT_API_ADDR};

/// Arguments for `delete-job`.
#[derive(Args)]
pub struct DeleteJobArgs {
    /// Job name to terminate.
    name: String,

    /// Scheduler API channel address.
    #[arg(long, default_value = DEFAULT_API_ADDR)]
    api_addr: std::net::SocketAddr,
}

/// Request termination of `name`.
pub async fn execute(args: DeleteJobArgs) -> Result<(), CliError> {
    call_api(
        args.api_addr,
        Message::new(MessageType::DeleteJob, serde_json::json!({ "name": args.name })),
    )
    .await?;
    println!("Job {} deleted.", args.name);
    Ok(())
}
