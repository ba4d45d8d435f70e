// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `render-scheduler create <name> <context_folder> <input_file>
//! <num_workers>` — submit a new job.

use crate::error::CliError;
use clap::Args;
use render_scheduler_core::message::{Message, MessageType};

use super::{call_api, DEFAULT_API_ADDR};

/// Arguments for `create`.
#[derive(Args)]
pub struct CreateArgs {
    /// Unique job name.
    name: String,

    /// Absolute path to the scene's working directory.
    context_folder: String,

    /// The `.pbrt` scene file to render, relative to `context_folder`.
    input_file: String,

    /// Number of worker tasks to spread this job across.
    num_workers: usize,

    /// Scheduler API channel address.
    #[arg(long, default_value = DEFAULT_API_ADDR)]
    api_addr: std::net::SocketAddr,
}

/// Submit a new job and print the scheduler's acknowledgement.
pub async fn execute(args: CreateArgs) -> Result<(), CliError> {
    call_api(
        args.api_addr,
        Message::new(
            MessageType::AssignJob,
            serde_json::json!({
                "name": args.name,
                "context_folder": args.context_folder,
                "input_file": args.input_file,
                "num_workers": args.num_workers,
            }),
        ),
    )
    .await?;
    println!("Job {} submitted.", args.name);
    Ok(())
}
