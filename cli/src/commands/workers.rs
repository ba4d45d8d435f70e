// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `render-scheduler workers` — list every worker the scheduler has
//! heard from.

use crate::error::CliError;
use clap::Args;
use render_scheduler_core::message::{Message, MessageType};

use super::{call_api, DEFAULT_API_ADDR};

/// Arguments for `workers`.
#[derive(Args)]
pub struct WorkersArgs {
    /// Scheduler API channel address.
    #[arg(long, default_value = DEFAULT_API_ADDR)]
    api_addr: std::net::SocketAddr,
}

/// List every known worker and its current assignment.
pub async fn execute(args: WorkersArgs) -> Result<(), CliError> {
    let reply = call_api(args.api_addr, Message::new(MessageType::QueryWorkers, serde_json::json!({}))).await?;
    let workers = reply.get("workers").and_then(serde_json::Value::as_array).cloned().unwrap_or_default();

    if workers.is_empty() {
        println!("No workers.");
        return Ok(());
    }

    println!("{:<32} CURRENT TASK", "ADDRESS");
    for worker in workers {
        println!(
            "{:<32} {}",
            worker.get("address").and_then(serde_json::Value::as_str).unwrap_or("?"),
            worker.get("current_task").and_then(serde_json::Value::as_str).unwrap_or("-"),
        );
    }
    Ok(())
}
