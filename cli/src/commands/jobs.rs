// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `render-scheduler jobs` — list every job the scheduler is tracking.

use crate::error::CliError;
use clap::Args;
use render_scheduler_core::message::{Message, MessageType};

use super::{call_api, DEFAULT_API_ADDR};

/// Arguments for `jobs`.
#[derive(Args)]
pub struct JobsArgs {
    /// Scheduler API channel address.
    #[arg(long, default_value = DEFAULT_API_ADDR)]
    api_addr: std::net::SocketAddr,
}

/// List every tracked job as a compact table.
pub async fn execute(args: JobsArgs) -> Result<(), CliError> {
    let reply = call_api(args.api_addr, Message::new(MessageType::QueryJobs, serde_json::json!({}))).await?;
    let jobs = reply.get("jobs").and_then(serde_json::Value::as_array).cloned().unwrap_or_default();

    if jobs.is_empty() {
        println!("No jobs.");
        return Ok(());
    }

    println!("{:<20} {:<12} {:>10} {:>8} {:>8}  INFO", "NAME", "STATE", "COMPLETED", "RUNNING", "QUEUED");
    for job in jobs {
        println!(
            "{:<20} {:<12} {:>10} {:>8} {:>8}  {}",
            job.get("name").and_then(serde_json::Value::as_str).unwrap_or("?"),
            job.get("state").and_then(serde_json::Value::as_str).unwrap_or("?"),
            job.get("completed").and_then(serde_json::Value::as_u64).unwrap_or(0),
            job.get("running").and_then(serde_json::Value::as_u64).unwrap_or(0),
            job.get("queued").and_then(serde_json::Value::as_u64).unwrap_or(0),
            job.get("info").and_then(serde_json::Value::as_str).unwrap_or(""),
        );
    }
    Ok(())
}
