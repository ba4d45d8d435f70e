// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `render-scheduler scheduler` — run the scheduler process.

use crate::error::CliError;
use clap::Args;
use render_scheduler_core::scheduler::{Scheduler, SchedulerConfig};
use render_scheduler_core::types::Slot;
use std::time::Duration;

/// Arguments for `scheduler`.
#[derive(Args)]
pub struct SchedulerArgs {
    /// API channel bind port.
    #[arg(long = "server-port", default_value_t = 13480)]
    server_port: u16,

    /// System channel bind port.
    #[arg(long = "system-port", default_value_t = 13481)]
    system_port: u16,

    /// `--nthreads` every task's `pbrt` process is started with.
    #[arg(long = "cores-per-worker", default_value_t = num_cpus::get())]
    cores_per_worker: usize,

    /// Comma-separated `host:port` coordinator slot pool. The *last*
    /// listed address is admitted to first. Mutually exclusive with
    /// `--job-port-low`/`--job-port-high`.
    #[arg(long)]
    addresses: Option<String>,

    /// Low end (inclusive) of a generated `127.0.0.1` slot port range.
    #[arg(long = "job-port-low")]
    job_port_low: Option<u16>,

    /// High end (exclusive) of a generated `127.0.0.1` slot port range.
    #[arg(long = "job-port-high")]
    job_port_high: Option<u16>,
}

fn parse_addresses(raw: &str) -> Result<Vec<Slot>, CliError> {
    raw.split(',')
        .map(|entry| {
            let (host, port) = entry.trim().rsplit_once(':').ok_or_else(|| CliError::InvalidArgument {
                message: format!("malformed --addresses entry: {entry}"),
            })?;
            let port: u16 = port.parse().map_err(|_| CliError::InvalidArgument {
                message: format!("malformed port in --addresses entry: {entry}"),
            })?;
            Ok(Slot::new(host, port))
        })
        .collect()
}

fn build_slots(args: &SchedulerArgs) -> Result<Vec<Slot>, CliError> {
    if let Some(raw) = &args.addresses {
        return parse_addresses(raw);
    }
    let low = args.job_port_low.ok_or_else(|| CliError::InvalidArgument {
        message: "either --addresses or --job-port-low/--job-port-high is required".to_string(),
    })?;
    let high = args.job_port_high.ok_or_else(|| CliError::InvalidArgument {
        message: "--job-port-high is required alongside --job-port-low".to_string(),
    })?;
    Ok((low..high).map(|port| Slot::new("127.0.0.1", port)).collect())
}

/// Bind both channels and run the scheduler event loop forever.
pub async fn execute(args: SchedulerArgs) -> Result<(), CliError> {
    let slots = build_slots(&args)?;
    let config = SchedulerConfig {
        api_addr: ([0, 0, 0, 0], args.server_port).into(),
        system_addr: ([0, 0, 0, 0], args.system_port).into(),
        slots,
        cores_per_worker: args.cores_per_worker,
        poll_interval: Duration::from_secs(1),
    };

    let mut scheduler = Scheduler::bind(config).await.map_err(|source| CliError::Connect {
        addr: format!("0.0.0.0:{}/{}", args.server_port, args.system_port),
        source,
    })?;

    tracing::info!(
        api_addr = %scheduler.api_addr(),
        system_addr = %scheduler.system_addr(),
        "scheduler listening"
    );

    scheduler.run().await.map_err(|err| CliError::Fatal(err.to_string()))
}
