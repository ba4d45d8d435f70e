// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `render-scheduler worker <name>` — run a worker agent process.

use crate::error::CliError;
use clap::Args;
use render_scheduler_core::worker_agent::{self, WorkerConfig};
use std::time::Duration;

/// Arguments for `worker`.
#[derive(Args)]
pub struct WorkerArgs {
    /// Worker name, used only for log messages (the scheduler
    /// identifies workers by their transport address, not this name).
    name: String,

    /// Scheduler's system-channel host to connect to.
    #[arg(long = "system-host", default_value = "127.0.0.1")]
    system_host: String,

    /// Scheduler's system-channel port.
    #[arg(long = "system-port", default_value_t = 13481)]
    system_port: u16,

    /// Seconds to sleep between heartbeats while a task is running.
    #[arg(long = "heartbeat-interval", default_value_t = 5)]
    heartbeat_interval: u64,

    /// `--nthreads` passed to each task's `pbrt` child process.
    #[arg(long = "cores-per-worker", default_value_t = num_cpus::get())]
    cores_per_worker: usize,
}

/// Connect to the scheduler and run the worker loop forever.
pub async fn execute(args: WorkerArgs) -> Result<(), CliError> {
    let scheduler_addr = format!("{}:{}", args.system_host, args.system_port)
        .parse()
        .map_err(|_| CliError::InvalidArgument {
            message: format!("invalid --system-host/--system-port: {}:{}", args.system_host, args.system_port),
        })?;

    tracing::info!(name = %args.name, %scheduler_addr, "worker starting");

    let config = WorkerConfig {
        scheduler_addr,
        heartbeat_interval: Duration::from_secs(args.heartbeat_interval),
        nthreads: args.cores_per_worker,
    };

    worker_agent::run(config).await.map_err(|err| CliError::Fatal(err.to_string()))
}
