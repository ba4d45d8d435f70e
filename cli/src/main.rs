// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use clap::{Parser, Subcommand};
use std::process;

mod commands;
mod error;

use commands::{create, delete_job, job, jobs, scheduler, worker, workers};

/// render-scheduler - run the scheduler, run a worker agent, or submit
/// jobs to a running scheduler.
#[derive(Parser)]
#[command(name = "render-scheduler")]
#[command(author = "Render Scheduler Contributors")]
#[command(version)]
#[command(about = "Distributed pbrt render-job scheduler", long_about = None)]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler process
    Scheduler(scheduler::SchedulerArgs),

    /// Run a worker agent process
    Worker(worker::WorkerArgs),

    /// List all tracked jobs
    Jobs(jobs::JobsArgs),

    /// Show detail on a single job
    Job(job::JobArgs),

    /// List all registered workers
    Workers(workers::WorkersArgs),

    /// Submit a new job
    Create(create::CreateArgs),

    /// Terminate and reap a job
    DeleteJob(delete_job::DeleteJobArgs),

    /// Generate shell completions
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let result = match cli.command {
        Commands::Scheduler(args) => scheduler::execute(args).await,
        Commands::Worker(args) => worker::execute(args).await,
        Commands::Jobs(args) => jobs::execute(args).await,
        Commands::Job(args) => job::execute(args).await,
        Commands::Workers(args) => workers::execute(args).await,
        Commands::Create(args) => create::execute(args).await,
        Commands::DeleteJob(args) => delete_job::execute(args).await,
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
    };

    if let Err(err) = result {
        err.print_error();
        let code = match err {
            error::CliError::SchedulerError { .. } => error::exit_codes::SCHEDULER_ERROR,
            _ => error::exit_codes::ERROR,
        };
        process::exit(code);
    }
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin_name, &mut io::stdout());
}
