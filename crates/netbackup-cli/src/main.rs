// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use netbackup_worker::WorkerOptions;

/// Exit code for runtime errors.
const EXIT_RUNTIME_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "netbackup", version, about = "netbackup controller and worker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller: schedules executions and accepts worker traffic.
    Controller {
        /// Path to the controller's TOML configuration document.
        #[arg(long, default_value = "netbackup.toml")]
        config: PathBuf,

        /// Enable verbose (debug-level) logging.
        #[arg(long)]
        verbose: bool,
    },

    /// Run a worker: polls a controller for due executions and runs them.
    Worker {
        /// Base URL of the controller to poll.
        #[arg(long)]
        controller: String,

        /// Restrict polling to this tag. May be repeated.
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Seconds between `/worker/next` polls.
        #[arg(long, default_value_t = 15)]
        sleep: u64,

        /// Maximum number of executions resident at once.
        #[arg(long, default_value_t = 2000)]
        maxjobs: usize,

        /// Per-request HTTP timeout, in seconds.
        #[arg(long, default_value_t = 3)]
        timeout: u64,

        /// Disable TLS certificate verification. Mutually exclusive with `--cafile`.
        #[arg(long)]
        noverify: bool,

        /// Path to a PEM file of additional trusted CA certificates.
        #[arg(long)]
        cafile: Option<PathBuf>,

        /// Enable verbose (debug-level) logging.
        #[arg(long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Controller { config, verbose } => netbackup_daemon::run_controller(&config, verbose).await,
        Commands::Worker {
            controller,
            tags,
            sleep,
            maxjobs,
            timeout,
            noverify,
            cafile,
            verbose,
        } => {
            let log_level = if verbose { "netbackup=debug" } else { "netbackup=info" };
            if let Err(e) = netbackup_telemetry::init(log_level, false) {
                eprintln!("error: {e:#}");
                std::process::exit(EXIT_RUNTIME_ERROR);
            }
            let opts = WorkerOptions {
                controller,
                tags,
                sleep_seconds: sleep,
                max_jobs: maxjobs,
                timeout_seconds: timeout,
                noverify,
                cafile,
            };
            netbackup_worker::run_worker(opts).await
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(EXIT_RUNTIME_ERROR);
    }
}
