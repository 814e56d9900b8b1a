// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use std::path::PathBuf;

use clap::Parser;
use netbackup_worker::{run_worker, WorkerOptions};

#[derive(Parser, Debug)]
#[command(name = "netbackup-worker", version, about = "netbackup worker")]
struct Args {
    /// Base URL of the controller to poll.
    #[arg(long)]
    controller: String,

    /// Restrict polling to this tag. May be repeated.
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Seconds between `/worker/next` polls (halved for the tick period).
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
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "netbackup=debug" } else { "netbackup=info" };
    netbackup_telemetry::init(log_level, false)?;

    let opts = WorkerOptions {
        controller: args.controller,
        tags: args.tags,
        sleep_seconds: args.sleep,
        max_jobs: args.maxjobs,
        timeout_seconds: args.timeout,
        noverify: args.noverify,
        cafile: args.cafile,
    };

    run_worker(opts).await
}
