// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "netbackup-daemon", version, about = "netbackup controller")]
struct Args {
    /// Path to the controller's TOML configuration document.
    #[arg(long, default_value = "netbackup.toml")]
    config: PathBuf,

    /// Enable verbose (debug-level) logging, overriding the config's `log_level`.
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    netbackup_daemon::run_controller(&args.config, args.verbose).await
}
