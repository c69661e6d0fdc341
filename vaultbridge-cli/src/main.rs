//! Developer CLI for inspecting and editing a `VaultBridge` job queue.

mod cli;
mod jobs;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> eyre::Result<()> {
    let cli = cli::Cli::parse();

    let default_level = if cli.global.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    cli.run()
}
