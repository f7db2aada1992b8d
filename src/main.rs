use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{execute_command, Cli};

fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| cli.log_filter().into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    execute_command(&cli).with_context(|| format!("{} run failed", cli.track))
}
