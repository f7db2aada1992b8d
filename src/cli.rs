use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::debug;

use cros_tracks::{
    split_list, Config, DryRunRunner, Options, Runner, SystemRunner, Track, TrackManager,
};

// CLI arguments parsing structure
#[derive(Parser)]
#[command(author, version, about = "Sync and build ChromiumOS track checkouts", long_about = None)]
pub struct Cli {
    /// Repo target: debug, common, stable or project
    pub track: Track,

    /// Boards to build, e.g. --boards brya,corsola
    #[arg(long, default_value = "")]
    pub boards: String,

    /// Packages to build, e.g. --packages adhd,floss
    #[arg(long, default_value = "")]
    pub packages: String,

    /// Sync the repo
    #[arg(long)]
    pub sync: bool,

    /// Build the packages for the boards
    #[arg(long)]
    pub build: bool,

    /// Command to run with `repo forall -c` in the track checkout (repeatable)
    #[arg(long, value_name = "CMD")]
    pub forall: Vec<String>,

    /// JSON config file overriding the built-in paths and URLs (default: $CROS_TRACKS_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the commands instead of running them
    #[arg(long)]
    pub dry_run: bool,

    /// Increase log verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Cli {
    // Default log filter derived from -v/-q
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    pub fn options(&self) -> Options {
        Options {
            track: self.track,
            sync: self.sync,
            build: self.build,
            boards: split_list(&self.boards),
            packages: split_list(&self.packages),
            forall: self.forall.clone(),
        }
    }
}

// Execute the requested track
pub fn execute_command(cli: &Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    debug!("using config {config:?}");

    let runner: &dyn Runner = if cli.dry_run {
        &DryRunRunner
    } else {
        &SystemRunner
    };

    let options = cli.options();
    TrackManager::new(&config, runner).run(&options)
}
