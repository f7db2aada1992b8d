use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::system::{create_track_dir, point_to_main_repo, trash_destination, Runner};
use crate::{CommandSpec, Config, Options, Track};

// TrackManager sequences the repo and cros_sdk invocations for one track
pub struct TrackManager<'a> {
    config: &'a Config,
    runner: &'a dyn Runner,
}

impl<'a> TrackManager<'a> {
    #[must_use]
    pub fn new(config: &'a Config, runner: &'a dyn Runner) -> Self {
        Self { config, runner }
    }

    /// Repoint the main repo at the track checkout, then sync and build it.
    ///
    /// # Errors
    ///
    /// Returns the first failure; nothing after it is attempted.
    pub fn run(&self, options: &Options) -> Result<()> {
        let repo_path = self.config.track_path(options.track);
        debug!("track {} resolved to {}", options.track, repo_path.display());

        if self.runner.is_dry_run() {
            info!(
                "would link {} to {}",
                self.config.main_repo_path().display(),
                repo_path.display()
            );
        } else {
            point_to_main_repo(&self.config.main_repo_path(), &repo_path)?;
        }

        let result = match options.track {
            Track::Debug => self.debug(&repo_path, options),
            Track::Common => self.common(&repo_path, options),
            Track::Stable => self.stable(&repo_path, options),
            Track::Project => {
                info!("project will not build and sync");
                Ok(())
            }
        };
        result.with_context(|| format!("{} track failed", options.track))
    }

    fn debug(&self, repo_path: &Path, options: &Options) -> Result<()> {
        if options.sync {
            self.sync_mirror()?;
            self.recreate_repo(repo_path)?;
            self.repo_sync(repo_path)?;
        }
        self.forall_and_build(repo_path, options)
    }

    fn common(&self, repo_path: &Path, options: &Options) -> Result<()> {
        if options.sync {
            self.sync_mirror()?;
            self.repo_sync_remote(repo_path)?;
        }
        self.forall_and_build(repo_path, options)
    }

    fn stable(&self, repo_path: &Path, options: &Options) -> Result<()> {
        if options.sync {
            self.sync_mirror()?;
        }
        self.forall_and_build(repo_path, options)
    }

    fn forall_and_build(&self, repo_path: &Path, options: &Options) -> Result<()> {
        if !options.forall.is_empty() {
            self.repo_forall(repo_path, &options.forall)?;
        }
        if options.build {
            self.build_packages(&options.boards, &options.packages)?;
        }
        Ok(())
    }

    fn jobs_arg(&self) -> String {
        format!("-j{}", self.config.jobs)
    }

    /// Bring the shared mirror up to date.
    ///
    /// # Errors
    ///
    /// Returns an error if `repo sync` fails.
    pub fn sync_mirror(&self) -> Result<()> {
        info!("syncing mirror ...");
        let cmd = CommandSpec::new("repo")
            .args(["sync", self.jobs_arg().as_str()])
            .current_dir(self.config.mirror_path());
        self.runner.run(&cmd)
    }

    /// Move the checkout aside and initialize a fresh one against the mirror.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or `repo init` fails.
    /// A failed move-aside is only logged.
    pub fn recreate_repo(&self, repo_path: &Path) -> Result<()> {
        info!("removing {} ...", repo_path.display());
        let mv = CommandSpec::new("mv")
            .arg(repo_path)
            .arg(trash_destination(&self.config.trash_dir, repo_path));
        if let Err(e) = self.runner.run(&mv) {
            warn!("{e:#}");
        }

        info!("mkdir {} ...", repo_path.display());
        if !self.runner.is_dry_run() {
            create_track_dir(repo_path)?;
        }

        info!("repo init {} ...", repo_path.display());
        let init = CommandSpec::new("repo")
            .arg("init")
            .arg("--reference")
            .arg(self.config.mirror_path())
            .args(["-u", self.config.manifest_url.as_str()])
            .args(["--repo-url", self.config.repo_url.as_str()])
            .args(["-b", self.config.branch.as_str()])
            .current_dir(repo_path);
        self.runner.run(&init)
    }

    /// Full sync of a checkout.
    ///
    /// # Errors
    ///
    /// Returns an error if `repo sync` fails.
    pub fn repo_sync(&self, repo_path: &Path) -> Result<()> {
        info!("repo syncing {} ...", repo_path.display());
        let cmd = CommandSpec::new("repo")
            .args(["sync", self.jobs_arg().as_str()])
            .current_dir(repo_path);
        self.runner.run(&cmd)
    }

    /// Network-only sync; the working tree is left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if `repo sync -n` fails.
    pub fn repo_sync_remote(&self, repo_path: &Path) -> Result<()> {
        info!("repo syncing {} ...", repo_path.display());
        let cmd = CommandSpec::new("repo")
            .args(["sync", "-n", self.jobs_arg().as_str()])
            .current_dir(repo_path);
        self.runner.run(&cmd)
    }

    /// Run `repo forall -c` with the given command words.
    ///
    /// # Errors
    ///
    /// Returns an error if `repo forall` fails.
    pub fn repo_forall(&self, repo_path: &Path, cmds: &[String]) -> Result<()> {
        info!("repo forall {} ...", repo_path.display());
        let cmd = CommandSpec::new("repo")
            .args(["forall", "-c"])
            .args(cmds)
            .current_dir(repo_path);
        self.runner.run(&cmd)
    }

    // Wrap a command so it runs inside the chroot
    fn cros_run(&self, args: &[String]) -> Result<()> {
        let cmd = CommandSpec::new(self.config.cros_sdk_path())
            .args(args)
            .current_dir(self.config.main_repo_path());
        self.runner.run(&cmd)
    }

    /// Set up, build and emerge every package for every board, boards first.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first failing step.
    pub fn build_packages(&self, boards: &[String], packages: &[String]) -> Result<()> {
        for board in boards {
            for package in packages {
                if board.is_empty() || package.is_empty() {
                    warn!("building with an empty name (board {board:?}, package {package:?})");
                }
                info!("building {package} for {board} ...");

                let setup_board = [
                    "setup_board".to_string(),
                    "--force".to_string(),
                    format!("--board={board}"),
                ];
                self.cros_run(&setup_board)?;

                let build_package = [
                    "build_packages".to_string(),
                    "--autosetgov".to_string(),
                    format!("--board={board}"),
                    package.clone(),
                ];
                self.cros_run(&build_package)?;

                let emerge = [format!("emerge-{board}"), package.clone()];
                self.cros_run(&emerge)?;
            }
        }
        Ok(())
    }
}
