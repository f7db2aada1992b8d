use anyhow::{bail, Context, Result};
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{symlink, DirBuilderExt};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

use crate::CommandSpec;

/// Executes external commands on behalf of the sync and build drivers.
pub trait Runner {
    /// Run `cmd` to completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or exits non-zero.
    fn run(&self, cmd: &CommandSpec) -> Result<()>;

    // Whether filesystem changes should be skipped as well
    fn is_dry_run(&self) -> bool {
        false
    }
}

// Runs commands for real, echoing captured output only on failure
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl Runner for SystemRunner {
    fn run(&self, cmd: &CommandSpec) -> Result<()> {
        info!("running {cmd}");
        let output = cmd
            .to_command()
            .output()
            .with_context(|| format!("failed to execute {cmd}"))?;

        if !output.status.success() {
            let mut stderr = io::stderr().lock();
            let _ = stderr.write_all(&output.stdout);
            let _ = stderr.write_all(&output.stderr);
            let _ = stderr.flush();
            bail!("command failed: {cmd} ({})", output.status);
        }

        Ok(())
    }
}

// Logs commands without executing anything
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunRunner;

impl Runner for DryRunRunner {
    fn run(&self, cmd: &CommandSpec) -> Result<()> {
        info!("would run {cmd}");
        Ok(())
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

/// Replace whatever sits at `main_repo` with a symlink to `target`.
///
/// Removal failures are ignored; the entry may simply not exist yet. A
/// non-empty directory in the way makes the link step fail.
///
/// # Errors
///
/// Returns an error if the symlink cannot be created.
pub fn point_to_main_repo(main_repo: &Path, target: &Path) -> Result<()> {
    info!("removing {} ...", main_repo.display());
    if let Err(e) = remove_entry(main_repo) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("failed to remove {}: {e}", main_repo.display());
        }
    }

    info!("create soft link {} to {} ...", target.display(), main_repo.display());
    symlink(target, main_repo).with_context(|| {
        format!("failed to link {} to {}", main_repo.display(), target.display())
    })
}

// Remove a file, a symlink or an empty directory
fn remove_entry(path: &Path) -> io::Result<()> {
    fs::remove_file(path).or_else(|e| {
        if fs::symlink_metadata(path).is_ok_and(|m| m.is_dir()) {
            fs::remove_dir(path)
        } else {
            Err(e)
        }
    })
}

/// Create a single directory with mode 0755.
///
/// # Errors
///
/// Returns an error if the directory exists already or the parent is missing.
pub fn create_track_dir(path: &Path) -> Result<()> {
    fs::DirBuilder::new()
        .mode(0o755)
        .create(path)
        .with_context(|| format!("failed to create directory {}", path.display()))
}

// Where a stale checkout is moved before being recreated
#[must_use]
pub fn trash_destination(trash_dir: &Path, path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "repo".into(), |n| n.to_string_lossy());
    trash_dir.join(format!("{name}.{}", unix_timestamp()))
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
