use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

pub mod system;
pub mod track_manager;

pub use system::{DryRunRunner, Runner, SystemRunner};
pub use track_manager::TrackManager;

// Environment variable naming the JSON config file
pub const CONFIG_ENV: &str = "CROS_TRACKS_CONFIG";

// Deployment track selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Track {
    Debug,
    Common,
    Stable,
    Project,
}

impl Track {
    pub const ALL: [Track; 4] = [Track::Debug, Track::Common, Track::Stable, Track::Project];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Track::Debug => "debug",
            Track::Common => "common",
            Track::Stable => "stable",
            Track::Project => "project",
        }
    }

    // Directory name of the track checkout under the repo directory
    #[must_use]
    pub fn dir_name(self) -> String {
        format!("chromiumos.{}", self.as_str())
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Track {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "debug" => Ok(Track::Debug),
            "common" => Ok(Track::Common),
            "stable" => Ok(Track::Stable),
            "project" => Ok(Track::Project),
            other => {
                bail!("unknown track: {other:?} (expected one of debug, common, stable, project)")
            }
        }
    }
}

// Parsed invocation, built once from the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub track: Track,
    pub sync: bool,
    pub build: bool,
    pub boards: Vec<String>,
    pub packages: Vec<String>,
    pub forall: Vec<String>,
}

impl Options {
    #[must_use]
    pub fn new(track: Track) -> Self {
        Self {
            track,
            sync: false,
            build: false,
            boards: Vec::new(),
            packages: Vec::new(),
            forall: Vec::new(),
        }
    }
}

/// Split a comma separated flag value.
///
/// An empty input yields a single empty entry, matching how the flag has
/// always been interpreted.
#[must_use]
pub fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(str::to_string).collect()
}

// Filesystem layout and remote endpoints
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub user_root: PathBuf,
    pub cros_sdk: PathBuf,
    pub repo_dir: PathBuf,
    pub mirror_dir: PathBuf,
    pub main_repo: PathBuf,
    pub manifest_url: String,
    pub repo_url: String,
    pub branch: String,
    pub jobs: u32,
    pub trash_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let home = env::var_os("HOME").map_or_else(|| PathBuf::from("/"), PathBuf::from);
        Self::with_user_root(home)
    }
}

impl Config {
    // Defaults anchored at the given user root
    #[must_use]
    pub fn with_user_root<P: Into<PathBuf>>(user_root: P) -> Self {
        Self {
            user_root: user_root.into(),
            cros_sdk: PathBuf::from("depot_tools/cros_sdk"),
            repo_dir: PathBuf::from("chromiumos_repo"),
            mirror_dir: PathBuf::from("chromiumos_repo/mirror"),
            main_repo: PathBuf::from("chromiumos"),
            manifest_url: "https://chrome-internal.googlesource.com/chromeos/manifest-internal"
                .to_string(),
            repo_url: "https://chromium.googlesource.com/external/repo.git".to_string(),
            branch: "main".to_string(),
            jobs: 128,
            trash_dir: PathBuf::from("/tmp"),
        }
    }

    /// Load config from a JSON file. Missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, contains invalid JSON, or
    /// sets `jobs` to zero.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy();
        let json_content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config from {path_str}"))?;

        let config: Config = serde_json::from_str(&json_content)
            .with_context(|| format!("failed to parse JSON from {path_str}"))?;
        config
            .validate()
            .with_context(|| format!("invalid config in {path_str}"))?;
        Ok(config)
    }

    /// Check values that the type alone does not constrain.
    ///
    /// # Errors
    ///
    /// Returns an error if `jobs` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            bail!("jobs must be a positive integer, got 0");
        }
        Ok(())
    }

    /// Build the effective config: defaults, then the optional file (either
    /// `path` or the one named by `CROS_TRACKS_CONFIG`), then environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file is unreadable or an override is malformed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut config = match file {
            Some(file) => Self::from_file(&file)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `CROS_TRACKS_*` overrides using the given variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `CROS_TRACKS_JOBS` is not a positive integer.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("CROS_TRACKS_USER_ROOT") {
            self.user_root = PathBuf::from(root);
        }
        if let Some(sdk) = lookup("CROS_TRACKS_CROS_SDK") {
            self.cros_sdk = PathBuf::from(sdk);
        }
        if let Some(url) = lookup("CROS_TRACKS_MANIFEST_URL") {
            self.manifest_url = url;
        }
        if let Some(url) = lookup("CROS_TRACKS_REPO_URL") {
            self.repo_url = url;
        }
        if let Some(branch) = lookup("CROS_TRACKS_BRANCH") {
            self.branch = branch;
        }
        if let Some(jobs) = lookup("CROS_TRACKS_JOBS") {
            self.jobs = jobs
                .parse()
                .ok()
                .filter(|&n: &u32| n > 0)
                .with_context(|| {
                    format!("CROS_TRACKS_JOBS must be a positive integer, got {jobs:?}")
                })?;
        }
        if let Some(trash) = lookup("CROS_TRACKS_TRASH_DIR") {
            self.trash_dir = PathBuf::from(trash);
        }
        Ok(())
    }

    // Relative entries live under the user root
    fn under_root(&self, path: &Path) -> PathBuf {
        self.user_root.join(path)
    }

    #[must_use]
    pub fn cros_sdk_path(&self) -> PathBuf {
        self.under_root(&self.cros_sdk)
    }

    #[must_use]
    pub fn mirror_path(&self) -> PathBuf {
        self.under_root(&self.mirror_dir)
    }

    #[must_use]
    pub fn main_repo_path(&self) -> PathBuf {
        self.under_root(&self.main_repo)
    }

    #[must_use]
    pub fn track_path(&self, track: Track) -> PathBuf {
        self.under_root(&self.repo_dir).join(track.dir_name())
    }

    /// Map a track name to its checkout directory.
    ///
    /// # Errors
    ///
    /// Returns an error for anything other than debug, common, stable or project.
    pub fn resolve_track_path(&self, name: &str) -> Result<PathBuf> {
        let track: Track = name.parse()?;
        Ok(self.track_path(track))
    }
}

// A single external process invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            cwd: None,
        }
    }

    #[must_use]
    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    #[must_use]
    pub fn current_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    // Program followed by its arguments, lossily decoded
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|s| s.to_string_lossy().into_owned())
            .collect()
    }

    #[must_use]
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }
        command
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))?;
        if let Some(dir) = &self.cwd {
            write!(f, " (in {})", dir.display())?;
        }
        Ok(())
    }
}
