//! Configuration loading.
//!
//! Settings are read from a JSON file and then overridden by environment
//! variables:
//!
//! ```text
//! --config PATH | $SITESYNC_CONFIG | <config dir>/sitesync/config.json
//!
//! SITESYNC_SOURCE_DIR     source_dir
//! SITESYNC_REMOTE_URL     remote_url
//! SITESYNC_REPO_DIR       repo_dir
//! SITESYNC_TARGET_SUBDIR  target_subdir
//! SITESYNC_REMOTE         remote
//! SITESYNC_BRANCH         branch
//! ```
//!
//! A missing default config file is fine as long as the environment supplies
//! the required settings. A file named explicitly must exist.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::git::validate_git_ref;

pub const CONFIG_ENV: &str = "SITESYNC_CONFIG";

const DEFAULT_REMOTE: &str = "origin";
const DEFAULT_BRANCH: &str = "main";
const DEFAULT_TARGET_SUBDIR: &str = "docs";
const DEFAULT_COMMIT_PREFIX: &str = "Auto sync";
const DEFAULT_PUSH_RETRY_DELAY: Duration = Duration::from_secs(3);
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Errors returned while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("missing required setting `{0}` (set it in the config file or via the environment)")]
    Missing(&'static str),
    #[error("invalid setting `{name}`: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// How the source directory is copied into the working copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorBackend {
    /// In-process copy.
    #[default]
    Native,
    /// The system `rsync` binary.
    Rsync,
}

/// Committer identity used when the working copy has none configured.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            name: "sitesync".to_string(),
            email: "sitesync@localhost".to_string(),
        }
    }
}

/// On-disk shape of the config file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    source_dir: Option<PathBuf>,
    remote_url: Option<String>,
    repo_dir: Option<PathBuf>,
    target_subdir: Option<PathBuf>,
    remote: Option<String>,
    branch: Option<String>,
    commit_prefix: Option<String>,
    exclude: Vec<String>,
    mirror: Option<MirrorBackend>,
    push_attempts: Option<u32>,
    push_retry_delay_secs: Option<u64>,
    identity: Option<Identity>,
    lock_timeout_secs: Option<u64>,
}

/// Validated settings for the sync and status procedures.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory whose contents are published.
    pub source_dir: PathBuf,
    /// Address of the remote repository.
    pub remote_url: String,
    /// Local working copy.
    pub repo_dir: PathBuf,
    /// Subdirectory of the working copy that mirrors `source_dir`.
    pub target_subdir: PathBuf,
    pub remote: String,
    pub branch: String,
    pub commit_prefix: String,
    /// File-name globs never copied or deleted.
    pub exclude: Vec<String>,
    pub mirror: MirrorBackend,
    pub push_attempts: u32,
    pub push_retry_delay: Duration,
    pub identity: Identity,
    pub lock_timeout: Duration,
}

impl Config {
    /// Load configuration from `explicit`, `$SITESYNC_CONFIG` or the default
    /// location, then apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => match env(CONFIG_ENV) {
                Some(path) => (PathBuf::from(path), true),
                None => (default_config_path(), false),
            },
        };

        let raw = match std::fs::read_to_string(&path) {
            Ok(text) => {
                log::debug!("loading config from {}", path.display());
                parse(&text, &path)?
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound && !required => {
                log::debug!("no config file at {}, using environment", path.display());
                RawConfig::default()
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        resolve(raw, env)
    }

    /// Absolute-or-relative path of the mirrored subdirectory.
    pub fn mirror_dir(&self) -> PathBuf {
        self.repo_dir.join(&self.target_subdir)
    }

    /// `<remote>/<branch>`, the ref sync resets to and status compares with.
    pub fn upstream(&self) -> String {
        format!("{}/{}", self.remote, self.branch)
    }

    /// Lock file guarding sync runs: a sibling of the working copy named
    /// `<repo_dir>.sitesync.lock`.
    pub fn lock_path(&self) -> PathBuf {
        let normalized: PathBuf = self.repo_dir.components().collect();
        let mut name = normalized.into_os_string();
        name.push(".sitesync.lock");
        PathBuf::from(name)
    }
}

/// `<config dir>/sitesync/config.json`, e.g. `~/.config/sitesync/config.json`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("sitesync")
        .join("config.json")
}

fn parse(text: &str, path: &Path) -> Result<RawConfig, ConfigError> {
    serde_json::from_str(text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn resolve(raw: RawConfig, env: impl Fn(&str) -> Option<String>) -> Result<Config, ConfigError> {
    let source_dir = env("SITESYNC_SOURCE_DIR")
        .map(PathBuf::from)
        .or(raw.source_dir)
        .ok_or(ConfigError::Missing("source_dir"))?;
    let remote_url = env("SITESYNC_REMOTE_URL")
        .or(raw.remote_url)
        .ok_or(ConfigError::Missing("remote_url"))?;
    let repo_dir = env("SITESYNC_REPO_DIR")
        .map(PathBuf::from)
        .or(raw.repo_dir)
        .ok_or(ConfigError::Missing("repo_dir"))?;
    let target_subdir = env("SITESYNC_TARGET_SUBDIR")
        .map(PathBuf::from)
        .or(raw.target_subdir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TARGET_SUBDIR));
    let remote = env("SITESYNC_REMOTE")
        .or(raw.remote)
        .unwrap_or_else(|| DEFAULT_REMOTE.to_string());
    let branch = env("SITESYNC_BRANCH")
        .or(raw.branch)
        .unwrap_or_else(|| DEFAULT_BRANCH.to_string());

    if remote_url.trim().is_empty() || remote_url.starts_with('-') {
        return Err(ConfigError::Invalid {
            name: "remote_url",
            reason: format!("'{}' is not a usable remote address", remote_url),
        });
    }
    validate_subdir(&target_subdir)?;
    validate_git_ref(&remote, "remote").map_err(|e| ConfigError::Invalid {
        name: "remote",
        reason: e.to_string(),
    })?;
    validate_git_ref(&branch, "branch").map_err(|e| ConfigError::Invalid {
        name: "branch",
        reason: e.to_string(),
    })?;

    let push_attempts = raw.push_attempts.unwrap_or(1);
    if push_attempts == 0 {
        return Err(ConfigError::Invalid {
            name: "push_attempts",
            reason: "must be at least 1".to_string(),
        });
    }

    for pattern in &raw.exclude {
        glob::Pattern::new(pattern).map_err(|e| ConfigError::Invalid {
            name: "exclude",
            reason: format!("'{}': {}", pattern, e),
        })?;
    }

    Ok(Config {
        source_dir,
        remote_url,
        repo_dir,
        target_subdir,
        remote,
        branch,
        commit_prefix: raw
            .commit_prefix
            .unwrap_or_else(|| DEFAULT_COMMIT_PREFIX.to_string()),
        exclude: raw.exclude,
        mirror: raw.mirror.unwrap_or_default(),
        push_attempts,
        push_retry_delay: raw
            .push_retry_delay_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_PUSH_RETRY_DELAY),
        identity: raw.identity.unwrap_or_default(),
        lock_timeout: raw
            .lock_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LOCK_TIMEOUT),
    })
}

/// The target must stay inside the working copy and must not be the
/// working copy itself, or mirroring would delete everything else in it.
fn validate_subdir(subdir: &Path) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        name: "target_subdir",
        reason: format!("'{}' {}", subdir.display(), reason),
    };

    if subdir.as_os_str().is_empty() {
        return Err(invalid("cannot be empty"));
    }
    let mut normal = 0;
    for component in subdir.components() {
        match component {
            Component::Normal(name) if name == ".git" => {
                return Err(invalid("cannot point into .git"));
            }
            Component::Normal(_) => normal += 1,
            Component::CurDir => {}
            _ => return Err(invalid("must be a relative path without '..'")),
        }
    }
    if normal == 0 {
        return Err(invalid("must name a subdirectory"));
    }
    Ok(())
}
