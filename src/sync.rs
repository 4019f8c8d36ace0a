//! The sync procedure: mirror the source directory into the working copy
//! and publish it.
//!
//! 1. Clone the remote, or update the existing working copy (fast-forward
//!    pull, falling back to fetch + hard reset).
//! 2. Mirror the source directory into the target subdirectory.
//! 3. If the subdirectory changed, commit it with a timestamped message and
//!    push to the remote's branch.

use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::config::Config;
use crate::git::{
    CommandRunner, CommitOutcome, GitCli, GitError, Transport, redact_credentials,
    repository_exists, resolve_head,
};
use crate::lock::SyncLock;
use crate::mirror::{self, MirrorError, MirrorStats};

/// Errors returned by a sync run.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Mirror(#[from] MirrorError),
    #[error("another sync is still running (lock {0} not released)")]
    LockTimeout(PathBuf),
    #[error("failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0} exists but is not a git repository")]
    NotARepository(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl SyncError {
    /// Process exit code: the failing command's own code when there is one.
    pub fn exit_code(&self) -> i32 {
        let code = match self {
            SyncError::Git(e) => e.exit_code(),
            SyncError::Mirror(e) => e.exit_code(),
            _ => None,
        };
        code.filter(|c| *c != 0).unwrap_or(1)
    }
}

/// Result of a successful sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The mirrored directory already matched the last commit.
    NoChanges { stats: MirrorStats },
    /// A commit was created and pushed.
    Published {
        commit: String,
        message: String,
        stats: MirrorStats,
    },
}

/// `"<prefix>: YYYY-MM-DD HH:MM:SS"`.
pub fn commit_message(prefix: &str, at: NaiveDateTime) -> String {
    format!("{}: {}", prefix, at.format("%Y-%m-%d %H:%M:%S"))
}

/// Runs the sync procedure for one configuration.
pub struct Syncer<'a> {
    config: &'a Config,
    runner: &'a dyn CommandRunner,
    git: GitCli<'a>,
}

impl<'a> Syncer<'a> {
    pub fn new(config: &'a Config, runner: &'a dyn CommandRunner) -> Self {
        Self {
            config,
            runner,
            git: GitCli::new(runner),
        }
    }

    fn repo(&self) -> &Path {
        &self.config.repo_dir
    }

    /// Run all three steps while holding the working-copy lock.
    pub fn run(&self) -> Result<SyncOutcome, SyncError> {
        let lock_path = self.config.lock_path();
        let lock = match SyncLock::acquire(&lock_path, self.config.lock_timeout) {
            Ok(lock) => lock,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                return Err(SyncError::LockTimeout(lock_path));
            }
            Err(source) => {
                return Err(SyncError::Lock {
                    path: lock_path,
                    source,
                });
            }
        };
        log::debug!("holding {}", lock.path().display());

        self.acquire_working_copy()?;
        self.ensure_identity()?;
        let stats = self.mirror_source()?;
        self.publish(stats)
    }

    /// Step 1: make sure `repo_dir` is an up-to-date clone of the remote.
    pub fn acquire_working_copy(&self) -> Result<(), SyncError> {
        let repo = self.repo();

        if repository_exists(repo) {
            log::info!("updating working copy {}", repo.display());
            self.ensure_remote_transport();
            self.update()?;
            return Ok(());
        }

        if !is_missing_or_empty(repo)? {
            return Err(SyncError::NotARepository(repo.to_path_buf()));
        }

        log::info!(
            "cloning {} into {}",
            redact_credentials(&self.config.remote_url),
            repo.display()
        );
        if let Err(e) = self.git.clone(&self.config.remote_url, repo) {
            log::error!("clone failed: {}", e);
            if Transport::classify(&self.config.remote_url) == Transport::Ssh {
                log::info!("hint: make sure an SSH key for this host is loaded and authorized");
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Fast-forward to `remote/branch`; if that fails, fetch and hard-reset.
    ///
    /// The fallback throws away local commits that are not on the remote.
    fn update(&self) -> Result<(), SyncError> {
        let repo = self.repo();
        let remote = &self.config.remote;
        let branch = &self.config.branch;

        let pull_err = match self.git.pull_ff_only(repo, remote, branch) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        let upstream = self.config.upstream();
        log::warn!(
            "fast-forward pull failed, resetting to {}: {}",
            upstream,
            pull_err
        );

        self.git.fetch(repo, remote)?;

        match self.git.unpushed(repo, remote, branch) {
            Ok(lost) if !lost.is_empty() => {
                log::warn!(
                    "discarding {} local commit(s) not on {}:",
                    lost.len(),
                    upstream
                );
                for commit in &lost {
                    log::warn!("  {}", commit);
                }
            }
            Ok(_) => {}
            Err(e) => log::debug!("could not list local-only commits: {}", e),
        }

        self.git.reset_hard(repo, &upstream)?;
        Ok(())
    }

    /// Point the remote back at the configured URL when it is using a
    /// weaker transport. Problems here are logged, not fatal.
    fn ensure_remote_transport(&self) {
        let repo = self.repo();
        let remote = &self.config.remote;

        let current = match self.git.remote_url(repo, remote) {
            Ok(url) => url,
            Err(e) => {
                log::warn!("could not read url of remote {}: {}", remote, e);
                return;
            }
        };
        if current == self.config.remote_url {
            return;
        }

        let have = Transport::classify(&current);
        let wanted = Transport::classify(&self.config.remote_url);

        if have.should_upgrade_to(wanted) {
            log::info!(
                "switching remote {} from {:?} to {:?}: {}",
                remote,
                have,
                wanted,
                redact_credentials(&self.config.remote_url)
            );
            if let Err(e) = self
                .git
                .set_remote_url(repo, remote, &self.config.remote_url)
            {
                log::warn!("failed to switch remote url: {}", e);
            }
        } else if have == Transport::Unknown {
            log::warn!(
                "unrecognised url format for remote {}: {}",
                remote,
                redact_credentials(&current)
            );
        }
    }

    /// Give the working copy a committer identity if git has none.
    fn ensure_identity(&self) -> Result<(), SyncError> {
        let repo = self.repo();
        let identity = &self.config.identity;

        for (key, fallback) in [
            ("user.name", &identity.name),
            ("user.email", &identity.email),
        ] {
            if self.git.config_get(repo, key)?.is_none() {
                log::warn!("{} is not configured, using '{}' for this working copy", key, fallback);
                self.git.config_set(repo, key, fallback)?;
            }
        }
        Ok(())
    }

    /// Step 2: mirror the source directory into the target subdirectory.
    pub fn mirror_source(&self) -> Result<MirrorStats, SyncError> {
        let dest = self.config.mirror_dir();
        log::info!(
            "mirroring {} -> {}",
            self.config.source_dir.display(),
            dest.display()
        );

        let stats = mirror::mirror(
            self.config.mirror,
            self.runner,
            &self.config.source_dir,
            &dest,
            &self.config.exclude,
        )?;

        log::info!(
            "mirror done: {} copied, {} deleted, {} unchanged",
            stats.copied,
            stats.deleted,
            stats.unchanged
        );
        Ok(stats)
    }

    /// Step 3: commit and push the subdirectory if it changed.
    pub fn publish(&self, stats: MirrorStats) -> Result<SyncOutcome, SyncError> {
        let repo = self.repo();
        let subdir = &self.config.target_subdir;

        if !self.git.has_changes(repo, subdir)? {
            log::info!("no changes in {}, nothing to publish", subdir.display());
            return Ok(SyncOutcome::NoChanges { stats });
        }

        self.git.add_all(repo, subdir)?;

        let message = commit_message(
            &self.config.commit_prefix,
            chrono::Local::now().naive_local(),
        );
        if self.git.commit(repo, &message, subdir)? == CommitOutcome::NothingToCommit {
            log::info!("nothing to commit");
            return Ok(SyncOutcome::NoChanges { stats });
        }

        let head = resolve_head(repo)?;
        log::info!("committed {} \"{}\"", head.short_commit(), message);

        self.ensure_remote_transport();
        self.push()?;

        Ok(SyncOutcome::Published {
            commit: head.commit,
            message,
            stats,
        })
    }

    fn push(&self) -> Result<(), SyncError> {
        let repo = self.repo();
        let attempts = self.config.push_attempts;
        let upstream = self.config.upstream();

        let mut attempt = 1;
        loop {
            match self
                .git
                .push(repo, &self.config.remote, &self.config.branch)
            {
                Ok(()) => {
                    log::info!("pushed to {}", upstream);
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    log::warn!(
                        "push failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt,
                        attempts,
                        self.config.push_retry_delay,
                        e
                    );
                    std::thread::sleep(self.config.push_retry_delay);
                    attempt += 1;
                }
                Err(e) => {
                    log::error!("push failed after {} attempt(s): {}", attempts, e);
                    log::info!("hint: check network access and that your key is authorized");
                    log::info!(
                        "hint: the commit is kept locally; push it with: git -C {} push {} HEAD:{}",
                        repo.display(),
                        self.config.remote,
                        self.config.branch
                    );
                    return Err(e.into());
                }
            }
        }
    }
}

fn is_missing_or_empty(path: &Path) -> io::Result<bool> {
    match std::fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e),
    }
}
