//! Git operations through the git CLI.
//!
//! Everything that talks to a remote or writes to the working copy shells out
//! to `git` via a [`CommandRunner`], so the user's git configuration, SSH
//! agent and credential helpers all apply. Local read-only queries live in
//! [`super::repo`] and use libgit2.

use std::path::Path;

use thiserror::Error;

use super::runner::{CommandOutput, CommandRunner, Invocation};

/// Errors returned by git operations.
#[derive(Error, Debug)]
pub enum GitError {
    /// libgit2 reported an error.
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
    /// Repository path does not contain a git repo.
    #[error("repository not found at {0}")]
    NotFound(String),
    /// Output parsing or unexpected git data.
    #[error("failed to parse git data: {0}")]
    ParseError(String),
    /// A git command ran and exited unsuccessfully.
    #[error("`{command}` failed ({}): {}", exit_label(.code), .stderr.trim())]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    /// Underlying IO error, including failure to start git.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Invalid inputs were provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl GitError {
    /// Exit code of the failed command, if this error came from one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            GitError::CommandFailed { code, .. } => *code,
            _ => None,
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "killed by signal".to_string(),
    }
}

/// Outcome of `git commit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// Git refused because the index matches HEAD. Not an error.
    NothingToCommit,
}

/// Validate that a git ref or remote name does not contain dangerous patterns.
///
/// Rejects:
/// - Empty strings
/// - Strings containing `..` (path traversal)
/// - Strings starting with `-` (could be interpreted as flags)
/// - Strings containing null bytes or control characters
pub fn validate_git_ref(value: &str, name: &str) -> Result<(), GitError> {
    if value.is_empty() {
        return Err(GitError::InvalidInput(format!("{} cannot be empty", name)));
    }
    if value.contains("..") {
        return Err(GitError::InvalidInput(format!(
            "{} cannot contain '..'",
            name
        )));
    }
    if value.starts_with('-') {
        return Err(GitError::InvalidInput(format!(
            "{} cannot start with '-'",
            name
        )));
    }
    if value.bytes().any(|b| b < 0x20 || b == 0x7f) {
        return Err(GitError::InvalidInput(format!(
            "{} cannot contain null or control characters",
            name
        )));
    }
    Ok(())
}

/// Git CLI wrapper bound to a command runner.
pub struct GitCli<'r> {
    runner: &'r dyn CommandRunner,
    git_path: String,
}

impl<'r> GitCli<'r> {
    /// Create a wrapper that runs the system `git` through `runner`.
    pub fn new(runner: &'r dyn CommandRunner) -> Self {
        Self {
            runner,
            git_path: "git".into(),
        }
    }

    fn command(&self) -> Invocation {
        Invocation::new(&self.git_path)
    }

    fn in_repo(&self, repo: &Path) -> Invocation {
        self.command().arg("-C").arg(repo)
    }

    /// Run and return the output whatever the exit status.
    fn run_unchecked(&self, invocation: Invocation) -> Result<CommandOutput, GitError> {
        Ok(self.runner.run(&invocation)?)
    }

    /// Run and turn a non-zero exit into [`GitError::CommandFailed`].
    fn run(&self, invocation: Invocation) -> Result<CommandOutput, GitError> {
        let output = self.runner.run(&invocation)?;
        if !output.success() {
            return Err(GitError::CommandFailed {
                command: invocation.display(),
                code: output.code,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    /// Run an arbitrary read-only git command in `repo` and return its raw
    /// output, successful or not. Used by reports that show git's own text.
    pub fn raw(&self, repo: &Path, args: &[&str]) -> Result<CommandOutput, GitError> {
        self.run_unchecked(self.in_repo(repo).args(args))
    }

    /// Clone `url` into `dest`, creating parent directories.
    ///
    /// A destination created by this call is removed again if the clone fails.
    pub fn clone(&self, url: &str, dest: &Path) -> Result<(), GitError> {
        if url.is_empty() || url.starts_with('-') {
            return Err(GitError::InvalidInput(format!(
                "invalid remote url '{}'",
                url
            )));
        }

        let dest_existed = dest.exists();

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let result = self.run(self.command().arg("clone").arg("--").arg(url).arg(dest));

        if result.is_err() && !dest_existed {
            let _ = std::fs::remove_dir_all(dest);
        }

        result.map(|_| ())
    }

    /// Fast-forward the current branch to `remote/branch`.
    pub fn pull_ff_only(&self, repo: &Path, remote: &str, branch: &str) -> Result<(), GitError> {
        validate_git_ref(remote, "remote")?;
        validate_git_ref(branch, "branch")?;

        self.run(
            self.in_repo(repo)
                .args(["pull", "--ff-only", remote, branch]),
        )?;
        Ok(())
    }

    /// Fetch from `remote` without merging.
    pub fn fetch(&self, repo: &Path, remote: &str) -> Result<(), GitError> {
        validate_git_ref(remote, "remote")?;

        self.run(self.in_repo(repo).args(["fetch", remote]))?;
        Ok(())
    }

    /// Point the current branch, index and working tree at `target`,
    /// discarding anything local that differs.
    pub fn reset_hard(&self, repo: &Path, target: &str) -> Result<(), GitError> {
        validate_git_ref(target, "reset target")?;

        self.run(self.in_repo(repo).args(["reset", "--hard", target]))?;
        Ok(())
    }

    /// Configured URL of `remote`.
    pub fn remote_url(&self, repo: &Path, remote: &str) -> Result<String, GitError> {
        validate_git_ref(remote, "remote")?;

        let output = self.run(self.in_repo(repo).args(["remote", "get-url", remote]))?;
        Ok(output.stdout.trim().to_string())
    }

    pub fn set_remote_url(&self, repo: &Path, remote: &str, url: &str) -> Result<(), GitError> {
        validate_git_ref(remote, "remote")?;

        self.run(
            self.in_repo(repo)
                .args(["remote", "set-url", remote])
                .arg(url),
        )?;
        Ok(())
    }

    /// Whether anything under `pathspec` differs from HEAD, including
    /// untracked and deleted files.
    pub fn has_changes(&self, repo: &Path, pathspec: &Path) -> Result<bool, GitError> {
        let output = self.run(
            self.in_repo(repo)
                .args(["status", "--porcelain", "--"])
                .arg(pathspec),
        )?;
        Ok(!output.stdout.trim().is_empty())
    }

    /// Stage additions, modifications and deletions under `pathspec`.
    pub fn add_all(&self, repo: &Path, pathspec: &Path) -> Result<(), GitError> {
        self.run(self.in_repo(repo).args(["add", "--all", "--"]).arg(pathspec))?;
        Ok(())
    }

    /// Commit only what is under `pathspec`; other staged paths stay staged.
    pub fn commit(
        &self,
        repo: &Path,
        message: &str,
        pathspec: &Path,
    ) -> Result<CommitOutcome, GitError> {
        let invocation = self
            .in_repo(repo)
            .args(["commit", "-m", message, "--"])
            .arg(pathspec);
        let command = invocation.display();
        let output = self.run_unchecked(invocation)?;

        if output.success() {
            return Ok(CommitOutcome::Committed);
        }
        if output
            .combined()
            .to_lowercase()
            .contains("nothing to commit")
        {
            return Ok(CommitOutcome::NothingToCommit);
        }

        Err(GitError::CommandFailed {
            command,
            code: output.code,
            stderr: output.combined(),
        })
    }

    /// Push `HEAD` to `remote`'s `branch`.
    pub fn push(&self, repo: &Path, remote: &str, branch: &str) -> Result<(), GitError> {
        validate_git_ref(remote, "remote")?;
        validate_git_ref(branch, "branch")?;

        let refspec = format!("HEAD:{}", branch);
        self.run(self.in_repo(repo).args(["push", remote, &refspec]))?;
        Ok(())
    }

    /// One-line summaries of commits reachable from HEAD but not from
    /// `remote/branch`, newest first.
    pub fn unpushed(&self, repo: &Path, remote: &str, branch: &str) -> Result<Vec<String>, GitError> {
        validate_git_ref(remote, "remote")?;
        validate_git_ref(branch, "branch")?;

        let range = format!("{}/{}..HEAD", remote, branch);
        let output = self.run(self.in_repo(repo).args(["log", "--oneline", &range]))?;
        Ok(output
            .stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Read a config value as git resolves it for `repo`; `None` when unset.
    pub fn config_get(&self, repo: &Path, key: &str) -> Result<Option<String>, GitError> {
        let invocation = self.in_repo(repo).args(["config", "--get", key]);
        let command = invocation.display();
        let output = self.run_unchecked(invocation)?;

        match output.code {
            Some(0) => {
                let value = output.stdout.trim();
                Ok((!value.is_empty()).then(|| value.to_string()))
            }
            // git config exits 1 when the key is not set
            Some(1) => Ok(None),
            code => Err(GitError::CommandFailed {
                command,
                code,
                stderr: output.stderr,
            }),
        }
    }

    /// Set a config value in the repository's local config.
    pub fn config_set(&self, repo: &Path, key: &str, value: &str) -> Result<(), GitError> {
        self.run(self.in_repo(repo).args(["config", "--local", key, value]))?;
        Ok(())
    }
}
