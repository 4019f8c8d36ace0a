//! Fixtures for tests that drive a real `git` against local bare remotes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tempfile::TempDir;

use crate::config::{Config, Identity, MirrorBackend};
use crate::git::{SystemRunner, program_available};

pub(crate) fn require_git() -> bool {
    if program_available(&SystemRunner, "git") {
        true
    } else {
        eprintln!("skipping test that needs the git binary");
        false
    }
}

/// Run git in `dir` with a fixed identity, panicking on failure.
pub(crate) fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["-c", "user.name=Fixture", "-c", "user.email=fixture@example.com"])
        .args(["-c", "commit.gpgsign=false"])
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub(crate) fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("path has a parent")).unwrap();
    fs::write(path, content).unwrap();
}

/// A bare remote whose `main` branch is fed from a separate seed clone,
/// plus a source directory and a not-yet-created working copy path.
pub(crate) struct Fixture {
    _temp: TempDir,
    pub remote: PathBuf,
    pub seed: PathBuf,
    pub source: PathBuf,
    pub repo: PathBuf,
}

impl Fixture {
    /// Remote with one commit on `main` containing `files` (path, content).
    pub(crate) fn new(files: &[(&str, &str)]) -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        let remote = root.join("remote.git");
        let seed = root.join("seed");
        let source = root.join("site");
        let repo = root.join("github_repo");

        fs::create_dir_all(&remote).unwrap();
        git(&remote, &["init", "--bare", "--quiet"]);
        git(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        fs::create_dir_all(&seed).unwrap();
        git(&seed, &["init", "--quiet"]);
        git(&seed, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(&seed, &["remote", "add", "origin", remote.to_str().unwrap()]);
        write(&seed, "README.md", "site repository\n");
        for (path, content) in files {
            write(&seed, path, content);
        }
        git(&seed, &["add", "--all"]);
        git(&seed, &["commit", "--quiet", "-m", "initial"]);
        git(&seed, &["push", "--quiet", "origin", "HEAD:main"]);

        fs::create_dir_all(&source).unwrap();

        Self {
            _temp: temp,
            remote,
            seed,
            source,
            repo,
        }
    }

    pub(crate) fn config(&self) -> Config {
        Config {
            source_dir: self.source.clone(),
            remote_url: self.remote.to_string_lossy().into_owned(),
            repo_dir: self.repo.clone(),
            ..Self::config_template()
        }
    }

    /// Defaults with placeholder paths, for tests that fill in their own.
    pub(crate) fn config_template() -> Config {
        Config {
            source_dir: PathBuf::from("site"),
            remote_url: "remote.git".to_string(),
            repo_dir: PathBuf::from("github_repo"),
            target_subdir: PathBuf::from("docs"),
            remote: "origin".to_string(),
            branch: "main".to_string(),
            commit_prefix: "Auto sync".to_string(),
            exclude: Vec::new(),
            mirror: MirrorBackend::Native,
            push_attempts: 1,
            push_retry_delay: Duration::ZERO,
            identity: Identity::default(),
            lock_timeout: Duration::from_secs(5),
        }
    }

    /// Clone the remote into `repo` directly with git.
    pub(crate) fn clone_working_copy(&self) {
        let parent = self.repo.parent().expect("repo has a parent");
        git(
            parent,
            &[
                "clone",
                "--quiet",
                self.remote.to_str().unwrap(),
                self.repo.to_str().unwrap(),
            ],
        );
    }

    /// Commit and push more files to the remote from the seed clone.
    pub(crate) fn push_from_seed(&self, files: &[(&str, &str)], message: &str) {
        git(&self.seed, &["pull", "--quiet", "--ff-only", "origin", "main"]);
        for (path, content) in files {
            write(&self.seed, path, content);
        }
        git(&self.seed, &["add", "--all"]);
        git(&self.seed, &["commit", "--quiet", "-m", message]);
        git(&self.seed, &["push", "--quiet", "origin", "HEAD:main"]);
    }

    /// Number of commits on the remote's `main`.
    pub(crate) fn remote_commit_count(&self) -> usize {
        git(&self.remote, &["rev-list", "--count", "main"])
            .trim()
            .parse()
            .unwrap()
    }

    /// Subject of the newest commit on the remote's `main`.
    pub(crate) fn remote_head_subject(&self) -> String {
        git(&self.remote, &["log", "-1", "--format=%s", "main"])
            .trim()
            .to_string()
    }

    /// Files under `docs/` at the tip of the remote's `main`.
    pub(crate) fn remote_docs(&self) -> Vec<String> {
        git(&self.remote, &["ls-tree", "-r", "--name-only", "main", "docs"])
            .lines()
            .map(str::to_string)
            .collect()
    }
}
