//! Local, read-only repository queries through libgit2.

use std::path::Path;

use git2::Repository;

use super::GitError;

/// The checked-out branch and the commit it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadInfo {
    /// Branch name, `None` when HEAD is detached.
    pub branch: Option<String>,
    pub commit: String,
    pub summary: String,
}

impl HeadInfo {
    /// Abbreviated commit id for display.
    pub fn short_commit(&self) -> &str {
        if self.commit.len() > 12 {
            &self.commit[..12]
        } else {
            &self.commit
        }
    }
}

/// Open an existing repository at the given path.
pub fn open_repository(path: &Path) -> Result<Repository, GitError> {
    let repo = Repository::open(path).map_err(|e| {
        if e.code() == git2::ErrorCode::NotFound {
            GitError::NotFound(path.display().to_string())
        } else {
            GitError::Git(e)
        }
    })?;
    Ok(repo)
}

/// Check if a path contains a valid git repository.
pub fn repository_exists(path: &Path) -> bool {
    Repository::open(path).is_ok()
}

/// Resolve HEAD of the repository at `path`.
pub fn resolve_head(path: &Path) -> Result<HeadInfo, GitError> {
    let repo = open_repository(path)?;
    let head = repo.head()?;

    let branch = if repo.head_detached()? {
        None
    } else {
        let ref_name = head
            .name()
            .ok_or_else(|| GitError::ParseError("HEAD reference has no name".to_string()))?;
        Some(
            ref_name
                .strip_prefix("refs/heads/")
                .ok_or_else(|| {
                    GitError::ParseError(format!(
                        "unexpected HEAD format: expected 'refs/heads/<branch>', got '{}'",
                        ref_name
                    ))
                })?
                .to_string(),
        )
    };

    let commit = head.peel_to_commit()?;

    Ok(HeadInfo {
        branch,
        commit: commit.id().to_string(),
        summary: commit.summary().unwrap_or_default().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn commit_file(repo: &Repository, name: &str, message: &str) -> git2::Oid {
        let workdir = repo.workdir().expect("non-bare repo").to_path_buf();
        std::fs::write(workdir.join(name), message).unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("Test", "test@example.com").unwrap();

        let parents: Vec<git2::Commit> = match repo.head() {
            Ok(head) => vec![head.peel_to_commit().unwrap()],
            Err(_) => Vec::new(),
        };
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();

        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
            .unwrap()
    }

    #[test]
    fn repository_exists_returns_false_for_nonexistent() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        let nonexistent = temp_dir.path().join("nonexistent");

        assert!(!repository_exists(&nonexistent));
    }

    #[test]
    fn repository_exists_returns_false_for_regular_directory() {
        let temp_dir = tempdir().expect("Failed to create temp directory");

        assert!(!repository_exists(temp_dir.path()));
    }

    #[test]
    fn open_repository_not_found() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        let nonexistent = temp_dir.path().join("nonexistent");

        match open_repository(&nonexistent) {
            Err(GitError::NotFound(path)) => assert!(path.contains("nonexistent")),
            other => panic!("Expected NotFound error, got: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn resolve_head_reports_branch_and_commit() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        let repo = Repository::init(temp_dir.path()).unwrap();
        let oid = commit_file(&repo, "index.html", "first page");

        assert!(repository_exists(temp_dir.path()));

        let head = resolve_head(temp_dir.path()).unwrap();
        assert_eq!(head.commit, oid.to_string());
        assert_eq!(head.summary, "first page");
        assert_eq!(head.short_commit().len(), 12);
        assert!(head.branch.is_some());
    }

    #[test]
    fn resolve_head_detached_has_no_branch() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        let repo = Repository::init(temp_dir.path()).unwrap();
        let oid = commit_file(&repo, "a.txt", "one");
        commit_file(&repo, "b.txt", "two");
        repo.set_head_detached(oid).unwrap();

        let head = resolve_head(temp_dir.path()).unwrap();
        assert_eq!(head.branch, None);
        assert_eq!(head.commit, oid.to_string());
    }

    #[test]
    fn resolve_head_fails_on_empty_repository() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        Repository::init(temp_dir.path()).unwrap();

        assert!(matches!(resolve_head(temp_dir.path()), Err(GitError::Git(_))));
    }
}
