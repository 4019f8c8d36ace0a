//! Directory mirroring.
//!
//! Makes a destination directory an exact copy of a source directory: new and
//! changed files are copied, anything in the destination that the source
//! lacks is deleted. `.git` and entries matching an exclude glob are never
//! copied and never deleted.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use thiserror::Error;

use crate::config::MirrorBackend;
use crate::git::{CommandRunner, Invocation};

/// Always excluded, on both sides.
const GIT_DIR: &str = ".git";

/// Errors returned while mirroring.
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("source directory does not exist: {0}")]
    SourceMissing(PathBuf),
    #[error("source is not a directory: {0}")]
    SourceNotDirectory(PathBuf),
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid exclude pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("`{command}` failed ({}): {}", exit_label(.code), .stderr.trim())]
    Rsync {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

impl MirrorError {
    /// Exit code of a failed rsync run.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            MirrorError::Rsync { code, .. } => *code,
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

fn io_err(action: &'static str, path: &Path) -> impl FnOnce(io::Error) -> MirrorError {
    let path = path.to_path_buf();
    move |source| MirrorError::Io {
        action,
        path,
        source,
    }
}

/// What a mirror run changed. Counts are of files and symlinks; the rsync
/// backend does not report counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MirrorStats {
    pub copied: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

/// Mirror `src` into `dest` with the chosen backend.
pub fn mirror(
    backend: MirrorBackend,
    runner: &dyn CommandRunner,
    src: &Path,
    dest: &Path,
    exclude: &[String],
) -> Result<MirrorStats, MirrorError> {
    check_source(src)?;
    match backend {
        MirrorBackend::Native => Mirror::new(exclude)?.run(src, dest),
        MirrorBackend::Rsync => rsync(runner, src, dest, exclude).map(|()| MirrorStats::default()),
    }
}

fn check_source(src: &Path) -> Result<(), MirrorError> {
    match fs::metadata(src) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(MirrorError::SourceNotDirectory(src.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(MirrorError::SourceMissing(src.to_path_buf()))
        }
        Err(e) => Err(io_err("failed to stat", src)(e)),
    }
}

/// `rsync -a --delete --exclude=.git [--exclude=PAT]... SRC/ DEST/`
fn rsync(
    runner: &dyn CommandRunner,
    src: &Path,
    dest: &Path,
    exclude: &[String],
) -> Result<(), MirrorError> {
    fs::create_dir_all(dest).map_err(io_err("failed to create", dest))?;

    let mut invocation = Invocation::new("rsync")
        .args(["-a", "--delete"])
        .arg(format!("--exclude={}", GIT_DIR));
    for pattern in exclude {
        invocation = invocation.arg(format!("--exclude={}", pattern));
    }
    // Trailing slashes copy the contents rather than the directory itself.
    let invocation = invocation
        .arg(with_trailing_slash(src))
        .arg(with_trailing_slash(dest));

    let output = runner
        .run(&invocation)
        .map_err(io_err("failed to run rsync for", dest))?;
    if !output.success() {
        return Err(MirrorError::Rsync {
            command: invocation.display(),
            code: output.code,
            stderr: output.stderr,
        });
    }
    Ok(())
}

fn with_trailing_slash(path: &Path) -> String {
    let mut s = path.to_string_lossy().into_owned();
    if !s.ends_with('/') {
        s.push('/');
    }
    s
}

/// In-process mirror.
struct Mirror {
    exclude: Vec<glob::Pattern>,
    stats: MirrorStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    File,
    Dir,
    Symlink,
}

impl Kind {
    fn of(meta: &fs::Metadata) -> Self {
        let ft = meta.file_type();
        if ft.is_symlink() {
            Kind::Symlink
        } else if ft.is_dir() {
            Kind::Dir
        } else {
            Kind::File
        }
    }
}

impl Mirror {
    fn new(exclude: &[String]) -> Result<Self, MirrorError> {
        let exclude = exclude
            .iter()
            .map(|p| {
                glob::Pattern::new(p).map_err(|e| MirrorError::InvalidPattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            exclude,
            stats: MirrorStats::default(),
        })
    }

    fn run(mut self, src: &Path, dest: &Path) -> Result<MirrorStats, MirrorError> {
        fs::create_dir_all(dest).map_err(io_err("failed to create", dest))?;
        self.sync_dir(src, dest)?;
        Ok(self.stats)
    }

    /// Names that are not valid UTF-8 never match an exclude glob.
    fn is_excluded(&self, name: &OsStr) -> bool {
        if name == GIT_DIR {
            return true;
        }
        name.to_str()
            .is_some_and(|name| self.exclude.iter().any(|p| p.matches(name)))
    }

    /// Names in `dir` that take part in mirroring, sorted for stable order.
    fn entries(&self, dir: &Path) -> Result<Vec<OsString>, MirrorError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_err("failed to read", dir))? {
            let entry = entry.map_err(io_err("failed to read", dir))?;
            let name = entry.file_name();
            if !self.is_excluded(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn sync_dir(&mut self, src: &Path, dest: &Path) -> Result<(), MirrorError> {
        let src_names = self.entries(src)?;

        for name in self.entries(dest)? {
            if src_names.binary_search(&name).is_err() {
                let path = dest.join(&name);
                log::debug!("deleting {}", path.display());
                self.remove(&path)?;
            }
        }

        for name in &src_names {
            self.sync_entry(&src.join(name), &dest.join(name))?;
        }
        Ok(())
    }

    fn sync_entry(&mut self, src: &Path, dest: &Path) -> Result<(), MirrorError> {
        let src_meta = fs::symlink_metadata(src).map_err(io_err("failed to stat", src))?;
        let src_kind = Kind::of(&src_meta);

        let dest_meta = match fs::symlink_metadata(dest) {
            Ok(meta) => Some(meta),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(io_err("failed to stat", dest)(e)),
        };

        if let Some(meta) = &dest_meta {
            if Kind::of(meta) != src_kind {
                self.remove(dest)?;
            }
        }
        let dest_meta = dest_meta.filter(|m| Kind::of(m) == src_kind);

        match src_kind {
            Kind::Dir => {
                if dest_meta.is_none() {
                    fs::create_dir(dest).map_err(io_err("failed to create", dest))?;
                }
                self.sync_dir(src, dest)?;
                fs::set_permissions(dest, src_meta.permissions())
                    .map_err(io_err("failed to set permissions on", dest))?;
            }
            Kind::File => {
                match dest_meta.as_ref() {
                    Some(d) if same_file_content_hint(&src_meta, d) => {
                        if d.permissions() == src_meta.permissions() {
                            self.stats.unchanged += 1;
                        } else {
                            log::debug!("updating permissions of {}", dest.display());
                            fs::set_permissions(dest, src_meta.permissions())
                                .map_err(io_err("failed to set permissions on", dest))?;
                            self.stats.copied += 1;
                        }
                    }
                    _ => {
                        log::debug!("copying {}", dest.display());
                        fs::copy(src, dest).map_err(io_err("failed to copy to", dest))?;
                        let mtime = FileTime::from_last_modification_time(&src_meta);
                        filetime::set_file_mtime(dest, mtime)
                            .map_err(io_err("failed to set mtime on", dest))?;
                        self.stats.copied += 1;
                    }
                }
            }
            Kind::Symlink => {
                let target = fs::read_link(src).map_err(io_err("failed to read link", src))?;
                let current = dest_meta
                    .as_ref()
                    .and_then(|_| fs::read_link(dest).ok());
                if current.as_deref() == Some(target.as_path()) {
                    self.stats.unchanged += 1;
                } else {
                    if current.is_some() {
                        fs::remove_file(dest).map_err(io_err("failed to remove", dest))?;
                    }
                    make_symlink(&target, dest)?;
                    self.stats.copied += 1;
                }
            }
        }
        Ok(())
    }

    fn remove(&mut self, path: &Path) -> Result<(), MirrorError> {
        let meta = fs::symlink_metadata(path).map_err(io_err("failed to stat", path))?;
        if Kind::of(&meta) == Kind::Dir {
            self.stats.deleted += count_files(path);
            fs::remove_dir_all(path).map_err(io_err("failed to remove", path))?;
        } else {
            fs::remove_file(path).map_err(io_err("failed to remove", path))?;
            self.stats.deleted += 1;
        }
        Ok(())
    }
}

/// Same quick check rsync uses: equal size and modification time.
fn same_file_content_hint(src: &fs::Metadata, dest: &fs::Metadata) -> bool {
    src.len() == dest.len()
        && FileTime::from_last_modification_time(src) == FileTime::from_last_modification_time(dest)
}

fn count_files(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| match entry.file_type() {
            Ok(ft) if ft.is_dir() => count_files(&entry.path()),
            _ => 1,
        })
        .sum()
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> Result<(), MirrorError> {
    std::os::unix::fs::symlink(target, link).map_err(io_err("failed to create symlink", link))
}

#[cfg(not(unix))]
fn make_symlink(target: &Path, link: &Path) -> Result<(), MirrorError> {
    // Without portable symlinks, copy what the link points at.
    fs::copy(target, link)
        .map(|_| ())
        .map_err(io_err("failed to copy to", link))
}
