//! Environment check for the sync procedure.

use std::io::{self, Write};

use crate::config::{Config, MirrorBackend};
use crate::git::{
    CommandRunner, GitCli, Transport, program_available, redact_credentials, repository_exists,
    resolve_head,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Ok,
    Info,
    Fail,
}

impl Level {
    fn label(self) -> &'static str {
        match self {
            Level::Ok => "OK",
            Level::Info => "INFO",
            Level::Fail => "FAIL",
        }
    }
}

fn check(out: &mut dyn Write, level: Level, what: &str, detail: &str) -> io::Result<bool> {
    writeln!(out, "[{}] {}: {}", level.label(), what, detail)?;
    Ok(level != Level::Fail)
}

/// Print one line per check. Returns whether a sync could run.
pub fn run_doctor(
    out: &mut dyn Write,
    runner: &dyn CommandRunner,
    config: &Config,
) -> io::Result<bool> {
    writeln!(out, "sitesync system check\n")?;
    let mut healthy = true;

    let git_ok = program_available(runner, "git");
    healthy &= check(
        out,
        if git_ok { Level::Ok } else { Level::Fail },
        "git",
        if git_ok { "available" } else { "not found" },
    )?;

    let rsync_ok = program_available(runner, "rsync");
    let rsync_level = match (rsync_ok, config.mirror) {
        (true, _) => Level::Ok,
        (false, MirrorBackend::Rsync) => Level::Fail,
        (false, MirrorBackend::Native) => Level::Info,
    };
    healthy &= check(
        out,
        rsync_level,
        "rsync",
        if rsync_ok {
            "available"
        } else {
            "not found (only needed for the rsync mirror backend)"
        },
    )?;

    let source = &config.source_dir;
    healthy &= if source.is_dir() {
        check(out, Level::Ok, "Source dir", &source.display().to_string())?
    } else {
        check(
            out,
            Level::Fail,
            "Source dir",
            &format!("{} (missing)", source.display()),
        )?
    };

    let repo = &config.repo_dir;
    if repository_exists(repo) {
        let detail = match resolve_head(repo) {
            Ok(head) => format!(
                "{} ({} at {} \"{}\")",
                repo.display(),
                head.branch.as_deref().unwrap_or("detached"),
                head.short_commit(),
                head.summary
            ),
            Err(_) => format!("{} (no commits yet)", repo.display()),
        };
        check(out, Level::Ok, "Working copy", &detail)?;

        healthy &= check_remote(out, runner, config)?;
    } else if repo.exists() && repo.read_dir().map(|mut d| d.next().is_some()).unwrap_or(true) {
        healthy &= check(
            out,
            Level::Fail,
            "Working copy",
            &format!("{} exists but is not a git repository", repo.display()),
        )?;
    } else {
        check(
            out,
            Level::Info,
            "Working copy",
            &format!("{} (will be cloned on first sync)", repo.display()),
        )?;
    }

    Ok(healthy)
}

fn check_remote(
    out: &mut dyn Write,
    runner: &dyn CommandRunner,
    config: &Config,
) -> io::Result<bool> {
    let what = format!("Remote {}", config.remote);
    let current = match GitCli::new(runner).remote_url(&config.repo_dir, &config.remote) {
        Ok(url) => url,
        Err(e) => return check(out, Level::Fail, &what, &e.to_string()),
    };

    let shown = redact_credentials(&current);
    if current == config.remote_url {
        return check(out, Level::Ok, &what, &shown);
    }

    let have = Transport::classify(&current);
    let wanted = Transport::classify(&config.remote_url);
    if have.should_upgrade_to(wanted) {
        check(
            out,
            Level::Info,
            &what,
            &format!("{} (will be switched to {:?} on next sync)", shown, wanted),
        )
    } else {
        check(
            out,
            Level::Info,
            &what,
            &format!(
                "{} (differs from configured {})",
                shown,
                redact_credentials(&config.remote_url)
            ),
        )
    }
}
