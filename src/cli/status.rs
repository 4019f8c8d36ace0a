//! Text-based status command implementation.

use std::io::{self, Write};
use std::path::Path;

use crate::git::{CommandOutput, CommandRunner, GitCli, GitError, redact_credentials};

/// Number of commits shown under "Recent commits".
const RECENT_COMMITS: usize = 3;

fn heading(out: &mut dyn Write, title: &str) -> io::Result<()> {
    writeln!(out, "{}", title)
}

/// Print `text` indented, optionally dropping blank lines.
fn print_lines(out: &mut dyn Write, text: &str, skip_blank: bool) -> io::Result<usize> {
    let mut printed = 0;
    for line in text.lines() {
        if skip_blank && line.trim().is_empty() {
            continue;
        }
        writeln!(out, "  {}", line.trim_end())?;
        printed += 1;
    }
    Ok(printed)
}

/// Print a command's output, or the reason it could not run. Returns the
/// number of lines printed.
fn print_output(
    out: &mut dyn Write,
    result: Result<CommandOutput, GitError>,
    skip_blank: bool,
) -> io::Result<usize> {
    match result {
        Ok(output) => print_lines(out, &output.combined(), skip_blank),
        Err(e) => {
            writeln!(out, "  error: {}", e)?;
            Ok(1)
        }
    }
}

/// Print the status report for the working copy at `repo`.
///
/// Every section is attempted; a failing git command shows its own error
/// text in place. Only the fetch in section 3 changes anything, and only
/// remote-tracking refs.
pub fn print_status(
    out: &mut dyn Write,
    runner: &dyn CommandRunner,
    repo: &Path,
    remote: &str,
    branch: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if !repo.is_dir() {
        writeln!(out, "Working copy not found: {}", repo.display())?;
        return Err(Box::new(GitError::NotFound(repo.display().to_string())));
    }

    let git = GitCli::new(runner);
    let upstream = format!("{}/{}", remote, branch);

    writeln!(out, "Working copy: {}", repo.display())?;
    writeln!(out)?;

    // Local modifications
    heading(out, "Local changes")?;
    match git.raw(repo, &["status", "--short"]) {
        Ok(output) if output.success() && output.stdout.trim().is_empty() => {
            writeln!(out, "  (clean)")?;
        }
        result => {
            print_output(out, result, false)?;
        }
    }
    writeln!(out)?;

    // Recent history
    heading(out, "Recent commits")?;
    let count = format!("-{}", RECENT_COMMITS);
    print_output(out, git.raw(repo, &["log", "--oneline", &count]), false)?;
    writeln!(out)?;

    // Refresh remote-tracking refs
    heading(out, &format!("Fetch ({})", remote))?;
    let fetched = print_output(out, git.raw(repo, &["fetch", remote]), true)?;
    if fetched == 0 {
        writeln!(out, "  (up to date)")?;
    }
    writeln!(out)?;

    // Tracking relationship
    heading(out, "Branch")?;
    match git.raw(repo, &["status", "--short", "--branch"]) {
        Ok(output) if output.success() => {
            let line = output.stdout.lines().next().unwrap_or_default();
            writeln!(out, "  {}", line.trim_start_matches("## "))?;
        }
        result => {
            print_output(out, result, false)?;
        }
    }
    writeln!(out)?;

    // Local commits missing from the remote
    heading(out, &format!("Unpushed commits (vs {})", upstream))?;
    match git.unpushed(repo, remote, branch) {
        Ok(commits) if commits.is_empty() => {
            writeln!(out, "  All commits are pushed to {}.", upstream)?;
        }
        Ok(commits) => {
            for commit in &commits {
                writeln!(out, "  {}", commit)?;
            }
            writeln!(out)?;
            writeln!(out, "  {} commit(s) not pushed. Publish them with:", commits.len())?;
            writeln!(
                out,
                "    git -C {} push {} HEAD:{}",
                repo.display(),
                remote,
                branch
            )?;
        }
        Err(e) => writeln!(out, "  error: {}", e)?,
    }
    writeln!(out)?;

    // Remote address, credentials masked
    heading(out, &format!("Remote ({})", remote))?;
    match git.remote_url(repo, remote) {
        Ok(url) => writeln!(out, "  {}", redact_credentials(&url))?,
        Err(e) => writeln!(out, "  error: {}", e)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::SystemRunner;
    use crate::git::runner::testing::ScriptedRunner;
    use crate::testutil::{Fixture, git, require_git, write};

    fn render(runner: &dyn CommandRunner, repo: &Path) -> (String, bool) {
        let mut out = Vec::new();
        let ok = print_status(&mut out, runner, repo, "origin", "main").is_ok();
        (String::from_utf8(out).unwrap(), ok)
    }

    fn section_order(report: &str) -> Vec<usize> {
        [
            "Local changes",
            "Recent commits",
            "Fetch (origin)",
            "Branch",
            "Unpushed commits (vs origin/main)",
            "Remote (origin)",
        ]
        .iter()
        .map(|title| {
            report
                .find(title)
                .unwrap_or_else(|| panic!("missing section {:?} in:\n{}", title, report))
        })
        .collect()
    }

    #[test]
    fn missing_working_copy_is_reported() {
        let temp = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();

        let (report, ok) = render(&runner, &temp.path().join("absent"));

        assert!(!ok);
        assert!(report.contains("Working copy not found"));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn remote_url_token_is_masked() {
        let temp = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new().on(
            "remote get-url origin",
            vec![CommandOutput::ok("https://ghp_S3cret@github.com/org/site.git\n")],
        );

        let (report, ok) = render(&runner, temp.path());

        assert!(ok);
        assert!(report.contains("  https://***@github.com/org/site.git"), "{}", report);
        assert!(!report.contains("S3cret"));
    }

    #[test]
    fn failures_are_inline_and_all_sections_run() {
        let temp = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new()
            .on(
                "fetch origin",
                vec![CommandOutput::failed(128, "\nfatal: Could not read from remote repository.\n\n")],
            )
            .on(
                "log --oneline -3",
                vec![CommandOutput::failed(128, "fatal: bad default revision 'HEAD'")],
            )
            .on(
                "log --oneline origin/main..HEAD",
                vec![CommandOutput::failed(128, "fatal: ambiguous argument")],
            );

        let (report, ok) = render(&runner, temp.path());

        assert!(ok);
        let order = section_order(&report);
        assert!(order.windows(2).all(|w| w[0] < w[1]), "{}", report);
        assert!(report.contains("  fatal: Could not read from remote repository."));
        assert!(report.contains("  fatal: bad default revision 'HEAD'"));
        assert!(report.contains("ambiguous argument"));
        // blank lines from fetch are dropped
        let fetch = &report[order[2]..order[3]];
        assert!(!fetch.contains("\n  \n"), "{:?}", fetch);
        assert_eq!(runner.count("remote get-url"), 1);
    }

    #[test]
    fn status_of_synced_working_copy() {
        if !require_git() {
            return;
        }
        let fixture = Fixture::new(&[("docs/index.html", "hi")]);
        fixture.clone_working_copy();

        let (report, ok) = render(&SystemRunner, &fixture.repo);

        assert!(ok, "{}", report);
        let order = section_order(&report);
        assert!(order.windows(2).all(|w| w[0] < w[1]));
        assert!(report.contains("(clean)"), "{}", report);
        assert!(report.contains("initial"));
        assert!(report.contains("main...origin/main"), "{}", report);
        assert!(report.contains("All commits are pushed to origin/main."));
        assert!(report.contains(fixture.remote.to_str().unwrap()));
    }

    #[test]
    fn unpushed_commits_are_listed_with_push_command() {
        if !require_git() {
            return;
        }
        let fixture = Fixture::new(&[]);
        fixture.clone_working_copy();
        write(&fixture.repo, "docs/new.html", "new");
        write(&fixture.repo, "scratch.txt", "untracked");
        git(&fixture.repo, &["add", "docs"]);
        git(&fixture.repo, &["commit", "--quiet", "-m", "not yet pushed"]);

        let (report, ok) = render(&SystemRunner, &fixture.repo);

        assert!(ok, "{}", report);
        assert!(report.contains("?? scratch.txt"), "{}", report);
        assert!(report.contains("[ahead 1]"), "{}", report);
        assert!(report.contains("not yet pushed"));
        assert!(report.contains("1 commit(s) not pushed"));
        assert!(report.contains(&format!(
            "git -C {} push origin HEAD:main",
            fixture.repo.display()
        )));
        assert!(!report.contains("All commits are pushed"));
    }

    #[test]
    fn unpushed_report_clears_after_push() {
        if !require_git() {
            return;
        }
        let fixture = Fixture::new(&[]);
        fixture.clone_working_copy();
        write(&fixture.repo, "docs/new.html", "new");
        git(&fixture.repo, &["add", "docs"]);
        git(&fixture.repo, &["commit", "--quiet", "-m", "pushed later"]);
        git(&fixture.repo, &["push", "--quiet", "origin", "HEAD:main"]);

        let (report, _) = render(&SystemRunner, &fixture.repo);

        assert!(report.contains("All commits are pushed to origin/main."), "{}", report);
    }
}
