//! Git operations on task repositories.
//!
//! Everything shells out to the `git` binary through [`crate::subprocess`];
//! no libgit2 binding, since the operations here are a handful of plumbing
//! commands and the CLI handles alternates and partial fetches for free.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::HarnessError;
use crate::subprocess::{run_command, CommandResult};

/// Harness-owned paths excluded from diff accounting. Context artifacts and
/// agent config directories are not agent work product.
static CONTEXT_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(^|/)(AGENTS\.md|CLAUDE\.md|\.github/|\.claude/|\.cursor/|\.cursorrules)")
        .unwrap_or_else(|e| unreachable!("invalid context file pattern: {e}"))
});

/// Size of the change the agent made, measured against the baseline commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffStats {
    pub lines_changed: u64,
    pub files: Vec<String>,
}

pub fn is_context_file(path: &str) -> bool {
    CONTEXT_FILE_RE.is_match(path)
}

fn git<S: AsRef<std::ffi::OsStr>>(
    op: &str,
    args: &[S],
    cwd: &Path,
) -> Result<CommandResult, HarnessError> {
    let result = run_command("git", args, cwd, None).map_err(|e| HarnessError::GitFailed {
        op: op.to_owned(),
        detail: e.to_string(),
    })?;
    Ok(result)
}

fn git_checked<S: AsRef<std::ffi::OsStr>>(
    op: &str,
    args: &[S],
    cwd: &Path,
) -> Result<CommandResult, HarnessError> {
    let result = git(op, args, cwd)?;
    if !result.success() {
        return Err(HarnessError::GitFailed {
            op: op.to_owned(),
            detail: result.stderr.trim().to_owned(),
        });
    }
    Ok(result)
}

/// Clone `url` into `dest`.
///
/// With a `reference` repository the clone goes through `--shared`
/// (alternates, nearly instant) with a `--local` fallback; large repos can
/// fail `--shared` under concurrent access. Without one, a full network
/// clone.
pub fn clone_repo(url: &str, dest: &Path, reference: Option<&Path>) -> Result<(), HarnessError> {
    let parent = dest.parent().unwrap_or(Path::new("."));
    let dest_str = dest.to_string_lossy();

    if let Some(reference) = reference {
        let ref_str = reference.to_string_lossy();
        let shared = git(
            "clone --shared",
            &["clone", "--shared", "--no-checkout", &ref_str, &dest_str],
            parent,
        )?;
        if shared.success() {
            return Ok(());
        }
        warn!(dest = %dest.display(), "git clone --shared failed, falling back to --local");
        if dest.exists() {
            std::fs::remove_dir_all(dest).map_err(|e| HarnessError::GitFailed {
                op: "clone --local".to_owned(),
                detail: format!("could not clear {}: {e}", dest.display()),
            })?;
        }
        git_checked(
            "clone --local",
            &["clone", "--local", "--no-checkout", &ref_str, &dest_str],
            parent,
        )?;
        return Ok(());
    }

    git_checked("clone", &["clone", url, &dest_str], parent).map_err(|e| {
        HarnessError::RepoUnreachable {
            url: url.to_owned(),
            detail: e.to_string(),
        }
    })?;
    Ok(())
}

/// Check out `commit`, fetching it from origin when the local clone does not
/// have the object yet (shared clones of a stale reference, shallow clones).
pub fn checkout_commit(repo: &Path, commit: &str) -> Result<(), HarnessError> {
    let direct = git("checkout", &["checkout", commit], repo)?;
    if direct.success() {
        return Ok(());
    }
    debug!(commit, "commit not present locally, fetching from origin");
    git_checked(
        "fetch",
        &["fetch", "--depth", "1", "origin", commit],
        repo,
    )?;
    git_checked("checkout", &["checkout", commit], repo)?;
    Ok(())
}

/// Full commit message (subject and body) of `commit`.
pub fn commit_message(repo: &Path, commit: &str) -> Result<String, HarnessError> {
    let result = git_checked("log", &["log", "-1", "--format=%B", commit], repo)?;
    Ok(result.stdout.trim().to_owned())
}

/// Contents of `path` as of `commit`, or `None` if the file does not exist
/// at that commit.
pub fn show_file(repo: &Path, commit: &str, path: &str) -> Result<Option<String>, HarnessError> {
    let spec = format!("{commit}:{path}");
    let result = git("show", &["show", &spec], repo)?;
    if result.success() {
        Ok(Some(result.stdout))
    } else {
        Ok(None)
    }
}

/// Stage and commit the current tree as the measurement baseline.
///
/// Runs after stripping and artifact injection so diff stats only measure
/// what the agent changed. Signing is disabled and the committer identity is
/// pinned so neither a signing setup nor a missing global git config can
/// break the run.
pub fn create_baseline_commit(repo: &Path) -> Result<(), HarnessError> {
    git_checked("add", &["add", "-A"], repo)?;
    git_checked(
        "commit",
        &[
            "-c",
            "commit.gpgsign=false",
            "-c",
            "user.email=harness@localhost",
            "-c",
            "user.name=harness",
            "commit",
            "--allow-empty",
            "-m",
            "baseline",
        ],
        repo,
    )?;
    Ok(())
}

/// Diff stats for all uncommitted changes, tracked and untracked, against
/// HEAD. Context files are excluded from both the file list and line count;
/// binary files contribute to the file list only.
pub fn diff_stats(repo: &Path) -> Result<DiffStats, HarnessError> {
    // Stage everything so untracked files show up in the diff.
    git("add", &["add", "-A"], repo)?;

    let names = git_checked(
        "diff --name-only",
        &["diff", "--cached", "--name-only", "HEAD"],
        repo,
    )?;
    let files: Vec<String> = names
        .stdout
        .lines()
        .map(str::trim)
        .filter(|f| !f.is_empty() && !is_context_file(f))
        .map(str::to_owned)
        .collect();

    let mut lines_changed = 0u64;
    if !files.is_empty() {
        let numstat = git_checked(
            "diff --numstat",
            &["diff", "--cached", "--numstat", "HEAD"],
            repo,
        )?;
        for line in numstat.stdout.lines() {
            let mut parts = line.split('\t');
            let (Some(added), Some(deleted), Some(path)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            if is_context_file(path) {
                continue;
            }
            // Binary files report "-" in both columns.
            if let Ok(n) = added.parse::<u64>() {
                lines_changed += n;
            }
            if let Ok(n) = deleted.parse::<u64>() {
                lines_changed += n;
            }
        }
    }

    Ok(DiffStats {
        lines_changed,
        files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn init_repo(dir: &Path) -> PathBuf {
        let repo = dir.join("repo");
        fs::create_dir_all(&repo).unwrap();
        run_command("git", &["init", "-b", "main"], &repo, None).unwrap();
        run_command("git", &["config", "user.email", "t@example.com"], &repo, None).unwrap();
        run_command("git", &["config", "user.name", "Test"], &repo, None).unwrap();
        repo
    }

    fn commit_all(repo: &Path, message: &str) -> String {
        run_command("git", &["add", "-A"], repo, None).unwrap();
        run_command(
            "git",
            &["-c", "commit.gpgsign=false", "commit", "-m", message],
            repo,
            None,
        )
        .unwrap();
        let head = run_command("git", &["rev-parse", "HEAD"], repo, None).unwrap();
        head.stdout.trim().to_owned()
    }

    #[test]
    fn context_file_patterns() {
        assert!(is_context_file("AGENTS.md"));
        assert!(is_context_file("CLAUDE.md"));
        assert!(is_context_file("docs/CLAUDE.md"));
        assert!(is_context_file(".github/workflows/ci.yml"));
        assert!(is_context_file(".claude/settings.json"));
        assert!(is_context_file(".cursorrules"));
        assert!(!is_context_file("src/main.py"));
        assert!(!is_context_file("README.md"));
        assert!(!is_context_file("myAGENTS.md"));
    }

    #[test]
    fn commit_message_returns_full_body() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        fs::write(repo.join("a.txt"), "hello\n").unwrap();
        let commit = commit_all(&repo, "Fix widget parsing\n\nHandle empty input.");

        let message = commit_message(&repo, &commit).unwrap();
        assert!(message.starts_with("Fix widget parsing"));
        assert!(message.contains("Handle empty input."));
    }

    #[test]
    fn show_file_at_commit() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        fs::write(repo.join("a.txt"), "v1\n").unwrap();
        let first = commit_all(&repo, "first");
        fs::write(repo.join("a.txt"), "v2\n").unwrap();
        commit_all(&repo, "second");

        assert_eq!(show_file(&repo, &first, "a.txt").unwrap().as_deref(), Some("v1\n"));
        assert_eq!(show_file(&repo, "HEAD", "a.txt").unwrap().as_deref(), Some("v2\n"));
        assert_eq!(show_file(&repo, &first, "missing.txt").unwrap(), None);
    }

    #[test]
    fn checkout_moves_head() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        fs::write(repo.join("a.txt"), "v1\n").unwrap();
        let first = commit_all(&repo, "first");
        fs::write(repo.join("a.txt"), "v2\n").unwrap();
        commit_all(&repo, "second");

        checkout_commit(&repo, &first).unwrap();
        assert_eq!(fs::read_to_string(repo.join("a.txt")).unwrap(), "v1\n");
    }

    #[test]
    fn reference_clone_shares_objects() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = init_repo(dir.path());
        fs::write(upstream.join("a.txt"), "v1\n").unwrap();
        let commit = commit_all(&upstream, "first");

        let dest = dir.path().join("clone");
        clone_repo("unused-url", &dest, Some(&upstream)).unwrap();
        checkout_commit(&dest, &commit).unwrap();
        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "v1\n");
    }

    #[test]
    fn plain_clone_from_local_path() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = init_repo(dir.path());
        fs::write(upstream.join("a.txt"), "v1\n").unwrap();
        commit_all(&upstream, "first");

        let dest = dir.path().join("clone");
        clone_repo(&upstream.to_string_lossy(), &dest, None).unwrap();
        assert!(dest.join("a.txt").exists());
    }

    #[test]
    fn clone_unreachable_url_fails() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("clone");
        let err = clone_repo(
            &dir.path().join("no-such-repo").to_string_lossy(),
            &dest,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, HarnessError::RepoUnreachable { .. }));
    }

    #[test]
    fn diff_stats_measures_changes_since_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        fs::write(repo.join("a.txt"), "one\ntwo\n").unwrap();
        commit_all(&repo, "first");

        create_baseline_commit(&repo).unwrap();

        // Modify a tracked file and add an untracked one.
        fs::write(repo.join("a.txt"), "one\nTWO\nthree\n").unwrap();
        fs::write(repo.join("new.txt"), "fresh\n").unwrap();

        let stats = diff_stats(&repo).unwrap();
        assert_eq!(stats.files.len(), 2);
        assert!(stats.files.contains(&"a.txt".to_owned()));
        assert!(stats.files.contains(&"new.txt".to_owned()));
        // a.txt: 2 added + 1 deleted; new.txt: 1 added.
        assert_eq!(stats.lines_changed, 4);
    }

    #[test]
    fn diff_stats_excludes_context_files() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        fs::write(repo.join("a.txt"), "one\n").unwrap();
        commit_all(&repo, "first");
        create_baseline_commit(&repo).unwrap();

        fs::write(repo.join("AGENTS.md"), "generated context\n").unwrap();
        fs::create_dir_all(repo.join(".claude")).unwrap();
        fs::write(repo.join(".claude/settings.json"), "{}\n").unwrap();

        let stats = diff_stats(&repo).unwrap();
        assert!(stats.files.is_empty());
        assert_eq!(stats.lines_changed, 0);
    }

    #[test]
    fn baseline_commit_absorbs_injected_files() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        fs::write(repo.join("a.txt"), "one\n").unwrap();
        commit_all(&repo, "first");

        // Harness injects a file, then baselines; the agent changes nothing.
        fs::write(repo.join("tests_injected.py"), "def test(): pass\n").unwrap();
        create_baseline_commit(&repo).unwrap();

        let stats = diff_stats(&repo).unwrap();
        assert!(stats.files.is_empty());
        assert_eq!(stats.lines_changed, 0);
    }

    #[test]
    fn baseline_commit_is_idempotent_when_clean() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        fs::write(repo.join("a.txt"), "one\n").unwrap();
        commit_all(&repo, "first");

        create_baseline_commit(&repo).unwrap();
        create_baseline_commit(&repo).unwrap();
        let stats = diff_stats(&repo).unwrap();
        assert_eq!(stats.lines_changed, 0);
    }
}
