//! Workspace provisioning.
//!
//! Every (task, condition, repetition) gets a private clone checked out at
//! the task's pre-fix commit, stripped of pre-existing context files, with
//! the fix commit's version of the test file injected. Injection matters
//! because repos routinely add the reproducing test in the same commit as
//! the fix; without it there is nothing to fail at the pre-fix commit.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::HarnessError;
use crate::gitops;
use crate::subprocess::run_command;
use crate::taskset::{Condition, RepoSpec, Task};

/// File names stripped everywhere in the tree regardless of repo config.
const UNIVERSAL_STRIP: [&str; 2] = ["AGENTS.md", "CLAUDE.md"];

/// A provisioned workspace directory. Removal is explicit via
/// [`WorkspaceProvisioner::teardown`] so a preserved workspace survives for
/// debugging.
#[derive(Debug)]
pub struct WorkspaceHandle {
    pub path: PathBuf,
}

pub struct WorkspaceProvisioner {
    root: PathBuf,
    repo: RepoSpec,
    reference: Option<PathBuf>,
    preserve: bool,
}

impl WorkspaceProvisioner {
    pub fn new(
        root: impl Into<PathBuf>,
        repo: RepoSpec,
        reference: Option<PathBuf>,
        preserve: bool,
    ) -> Result<WorkspaceProvisioner, HarnessError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| HarnessError::WorkspaceSetup {
            path: root.clone(),
            detail: e.to_string(),
        })?;
        Ok(WorkspaceProvisioner {
            root,
            repo,
            reference,
            preserve,
        })
    }

    /// Clone, check out the pre-fix commit, strip context files, and inject
    /// the fix commit's test file. A leftover directory from an earlier run
    /// is removed first.
    pub fn provision(
        &self,
        task: &Task,
        condition: Condition,
        rep_index: u32,
    ) -> Result<WorkspaceHandle, HarnessError> {
        let dir = self.root.join(format!(
            "{}-{}-{}-{}-r{}",
            self.repo.slug(),
            task.id,
            short_commit(&task.pre_fix_commit),
            condition.as_str(),
            rep_index,
        ));
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| HarnessError::WorkspaceSetup {
                path: dir.clone(),
                detail: format!("could not clear stale workspace: {e}"),
            })?;
        }

        gitops::clone_repo(&self.repo.url, &dir, self.reference.as_deref())?;
        gitops::checkout_commit(&dir, &task.pre_fix_commit)?;

        let removed = strip_context_files(&dir, &self.repo.strip_extra)?;
        if !removed.is_empty() {
            debug!(task = %task.id, count = removed.len(), "stripped pre-existing context files");
        }

        if self.inject_test_from_fix(task, &dir)? {
            debug!(task = %task.id, file = task.test_file.as_deref(), "injected test file from fix commit");
        }

        Ok(WorkspaceHandle { path: dir })
    }

    /// Copy the fix commit's version of the task's test file into the
    /// workspace. Returns `false` when the task has no test file or the
    /// file does not exist at the fix commit.
    fn inject_test_from_fix(&self, task: &Task, workspace: &Path) -> Result<bool, HarnessError> {
        let Some(test_file) = &task.test_file else {
            return Ok(false);
        };

        let mut contents = gitops::show_file(workspace, &task.fix_commit, test_file)?;
        if contents.is_none() {
            // Shallow or shared clones may not have the fix commit yet.
            let _ = run_command(
                "git",
                &["fetch", "--depth", "1", "origin", &task.fix_commit],
                workspace,
                None,
            );
            contents = gitops::show_file(workspace, &task.fix_commit, test_file)?;
        }
        let Some(contents) = contents else {
            return Ok(false);
        };

        let dst = workspace.join(test_file);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|e| HarnessError::WorkspaceSetup {
                path: parent.to_path_buf(),
                detail: e.to_string(),
            })?;
        }
        fs::write(&dst, contents).map_err(|e| HarnessError::WorkspaceSetup {
            path: dst.clone(),
            detail: e.to_string(),
        })?;
        Ok(true)
    }

    /// Remove the workspace, unless workspaces are being preserved.
    pub fn teardown(&self, handle: WorkspaceHandle) {
        if self.preserve {
            info!(path = %handle.path.display(), "preserving workspace");
            return;
        }
        if let Err(e) = fs::remove_dir_all(&handle.path) {
            // Not fatal; a leftover directory is cleared on the next run.
            debug!(path = %handle.path.display(), error = %e, "workspace removal failed");
        }
    }
}

fn short_commit(commit: &str) -> &str {
    commit.get(..8).unwrap_or(commit)
}

/// Remove AI context files from `workspace`: every `AGENTS.md` and
/// `CLAUDE.md` in the tree, the `.github` directory, and any per-repo
/// extras. Extras resolving outside the workspace are ignored. Returns the
/// removed paths, workspace-relative and sorted.
pub fn strip_context_files(
    workspace: &Path,
    strip_extra: &[String],
) -> Result<Vec<String>, HarnessError> {
    let mut removed = Vec::new();

    for file in find_context_files(workspace) {
        let path = workspace.join(&file);
        fs::remove_file(&path).map_err(|e| HarnessError::WorkspaceSetup {
            path,
            detail: e.to_string(),
        })?;
        removed.push(file);
    }

    let github = workspace.join(".github");
    if github.exists() {
        fs::remove_dir_all(&github).map_err(|e| HarnessError::WorkspaceSetup {
            path: github,
            detail: e.to_string(),
        })?;
        removed.push(".github".to_owned());
    }

    let workspace_canonical =
        workspace
            .canonicalize()
            .map_err(|e| HarnessError::WorkspaceSetup {
                path: workspace.to_path_buf(),
                detail: e.to_string(),
            })?;
    for extra in strip_extra {
        let target = workspace.join(extra);
        // Symlinks and `..` segments must not escape the workspace.
        let Ok(resolved) = target.canonicalize() else {
            continue;
        };
        if !resolved.starts_with(&workspace_canonical) {
            continue;
        }
        let result = if resolved.is_dir() {
            fs::remove_dir_all(&resolved)
        } else {
            fs::remove_file(&resolved)
        };
        result.map_err(|e| HarnessError::WorkspaceSetup {
            path: resolved,
            detail: e.to_string(),
        })?;
        removed.push(extra.clone());
    }

    removed.sort();
    removed.dedup();
    Ok(removed)
}

/// Workspace-relative paths of every `AGENTS.md` / `CLAUDE.md` in the tree,
/// `.git` excluded. Used both for stripping and for the residual check
/// during pre-validation.
pub fn find_context_files(workspace: &Path) -> Vec<String> {
    let mut found = Vec::new();
    let walker = WalkDir::new(workspace)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git");
    for entry in walker.flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if UNIVERSAL_STRIP.contains(&name.as_ref()) {
            if let Ok(rel) = entry.path().strip_prefix(workspace) {
                found.push(rel.to_string_lossy().into_owned());
            }
        }
    }
    found.sort();
    found
}
