//! Task-set loading and the experiment data model.
//!
//! A task-set file is YAML: one repository block plus a list of bug-fix
//! tasks pinned to commits of that repository. Tasks are read-only for the
//! engine's duration; an invalid task is rejected at load time, never
//! silently run.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// Complexity tier of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    SimpleFix,
    TargetedRefactor,
    ComplexFix,
}

/// Where the agent-facing prompt is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptSource {
    /// Prompt built from the failing test's output at `pre_fix_commit`.
    FailingTest,
    /// Prompt built from the fix commit's message.
    CommitMessage,
}

/// The context-delivery strategy under test for one execution.
/// Conditions are mutually exclusive per item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Baseline: all pre-existing context files stripped, nothing injected.
    None,
    /// A single flat context document at the repository root.
    Flat,
    /// A hierarchical tree of per-directory context documents.
    Hierarchical,
    /// Hierarchical content embedded directly in the prompt; no files
    /// appear in the workspace.
    Inline,
}

impl Condition {
    pub fn all() -> Vec<Condition> {
        vec![
            Condition::None,
            Condition::Flat,
            Condition::Hierarchical,
            Condition::Inline,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::None => "none",
            Condition::Flat => "flat",
            Condition::Hierarchical => "hierarchical",
            Condition::Inline => "inline",
        }
    }

    /// Whether this condition needs a generated context artifact.
    pub fn needs_artifact(&self) -> bool {
        !matches!(self, Condition::None)
    }

    /// Whether the artifact is delivered as workspace files (as opposed to
    /// inline prompt content).
    pub fn injects_files(&self) -> bool {
        matches!(self, Condition::Flat | Condition::Hierarchical)
    }

    /// Conditions sharing an artifact share a cache key. `Inline` reuses
    /// the hierarchical artifact, it only changes the delivery mechanism.
    pub fn artifact_kind(&self) -> &'static str {
        match self {
            Condition::None => "none",
            Condition::Flat => "flat",
            Condition::Hierarchical | Condition::Inline => "hierarchical",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Condition {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "none" => Ok(Condition::None),
            "flat" => Ok(Condition::Flat),
            "hierarchical" => Ok(Condition::Hierarchical),
            "inline" => Ok(Condition::Inline),
            other => Err(HarnessError::ConfigInvalid {
                detail: format!(
                    "unknown condition '{other}' (expected none, flat, hierarchical, inline)"
                ),
            }),
        }
    }
}

/// Parse a comma-separated condition list, e.g. `"none,flat,hierarchical"`.
pub fn parse_conditions(s: &str) -> Result<Vec<Condition>, HarnessError> {
    let mut out = Vec::new();
    for part in s.split(',') {
        if part.trim().is_empty() {
            continue;
        }
        let cond: Condition = part.parse()?;
        if !out.contains(&cond) {
            out.push(cond);
        }
    }
    if out.is_empty() {
        return Err(HarnessError::ConfigInvalid {
            detail: "condition list is empty".to_owned(),
        });
    }
    Ok(out)
}

/// Repository-level configuration shared by all tasks in a set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSpec {
    pub url: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    /// Commands chained with `&&` before every test invocation
    /// (dependency install etc.).
    #[serde(default)]
    pub setup: Vec<String>,
    /// Base test command; task-specific file/pattern are appended.
    pub test_command: String,
    /// Extra repo-specific context paths to strip beyond the universal set.
    #[serde(default)]
    pub strip_extra: Vec<String>,
}

fn default_branch() -> String {
    "main".to_owned()
}

impl RepoSpec {
    /// Short name derived from the URL, used in workspace and cache paths.
    pub fn slug(&self) -> String {
        let tail = self
            .url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("repo");
        tail.trim_end_matches(".git").to_owned()
    }
}

/// Immutable definition of one bug-fix task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub category: Category,
    /// Commit where the bug is present; the test suite must fail here.
    pub pre_fix_commit: String,
    /// Commit containing the golden patch; the test suite must pass here.
    pub fix_commit: String,
    #[serde(default)]
    pub test_file: Option<String>,
    #[serde(default)]
    pub test_pattern: Option<String>,
    /// Full override of the repo-level test command for this task.
    #[serde(default)]
    pub test_command: Option<String>,
    pub prompt_source: PromptSource,
}

/// One parsed task-set file: a repository and its tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSet {
    pub repo: RepoSpec,
    pub tasks: Vec<Task>,
}

impl TaskSet {
    pub fn from_yaml_file(path: &Path) -> Result<TaskSet, HarnessError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| HarnessError::TaskFileRead {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        let set: TaskSet =
            serde_yaml::from_str(&contents).map_err(|e| HarnessError::TaskFileParse {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        set.validate()?;
        Ok(set)
    }

    /// Static validation of task definitions. Runtime validation (the test
    /// actually failing at `pre_fix_commit`) happens per workspace in the
    /// runner's pre-validation step.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.repo.url.trim().is_empty() {
            return Err(HarnessError::ConfigInvalid {
                detail: "repo.url is empty".to_owned(),
            });
        }
        if self.repo.test_command.trim().is_empty() {
            return Err(HarnessError::ConfigInvalid {
                detail: "repo.test_command is empty".to_owned(),
            });
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for task in &self.tasks {
            let id = task.id.trim();
            if id.is_empty() {
                return Err(HarnessError::TaskInvalid {
                    id: "<unnamed>".to_owned(),
                    detail: "task id is empty".to_owned(),
                });
            }
            if !seen.insert(id) {
                return Err(HarnessError::TaskInvalid {
                    id: id.to_owned(),
                    detail: "duplicate task id".to_owned(),
                });
            }
            if task.pre_fix_commit.trim().is_empty() || task.fix_commit.trim().is_empty() {
                return Err(HarnessError::TaskInvalid {
                    id: id.to_owned(),
                    detail: "pre_fix_commit and fix_commit are required".to_owned(),
                });
            }
            if task.pre_fix_commit == task.fix_commit {
                return Err(HarnessError::TaskInvalid {
                    id: id.to_owned(),
                    detail: "pre_fix_commit and fix_commit must differ".to_owned(),
                });
            }
            if task.prompt_source == PromptSource::FailingTest && task.test_file.is_none() {
                return Err(HarnessError::TaskInvalid {
                    id: id.to_owned(),
                    detail: "failing_test tasks require test_file".to_owned(),
                });
            }
        }
        Ok(())
    }
}

/// Load and validate every task-set file in `paths`.
pub fn load_task_sets(paths: &[std::path::PathBuf]) -> Result<Vec<TaskSet>, HarnessError> {
    paths.iter().map(|p| TaskSet::from_yaml_file(p)).collect()
}

/// Build the full shell command that exercises a task's test, including the
/// repo's setup chain and the task's file/pattern narrowing.
pub fn full_test_command(repo: &RepoSpec, task: &Task) -> String {
    let mut test_cmd = match &task.test_command {
        Some(cmd) => cmd.clone(),
        None => {
            let mut cmd = repo.test_command.clone();
            if let Some(file) = &task.test_file {
                cmd.push(' ');
                cmd.push_str(file);
            }
            if let Some(pattern) = &task.test_pattern {
                cmd.push_str(&format!(" -k '{pattern}'"));
            }
            cmd
        }
    };

    if !repo.setup.is_empty() {
        let setup_chain = repo.setup.join(" && ");
        test_cmd = format!("{setup_chain} && {test_cmd}");
    }
    test_cmd
}
