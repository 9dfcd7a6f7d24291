//! Per-item execution: provision, pre-validate, context, agent, verify.
//!
//! `run_item` is deliberately infallible. Whatever goes wrong becomes a
//! classified `TaskResult`; errors that would poison the whole run (bad
//! config, missing agent binary) are caught before the pool starts.
//!
//! Classification discipline: an item only counts against a condition's
//! success rate when the agent got a fair attempt. Anything the harness
//! broke (pre-validation, context generation, clone failures, an agent
//! that never started working) carries an infra tag and is excluded from
//! analysis, then re-attempted on resume.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::agent::{self, AgentOptions};
use crate::cache::{CacheKey, ContextCache, GeneratedContext};
use crate::error::HarnessError;
use crate::gitops;
use crate::prompt;
use crate::results::{
    TaskResult, WorkItem, TAG_CACHE_GENERATION, TAG_EMPTY_RUN, TAG_INFRASTRUCTURE,
    TAG_PRE_VALIDATION, TAG_TIMEOUT,
};
use crate::subprocess::run_shell;
use crate::taskset::{full_test_command, Condition, PromptSource, RepoSpec, Task, TaskSet};
use crate::workspace::{find_context_files, WorkspaceHandle, WorkspaceProvisioner};

/// Stored test output cap; pathological suites can emit megabytes.
const MAX_TEST_OUTPUT_CHARS: usize = 20_000;

/// Cap on failing-test output embedded in the prompt.
const MAX_PROMPT_TEST_OUTPUT_CHARS: usize = 50_000;

/// Stderr excerpt attached to empty-run errors for diagnosis.
const STDERR_SNIPPET_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct Timeouts {
    pub pre_validation: Duration,
    pub generation: Duration,
    pub agent: Duration,
    pub post_test: Duration,
}

/// Everything shared by workers; immutable during the run, so `&RunContext`
/// crosses threads freely.
pub struct RunContext {
    pub workspaces_dir: PathBuf,
    pub cache: ContextCache,
    pub agent_path: PathBuf,
    pub model: Option<String>,
    pub max_turns: u32,
    pub timeouts: Timeouts,
    pub keep_workspaces: bool,
    /// Repo slug to local reference clone, when reference clones are on.
    pub references: HashMap<String, PathBuf>,
}

/// Expand task sets into the full work list: every task under every
/// requested condition, `repetitions` times.
pub fn build_work_items(
    task_sets: &[TaskSet],
    conditions: &[Condition],
    repetitions: u32,
) -> Vec<WorkItem> {
    let mut items = Vec::new();
    for set in task_sets {
        for task in &set.tasks {
            for &condition in conditions {
                for rep_index in 0..repetitions {
                    items.push(WorkItem {
                        repo: set.repo.clone(),
                        task: task.clone(),
                        condition,
                        rep_index,
                    });
                }
            }
        }
    }
    items
}

/// Clone each distinct repo once so per-item clones can share objects
/// instead of hitting the network.
pub fn prepare_references(
    repos: &[RepoSpec],
    dir: &Path,
) -> Result<HashMap<String, PathBuf>, HarnessError> {
    std::fs::create_dir_all(dir).map_err(|e| HarnessError::WorkspaceSetup {
        path: dir.to_path_buf(),
        detail: e.to_string(),
    })?;

    let mut references = HashMap::new();
    for repo in repos {
        let slug = repo.slug();
        if references.contains_key(&slug) {
            continue;
        }
        let dest = dir.join(&slug);
        if !dest.join(".git").exists() {
            info!(repo = %repo.url, "creating reference clone");
            gitops::clone_repo(&repo.url, &dest, None)?;
        }
        references.insert(slug, dest);
    }
    Ok(references)
}

/// Execute one work item end to end. Never fails; every path produces a
/// classified result.
pub fn run_item(ctx: &RunContext, item: &WorkItem) -> TaskResult {
    let provisioner = match WorkspaceProvisioner::new(
        &ctx.workspaces_dir,
        item.repo.clone(),
        ctx.references.get(&item.repo.slug()).cloned(),
        ctx.keep_workspaces,
    ) {
        Ok(p) => p,
        Err(e) => return TaskResult::infra(item, TAG_INFRASTRUCTURE, e.to_string()),
    };

    let handle = match provisioner.provision(&item.task, item.condition, item.rep_index) {
        Ok(handle) => handle,
        Err(e) => return TaskResult::infra(item, TAG_INFRASTRUCTURE, e.to_string()),
    };

    let result = execute(ctx, item, &handle);
    provisioner.teardown(handle);
    result
}

fn execute(ctx: &RunContext, item: &WorkItem, handle: &WorkspaceHandle) -> TaskResult {
    let workspace = handle.path.as_path();
    let task = &item.task;

    // Pre-validation: prove the task is a real failing scenario before
    // spending agent tokens. The captured output doubles as the failing-
    // test prompt, saving a second run of the suite.
    let test_cmd = full_test_command(&item.repo, task);
    let pre = match run_shell(&test_cmd, workspace, Some(ctx.timeouts.pre_validation)) {
        Ok(pre) => pre,
        Err(e) => {
            return TaskResult::infra(
                item,
                TAG_INFRASTRUCTURE,
                format!("pre-validation command failed to run: {e}"),
            );
        }
    };
    if pre.timed_out {
        return TaskResult::infra(
            item,
            TAG_PRE_VALIDATION,
            "test command timed out; setup or test infrastructure may be broken",
        );
    }
    if task.prompt_source == PromptSource::FailingTest && pre.success() {
        return TaskResult::infra(
            item,
            TAG_PRE_VALIDATION,
            format!(
                "test already passes at pre_fix_commit {}; not a valid failing-test task",
                short(&task.pre_fix_commit)
            ),
        );
    }
    let residual = find_context_files(workspace);
    if !residual.is_empty() {
        return TaskResult::infra(
            item,
            TAG_PRE_VALIDATION,
            format!("context files remain after stripping: {residual:?}"),
        );
    }
    let pre_validation_output = pre.combined_output();

    // Context artifact, shared across items through the cache.
    let mut inline_context = None;
    if item.condition.needs_artifact() {
        let kind = item.condition.artifact_kind();
        let key = CacheKey::new(&item.repo, kind, &task.pre_fix_commit);
        let artifact = match ctx
            .cache
            .get_or_generate(&key, || generate_context(ctx, workspace, kind))
        {
            Ok(artifact) => artifact,
            Err(e) => return TaskResult::infra(item, TAG_CACHE_GENERATION, e.to_string()),
        };

        // The generation owner wrote its files into this very workspace.
        // Start every condition from a clean tree, then restore from the
        // cache only where the condition injects files.
        if let Err(e) = crate::workspace::strip_context_files(workspace, &[]) {
            return TaskResult::infra(item, TAG_INFRASTRUCTURE, e.to_string());
        }

        if item.condition.injects_files() {
            if let Err(e) = artifact.restore(workspace) {
                return TaskResult::infra(item, TAG_INFRASTRUCTURE, e.to_string());
            }
        } else {
            match artifact.concatenated() {
                Ok(content) => inline_context = Some(content),
                Err(e) => return TaskResult::infra(item, TAG_INFRASTRUCTURE, e.to_string()),
            }
        }
    }

    // Baseline after injection, so diffs measure only the agent's edits.
    if let Err(e) = gitops::create_baseline_commit(workspace) {
        return TaskResult::infra(item, TAG_INFRASTRUCTURE, e.to_string());
    }

    let base_prompt = match task.prompt_source {
        PromptSource::FailingTest => prompt::build_from_failing_test(
            &truncate(&pre_validation_output, MAX_PROMPT_TEST_OUTPUT_CHARS),
            item.condition,
        ),
        PromptSource::CommitMessage => {
            match gitops::commit_message(workspace, &task.fix_commit) {
                Ok(message) => prompt::build_from_commit_message(&message, item.condition),
                Err(e) => return TaskResult::infra(item, TAG_INFRASTRUCTURE, e.to_string()),
            }
        }
    };
    let fix_prompt = match &inline_context {
        Some(context) => prompt::embed_inline_context(context, &base_prompt),
        None => base_prompt,
    };

    debug!(task = %task.id, condition = %item.condition, "invoking agent");
    let run = match agent::invoke(
        &ctx.agent_path,
        workspace,
        &fix_prompt,
        &AgentOptions {
            max_turns: ctx.max_turns,
            model: ctx.model.clone(),
            timeout: ctx.timeouts.agent,
        },
    ) {
        Ok(run) => run,
        Err(e) => return TaskResult::infra(item, TAG_INFRASTRUCTURE, e.to_string()),
    };

    // An agent that consumed nothing and did nothing never attempted the
    // task; that is a harness or CLI fault, not evidence about the
    // condition.
    if run.tool_calls == 0 && run.input_tokens == 0 && run.output_tokens == 0 && !run.timed_out {
        let stderr = truncate(run.stderr.trim(), STDERR_SNIPPET_CHARS);
        let detail = if stderr.is_empty() {
            format!("agent returned without doing any work (prompt {} bytes)", fix_prompt.len())
        } else {
            format!("agent returned without doing any work, stderr: {stderr}")
        };
        return TaskResult::infra(item, TAG_EMPTY_RUN, detail);
    }

    let stats = match gitops::diff_stats(workspace) {
        Ok(stats) => stats,
        Err(e) => return TaskResult::infra(item, TAG_INFRASTRUCTURE, e.to_string()),
    };

    if run.timed_out {
        // Partial work is real work: the timeout is a genuine outcome and
        // keeps whatever metrics streamed in before the kill.
        warn!(task = %task.id, condition = %item.condition, "agent timed out");
        return TaskResult {
            task_id: task.id.clone(),
            condition: item.condition,
            rep_index: item.rep_index,
            success: false,
            test_output: String::new(),
            wall_clock_seconds: run.wall_clock_seconds,
            input_tokens: run.input_tokens,
            output_tokens: run.output_tokens,
            tool_calls: run.tool_calls,
            lines_changed: stats.lines_changed,
            files_touched: stats.files,
            error: Some(format!(
                "{TAG_TIMEOUT} agent timed out after {:.0}s",
                ctx.timeouts.agent.as_secs_f64()
            )),
            exit_code: None,
            is_timeout: true,
        };
    }

    // Verify: the task's test command decides success.
    let post = match run_shell(&test_cmd, workspace, Some(ctx.timeouts.post_test)) {
        Ok(post) => post,
        Err(e) => {
            return TaskResult::infra(
                item,
                TAG_INFRASTRUCTURE,
                format!("verification command failed to run: {e}"),
            );
        }
    };
    let test_output = if post.timed_out {
        format!(
            "{}\n[test command timed out after {:.0}s]",
            truncate(&post.combined_output(), MAX_TEST_OUTPUT_CHARS),
            ctx.timeouts.post_test.as_secs_f64()
        )
    } else {
        truncate(&post.combined_output(), MAX_TEST_OUTPUT_CHARS)
    };
    let success = post.success();

    info!(
        task = %task.id,
        condition = %item.condition,
        rep = item.rep_index,
        success,
        tool_calls = run.tool_calls,
        lines_changed = stats.lines_changed,
        "item finished"
    );

    TaskResult {
        task_id: task.id.clone(),
        condition: item.condition,
        rep_index: item.rep_index,
        success,
        test_output,
        wall_clock_seconds: run.wall_clock_seconds,
        input_tokens: run.input_tokens,
        output_tokens: run.output_tokens,
        tool_calls: run.tool_calls,
        lines_changed: stats.lines_changed,
        files_touched: stats.files,
        error: None,
        exit_code: run.exit_code,
        is_timeout: false,
    }
}

/// Run the agent with the generation prompt for `kind` inside this item's
/// workspace and collect the files it wrote. Only the single-flight owner
/// gets here; a failure is reported to it alone and nothing is cached.
fn generate_context(
    ctx: &RunContext,
    workspace: &Path,
    kind: &str,
) -> Result<GeneratedContext, HarnessError> {
    let run = agent::invoke(
        &ctx.agent_path,
        workspace,
        &prompt::generation_prompt(kind),
        &AgentOptions {
            max_turns: ctx.max_turns,
            model: ctx.model.clone(),
            timeout: ctx.timeouts.generation,
        },
    )?;
    if run.timed_out {
        return Err(HarnessError::CacheGeneration {
            detail: format!(
                "generation timed out after {:.0}s",
                ctx.timeouts.generation.as_secs_f64()
            ),
        });
    }
    if let Some(code) = run.exit_code {
        if code != 0 {
            return Err(HarnessError::CacheGeneration {
                detail: format!(
                    "generator exited with {code}: {}",
                    truncate(run.stderr.trim(), STDERR_SNIPPET_CHARS)
                ),
            });
        }
    }

    if kind == "flat" {
        dual_write_flat(workspace)?;
    }

    let files = find_context_files(workspace);
    if files.is_empty() {
        return Err(HarnessError::CacheGeneration {
            detail: "generator produced no context files".to_owned(),
        });
    }
    Ok(GeneratedContext {
        workspace: workspace.to_path_buf(),
        files,
    })
}

/// Flat generation asks for one CLAUDE.md; agents honoring AGENTS.md
/// conventions see the same content under both names.
fn dual_write_flat(workspace: &Path) -> Result<(), HarnessError> {
    let claude = workspace.join("CLAUDE.md");
    let agents = workspace.join("AGENTS.md");
    let copy = |from: &Path, to: &Path| -> Result<(), HarnessError> {
        std::fs::copy(from, to)
            .map(|_| ())
            .map_err(|e| HarnessError::CacheIo {
                path: to.to_path_buf(),
                detail: e.to_string(),
            })
    };
    if claude.exists() && !agents.exists() {
        copy(&claude, &agents)?;
    } else if agents.exists() && !claude.exists() {
        copy(&agents, &claude)?;
    }
    Ok(())
}

fn short(commit: &str) -> &str {
    commit.get(..8).unwrap_or(commit)
}

/// Char-boundary-safe truncation with a marker.
fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_owned();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... [truncated]", &s[..end])
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::results::Outcome;
    use crate::subprocess::run_command;
    use crate::taskset::Category;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn write(base: &Path, rel: &str, contents: &str) {
        let path = base.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn git(repo: &Path, args: &[&str]) {
        let result = run_command("git", args, repo, None).unwrap();
        assert!(result.success(), "git {args:?} failed: {}", result.stderr);
    }

    fn commit_all(repo: &Path, message: &str) -> String {
        git(repo, &["add", "-A"]);
        git(repo, &["-c", "commit.gpgsign=false", "commit", "-m", message]);
        run_command("git", &["rev-parse", "HEAD"], repo, None)
            .unwrap()
            .stdout
            .trim()
            .to_owned()
    }

    /// Upstream repo where "the bug" is `return None` and the test command
    /// greps for the fixed form.
    fn upstream(dir: &Path) -> (PathBuf, String, String) {
        let repo = dir.join("upstream");
        fs::create_dir_all(&repo).unwrap();
        git(&repo, &["init", "-b", "main"]);
        git(&repo, &["config", "user.email", "t@example.com"]);
        git(&repo, &["config", "user.name", "Test"]);

        write(&repo, "src/widgets.py", "def parse(x):\n    return None\n");
        let pre_fix = commit_all(&repo, "broken state");
        write(&repo, "src/widgets.py", "def parse(x):\n    return x\n");
        let fix = commit_all(&repo, "Fix parse to return its input");
        (repo, pre_fix, fix)
    }

    fn fake_agent(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-agent");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    const RESULT_EVENT: &str = r#"{"type":"result","usage":{"input_tokens":100,"cache_read_input_tokens":900,"output_tokens":50}}"#;
    const TOOL_EVENT: &str = r#"{"type":"assistant","message":{"usage":{"input_tokens":100,"output_tokens":10},"content":[{"type":"tool_use","name":"Edit"}]}}"#;

    fn context(dir: &Path, agent: PathBuf) -> RunContext {
        RunContext {
            workspaces_dir: dir.join("workspaces"),
            cache: ContextCache::new(dir.join("cache")).unwrap(),
            agent_path: agent,
            model: None,
            max_turns: 50,
            timeouts: Timeouts {
                pre_validation: Duration::from_secs(30),
                generation: Duration::from_secs(30),
                agent: Duration::from_secs(30),
                post_test: Duration::from_secs(30),
            },
            keep_workspaces: false,
            references: HashMap::new(),
        }
    }

    fn item(
        upstream: &Path,
        pre_fix: &str,
        fix: &str,
        condition: Condition,
        prompt_source: PromptSource,
    ) -> WorkItem {
        WorkItem {
            repo: RepoSpec {
                url: upstream.to_string_lossy().into_owned(),
                default_branch: "main".to_owned(),
                setup: vec![],
                test_command: "grep -q 'return x' src/widgets.py".to_owned(),
                strip_extra: vec![],
            },
            task: Task {
                id: "widgets-parse".to_owned(),
                category: Category::SimpleFix,
                pre_fix_commit: pre_fix.to_owned(),
                fix_commit: fix.to_owned(),
                test_file: None,
                test_pattern: None,
                test_command: None,
                prompt_source,
            },
            condition,
            rep_index: 0,
        }
    }

    #[test]
    fn successful_fix_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, pre_fix, fix) = upstream(dir.path());
        let agent = fake_agent(
            dir.path(),
            &format!(
                "sed -i.bak 's/return None/return x/' src/widgets.py\nrm -f src/widgets.py.bak\necho '{TOOL_EVENT}'\necho '{RESULT_EVENT}'"
            ),
        );
        let ctx = context(dir.path(), agent);
        let work = item(&repo, &pre_fix, &fix, Condition::None, PromptSource::CommitMessage);

        let result = run_item(&ctx, &work);

        assert_eq!(result.outcome(), Outcome::Success, "error: {:?}", result.error);
        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.input_tokens, 1000);
        assert_eq!(result.tool_calls, 1);
        assert!(result.lines_changed >= 1);
        assert!(result.files_touched.contains(&"src/widgets.py".to_owned()));
    }

    #[test]
    fn agent_that_fixes_nothing_is_a_genuine_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, pre_fix, fix) = upstream(dir.path());
        let agent = fake_agent(dir.path(), &format!("echo '{TOOL_EVENT}'\necho '{RESULT_EVENT}'"));
        let ctx = context(dir.path(), agent);
        let work = item(&repo, &pre_fix, &fix, Condition::None, PromptSource::CommitMessage);

        let result = run_item(&ctx, &work);

        assert_eq!(result.outcome(), Outcome::Failure);
        assert!(!result.success);
        assert!(result.error.is_none());
        assert_eq!(result.lines_changed, 0);
    }

    #[test]
    fn already_passing_test_fails_pre_validation() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, pre_fix, fix) = upstream(dir.path());
        let agent = fake_agent(dir.path(), "exit 7");
        let ctx = context(dir.path(), agent);
        let mut work = item(&repo, &pre_fix, &fix, Condition::None, PromptSource::FailingTest);
        // A command that passes at pre_fix invalidates the scenario.
        work.task.test_command = Some("true".to_owned());

        let result = run_item(&ctx, &work);

        assert_eq!(result.outcome(), Outcome::PreValidation);
        assert!(result.error.as_deref().unwrap().contains("already passes"));
        // The agent was never invoked, so its metrics are zero.
        assert_eq!(result.tool_calls, 0);
    }

    #[test]
    fn silent_agent_is_an_empty_run() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, pre_fix, fix) = upstream(dir.path());
        let agent = fake_agent(dir.path(), "echo 'cli broke' >&2\nexit 0");
        let ctx = context(dir.path(), agent);
        let work = item(&repo, &pre_fix, &fix, Condition::None, PromptSource::CommitMessage);

        let result = run_item(&ctx, &work);

        assert_eq!(result.outcome(), Outcome::EmptyRun);
        assert!(result.error.as_deref().unwrap().contains("cli broke"));
    }

    #[test]
    fn hung_agent_times_out_with_partial_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, pre_fix, fix) = upstream(dir.path());
        let agent = fake_agent(dir.path(), &format!("echo '{TOOL_EVENT}'\nsleep 60"));
        let mut ctx = context(dir.path(), agent);
        ctx.timeouts.agent = Duration::from_millis(500);
        let work = item(&repo, &pre_fix, &fix, Condition::None, PromptSource::CommitMessage);

        let result = run_item(&ctx, &work);

        assert_eq!(result.outcome(), Outcome::Timeout);
        assert!(result.is_timeout);
        assert_eq!(result.exit_code, None);
        assert_eq!(result.tool_calls, 1);
        assert_eq!(result.input_tokens, 100);
    }

    #[test]
    fn flat_condition_generates_and_reuses_the_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, pre_fix, fix) = upstream(dir.path());
        // Generation run: writes CLAUDE.md and bumps a counter. Fix run:
        // applies the fix. Both emit metrics.
        let counter = dir.path().join("gen-count");
        let agent = fake_agent(
            dir.path(),
            &format!(
                "if [ ! -f CLAUDE.md ]; then echo 'repo docs' > CLAUDE.md; echo x >> {}; fi\n\
                 sed -i.bak 's/return None/return x/' src/widgets.py\nrm -f src/widgets.py.bak\n\
                 echo '{TOOL_EVENT}'\necho '{RESULT_EVENT}'",
                counter.display()
            ),
        );
        let ctx = context(dir.path(), agent);
        let work = item(&repo, &pre_fix, &fix, Condition::Flat, PromptSource::CommitMessage);

        let first = run_item(&ctx, &work);
        assert_eq!(first.outcome(), Outcome::Success, "error: {:?}", first.error);
        // Context files never count as agent work product.
        assert!(!first.files_touched.iter().any(|f| f.contains("CLAUDE.md")));
        assert!(!first.files_touched.iter().any(|f| f.contains("AGENTS.md")));

        let mut second = work.clone();
        second.rep_index = 1;
        let second_result = run_item(&ctx, &second);
        assert_eq!(second_result.outcome(), Outcome::Success);

        // One generation, reused by the second item.
        let generations = fs::read_to_string(&counter).unwrap().lines().count();
        assert_eq!(generations, 1);
    }

    #[test]
    fn generation_without_files_is_cache_generation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, pre_fix, fix) = upstream(dir.path());
        let agent = fake_agent(dir.path(), &format!("echo '{TOOL_EVENT}'\necho '{RESULT_EVENT}'"));
        let ctx = context(dir.path(), agent);
        let work = item(&repo, &pre_fix, &fix, Condition::Flat, PromptSource::CommitMessage);

        let result = run_item(&ctx, &work);

        assert_eq!(result.outcome(), Outcome::CacheGeneration);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains("no context files"));
    }

    #[test]
    fn inline_condition_embeds_context_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, pre_fix, fix) = upstream(dir.path());
        // The agent records every prompt so the test can inspect the fix
        // prompt, and writes AGENTS.md only during the generation run.
        let prompt_log = dir.path().join("prompts.log");
        let agent = fake_agent(
            dir.path(),
            &format!(
                "for last; do :; done; printf '%s\\n---\\n' \"$last\" >> {}\n\
                 if [ ! -f AGENTS.md ]; then echo 'inline docs' > AGENTS.md; fi\n\
                 sed -i.bak 's/return None/return x/' src/widgets.py\nrm -f src/widgets.py.bak\n\
                 echo '{TOOL_EVENT}'\necho '{RESULT_EVENT}'",
                prompt_log.display()
            ),
        );
        let ctx = context(dir.path(), agent);
        let work = item(&repo, &pre_fix, &fix, Condition::Inline, PromptSource::CommitMessage);

        let result = run_item(&ctx, &work);
        assert_eq!(result.outcome(), Outcome::Success, "error: {:?}", result.error);

        let prompts = fs::read_to_string(&prompt_log).unwrap();
        // Second recorded prompt is the fix prompt with embedded context.
        assert!(prompts.contains("inline docs"));
        assert!(prompts.contains("Fix the following bug"));
    }

    #[test]
    fn build_work_items_covers_the_cross_product() {
        let (repo, pre_fix, fix) = {
            let spec = RepoSpec {
                url: "https://github.com/example/widgets.git".to_owned(),
                default_branch: "main".to_owned(),
                setup: vec![],
                test_command: "pytest".to_owned(),
                strip_extra: vec![],
            };
            (spec, "aaaa1111".to_owned(), "bbbb2222".to_owned())
        };
        let set = TaskSet {
            repo,
            tasks: vec![
                Task {
                    id: "t1".to_owned(),
                    category: Category::SimpleFix,
                    pre_fix_commit: pre_fix.clone(),
                    fix_commit: fix.clone(),
                    test_file: None,
                    test_pattern: None,
                    test_command: None,
                    prompt_source: PromptSource::CommitMessage,
                },
                Task {
                    id: "t2".to_owned(),
                    category: Category::ComplexFix,
                    pre_fix_commit: pre_fix,
                    fix_commit: fix,
                    test_file: None,
                    test_pattern: None,
                    test_command: None,
                    prompt_source: PromptSource::CommitMessage,
                },
            ],
        };

        let items = build_work_items(&[set], &[Condition::None, Condition::Flat], 3);
        assert_eq!(items.len(), 2 * 2 * 3);
        assert_eq!(items[0].task.id, "t1");
        assert_eq!(items[0].condition, Condition::None);
        assert_eq!(items[0].rep_index, 0);
        assert_eq!(items[2].rep_index, 2);
        assert_eq!(items[3].condition, Condition::Flat);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "日本語のテキスト";
        let t = truncate(s, 5);
        assert!(t.contains("[truncated]"));
        let whole = truncate("short", 100);
        assert_eq!(whole, "short");
    }
}
