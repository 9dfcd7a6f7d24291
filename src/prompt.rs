//! Prompt construction for fix attempts and context generation.
//!
//! Pure string assembly; the runner decides which builder applies. Prompts
//! are deliberately identical across conditions except for the context
//! preamble (or inline block), so measured differences come from the
//! context, not the instructions.

use crate::taskset::Condition;

/// Prepended when the workspace carries context files the agent should
/// consult before editing.
const CONTEXT_PREAMBLE: &str = "Before making changes, read the AGENTS.md files (starting at the repository root) to understand:
- Where relevant code is located
- What pitfalls to avoid
- What contracts must be maintained

";

/// Fix prompt built from captured failing-test output.
pub fn build_from_failing_test(test_output: &str, condition: Condition) -> String {
    let preamble = preamble_for(condition);
    format!(
        "{preamble}The following test is failing:\n\n```\n{test_output}\n```\n\n\
         Find and fix the bug that causes this test to fail. Do not modify the test itself."
    )
}

/// Fix prompt built from the fix commit's message.
pub fn build_from_commit_message(message: &str, condition: Condition) -> String {
    let preamble = preamble_for(condition);
    format!(
        "{preamble}Fix the following bug:\n\n{message}\n\n\
         The fix should make the existing tests pass."
    )
}

fn preamble_for(condition: Condition) -> &'static str {
    if condition.injects_files() {
        CONTEXT_PREAMBLE
    } else {
        ""
    }
}

/// Wrap a task prompt with the full context content for the condition that
/// carries context in the prompt itself rather than the filesystem.
pub fn embed_inline_context(context: &str, task_prompt: &str) -> String {
    format!(
        "Here is documentation describing this repository:\n\n{context}\n\n---\n\n{task_prompt}"
    )
}

/// Prompt for generating a single repository-root context document.
fn flat_generation_prompt() -> String {
    "Analyze this repository and write a single CLAUDE.md file at the repository root. \
     It should describe the project's purpose, the layout of the source tree, how to \
     build and run the tests, and any conventions or pitfalls a new contributor must \
     know. Write only that one file."
        .to_owned()
}

/// Prompt for generating a tree of per-directory context documents.
fn hierarchical_generation_prompt() -> String {
    "Analyze this repository and write AGENTS.md files: one at the repository root \
     summarizing the project, and one in each major source directory describing what \
     lives there, the key types and entry points, and the invariants code in that \
     directory must maintain. Keep each file focused on its own directory."
        .to_owned()
}

/// Generation prompt for an artifact kind as stored in the cache.
pub fn generation_prompt(artifact_kind: &str) -> String {
    if artifact_kind == "flat" {
        flat_generation_prompt()
    } else {
        hierarchical_generation_prompt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failing_test_prompt_embeds_output_verbatim() {
        let prompt = build_from_failing_test("E   assert 1 == 2", Condition::None);
        assert!(prompt.contains("```\nE   assert 1 == 2\n```"));
        assert!(prompt.contains("Do not modify the test itself"));
        assert!(!prompt.contains("AGENTS.md"));
    }

    #[test]
    fn commit_message_prompt_has_no_test_instructions() {
        let prompt = build_from_commit_message("Fix off-by-one in pager", Condition::None);
        assert!(prompt.contains("Fix off-by-one in pager"));
        assert!(prompt.contains("existing tests pass"));
        assert!(!prompt.contains("Do not modify the test"));
    }

    #[test]
    fn preamble_present_only_for_file_injecting_conditions() {
        for condition in Condition::all() {
            let prompt = build_from_failing_test("boom", condition);
            assert_eq!(
                prompt.contains("Before making changes, read the AGENTS.md"),
                condition.injects_files(),
                "condition {condition}"
            );
        }
    }

    #[test]
    fn prompts_differ_only_in_preamble_across_file_conditions() {
        let base = build_from_failing_test("boom", Condition::None);
        let flat = build_from_failing_test("boom", Condition::Flat);
        let hier = build_from_failing_test("boom", Condition::Hierarchical);
        assert_eq!(flat, hier);
        assert!(flat.ends_with(&base));
    }

    #[test]
    fn inline_context_precedes_the_task() {
        let combined = embed_inline_context("## AGENTS.md\n\nrepo docs", "Fix the bug.");
        let context_at = combined.find("repo docs").unwrap();
        let task_at = combined.find("Fix the bug.").unwrap();
        assert!(context_at < task_at);
    }

    #[test]
    fn generation_prompts_name_their_artifact() {
        assert!(generation_prompt("flat").contains("CLAUDE.md"));
        assert!(generation_prompt("flat").contains("one file"));
        assert!(generation_prompt("hierarchical").contains("AGENTS.md"));
        assert!(generation_prompt("hierarchical").contains("each major source directory"));
    }
}
