use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// ctxbench, an A/B harness for measuring how repository context documents
/// affect a coding agent's bug-fixing behavior.
///
/// Each run executes every (task, condition, repetition) combination against
/// a fresh clone, records per-attempt outcomes to a JSON manifest, and
/// produces summary statistics comparing the conditions.
#[derive(Debug, Parser)]
#[command(name = "ctxbench", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Execute an experiment run over one or more task set files.
    Run(RunArgs),

    /// Recompute and print the report for an existing results file.
    Report(ReportArgs),
}

/// Arguments for the `run` subcommand.
///
/// Most options can also be set via config file or env vars (`CTXBENCH_*`).
/// Precedence: CLI > env > file.
#[derive(Debug, Clone, clap::Args)]
pub struct RunArgs {
    /// Task set YAML file(s). Repeatable.
    #[arg(long = "tasks")]
    pub tasks: Vec<PathBuf>,

    /// Comma-separated conditions to run
    /// (subset of none,flat,hierarchical,inline; default: all).
    #[arg(long)]
    pub conditions: Option<String>,

    /// Number of worker threads (default: 1).
    #[arg(long)]
    pub parallel: Option<u32>,

    /// Repetitions per (task, condition) pair (default: 1).
    #[arg(long)]
    pub repetitions: Option<u32>,

    /// Path to a TOML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Agent CLI binary name or path (default: "claude").
    #[arg(long)]
    pub agent_cmd: Option<String>,

    /// Model override passed to the agent (omit for its default).
    #[arg(long)]
    pub model: Option<String>,

    /// Timeout for each fix attempt, in seconds (default: 300).
    #[arg(long)]
    pub agent_timeout_sec: Option<u64>,

    /// Timeout for each context generation run, in seconds (default: 600).
    #[arg(long)]
    pub generation_timeout_sec: Option<u64>,

    /// Timeout for the pre-validation test run, in seconds (default: 180).
    #[arg(long)]
    pub pre_validation_timeout_sec: Option<u64>,

    /// Timeout for the post-edit test run, in seconds (default: 180).
    #[arg(long)]
    pub post_test_timeout_sec: Option<u64>,

    /// Maximum agent turns per invocation (default: 50).
    #[arg(long)]
    pub max_turns: Option<u32>,

    /// Directory for results manifests and reports (default: "results").
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Directory for per-attempt workspace clones (default: "workspaces").
    #[arg(long)]
    pub workspaces_dir: Option<PathBuf>,

    /// Directory for cached context artifacts
    /// (default: "workspaces/.context-cache").
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Clone each repo once and share its objects into per-attempt clones.
    #[arg(long, default_value_t = false)]
    pub reference_clones: bool,

    /// Keep workspaces after each attempt instead of deleting them.
    #[arg(long, default_value_t = false)]
    pub keep_workspaces: bool,

    /// Merge completed attempts from a prior run manifest and only execute
    /// what is missing or was excluded for infrastructure reasons.
    #[arg(long)]
    pub resume: Option<PathBuf>,

    /// Print the work plan without executing anything.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Log level filter (default: "info"). Supports tracing directives
    /// (e.g. "debug", "ctxbench=trace,warn"). Overridden by CTXBENCH_LOG.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to a log file. When set, structured JSON logs are appended here
    /// in addition to the human-readable stderr output.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// Arguments for the `report` subcommand.
#[derive(Debug, Clone, clap::Args)]
pub struct ReportArgs {
    /// Results manifest produced by a previous run.
    #[arg(long)]
    pub results: PathBuf,

    /// Write the markdown report to this file instead of stdout.
    #[arg(long)]
    pub output: Option<PathBuf>,
}
