//! ctxbench — controlled A/B comparisons of coding-agent behavior.
//!
//! Runs an external coding agent against bug-fix tasks drawn from real
//! repositories, once per (task, condition, repetition) item, in isolated
//! workspaces, and aggregates the outcomes into statistically defensible
//! per-condition comparisons.

pub mod agent;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod gitops;
pub mod logging;
pub mod prompt;
pub mod report;
pub mod results;
pub mod runner;
pub mod scheduler;
pub mod stats;
pub mod subprocess;
pub mod taskset;
pub mod workspace;
