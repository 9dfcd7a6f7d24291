use std::path::PathBuf;

/// Errors surfaced to the operator. Per-item outcomes (timeouts, test
/// failures, infra-class classifications) are recorded as `TaskResult`s
/// instead and never travel through this enum.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Failed to read task file {path}: {detail}")]
    TaskFileRead { path: PathBuf, detail: String },

    #[error("Failed to parse task file {path}: {detail}")]
    TaskFileParse { path: PathBuf, detail: String },

    #[error("Invalid task '{id}': {detail}")]
    TaskInvalid { id: String, detail: String },

    #[error("Agent command '{cmd}' not found on PATH")]
    AgentCmdNotFound { cmd: String },

    #[error("Agent failed to start: {detail}")]
    AgentSpawnFailed { detail: String },

    #[error("git {op} failed: {detail}")]
    GitFailed { op: String, detail: String },

    #[error("Repository unreachable: {url}: {detail}")]
    RepoUnreachable { url: String, detail: String },

    #[error("Workspace setup failed at {path}: {detail}")]
    WorkspaceSetup { path: PathBuf, detail: String },

    #[error("Context cache I/O error at {path}: {detail}")]
    CacheIo { path: PathBuf, detail: String },

    #[error("Context generation failed: {detail}")]
    CacheGeneration { detail: String },

    #[error("Failed to load prior results {path}: {detail}")]
    ResumeLoad { path: PathBuf, detail: String },

    #[error("Prior results have an unexpected shape: {detail}")]
    ResumeShape { detail: String },

    #[error("Failed to read config file {path}: {detail}")]
    ConfigFileRead { path: PathBuf, detail: String },

    #[error("Failed to parse config file {path}: {detail}")]
    ConfigFileParse { path: PathBuf, detail: String },

    #[error("Failed to parse environment variable '{var}': {detail}")]
    ConfigEnvParseError { var: String, detail: String },

    #[error("Invalid configuration: {detail}")]
    ConfigInvalid { detail: String },

    #[error("Failed to write results {path}: {detail}")]
    ResultsWriteFailed { path: PathBuf, detail: String },
}
