//! Agent CLI resolution and invocation.
//!
//! The agent runs as `<cmd> --print --output-format stream-json` inside the
//! workspace. Stdout is NDJSON; a reader thread parses events as they
//! arrive into shared metrics, so a timed-out run still reports the tokens
//! and tool calls observed before the kill.
//!
//! **Windows:** For bare names with no extension (e.g. `claude`), resolution
//! tries `.exe` in each PATH directory. Explicit paths with no extension are
//! tried once with `.exe` appended.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::HarnessError;
use crate::subprocess::{isolate_process_group, wait_with_timeout};

/// Prompts at or above this size go through stdin instead of argv, to stay
/// clear of ARG_MAX (about 1 MiB of combined args and environment on some
/// platforms). Failing test output from large suites can exceed that.
const PROMPT_STDIN_THRESHOLD: usize = 100_000;

/// Cap on raw NDJSON retained from the agent's stdout (10 MiB). Events past
/// the cap are still parsed for metrics, just not stored verbatim.
const MAX_CAPTURE_BYTES: usize = 10 * 1024 * 1024;

/// Per-invocation knobs; timeouts come from the run configuration.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub max_turns: u32,
    pub model: Option<String>,
    pub timeout: Duration,
}

/// Outcome of one agent invocation. A timeout is a normal outcome here,
/// not an error; metrics reflect whatever events arrived before the kill.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub wall_clock_seconds: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub tool_calls: u32,
    pub stdout: String,
    pub stderr: String,
}

/// Resolve the configured agent command to an absolute path, so a missing
/// binary fails the run up front rather than per work item.
pub fn resolve_agent_cmd(cmd: &str) -> Result<PathBuf, HarnessError> {
    resolve_agent_cmd_with(cmd, std::env::var_os("PATH"))
}

fn resolve_agent_cmd_with(
    cmd: &str,
    path_var: Option<std::ffi::OsString>,
) -> Result<PathBuf, HarnessError> {
    if cmd.contains(std::path::MAIN_SEPARATOR) || cmd.contains('/') {
        let p = PathBuf::from(cmd);
        if is_executable(&p) {
            return Ok(p);
        }
        #[cfg(windows)]
        {
            if p.extension().is_none() {
                let with_exe = p.with_extension("exe");
                if is_executable(&with_exe) {
                    return Ok(with_exe);
                }
            }
        }
        return Err(HarnessError::AgentCmdNotFound {
            cmd: cmd.to_owned(),
        });
    }

    if let Some(paths) = path_var {
        for dir in std::env::split_paths(&paths) {
            #[cfg(unix)]
            {
                let candidate = dir.join(cmd);
                if is_executable(&candidate) {
                    return Ok(candidate);
                }
            }
            #[cfg(windows)]
            {
                let has_ext = Path::new(cmd).extension().is_some();
                let candidates: Vec<PathBuf> = if has_ext {
                    vec![dir.join(cmd)]
                } else {
                    vec![dir.join(cmd), dir.join(format!("{}.exe", cmd))]
                };
                for candidate in candidates {
                    if is_executable(&candidate) {
                        return Ok(candidate);
                    }
                }
            }
        }
    }

    Err(HarnessError::AgentCmdNotFound {
        cmd: cmd.to_owned(),
    })
}

/// Returns `true` when `path` exists and is a regular file. On Unix this
/// additionally checks the executable permission bits.
fn is_executable(path: &Path) -> bool {
    let Ok(meta) = path.metadata() else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}

/// Metrics accumulated incrementally from stream-json events.
#[derive(Debug, Default, Clone)]
pub(crate) struct StreamMetrics {
    assistant_input_tokens: u64,
    assistant_output_tokens: u64,
    tool_calls: u32,
    result_input_tokens: Option<u64>,
    result_output_tokens: Option<u64>,
}

impl StreamMetrics {
    /// Final token counts: the result event is authoritative when present;
    /// otherwise (timeout, crash) the running sums from assistant events.
    pub(crate) fn totals(&self) -> (u64, u64, u32) {
        (
            self.result_input_tokens
                .unwrap_or(self.assistant_input_tokens),
            self.result_output_tokens
                .unwrap_or(self.assistant_output_tokens),
            self.tool_calls,
        )
    }
}

/// Fold one NDJSON line into `metrics`. Non-JSON and unknown event types
/// are ignored; the agent interleaves diagnostics with events.
pub(crate) fn consume_event(metrics: &mut StreamMetrics, line: &str) {
    let Ok(event) = serde_json::from_str::<Value>(line.trim()) else {
        return;
    };
    match event.get("type").and_then(Value::as_str) {
        Some("assistant") => {
            let message = event.get("message");
            if let Some(usage) = message.and_then(|m| m.get("usage")) {
                metrics.assistant_input_tokens += sum_input_tokens(usage);
                metrics.assistant_output_tokens +=
                    usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
            }
            if let Some(content) = message
                .and_then(|m| m.get("content"))
                .and_then(Value::as_array)
            {
                let uses = content
                    .iter()
                    .filter(|block| {
                        block.get("type").and_then(Value::as_str) == Some("tool_use")
                    })
                    .count();
                metrics.tool_calls += uses as u32;
            }
        }
        Some("result") => {
            // Last result event wins.
            if let Some(usage) = event.get("usage") {
                metrics.result_input_tokens = Some(sum_input_tokens(usage));
                metrics.result_output_tokens =
                    Some(usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0));
            }
        }
        _ => {}
    }
}

/// Prompt caching makes `input_tokens` alone a severe undercount; cache
/// reads and writes are input the model consumed all the same.
fn sum_input_tokens(usage: &Value) -> u64 {
    ["input_tokens", "cache_read_input_tokens", "cache_creation_input_tokens"]
        .iter()
        .map(|k| usage.get(k).and_then(Value::as_u64).unwrap_or(0))
        .sum()
}

/// Run the agent against `workspace` with `prompt`.
///
/// Returns `Err` only when the process cannot be spawned or its pipes fail;
/// every completed invocation, including timeouts and nonzero exits, comes
/// back as an [`AgentRun`].
pub fn invoke(
    agent_path: &Path,
    workspace: &Path,
    prompt: &str,
    options: &AgentOptions,
) -> Result<AgentRun, HarnessError> {
    let prompt_via_stdin = prompt.len() >= PROMPT_STDIN_THRESHOLD;

    let mut cmd = Command::new(agent_path);
    cmd.arg("--print")
        .arg("--output-format")
        .arg("stream-json")
        .arg("--verbose")
        .arg("--max-turns")
        .arg(options.max_turns.to_string())
        .arg("--dangerously-skip-permissions");
    if let Some(model) = &options.model {
        cmd.arg("--model").arg(model);
    }
    if !prompt_via_stdin {
        cmd.arg(prompt);
    }
    cmd.current_dir(workspace)
        .stdin(if prompt_via_stdin {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env("CLAUDE_NO_TELEMETRY", "1")
        // Allow running from inside an agent session.
        .env_remove("CLAUDECODE");
    isolate_process_group(&mut cmd);

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|e| HarnessError::AgentSpawnFailed {
        detail: format!("{}: {e}", agent_path.display()),
    })?;

    let metrics = Arc::new(Mutex::new(StreamMetrics::default()));
    // Stdio::piped() above guarantees both handles exist.
    let child_stdout = child.stdout.take().ok_or_else(|| HarnessError::AgentSpawnFailed {
        detail: "stdout pipe missing".to_owned(),
    })?;
    let child_stderr = child.stderr.take().ok_or_else(|| HarnessError::AgentSpawnFailed {
        detail: "stderr pipe missing".to_owned(),
    })?;

    let stdout_metrics = Arc::clone(&metrics);
    let stdout_handle = std::thread::spawn(move || drain_stream_json(child_stdout, &stdout_metrics));
    let stderr_handle = std::thread::spawn(move || drain_plain(child_stderr));

    // The prompt goes out on its own thread, only after the readers are
    // draining. Writing it inline can deadlock: an agent that fills an
    // output pipe before consuming stdin blocks, and the timeout loop
    // below would never start.
    let stdin_handle = match child.stdin.take() {
        Some(mut stdin) if prompt_via_stdin => {
            let prompt = prompt.to_owned();
            Some(std::thread::spawn(move || {
                // A broken pipe means the agent exited early; its exit
                // status tells the rest of the story.
                if let Err(e) = stdin.write_all(prompt.as_bytes()) {
                    debug!(error = %e, "agent stdin closed before prompt was fully written");
                }
            }))
        }
        _ => None,
    };

    let (timed_out, exit_code) =
        wait_with_timeout(&mut child, Some(options.timeout)).map_err(|e| {
            HarnessError::AgentSpawnFailed {
                detail: format!("waiting on agent: {e}"),
            }
        })?;
    if timed_out {
        warn!(
            timeout_secs = options.timeout.as_secs(),
            "agent invocation timed out"
        );
    }

    // Once the child is gone the writer sees a broken pipe and returns.
    if let Some(handle) = stdin_handle {
        let _ = handle.join();
    }
    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();

    let totals = metrics
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .totals();
    let (input_tokens, output_tokens, tool_calls) = totals;

    Ok(AgentRun {
        exit_code,
        timed_out,
        wall_clock_seconds: start.elapsed().as_secs_f64(),
        input_tokens,
        output_tokens,
        tool_calls,
        stdout,
        stderr,
    })
}

/// Read NDJSON lines, feeding each into the shared metrics so partial
/// progress survives a timeout. Returns the captured raw text, capped.
fn drain_stream_json(reader: impl Read, metrics: &Mutex<StreamMetrics>) -> String {
    let mut captured = String::new();
    for line in BufReader::new(reader).lines() {
        let Ok(line) = line else { break };
        {
            let mut m = metrics
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            consume_event(&mut m, &line);
        }
        if captured.len() < MAX_CAPTURE_BYTES {
            captured.push_str(&line);
            captured.push('\n');
        }
    }
    captured
}

fn drain_plain(reader: impl Read) -> String {
    let mut buf = Vec::new();
    let _ = reader
        .take(MAX_CAPTURE_BYTES as u64)
        .read_to_end(&mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}
