//! Subprocess execution helpers.
//!
//! Spawns child processes in their own process group and captures
//! stdout/stderr into bounded buffers. Timeout enforcement terminates the
//! whole process tree: SIGTERM to the group first, then SIGKILL after a
//! grace period, so an agent's own children never outlive the harness.

use std::ffi::OsStr;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// Upper bound on bytes read from each of stdout / stderr to prevent
/// unbounded memory use (10 MiB).
const MAX_OUTPUT_BYTES: u64 = 10 * 1024 * 1024;

/// Polling interval while waiting for a child process with a timeout.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Time between SIGTERM and SIGKILL when a timeout fires.
const KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Captured output from a subprocess invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed due to timeout or the OS did not
    /// report an exit code (e.g. signal termination on Unix).
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub wall_clock_seconds: f64,
}

impl CommandResult {
    /// Returns `true` when the process exited with code 0 and was not killed
    /// by timeout.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }

    /// Combined stdout + stderr, in that order.
    pub fn combined_output(&self) -> String {
        let mut out = self.stdout.clone();
        out.push_str(&self.stderr);
        out
    }
}

/// Configure `cmd` to start the child in its own process group so timeout
/// kills reach the whole tree, not just the direct child.
pub(crate) fn isolate_process_group(cmd: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(not(unix))]
    {
        let _ = cmd;
    }
}

/// Run `program` with `args` in directory `cwd`, optionally killing the child
/// tree after `timeout`.
///
/// Stdout and stderr are each capped at 10 MiB. The child is spawned directly
/// (no shell); use `program` as the executable name and `args` for its argv.
pub fn run_command<S: AsRef<OsStr>>(
    program: &str,
    args: &[S],
    cwd: &Path,
    timeout: Option<Duration>,
) -> std::io::Result<CommandResult> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    isolate_process_group(&mut cmd);

    let start = Instant::now();
    let mut child = cmd.spawn()?;

    // Take the pipe handles so we can read them on dedicated threads,
    // avoiding deadlock when both pipes fill their OS buffers.
    // We set Stdio::piped() above, so take() always returns Some.
    let child_stdout = child.stdout.take().expect("stdout was piped");
    let child_stderr = child.stderr.take().expect("stderr was piped");

    let stdout_handle = std::thread::spawn(move || read_bounded(child_stdout));
    let stderr_handle = std::thread::spawn(move || read_bounded(child_stderr));

    let (timed_out, exit_code) = wait_with_timeout(&mut child, timeout)?;

    let stdout = stdout_handle
        .join()
        .map_err(|e| std::io::Error::other(format!("stdout reader thread panicked: {e:?}")))??;
    let stderr = stderr_handle
        .join()
        .map_err(|e| std::io::Error::other(format!("stderr reader thread panicked: {e:?}")))??;

    Ok(CommandResult {
        stdout,
        stderr,
        exit_code,
        timed_out,
        wall_clock_seconds: start.elapsed().as_secs_f64(),
    })
}

/// Run `command` through `sh -c` in directory `cwd`. Used for configured
/// test commands, which routinely contain pipes, `&&` chains, and quoting.
pub fn run_shell(
    command: &str,
    cwd: &Path,
    timeout: Option<Duration>,
) -> std::io::Result<CommandResult> {
    run_command("sh", &["-c", command], cwd, timeout)
}

/// Wait for the child to exit. If `timeout` is `Some`, poll with `try_wait`
/// and terminate the child's process group when the deadline is exceeded.
///
/// # Race Condition Note
///
/// There is a theoretical race where the child exits successfully just as we
/// decide to kill it due to timeout. In this case, we might report a timeout
/// even if the process finished. This is acceptable for our use case: if it's
/// that close to the timeout, treating it as a timeout is safe.
pub(crate) fn wait_with_timeout(
    child: &mut Child,
    timeout: Option<Duration>,
) -> std::io::Result<(bool, Option<i32>)> {
    match timeout {
        None => {
            let status = child.wait()?;
            Ok((false, status.code()))
        }
        Some(duration) => {
            let deadline = Instant::now() + duration;
            loop {
                if let Some(status) = child.try_wait()? {
                    return Ok((false, status.code()));
                }
                if Instant::now() >= deadline {
                    terminate_tree(child)?;
                    return Ok((true, None));
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

/// Terminate the child's process group: SIGTERM first, SIGKILL after
/// [`KILL_GRACE_PERIOD`] if it has not exited. On non-Unix platforms this
/// degrades to a direct kill of the child.
fn terminate_tree(child: &mut Child) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        // process_group(0) made the child its own group leader, so the
        // negative pid addresses the whole tree.
        let pgid = child.id() as i32;
        unsafe {
            libc::kill(-pgid, libc::SIGTERM);
        }
        let deadline = Instant::now() + KILL_GRACE_PERIOD;
        loop {
            if child.try_wait()?.is_some() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                unsafe {
                    libc::kill(-pgid, libc::SIGKILL);
                }
                let _ = child.wait();
                return Ok(());
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.kill();
        let _ = child.wait();
        Ok(())
    }
}

/// Read up to [`MAX_OUTPUT_BYTES`] from `reader`, returning the result as a
/// (possibly lossy) UTF-8 string.
fn read_bounded(reader: impl Read) -> std::io::Result<String> {
    let mut buf = Vec::new();
    reader.take(MAX_OUTPUT_BYTES).read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
