use std::path::Path;
use std::sync::Once;

use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const DEFAULT_DIRECTIVE: &str = "info";
const ENV_VAR_NAME: &str = "CTXBENCH_LOG";

static INIT: Once = Once::new();

/// Initialize the global tracing subscriber.
///
/// Human-readable output goes to stderr, filtered with precedence
/// `CTXBENCH_LOG` env var > `log_level` argument > `info`. When `log_file`
/// is set, unfiltered JSON lines are appended there as well, which is what
/// a long experiment run leaves behind for post-hoc debugging.
pub fn init(log_level: Option<&str>, log_file: Option<&Path>) -> anyhow::Result<()> {
    let mut init_err: Option<anyhow::Error> = None;

    INIT.call_once(|| {
        if let Err(e) = try_init(log_level, log_file) {
            init_err = Some(e);
        }
    });

    match init_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn try_init(log_level: Option<&str>, log_file: Option<&Path>) -> anyhow::Result<()> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_ansi(true)
        .compact()
        .with_filter(resolve_filter(log_level));

    let file_layer = match log_file {
        Some(path) => {
            let file = open_log_file(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file.with_max_level(Level::TRACE))
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(false)
                    .json(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))
}

fn resolve_filter(log_level: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_env(ENV_VAR_NAME)
        .unwrap_or_else(|_| EnvFilter::new(log_level.unwrap_or(DEFAULT_DIRECTIVE)))
}

fn open_log_file(path: &Path) -> anyhow::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "failed to create log file directory {}: {e}",
                    parent.display()
                )
            })?;
        }
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| anyhow::anyhow!("failed to open log file {}: {e}", path.display()))
}
