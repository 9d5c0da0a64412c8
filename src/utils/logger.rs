//! Logging initialization.
//!
//! Events go to stderr so stdout stays clean for command output and JSON.
//! With a log directory, each run additionally writes a timestamped file,
//! e.g. `rusty-tools.2026-10-18-14-30-25.log`.
//!
//! `RUST_LOG` overrides the default level (`warn`, or `debug` with `--verbose`).

use std::fs;
use std::path::Path;

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// The returned guard flushes the file writer when dropped, so the caller
/// keeps it alive for the lifetime of the program. Failing to set up the
/// file sink only prints a warning.
pub fn init_logging(verbose: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let default_level = if verbose { "debug" } else { "warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose);

    let (file_layer, guard) = match log_dir.map(open_log_file) {
        Some(Ok(file)) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true);
            (Some(layer), Some(guard))
        }
        Some(Err(err)) => {
            eprintln!("Warning: {err}");
            (None, None)
        }
        None => (None, None),
    };

    if tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .is_err()
    {
        // Already installed, e.g. by a test harness.
        return None;
    }
    guard
}

fn open_log_file(dir: &Path) -> Result<fs::File, String> {
    fs::create_dir_all(dir)
        .map_err(|e| format!("Failed to create log directory {}: {e}", dir.display()))?;

    let timestamp = Local::now().format("%Y-%m-%d-%H-%M-%S");
    let path = dir.join(format!("rusty-tools.{timestamp}.log"));
    fs::File::create(&path).map_err(|e| format!("Failed to create log file {}: {e}", path.display()))
}
