//! Logging and tracing configuration
//!
//! Console output goes to stderr so hex dumps and reports on stdout stay
//! clean. Packet bytes are logged at TRACE, command sequencing at DEBUG.

use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::paths;

fn default_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("nesdbg=debug,info")
        } else {
            EnvFilter::new("nesdbg=info,warn")
        }
    })
}

/// Initialize tracing for the CLI (stderr logging)
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate (DEBUG with `--verbose`), WARN for dependencies.
pub fn init_cli(verbose: bool) {
    tracing_subscriber::registry()
        .with(default_filter(verbose))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// Initialize tracing to a log file plus stderr
///
/// The file lives at `<data dir>/nesdbg/logs/nesdbg.log` and receives full
/// detail, which is where packet traces are worth keeping. Falls back to
/// stderr only if the file cannot be opened.
pub fn init_with_file(verbose: bool) -> Option<PathBuf> {
    let filter = default_filter(verbose);

    let log_file = match (paths::ensure_log_dir(), paths::log_path()) {
        (Ok(Some(_)), Some(path)) => Some(path),
        (Err(e), _) => {
            eprintln!("Warning: Could not create log directory: {}", e);
            None
        }
        _ => None,
    };

    if let Some(path) = log_file {
        match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                let file_layer = fmt::layer()
                    .with_writer(file)
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true);

                let stderr_layer = fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(false)
                    .compact();

                tracing_subscriber::registry()
                    .with(filter)
                    .with(file_layer)
                    .with(stderr_layer)
                    .init();

                return Some(path);
            }
            Err(e) => {
                eprintln!("Warning: Could not open log file: {}", e);
            }
        }
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();

    None
}
