//! Logging initialization.
//!
//! Console logging (stderr) is always on; passing a log directory adds a
//! daily-rolling file. The filter honors `RUST_LOG` when set, otherwise the
//! verbosity flag decides. Command output goes to stdout, logs never do.

use std::path::Path;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Result, SyncError};

/// Log file name prefix ("feedsync" -> "feedsync.2026-08-22.log").
const LOG_FILE_PREFIX: &str = "feedsync";

/// Initialize the global tracing subscriber. Call once at startup.
pub fn init(verbose: bool, log_dir: Option<&Path>) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            // The guard must stay alive for the process lifetime or buffered
            // lines are lost.
            std::mem::forget(guard);

            let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

            tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .with(file_layer)
                .try_init()
                .map_err(|e| SyncError::Config(format!("failed to initialize logging: {e}")))?;
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .try_init()
                .map_err(|e| SyncError::Config(format!("failed to initialize logging: {e}")))?;
        }
    }

    Ok(())
}
