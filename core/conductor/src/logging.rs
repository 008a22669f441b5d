//! Stderr plus a daily rolling file under `~/.conductor/logs`.
//!
//! `RUST_LOG` sets the filter (default `info`); `CONDUCTOR_DEBUG_LOG=1` forces
//! `debug`. If the log directory can't be created, only stderr is used.

use std::env;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "conductor.log";

/// Keep the returned guard alive for the process lifetime or buffered file
/// output is lost.
pub fn init() -> Option<WorkerGuard> {
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).compact();

    let file = conductor_core::config::conductor_home()
        .ok()
        .map(|home| home.join("logs"))
        .filter(|dir| fs_err::create_dir_all(dir).is_ok())
        .map(|dir| {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            tracing_appender::non_blocking(appender)
        });

    match file {
        Some((writer, guard)) => {
            let init = tracing_subscriber::registry()
                .with(filter())
                .with(stderr_layer)
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .try_init();
            init.ok().map(|_| guard)
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(filter())
                .with(stderr_layer)
                .try_init();
            None
        }
    }
}

fn filter() -> EnvFilter {
    let debug_enabled = env::var("CONDUCTOR_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}
