//! provides logging helpers

use std::env;
use std::path::Path;
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Directory for rotated log files. Logs go to stderr only when unset.
pub const LOG_PATH_ENV_VAR: &str = "DRA_WEBHOOK_LOG_PATH";

const LOG_FILE_PREFIX: &str = "dra-webhook.log";

/// initiate the global tracing subscriber
///
/// The returned guard flushes the file writer on drop and must be held for the
/// lifetime of the process.
pub fn init() -> Option<WorkerGuard> {
    let log_dir = env::var(LOG_PATH_ENV_VAR).ok().map(PathBuf::from);

    let env_filter = || {
        filter::EnvFilter::builder()
            .with_default_directive(filter::LevelFilter::INFO.into())
            .from_env_lossy()
    };

    let stderr_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter());

    let Some(log_dir) = log_dir else {
        registry().with(stderr_layer).init();
        return None;
    };

    match file_appender(&log_dir) {
        Ok(appender) => {
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(env_filter());
            registry().with(stderr_layer).with(file_layer).init();
            Some(guard)
        }
        Err(err) => {
            registry().with(stderr_layer).init();
            tracing::error!(
                "failed to create rolling log file appender at {}: {err}; logging to stderr only",
                log_dir.display()
            );
            None
        }
    }
}

fn file_appender(
    log_dir: &Path,
) -> Result<RollingFileAppender, tracing_appender::rolling::InitError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .max_log_files(3)
        .build(log_dir)
}
