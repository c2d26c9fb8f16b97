//! Console and per-run file logging.
//!
//! Each run writes `.logs/log-YYYYMMDD-HHMMSS`; only the newest `depth` files
//! are kept. The `debug` driver command swaps the filter at runtime through a
//! reload handle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

use crate::utils::fs;

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "coward=info,stream_extractor=info,process_utils=warn";

/// Filter directive used while debug output is enabled.
pub const DEBUG_LOG_FILTER: &str =
    "coward=debug,stream_extractor=debug,process_utils=debug,tower_http=debug";

const LOG_FILE_PREFIX: &str = "log-";

/// Timestamps in local time.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

pub type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

/// Options controlling [`init_logging`].
#[derive(Debug, Clone)]
pub struct LogOptions {
    pub log_dir: PathBuf,
    /// Write a log file in addition to the console.
    pub to_file: bool,
    pub debug: bool,
    /// Number of log files to keep.
    pub depth: usize,
}

/// Handle to the installed subscriber.
pub struct LoggingConfig {
    handle: FilterHandle,
    log_file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Replace the active filter with `directive`.
    pub fn set_filter(&self, directive: &str) -> crate::Result<()> {
        let filter = EnvFilter::try_new(directive)
            .map_err(|e| crate::Error::config(format!("bad log directive {directive:?}: {e}")))?;
        self.handle
            .reload(filter)
            .map_err(|e| crate::Error::Other(format!("log filter reload: {e}")))?;
        info!(%directive, "Log filter changed");
        Ok(())
    }

    /// Switch between the default and the debug filter.
    pub fn set_debug(&self, enabled: bool) -> crate::Result<()> {
        self.set_filter(if enabled {
            DEBUG_LOG_FILTER
        } else {
            DEFAULT_LOG_FILTER
        })
    }

    /// Path of this run's log file, if file logging is enabled.
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}

/// File name for a log started now.
pub fn log_file_name() -> String {
    format!("{LOG_FILE_PREFIX}{}", Local::now().format("%Y%m%d-%H%M%S"))
}

/// Delete all but the newest `keep` log files in `log_dir`.
///
/// Log names sort chronologically, so the name order is the age order.
pub fn prune_old_logs(log_dir: &Path, keep: usize) -> std::io::Result<usize> {
    let mut logs: Vec<PathBuf> = std::fs::read_dir(log_dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(LOG_FILE_PREFIX))
        })
        .collect();

    if logs.len() <= keep {
        return Ok(0);
    }

    logs.sort();
    let excess = logs.len() - keep;
    let mut deleted = 0;
    for path in logs.into_iter().take(excess) {
        match std::fs::remove_file(&path) {
            Ok(()) => {
                deleted += 1;
                debug!(path = %path.display(), "Deleted old log file");
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete old log file"),
        }
    }
    Ok(deleted)
}

/// Initialize logging.
///
/// Returns the logging handle and, when file logging is enabled, the writer
/// guard. Keep the guard alive for the app lifetime.
pub fn init_logging(options: &LogOptions) -> crate::Result<(Arc<LoggingConfig>, Option<WorkerGuard>)> {
    let initial_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if options.debug {
            DEBUG_LOG_FILTER
        } else {
            DEFAULT_LOG_FILTER
        })
    });
    let (filter_layer, filter_handle) = reload::Layer::new(initial_filter);

    let (file_layer, guard, log_file) = if options.to_file {
        fs::ensure_dir_all_sync_with_op("creating log directory", &options.log_dir)?;
        // The new file does not exist yet, so keep one slot free for it.
        if let Err(e) = prune_old_logs(&options.log_dir, options.depth.saturating_sub(1)) {
            eprintln!("Failed to prune old logs: {e}");
        }

        let file_name = log_file_name();
        let file_appender = tracing_appender::rolling::never(&options.log_dir, &file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_timer(LocalTimer);
        (
            Some(layer),
            Some(guard),
            Some(options.log_dir.join(file_name)),
        )
    } else {
        (None, None, None)
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(file_layer)
        .try_init()
        .map_err(|e| {
            crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
        })?;

    let config = Arc::new(LoggingConfig {
        handle: filter_handle,
        log_file,
    });

    Ok((config, guard))
}
