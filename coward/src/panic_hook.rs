//! Process-wide panic hook.
//!
//! Release builds abort on panic and no destructor runs, so child processes
//! spawned with `kill_on_drop` would outlive the bridge. The hook reaps them
//! and appends the panic to this run's log file itself; the non-blocking
//! writer may never flush.

use std::backtrace::Backtrace;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::{PanicHookInfo, take_hook};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// What the hook records about one panic.
#[derive(Debug)]
pub struct PanicRecord {
    pub at: DateTime<Local>,
    pub thread: String,
    pub location: String,
    pub message: String,
    pub backtrace: String,
}

impl PanicRecord {
    fn capture(info: &PanicHookInfo<'_>) -> Self {
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| info.to_string());

        Self {
            at: Local::now(),
            thread: std::thread::current().name().unwrap_or("<unnamed>").to_string(),
            location: info
                .location()
                .map_or_else(|| "<unknown>".to_string(), |l| format!("{}:{}:{}", l.file(), l.line(), l.column())),
            message,
            backtrace: Backtrace::force_capture().to_string(),
        }
    }
}

impl fmt::Display for PanicRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} PANIC coward/{} thread={} location={} payload={}\nBacktrace:\n{}",
            self.at.format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
            env!("CARGO_PKG_VERSION"),
            self.thread,
            self.location,
            self.message,
            self.backtrace
        )
    }
}

/// Install the hook. `log_file` is this run's log file, if file logging is on.
pub fn install(log_file: Option<&Path>) {
    let log_file = log_file.map(PathBuf::from);
    let previous_hook = take_hook();

    std::panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let record = PanicRecord::capture(info);
            tracing::error!(target: "coward::panic", "{record}");

            if cfg!(panic = "abort") {
                if let Some(path) = log_file.as_deref() {
                    let _ = append_record(path, &record);
                }
                reap_children();
            }
        }));

        previous_hook(info);
    }));
}

fn reap_children() {
    for pid in process_utils::descendants(std::process::id()) {
        process_utils::kill_tree(pid);
    }
}

fn append_record(path: &Path, record: &PanicRecord) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{record}")?;
    file.flush()
}
