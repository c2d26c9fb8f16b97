//! Transport strategies: moving stream bytes from a resolved handle to a player.
//!
//! Every strategy follows the same contract. `start` launches one worker task
//! for the session; the worker reports progress through an [`EventEmitter`].
//! `stop` sets the stop flag, gives the worker its stop budget (one grace
//! period unless the worker runs a quit handshake) to finish, then aborts it
//! and kills any child process tree it owns.

mod ffmpeg;
mod http_serve;
mod mpv_pipe;
mod rolling;

pub use ffmpeg::{
    FfmpegPipe, OutputRecordReader, TranscodeInput, TranscodeOutput, Transcoder, is_progress_line,
};
pub use http_serve::HttpServe;
pub use mpv_pipe::MpvPipe;
pub use rolling::{LocalRoll, RollHandle, RollingFileBuffer};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::events::EventEmitter;
use super::resolver::StreamHandle;
use super::session::{PageSession, StrategyKind};
use crate::ErrorKind;

/// Bytes moved per loop iteration.
pub const CHUNK_BYTES: usize = 8192;

/// Where the player should read from once a transport is running.
#[derive(Debug, Clone)]
pub enum PlaybackTarget {
    /// The player is already attached to the transport (stdin pipe).
    Attached,
    /// A URL the player opens itself (HTTP slot, UDP endpoint).
    Url(String),
    /// The rolling file pair written by [`LocalRoll`].
    RollingFiles(RollHandle),
}

/// One transport per session, polymorphic over a single start/stop contract.
#[derive(Debug)]
pub enum Strategy {
    MpvPipe(MpvPipe),
    LocalRoll(LocalRoll),
    HttpServe(HttpServe),
    FfmpegPipe(FfmpegPipe),
}

impl Strategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::MpvPipe(_) => StrategyKind::MpvPipe,
            Self::LocalRoll(_) => StrategyKind::LocalFileRoll,
            Self::HttpServe(_) => StrategyKind::HttpServe,
            Self::FfmpegPipe(_) => StrategyKind::FfmpegPipe,
        }
    }

    /// Start moving bytes for `session`.
    pub async fn start(
        &mut self,
        handle: StreamHandle,
        session: &PageSession,
        events: EventEmitter,
    ) -> Result<(), ErrorKind> {
        debug!(
            page_url = %session.page_url,
            session = session.id,
            strategy = %self.kind(),
            quality = handle.quality_label(),
            "Starting transport"
        );
        match self {
            Self::MpvPipe(t) => t.start(handle, events),
            Self::LocalRoll(t) => t.start(handle, session, events).await,
            Self::HttpServe(t) => t.start(handle, session, events).await,
            Self::FfmpegPipe(t) => t.start(handle, events).await,
        }
    }

    /// Request the worker to stop and release everything it owns.
    pub async fn stop(&mut self) {
        match self {
            Self::MpvPipe(t) => t.stop().await,
            Self::LocalRoll(t) => t.stop().await,
            Self::HttpServe(t) => t.stop().await,
            Self::FfmpegPipe(t) => t.stop().await,
        }
    }

    pub fn playback_target(&self) -> Option<PlaybackTarget> {
        match self {
            Self::MpvPipe(_) => Some(PlaybackTarget::Attached),
            Self::LocalRoll(t) => t.handle().map(PlaybackTarget::RollingFiles),
            Self::HttpServe(t) => t.stream_url().map(PlaybackTarget::Url),
            Self::FfmpegPipe(t) => Some(PlaybackTarget::Url(t.output_url())),
        }
    }

}

/// Owns the task of one transport and the processes it spawned.
#[derive(Debug)]
pub struct TransportWorker {
    stop: CancellationToken,
    grace: Duration,
    /// How long [`TransportWorker::shutdown`] waits before aborting.
    budget: Duration,
    task: Option<JoinHandle<()>>,
    pids: Arc<Mutex<Vec<u32>>>,
}

impl TransportWorker {
    pub fn new(grace: Duration) -> Self {
        Self {
            stop: CancellationToken::new(),
            grace,
            budget: grace,
            task: None,
            pids: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Wait up to `budget` on shutdown instead of one grace period.
    pub fn with_stop_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Remember `pid` so a forced stop can kill its tree.
    pub fn track(&self, pid: Option<u32>) {
        if let Some(pid) = pid {
            self.pids.lock().push(pid);
        }
    }

    pub fn spawn<F>(&mut self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.task = Some(tokio::spawn(fut));
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Set the stop flag and wait up to the stop budget for the worker.
    ///
    /// A worker still running after that is aborted and every tracked process
    /// tree is killed.
    pub async fn shutdown(&mut self) {
        self.stop.cancel();
        let Some(mut task) = self.task.take() else {
            return;
        };

        if tokio::time::timeout(self.budget, &mut task).await.is_ok() {
            return;
        }

        warn!(budget_ms = self.budget.as_millis() as u64, "Transport worker did not stop in time, killing");
        task.abort();
        let pids = std::mem::take(&mut *self.pids.lock());
        if pids.is_empty() {
            return;
        }
        let killed = tokio::task::spawn_blocking(move || {
            pids.into_iter().map(process_utils::kill_tree).sum::<usize>()
        })
        .await
        .unwrap_or_default();
        debug!(killed, "Killed transport process trees");
    }
}

/// Kill `child` together with its descendants and reap it.
pub(crate) async fn terminate_child(child: &mut Child) {
    if let Some(pid) = child.id() {
        let _ = tokio::task::spawn_blocking(move || process_utils::kill_tree(pid)).await;
    }
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "Child already gone");
    }
    if let Err(e) = child.wait().await {
        debug!(error = %e, "Failed to reap child");
    }
}
