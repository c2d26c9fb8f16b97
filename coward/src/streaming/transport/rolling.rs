//! Two-file rolling buffer and the transport that writes it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{CHUNK_BYTES, TransportWorker};
use crate::streaming::events::EventEmitter;
use crate::streaming::resolver::StreamHandle;
use crate::streaming::session::{PageSession, SessionId};
use crate::utils::fs;
use crate::{ErrorKind, Result};

const FILE_NAMES: [&str; 2] = ["temp_1.mp4", "temp_2.mp4"];

#[derive(Debug)]
struct RollShared {
    paths: [PathBuf; 2],
    active: AtomicUsize,
    active_len: AtomicU64,
    /// One-shot: set by the player when it starts a file, consumed by a swap.
    swap_available: AtomicBool,
    finished: AtomicBool,
}

/// Reader-side view of a [`RollingFileBuffer`].
#[derive(Debug, Clone)]
pub struct RollHandle {
    shared: Arc<RollShared>,
}

impl RollHandle {
    pub fn path(&self, index: usize) -> &Path {
        &self.shared.paths[index % 2]
    }

    pub fn active_index(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    pub fn active_path(&self) -> &Path {
        self.path(self.active_index())
    }

    /// Bytes written to the active file so far.
    pub fn active_len(&self) -> u64 {
        self.shared.active_len.load(Ordering::Acquire)
    }

    /// File to continue with after reaching the end of `current`, if the
    /// writer has already moved on from it.
    pub fn next_after_eof(&self, current: usize) -> Option<usize> {
        let active = self.active_index();
        (active != current).then_some(active)
    }

    pub fn release_swap(&self) {
        self.shared.swap_available.store(true, Ordering::Release);
    }

    pub fn swap_available(&self) -> bool {
        self.shared.swap_available.load(Ordering::Acquire)
    }

    /// The writer reached the end of the stream or was stopped.
    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::Acquire)
    }
}

/// Writer side of the rolling pair.
///
/// Writes go to the active file. Once it holds `threshold` bytes and the
/// player has released a swap, roles flip and the new active file is
/// truncated before its first byte is written. Without a released swap the
/// writer keeps appending to the active file.
#[derive(Debug)]
pub struct RollingFileBuffer {
    file: File,
    written: u64,
    threshold: u64,
    shared: Arc<RollShared>,
}

impl RollingFileBuffer {
    pub async fn create(dir: &Path, threshold: u64) -> Result<Self> {
        fs::ensure_dir_all(dir).await?;
        let paths = FILE_NAMES.map(|name| dir.join(name));

        let file = create_truncated(&paths[0]).await?;
        create_truncated(&paths[1]).await?;

        Ok(Self {
            file,
            written: 0,
            threshold: threshold.max(1),
            shared: Arc::new(RollShared {
                paths,
                active: AtomicUsize::new(0),
                active_len: AtomicU64::new(0),
                swap_available: AtomicBool::new(true),
                finished: AtomicBool::new(false),
            }),
        })
    }

    pub fn handle(&self) -> RollHandle {
        RollHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn written_in_active(&self) -> u64 {
        self.written
    }

    pub async fn write(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            if self.written >= self.threshold
                && self.shared.swap_available.swap(false, Ordering::AcqRel)
            {
                self.swap().await?;
            }

            let take = if self.written < self.threshold {
                data.len().min((self.threshold - self.written) as usize)
            } else {
                data.len()
            };
            let (chunk, rest) = data.split_at(take);
            let active = self.active_path().to_path_buf();
            self.file
                .write_all(chunk)
                .await
                .map_err(|e| fs::io_error("writing rolling file", &active, e))?;
            self.file
                .flush()
                .await
                .map_err(|e| fs::io_error("flushing rolling file", &active, e))?;

            self.written += take as u64;
            self.shared.active_len.store(self.written, Ordering::Release);
            data = rest;
        }
        Ok(())
    }

    async fn swap(&mut self) -> Result<()> {
        let next = 1 - self.shared.active.load(Ordering::Acquire);
        let path = self.shared.paths[next].clone();
        let file = create_truncated(&path).await?;

        let old = std::mem::replace(&mut self.file, file);
        drop(old);
        self.written = 0;
        self.shared.active_len.store(0, Ordering::Release);
        self.shared.active.store(next, Ordering::Release);
        debug!(path = %path.display(), "Rolled over to standby file");
        Ok(())
    }

    fn active_path(&self) -> &Path {
        &self.shared.paths[self.shared.active.load(Ordering::Acquire)]
    }

    pub async fn finish(&mut self) {
        if let Err(e) = self.file.flush().await {
            debug!(error = %e, "Flush on finish failed");
        }
        self.shared.finished.store(true, Ordering::Release);
    }
}

async fn create_truncated(path: &Path) -> Result<File> {
    File::create(path)
        .await
        .map_err(|e| fs::io_error("creating rolling file", path, e))
}

/// LOCAL_FILE_ROLL: stream bytes into a [`RollingFileBuffer`] for the embedded player.
#[derive(Debug)]
pub struct LocalRoll {
    dir: PathBuf,
    threshold: u64,
    prebuffer: u64,
    roll: Option<RollHandle>,
    pub(super) worker: TransportWorker,
}

impl LocalRoll {
    /// Files live in a per-session directory under `stream_dir`.
    pub fn new(
        stream_dir: &Path,
        session_id: SessionId,
        threshold: u64,
        prebuffer: u64,
        grace: Duration,
    ) -> Self {
        Self {
            dir: stream_dir.join(format!("session-{session_id}")),
            threshold,
            prebuffer,
            roll: None,
            worker: TransportWorker::new(grace),
        }
    }

    pub fn handle(&self) -> Option<RollHandle> {
        self.roll.clone()
    }

    pub(super) async fn start(
        &mut self,
        handle: StreamHandle,
        session: &PageSession,
        events: EventEmitter,
    ) -> std::result::Result<(), ErrorKind> {
        let buffer = RollingFileBuffer::create(&self.dir, self.threshold)
            .await
            .map_err(|e| {
                warn!(page_url = %session.page_url, error = %e, "Cannot create rolling buffer");
                ErrorKind::PluginTransient
            })?;
        self.roll = Some(buffer.handle());

        let stop = self.worker.stop_token();
        let prebuffer = self.prebuffer;
        self.worker
            .spawn(write_rolling(handle, buffer, prebuffer, events, stop));
        Ok(())
    }

    pub(super) async fn stop(&mut self) {
        self.worker.shutdown().await;
        let dir = self.dir.clone();
        let removed = tokio::task::spawn_blocking(move || fs::remove_dir_all_if_exists(&dir)).await;
        match removed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to remove rolling buffer files"),
            Err(e) => warn!(error = %e, "Rolling buffer cleanup task failed"),
        }
    }
}

async fn write_rolling(
    handle: StreamHandle,
    mut buffer: RollingFileBuffer,
    prebuffer: u64,
    events: EventEmitter,
    stop: CancellationToken,
) {
    let mut reader = match handle.open().await {
        Ok(reader) => reader,
        Err(kind) => {
            buffer.finish().await;
            events.stream_error(kind).await;
            return;
        }
    };
    events.buffering_started().await;

    let mut buf = vec![0u8; CHUNK_BYTES];
    let mut total = 0u64;
    let mut started = false;
    let outcome = loop {
        let read = tokio::select! {
            biased;
            _ = stop.cancelled() => break Ok(false),
            read = reader.read_chunk(&mut buf) => read,
        };
        let n = match read {
            Ok(0) => break Ok(true),
            Ok(n) => n,
            Err(kind) => break Err(kind),
        };
        if let Err(e) = buffer.write(&buf[..n]).await {
            warn!(page_url = events.page_url(), error = %e, "Rolling buffer write failed");
            break Err(ErrorKind::PluginTransient);
        }
        total += n as u64;
        if !started && total >= prebuffer {
            started = true;
            events.stream_started(None).await;
        }
    };

    reader.close();
    buffer.finish().await;
    match outcome {
        Ok(true) => {
            info!(page_url = events.page_url(), bytes = total, "Stream ended");
            if !started {
                events.stream_started(None).await;
            }
        }
        Ok(false) => debug!(page_url = events.page_url(), "Rolling writer stopped"),
        Err(kind) => events.stream_error(kind).await,
    }
}
