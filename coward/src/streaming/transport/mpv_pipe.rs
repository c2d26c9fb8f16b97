//! MPV_PIPE: feed stream bytes into an external mpv through its stdin.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{CHUNK_BYTES, TransportWorker, terminate_child};
use crate::ErrorKind;
use crate::streaming::events::EventEmitter;
use crate::streaming::player::IpcEndpoint;
use crate::streaming::resolver::StreamHandle;

#[derive(Debug)]
pub struct MpvPipe {
    child: Option<Child>,
    ipc: IpcEndpoint,
    pub(super) worker: TransportWorker,
}

impl MpvPipe {
    /// `child` is the player spawned with a piped stdin.
    pub fn new(child: Child, ipc: IpcEndpoint, grace: Duration) -> Self {
        // The pump spends up to one grace period on the player's quit handshake.
        let worker = TransportWorker::new(grace).with_stop_budget(grace * 2);
        worker.track(child.id());
        Self {
            child: Some(child),
            ipc,
            worker,
        }
    }

    pub(super) fn start(&mut self, handle: StreamHandle, events: EventEmitter) -> Result<(), ErrorKind> {
        let mut child = self.child.take().ok_or(ErrorKind::ChildExited)?;
        let stdin = child.stdin.take().ok_or(ErrorKind::PipeWriteFailed)?;
        let pump = Pump {
            child,
            stdin,
            ipc: self.ipc.clone(),
            grace: self.worker.grace(),
            events,
            stop: self.worker.stop_token(),
        };
        self.worker.spawn(pump.run(handle));
        Ok(())
    }

    pub(super) async fn stop(&mut self) {
        self.worker.shutdown().await;
        if let Some(mut child) = self.child.take() {
            terminate_child(&mut child).await;
        }
        self.ipc.remove();
    }
}

#[derive(Debug)]
enum Outcome {
    PlayerExited(io::Result<ExitStatus>),
    EndOfStream,
    Stopped,
    Failed(ErrorKind),
}

struct Pump {
    child: Child,
    stdin: ChildStdin,
    ipc: IpcEndpoint,
    grace: Duration,
    events: EventEmitter,
    stop: CancellationToken,
}

impl Pump {
    async fn run(mut self, handle: StreamHandle) {
        let outcome = match handle.open().await {
            Ok(mut reader) => {
                self.events.buffering_started().await;
                let outcome = self.copy(&mut reader).await;
                reader.close();
                outcome
            }
            Err(kind) => Outcome::Failed(kind),
        };
        debug!(page_url = self.events.page_url(), ?outcome, "Pipe loop finished");

        let Self {
            mut child,
            stdin,
            ipc,
            grace,
            events,
            ..
        } = self;
        drop(stdin);

        if !matches!(outcome, Outcome::PlayerExited(_)) {
            quit_player(&mut child, &ipc, grace).await;
        }
        ipc.remove();

        match outcome {
            Outcome::PlayerExited(status) => {
                info!(page_url = events.page_url(), status = ?status.ok(), "Player closed");
                events.closed(true).await;
            }
            Outcome::EndOfStream => events.closed(true).await,
            Outcome::Stopped => events.closed(false).await,
            Outcome::Failed(kind) => events.stream_error(kind).await,
        }
    }

    async fn copy(&mut self, reader: &mut crate::streaming::resolver::StreamReader) -> Outcome {
        let mut buf = vec![0u8; CHUNK_BYTES];
        let mut started = false;
        loop {
            let n = tokio::select! {
                biased;
                _ = self.stop.cancelled() => return Outcome::Stopped,
                status = self.child.wait() => return Outcome::PlayerExited(status),
                read = reader.read_chunk(&mut buf) => match read {
                    Ok(0) => return Outcome::EndOfStream,
                    Ok(n) => n,
                    Err(kind) => return Outcome::Failed(kind),
                },
            };

            let written = tokio::select! {
                biased;
                _ = self.stop.cancelled() => return Outcome::Stopped,
                status = self.child.wait() => return Outcome::PlayerExited(status),
                written = write_chunk(&mut self.stdin, &buf[..n]) => written,
            };

            if let Err(e) = written {
                // A broken pipe right before the player exits is a normal close.
                return match tokio::time::timeout(self.grace, self.child.wait()).await {
                    Ok(status) => Outcome::PlayerExited(status),
                    Err(_) => {
                        warn!(page_url = self.events.page_url(), error = %e, "Pipe write failed");
                        Outcome::Failed(ErrorKind::PipeWriteFailed)
                    }
                };
            }

            if !started {
                started = true;
                self.events.stream_started(None).await;
            }
        }
    }
}

async fn write_chunk(stdin: &mut ChildStdin, chunk: &[u8]) -> io::Result<()> {
    stdin.write_all(chunk).await?;
    stdin.flush().await
}

/// Ask the player to quit over IPC and wait; kill its tree if it lingers.
async fn quit_player(child: &mut Child, ipc: &IpcEndpoint, grace: Duration) {
    if matches!(child.try_wait(), Ok(Some(_))) {
        return;
    }
    if let Err(e) = ipc.send("quit").await {
        debug!(endpoint = ipc.name(), error = %e, "Quit command not delivered");
    }
    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        warn!(endpoint = ipc.name(), "Player ignored quit, killing");
        terminate_child(child).await;
    }
}
