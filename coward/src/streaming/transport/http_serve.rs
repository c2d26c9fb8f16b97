//! HTTP_SERVE: publish fragmented MP4 from the transcoder on the local HTTP server.

use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ffmpeg::{pump_stdin, watch_stderr};
use super::{TranscodeInput, TranscodeOutput, Transcoder, TransportWorker, terminate_child};
use crate::ErrorKind;
use crate::streaming::events::EventEmitter;
use crate::streaming::resolver::StreamHandle;
use crate::streaming::server::StreamRegistry;
use crate::streaming::session::PageSession;

#[derive(Debug)]
pub struct HttpServe {
    transcoder: Transcoder,
    registry: Arc<StreamRegistry>,
    base_url: String,
    slot: Option<usize>,
    pub(super) worker: TransportWorker,
}

impl HttpServe {
    /// `base_url` is the root of the running server, e.g. `http://127.0.0.1:18090`.
    pub fn new(
        transcoder: Transcoder,
        registry: Arc<StreamRegistry>,
        base_url: impl Into<String>,
        grace: Duration,
    ) -> Self {
        Self {
            transcoder,
            registry,
            base_url: base_url.into(),
            slot: None,
            worker: TransportWorker::new(grace),
        }
    }

    pub fn index_url(&self) -> Option<String> {
        self.slot.map(|slot| format!("{}/index/{slot}", self.base_url))
    }

    pub fn stream_url(&self) -> Option<String> {
        self.slot.map(|slot| format!("{}/stream/{slot}", self.base_url))
    }

    pub(super) async fn start(
        &mut self,
        handle: StreamHandle,
        session: &PageSession,
        events: EventEmitter,
    ) -> Result<(), ErrorKind> {
        let input = TranscodeInput::for_handle(&handle);
        let reader = match input {
            TranscodeInput::Stdin => Some(handle.open().await?),
            TranscodeInput::Url(_) => None,
        };

        let mut child = self
            .transcoder
            .spawn(&input, &TranscodeOutput::FragmentedMp4)?;
        self.worker.track(child.id());

        let Some(stdout) = child.stdout.take() else {
            terminate_child(&mut child).await;
            return Err(ErrorKind::PluginTransient);
        };
        let Some(slot) = self
            .registry
            .register(Box::pin(stdout), &session.title, handle.source_url())
        else {
            warn!(page_url = %session.page_url, "No free stream slot");
            terminate_child(&mut child).await;
            return Err(ErrorKind::PluginTransient);
        };
        self.slot = Some(slot);

        let stop = self.worker.stop_token();
        if let (Some(reader), Some(stdin)) = (reader, child.stdin.take()) {
            tokio::spawn(pump_stdin(reader, stdin, stop.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(watch_stderr(stderr, session.page_url.clone(), None));
        }

        info!(page_url = %session.page_url, slot, "Stream published");
        let watch_url = self.index_url();
        self.worker.spawn(serve(child, watch_url, events, stop));
        Ok(())
    }

    pub(super) async fn stop(&mut self) {
        self.worker.shutdown().await;
        if let Some(slot) = self.slot.take() {
            self.registry.unregister(slot);
            debug!(slot, "Stream slot released");
        }
    }
}

async fn serve(
    mut child: Child,
    watch_url: Option<String>,
    events: EventEmitter,
    stop: CancellationToken,
) {
    events.buffering_started().await;
    events.stream_started(watch_url).await;

    let status = tokio::select! {
        biased;
        _ = stop.cancelled() => {
            terminate_child(&mut child).await;
            return;
        }
        status = child.wait() => status,
    };

    match status {
        Ok(status) => {
            debug!(page_url = events.page_url(), %status, "Transcoder exited");
            events.closed(status.success()).await;
        }
        Err(e) => {
            warn!(page_url = events.page_url(), error = %e, "Failed to wait for transcoder");
            events.stream_error(ErrorKind::ChildExited).await;
        }
    }
}
