//! In-app player surface and the driver that feeds it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ErrorKind;
use crate::streaming::events::EventEmitter;
use crate::streaming::transport::{PlaybackTarget, RollHandle};

/// A media widget the bridge can drive.
pub trait MediaSurface: Send + Sync {
    /// Loop the "buffering" clip until a real source is played.
    fn play_loading_clip(&self);
    fn play_source(&self, source: &str);
    fn stop(&self);
}

/// Notifications raised by a [`MediaSurface`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    EndOfMedia,
    /// The user closed the surface.
    Closed,
}

/// Creates one surface per session.
pub trait SurfaceFactory: Send + Sync {
    fn create(
        &self,
        title: &str,
        page_url: &str,
    ) -> Result<(Arc<dyn MediaSurface>, mpsc::Receiver<SurfaceEvent>), ErrorKind>;
}

#[derive(Debug, Clone, Copy)]
pub struct EmbeddedSettings {
    /// Bytes the active rolling file must hold before playback starts.
    pub prebuffer_bytes: u64,
    /// Interval of the prebuffer and live-edge polls.
    pub poll: Duration,
}

/// Drives a [`MediaSurface`] for one session.
pub struct EmbeddedPlayer {
    surface: Arc<dyn MediaSurface>,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for EmbeddedPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedPlayer")
            .field("running", &self.task.as_ref().is_some_and(|t| !t.is_finished()))
            .finish()
    }
}

impl EmbeddedPlayer {
    pub fn start(
        surface: Arc<dyn MediaSurface>,
        surface_events: mpsc::Receiver<SurfaceEvent>,
        target: PlaybackTarget,
        settings: EmbeddedSettings,
        events: EventEmitter,
    ) -> Self {
        let stop = CancellationToken::new();
        let driver = Driver {
            surface: Arc::clone(&surface),
            surface_events,
            settings,
            events,
            stop: stop.clone(),
        };
        let task = tokio::spawn(driver.run(target));
        Self {
            surface,
            stop,
            task: Some(task),
        }
    }

    /// Stop playback and the driver without reporting a close.
    pub async fn close(&mut self) {
        self.stop.cancel();
        self.surface.stop();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            debug!(error = %e, "Embedded player driver ended abnormally");
        }
    }
}

struct Driver {
    surface: Arc<dyn MediaSurface>,
    surface_events: mpsc::Receiver<SurfaceEvent>,
    settings: EmbeddedSettings,
    events: EventEmitter,
    stop: CancellationToken,
}

impl Driver {
    async fn run(mut self, target: PlaybackTarget) {
        let closed_by_user = match target {
            PlaybackTarget::Url(url) => {
                self.surface.play_source(&url);
                self.wait_for_end().await
            }
            PlaybackTarget::RollingFiles(roll) => self.play_rolling(roll).await,
            PlaybackTarget::Attached => Some(true),
        };
        if let Some(graceful) = closed_by_user {
            self.events.closed(graceful).await;
        }
    }

    /// `None` when stopped by the supervisor, `Some(graceful)` otherwise.
    async fn wait_for_end(&mut self) -> Option<bool> {
        tokio::select! {
            _ = self.stop.cancelled() => None,
            _ = self.surface_events.recv() => Some(true),
        }
    }

    /// Poll until `ready` holds. `false` when stopped or the surface closed.
    async fn poll_until(&mut self, ready: impl Fn() -> bool) -> Option<bool> {
        while !ready() {
            tokio::select! {
                _ = self.stop.cancelled() => return None,
                event = self.surface_events.recv() => match event {
                    Some(SurfaceEvent::EndOfMedia) => {}
                    Some(SurfaceEvent::Closed) | None => return Some(false),
                },
                _ = tokio::time::sleep(self.settings.poll) => {}
            }
        }
        Some(true)
    }

    async fn play_rolling(&mut self, roll: RollHandle) -> Option<bool> {
        self.surface.play_loading_clip();
        let prebuffer = self.settings.prebuffer_bytes;
        let ready = {
            let roll = roll.clone();
            move || roll.active_len() > prebuffer || roll.is_finished()
        };
        if !self.poll_until(ready).await? {
            return Some(true);
        }

        let mut current = roll.active_index();
        self.begin_file(&roll, current);

        loop {
            let event = tokio::select! {
                _ = self.stop.cancelled() => return None,
                event = self.surface_events.recv() => event,
            };
            match event {
                Some(SurfaceEvent::EndOfMedia) => {}
                Some(SurfaceEvent::Closed) | None => return Some(true),
            }

            if roll.next_after_eof(current).is_none() {
                if roll.is_finished() {
                    info!(page_url = self.events.page_url(), "Rolling playback finished");
                    return Some(true);
                }
                // Live edge: wait for the writer to move on.
                self.surface.play_loading_clip();
                let moved = {
                    let roll = roll.clone();
                    move || roll.next_after_eof(current).is_some() || roll.is_finished()
                };
                if !self.poll_until(moved).await? {
                    return Some(true);
                }
                if roll.next_after_eof(current).is_none() {
                    return Some(true);
                }
            }

            current = roll.active_index();
            self.begin_file(&roll, current);
        }
    }

    fn begin_file(&self, roll: &RollHandle, index: usize) {
        let path = roll.path(index);
        debug!(page_url = self.events.page_url(), path = %path.display(), "Playing rolling file");
        self.surface.play_source(&path.to_string_lossy());
        // The other file is no longer read; the writer may roll into it once.
        roll.release_swap();
    }
}
