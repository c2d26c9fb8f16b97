//! Per-tab media detection.
//!
//! Two checks run against a page: the can-play check, evaluated once the page
//! finished loading, and a periodic is-playing poll. A page whose media the
//! engine cannot decode is offered to the streaming supervisor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::Result;
use crate::streaming::{StreamResolver, SupervisorHandle};

/// AND over `canPlayType(el.type) !== ''` for every media element.
pub const CAN_PLAY_SCRIPT: &str = r#"(function () {
  var els = document.querySelectorAll('video, audio');
  var ok = true;
  for (var i = 0; i < els.length; i++) {
    ok = ok && els[i].canPlayType(els[i].type) !== '';
  }
  return ok;
})()"#;

/// True when any media element is not paused.
pub const IS_PLAYING_SCRIPT: &str = r#"(function () {
  var els = document.querySelectorAll('video, audio');
  for (var i = 0; i < els.length; i++) {
    if (!els[i].paused) { return true; }
  }
  return false;
})()"#;

/// Script evaluation in a page, provided by the browser engine.
#[async_trait]
pub trait PageScripting: Send + Sync {
    fn page_url(&self) -> String;

    fn title(&self) -> String {
        self.page_url()
    }

    /// Evaluate `script` and coerce its result to a boolean.
    async fn evaluate_bool(&self, script: &str) -> Result<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    CannotPlayMedia { page_url: String, title: String },
    IsPlayingMedia { page_url: String, playing: bool },
}

/// Page checks of one tab. Dropping the monitor stops them.
pub struct MediaMonitor {
    page: Arc<dyn PageScripting>,
    events: mpsc::Sender<MediaEvent>,
    stop: CancellationToken,
    poll_task: Option<JoinHandle<()>>,
}

impl MediaMonitor {
    /// Start the is-playing poll for `page`.
    pub fn start(page: Arc<dyn PageScripting>, events: mpsc::Sender<MediaEvent>, poll: Duration) -> Self {
        let stop = CancellationToken::new();
        let poll_task = tokio::spawn(poll_is_playing(
            Arc::clone(&page),
            events.clone(),
            poll,
            stop.clone(),
        ));
        Self {
            page,
            events,
            stop,
            poll_task: Some(poll_task),
        }
    }

    /// Run the can-play check; emits `CannotPlayMedia` when it fails.
    pub async fn on_load_finished(&self) -> bool {
        let can_play = match self.page.evaluate_bool(CAN_PLAY_SCRIPT).await {
            Ok(can_play) => can_play,
            Err(e) => {
                debug!(page_url = %self.page.page_url(), error = %e, "Can-play check failed");
                return true;
            }
        };
        if !can_play {
            let page_url = self.page.page_url();
            info!(page_url = %page_url, "Page has media the engine cannot play");
            let _ = self
                .events
                .send(MediaEvent::CannotPlayMedia {
                    page_url,
                    title: self.page.title(),
                })
                .await;
        }
        can_play
    }

    /// Resolver-based check, started on suspicion only. Its result is logged
    /// and never emitted: the can-play check is the one that offers streaming.
    pub fn strict_check(&self, resolver: StreamResolver, preferences: Vec<String>) -> JoinHandle<bool> {
        let page_url = self.page.page_url();
        let stop = self.stop.clone();
        tokio::spawn(async move {
            let resolved = tokio::select! {
                _ = stop.cancelled() => return false,
                result = resolver.resolve(&page_url, &preferences) => result,
            };
            match resolved {
                Ok(handle) => {
                    info!(page_url = %page_url, quality = handle.quality_label(), "Extractor knows this page");
                    true
                }
                Err(kind) => {
                    debug!(page_url = %page_url, kind = ?kind, "Extractor does not know this page");
                    false
                }
            }
        })
    }

    pub fn stop(&mut self) {
        self.stop.cancel();
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }
}

impl Drop for MediaMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_is_playing(
    page: Arc<dyn PageScripting>,
    events: mpsc::Sender<MediaEvent>,
    poll: Duration,
    stop: CancellationToken,
) {
    let mut interval = tokio::time::interval(poll);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = interval.tick() => {}
        }
        match page.evaluate_bool(IS_PLAYING_SCRIPT).await {
            Ok(playing) => {
                trace!(page_url = %page.page_url(), playing, "Is-playing poll");
                let event = MediaEvent::IsPlayingMedia {
                    page_url: page.page_url(),
                    playing,
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
            Err(e) => debug!(page_url = %page.page_url(), error = %e, "Is-playing check failed"),
        }
    }
}

/// Offer every page that cannot play its media to the supervisor.
pub async fn offer_streaming(mut events: mpsc::Receiver<MediaEvent>, supervisor: SupervisorHandle) {
    while let Some(event) = events.recv().await {
        if let MediaEvent::CannotPlayMedia { page_url, title } = event {
            supervisor.request(page_url, title, None).await;
        }
    }
}
