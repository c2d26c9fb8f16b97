#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use stream_extractor::{BoxedReader, ByteSource, ExtractorError, StreamExtractor, StreamListing};
use tokio::sync::{broadcast, mpsc};

use coward::ErrorKind;
use coward::streaming::player::{MediaSurface, SurfaceEvent};
use coward::streaming::{SessionState, SessionUpdate, UserPrompter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dialog {
    Consent(String),
    OnePlayerOnly(String),
    Buffering(String),
    BufferingClosed(String),
    Error(String, ErrorKind),
}

pub struct RecordingPrompter {
    pub dialogs: Mutex<Vec<Dialog>>,
}

impl RecordingPrompter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            dialogs: Mutex::new(Vec::new()),
        })
    }

    pub fn dialogs(&self) -> Vec<Dialog> {
        self.dialogs.lock().clone()
    }
}

#[async_trait]
impl UserPrompter for RecordingPrompter {
    async fn confirm_external_player(&self, page_url: &str, _title: &str) -> bool {
        self.dialogs.lock().push(Dialog::Consent(page_url.into()));
        true
    }

    fn show_one_player_only(&self, page_url: &str) {
        self.dialogs.lock().push(Dialog::OnePlayerOnly(page_url.into()));
    }

    fn show_buffering(&self, page_url: &str, _title: &str) {
        self.dialogs.lock().push(Dialog::Buffering(page_url.into()));
    }

    fn close_buffering(&self, page_url: &str) {
        self.dialogs.lock().push(Dialog::BufferingClosed(page_url.into()));
    }

    fn show_error(&self, page_url: &str, kind: ErrorKind) {
        self.dialogs.lock().push(Dialog::Error(page_url.into(), kind));
    }
}

/// Source that yields the same byte forever.
#[derive(Debug)]
pub struct EndlessSource;

#[async_trait]
impl ByteSource for EndlessSource {
    fn url(&self) -> &str {
        ""
    }

    async fn open(&self) -> Result<BoxedReader, ExtractorError> {
        Ok(Box::pin(tokio::io::repeat(0x47)))
    }
}

/// Lists the given labels, each backed by [`EndlessSource`]; counts calls.
pub struct FixedExtractor {
    labels: Vec<&'static str>,
    pub calls: AtomicUsize,
}

impl FixedExtractor {
    pub fn new(labels: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            labels: labels.to_vec(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamExtractor for FixedExtractor {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn list_streams(&self, _url: &str) -> Result<StreamListing, ExtractorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut listing: StreamListing = FxHashMap::default();
        for label in &self.labels {
            listing.insert(label.to_string(), Arc::new(EndlessSource));
        }
        Ok(listing)
    }
}

/// Never finishes listing; counts calls.
#[derive(Default)]
pub struct PendingExtractor {
    pub calls: AtomicUsize,
}

#[async_trait]
impl StreamExtractor for PendingExtractor {
    fn name(&self) -> &str {
        "pending"
    }

    async fn list_streams(&self, _url: &str) -> Result<StreamListing, ExtractorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Surface that records every call as a string.
#[derive(Default)]
pub struct RecordingSurface {
    calls: Mutex<Vec<String>>,
}

impl RecordingSurface {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn plays(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| call.strip_prefix("play ").map(String::from))
            .collect()
    }
}

impl MediaSurface for RecordingSurface {
    fn play_loading_clip(&self) {
        self.calls.lock().push("loading".into());
    }

    fn play_source(&self, source: &str) {
        self.calls.lock().push(format!("play {source}"));
    }

    fn stop(&self) {
        self.calls.lock().push("stop".into());
    }
}

pub fn surface() -> (Arc<RecordingSurface>, mpsc::Sender<SurfaceEvent>, mpsc::Receiver<SurfaceEvent>) {
    let (tx, rx) = mpsc::channel(8);
    (Arc::new(RecordingSurface::default()), tx, rx)
}

/// Wait until `check` holds, polling every few milliseconds.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) {
    tokio::time::timeout(timeout, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub async fn wait_for_state(
    updates: &mut broadcast::Receiver<SessionUpdate>,
    state: SessionState,
    timeout: Duration,
) -> SessionUpdate {
    tokio::time::timeout(timeout, async {
        loop {
            let update = updates.recv().await.expect("supervisor stopped");
            if update.state == state {
                return update;
            }
        }
    })
    .await
    .expect("state not reached in time")
}
