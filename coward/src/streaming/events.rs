//! Signals flowing from workers back to the supervisor.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

use super::session::{SessionId, SessionState};
use crate::ErrorKind;

/// Capacity of the bounded event channel feeding the supervisor.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle signal emitted by a transport, a player or a watcher task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    BufferingStarted { page_url: String },
    /// First bytes reached the player. `watch_url` is set when the stream can
    /// also be opened from the local HTTP server.
    StreamStarted {
        page_url: String,
        watch_url: Option<String>,
    },
    StreamError { page_url: String, kind: ErrorKind },
    Closed { page_url: String, graceful: bool },
}

impl StreamEvent {
    pub fn page_url(&self) -> &str {
        match self {
            Self::BufferingStarted { page_url }
            | Self::StreamStarted { page_url, .. }
            | Self::StreamError { page_url, .. }
            | Self::Closed { page_url, .. } => page_url,
        }
    }
}

/// A [`StreamEvent`] tagged with the session that produced it.
///
/// The tag lets the supervisor drop late events from a session that was
/// already torn down and replaced by a new one for the same page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub event: StreamEvent,
}

/// Sending half handed to workers of one session.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    session_id: SessionId,
    page_url: String,
    tx: mpsc::Sender<SessionEvent>,
}

impl EventEmitter {
    pub fn new(session_id: SessionId, page_url: impl Into<String>, tx: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            session_id,
            page_url: page_url.into(),
            tx,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn page_url(&self) -> &str {
        &self.page_url
    }

    async fn emit(&self, event: StreamEvent) {
        // A closed channel means the supervisor is gone; nobody is listening.
        if self
            .tx
            .send(SessionEvent {
                session_id: self.session_id,
                event,
            })
            .await
            .is_err()
        {
            trace!(page_url = %self.page_url, "Supervisor gone, event dropped");
        }
    }

    pub async fn buffering_started(&self) {
        self.emit(StreamEvent::BufferingStarted {
            page_url: self.page_url.clone(),
        })
        .await;
    }

    pub async fn stream_started(&self, watch_url: Option<String>) {
        self.emit(StreamEvent::StreamStarted {
            page_url: self.page_url.clone(),
            watch_url,
        })
        .await;
    }

    pub async fn stream_error(&self, kind: ErrorKind) {
        self.emit(StreamEvent::StreamError {
            page_url: self.page_url.clone(),
            kind,
        })
        .await;
    }

    pub async fn closed(&self, graceful: bool) {
        self.emit(StreamEvent::Closed {
            page_url: self.page_url.clone(),
            graceful,
        })
        .await;
    }
}

/// Published by the supervisor on every session state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionUpdate {
    pub session_id: SessionId,
    pub page_url: String,
    pub state: SessionState,
    pub error: Option<String>,
    pub watch_url: Option<String>,
}
