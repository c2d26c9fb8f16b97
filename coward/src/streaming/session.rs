//! Page sessions and their lifecycle.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::PlayerType;
use crate::{Error, ErrorKind, Result};

/// Identifier of a session; also used to name per-session resources.
pub type SessionId = u64;

/// Lifecycle state of a [`PageSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Resolving,
    Buffering,
    Playing,
    Errored,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Resolving => "Resolving",
            Self::Buffering => "Buffering",
            Self::Playing => "Playing",
            Self::Errored => "Errored",
            Self::Closed => "Closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn can_transition_to(&self, to: SessionState) -> bool {
        use SessionState::*;
        match (self, to) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Idle, Resolving) => true,
            (Resolving, Buffering | Errored) => true,
            (Buffering, Playing | Errored) => true,
            (Playing, Errored) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport used to deliver a session's bytes to its player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    MpvPipe,
    HttpServe,
    LocalFileRoll,
    FfmpegPipe,
}

impl StrategyKind {
    pub fn for_player(player_type: PlayerType) -> Self {
        match player_type {
            PlayerType::Mpv => Self::MpvPipe,
            PlayerType::Http | PlayerType::QtFfServe => Self::HttpServe,
            PlayerType::Qt => Self::LocalFileRoll,
            PlayerType::QtFfUdp => Self::FfmpegPipe,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MpvPipe => "mpv_pipe",
            Self::HttpServe => "http_serve",
            Self::LocalFileRoll => "local_file_roll",
            Self::FfmpegPipe => "ffmpeg_pipe",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One (tab, URL) pair that asked for external streaming.
#[derive(Debug, Clone)]
pub struct PageSession {
    pub id: SessionId,
    pub page_url: String,
    pub title: String,
    pub icon: Option<String>,
    pub quality_preferences: Vec<String>,
    pub strategy: StrategyKind,
    pub state: SessionState,
    pub started_at: Instant,
    pub error: Option<ErrorKind>,
}

impl PageSession {
    pub fn new(
        id: SessionId,
        page_url: impl Into<String>,
        title: impl Into<String>,
        quality_preferences: Vec<String>,
        strategy: StrategyKind,
    ) -> Self {
        Self {
            id,
            page_url: page_url.into(),
            title: title.into(),
            icon: None,
            quality_preferences,
            strategy,
            state: SessionState::Idle,
            started_at: Instant::now(),
            error: None,
        }
    }

    pub fn with_icon(mut self, icon: Option<String>) -> Self {
        self.icon = icon;
        self
    }

    /// Move to `to`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, to: SessionState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(Error::invalid_transition(self.state, to));
        }
        self.state = to;
        Ok(())
    }

    /// Record `kind` and move to `Errored`.
    pub fn fail(&mut self, kind: ErrorKind) -> Result<()> {
        self.transition(SessionState::Errored)?;
        self.error = Some(kind.surfaced());
        Ok(())
    }
}
