//! Application-wide error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error while {op} {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Streaming(#[from] ErrorKind),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// The streaming error kind this error surfaces as.
    ///
    /// Anything that is not already classified counts as a transient plugin failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Streaming(kind) => kind.surfaced(),
            _ => ErrorKind::PluginTransient,
        }
    }
}

/// Error kinds reported by the streaming bridge and the interceptor.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    #[error("no plugin can handle this page")]
    NoPlugin,
    #[error("no streams found")]
    NoStreams,
    #[error("none of the preferred qualities is available")]
    NoMatchingQuality,
    #[error("stream extractor failed, try later")]
    PluginTransient,
    #[error("stream could not be opened")]
    StreamError,
    #[error("external player not found")]
    PlayerNotFound,
    #[error("a player is already open for this page")]
    OnePlayerOnly,
    #[error("filter rule download failed")]
    DownloadRuleFetchFailed,
    #[error("writing to the player pipe failed")]
    PipeWriteFailed,
    #[error("child process exited")]
    ChildExited,
    #[error("stream ended")]
    StreamEnded,
}

impl ErrorKind {
    /// Normalise internal kinds to the kind shown to the user.
    pub fn surfaced(self) -> Self {
        match self {
            Self::PipeWriteFailed | Self::ChildExited | Self::StreamEnded => Self::PluginTransient,
            other => other,
        }
    }

    /// Text of the dialog shown for this kind; `None` for log-only kinds.
    pub fn dialog_message(self) -> Option<&'static str> {
        match self.surfaced() {
            Self::NoPlugin | Self::NoStreams | Self::NoMatchingQuality => {
                Some("Probably this content can't be streamed.")
            }
            Self::PluginTransient | Self::StreamError => {
                Some("Try after some minutes, the stream is not available right now.")
            }
            Self::PlayerNotFound => Some(
                "MPV player not found. Install mpv or point the streaming settings at its binary.",
            ),
            Self::OnePlayerOnly => Some("Only one player can be open for a page at a time."),
            _ => None,
        }
    }

    /// Whether retrying later could succeed.
    pub fn is_transient(self) -> bool {
        matches!(self.surfaced(), Self::PluginTransient | Self::StreamError)
    }
}
