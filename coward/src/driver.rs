//! Headless driver for the bridge.
//!
//! The browser shell talks to the bridge over stdin with one command per line:
//!
//! ```text
//! open <url> [title]
//! close <url>
//! check <url> [initiator] [kind]
//! sessions
//! debug <on|off>
//! quit
//! ```
//!
//! Dialogs are rendered as log lines and the embedded surface is a child
//! media-player process.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::ErrorKind;
use crate::adblock::{Decision, InterceptRequest, Interceptor, RawResourceType};
use crate::detection::MediaEvent;
use crate::logging::LoggingConfig;
use crate::streaming::player::{MediaSurface, SurfaceEvent, SurfaceFactory};
use crate::streaming::{SupervisorHandle, UserPrompter};

/// Prompter that accepts every offer and logs the dialogs.
#[derive(Debug, Default)]
pub struct ConsolePrompter;

#[async_trait]
impl UserPrompter for ConsolePrompter {
    async fn confirm_external_player(&self, page_url: &str, title: &str) -> bool {
        info!(page_url, title, "Opening page in the external player");
        true
    }

    fn show_one_player_only(&self, page_url: &str) {
        warn!(page_url, "{}", ErrorKind::OnePlayerOnly.dialog_message().unwrap_or_default());
    }

    fn show_buffering(&self, page_url: &str, title: &str) {
        info!(page_url, title, "Buffering");
    }

    fn close_buffering(&self, page_url: &str) {
        debug!(page_url, "Buffering finished");
    }

    fn show_error(&self, page_url: &str, kind: ErrorKind) {
        match kind.dialog_message() {
            Some(message) => error!(page_url, kind = ?kind, "{message}"),
            None => debug!(page_url, kind = ?kind, "Streaming error"),
        }
    }
}

/// Surfaces backed by a media-player child process.
#[derive(Debug, Clone)]
pub struct ProcessSurfaceFactory {
    pub binary: String,
    pub args: Vec<String>,
    pub loading_clip: Option<PathBuf>,
}

impl SurfaceFactory for ProcessSurfaceFactory {
    fn create(
        &self,
        title: &str,
        _page_url: &str,
    ) -> Result<(Arc<dyn MediaSurface>, mpsc::Receiver<SurfaceEvent>), ErrorKind> {
        let (tx, rx) = mpsc::channel(8);
        let surface = ProcessSurface {
            factory: self.clone(),
            title: title.to_string(),
            events: tx,
            generation: Arc::new(AtomicU64::new(0)),
            pid: Arc::new(Mutex::new(None)),
        };
        Ok((Arc::new(surface), rx))
    }
}

/// One player process at a time; every `play_*` call replaces the previous one.
struct ProcessSurface {
    factory: ProcessSurfaceFactory,
    title: String,
    events: mpsc::Sender<SurfaceEvent>,
    generation: Arc<AtomicU64>,
    pid: Arc<Mutex<Option<u32>>>,
}

impl ProcessSurface {
    /// Kill the running player tree on the blocking pool; the sysinfo scan blocks.
    fn kill_current(&self) {
        if let Some(pid) = self.pid.lock().take() {
            tokio::task::spawn_blocking(move || {
                let killed = process_utils::kill_tree(pid);
                debug!(pid, killed, "Surface player killed");
            });
        }
    }

    fn launch(&self, source: &str, looped: bool) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.kill_current();

        let mut cmd = process_utils::tokio_command(&self.factory.binary);
        cmd.arg(format!("--force-media-title={}", self.title))
            .args(&self.factory.args);
        if looped {
            cmd.arg("--loop-file=inf");
        }
        cmd.arg(source)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(binary = %self.factory.binary, error = %e, "Surface player failed to start");
                let _ = self.events.try_send(SurfaceEvent::Closed);
                return;
            }
        };
        *self.pid.lock() = child.id();

        let current = Arc::clone(&self.generation);
        let events = self.events.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            if current.load(Ordering::Acquire) != generation {
                return;
            }
            let event = match status {
                Ok(status) if status.success() => SurfaceEvent::EndOfMedia,
                _ => SurfaceEvent::Closed,
            };
            let _ = events.send(event).await;
        });
    }
}

impl MediaSurface for ProcessSurface {
    fn play_loading_clip(&self) {
        if let Some(clip) = &self.factory.loading_clip {
            self.launch(&clip.to_string_lossy(), true);
        }
    }

    fn play_source(&self, source: &str) {
        self.launch(source, false);
    }

    fn stop(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.kill_current();
    }
}

/// A parsed stdin command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCommand {
    Open { url: String, title: String },
    Close { url: String },
    Check {
        url: String,
        initiator: String,
        kind: RawResourceType,
    },
    Sessions,
    Debug(bool),
    Quit,
}

impl DriverCommand {
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut parts = line.split_whitespace();
        let Some(verb) = parts.next() else {
            return Ok(None);
        };
        let command = match verb {
            "open" => {
                let url = parts.next().ok_or("open needs a url")?.to_string();
                let rest: Vec<&str> = parts.collect();
                let title = if rest.is_empty() { url.clone() } else { rest.join(" ") };
                Self::Open { url, title }
            }
            "close" => Self::Close {
                url: parts.next().ok_or("close needs a url")?.to_string(),
            },
            "check" => Self::Check {
                url: parts.next().ok_or("check needs a url")?.to_string(),
                initiator: parts.next().unwrap_or_default().to_string(),
                kind: parts.next().map_or(RawResourceType::Unknown, parse_resource_type),
            },
            "sessions" => Self::Sessions,
            "debug" => match parts.next() {
                Some("on" | "true" | "1") => Self::Debug(true),
                Some("off" | "false" | "0") => Self::Debug(false),
                _ => return Err("debug needs on or off".to_string()),
            },
            "quit" | "exit" => Self::Quit,
            other => return Err(format!("unknown command: {other}")),
        };
        Ok(Some(command))
    }
}

fn parse_resource_type(raw: &str) -> RawResourceType {
    if let Ok(code) = raw.parse::<u8>() {
        return RawResourceType::from_code(code);
    }
    match raw {
        "document" => RawResourceType::MainFrame,
        "subdocument" => RawResourceType::SubFrame,
        "stylesheet" => RawResourceType::Stylesheet,
        "script" => RawResourceType::Script,
        "image" => RawResourceType::Image,
        "ping" => RawResourceType::Ping,
        "websocket" => RawResourceType::WebSocket,
        "xmlhttprequest" | "xhr" => RawResourceType::Xhr,
        "media" => RawResourceType::Media,
        "font" => RawResourceType::FontResource,
        _ => RawResourceType::Unknown,
    }
}

/// Read commands until `quit` or end of input.
///
/// `open` goes through the media-detection channel as a page that cannot play
/// its media; `check` answers `allow` or `block` on `output`.
pub async fn run_commands<R, W>(
    input: R,
    mut output: W,
    media: mpsc::Sender<MediaEvent>,
    supervisor: SupervisorHandle,
    interceptor: Arc<Interceptor>,
    logging: Option<Arc<LoggingConfig>>,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let command = match DriverCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                output.write_all(format!("error {message}\n").as_bytes()).await?;
                continue;
            }
        };
        match command {
            DriverCommand::Open { url, title } => {
                let event = MediaEvent::CannotPlayMedia { page_url: url, title };
                if media.send(event).await.is_err() {
                    warn!("Media detection channel closed");
                }
            }
            DriverCommand::Close { url } => supervisor.close(url).await,
            DriverCommand::Check { url, initiator, kind } => {
                let decision = interceptor.classify(&InterceptRequest::new(url, initiator, kind));
                let answer = match decision {
                    Decision::Allow => "allow\n",
                    Decision::Block => "block\n",
                };
                output.write_all(answer.as_bytes()).await?;
            }
            DriverCommand::Sessions => {
                for session in supervisor.snapshot().await {
                    let line = format!(
                        "{} {} {}\n",
                        session.session_id,
                        session.state.as_str(),
                        session.page_url
                    );
                    output.write_all(line.as_bytes()).await?;
                }
            }
            DriverCommand::Debug(enabled) => {
                if let Some(logging) = &logging
                    && let Err(e) = logging.set_debug(enabled)
                {
                    warn!(error = %e, "Log filter not changed");
                }
            }
            DriverCommand::Quit => break,
        }
        output.flush().await?;
    }
    output.flush().await
}
