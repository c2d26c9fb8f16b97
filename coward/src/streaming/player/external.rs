use std::io;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::ipc::IpcEndpoint;
use crate::ErrorKind;
use crate::streaming::events::EventEmitter;

/// Binary and extra arguments used to launch the external player.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub binary: String,
    pub args: Vec<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            binary: "mpv".to_string(),
            args: Vec::new(),
        }
    }
}

/// What the external player reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerInput {
    /// Bytes written to the player's stdin.
    Stdin,
    Url(String),
}

/// A player running as a separate process, controlled over its IPC endpoint.
#[derive(Debug)]
pub struct ExternalPlayer {
    ipc: IpcEndpoint,
    pid: Option<u32>,
    /// Set once [`ExternalPlayer::watch`] owns the process.
    watcher: Option<JoinHandle<()>>,
}

impl ExternalPlayer {
    /// Launch the player. The caller owns the returned [`Child`] and must wait on it.
    pub fn spawn(
        config: &PlayerConfig,
        input: &PlayerInput,
        ipc: IpcEndpoint,
        title: &str,
    ) -> Result<(Self, Child), ErrorKind> {
        let mut cmd = process_utils::tokio_command(&config.binary);
        cmd.arg(ipc.mpv_arg())
            .arg(format!("--force-media-title={title}"))
            .args(&config.args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        match input {
            PlayerInput::Stdin => {
                cmd.arg("-").stdin(Stdio::piped());
            }
            PlayerInput::Url(url) => {
                cmd.arg(url).stdin(Stdio::null());
            }
        }

        let child = cmd.spawn().map_err(|e| {
            warn!(binary = %config.binary, error = %e, "Failed to launch player");
            if e.kind() == io::ErrorKind::NotFound {
                ErrorKind::PlayerNotFound
            } else {
                ErrorKind::PluginTransient
            }
        })?;

        let pid = child.id();
        info!(binary = %config.binary, pid, endpoint = ipc.name(), "Player launched");
        Ok((
            Self {
                ipc,
                pid,
                watcher: None,
            },
            child,
        ))
    }

    pub async fn send_command(&self, text: &str) -> io::Result<()> {
        self.ipc.send(text).await
    }

    /// Take ownership of `child` and report `closed(graceful)` once it exits.
    pub fn watch(&mut self, mut child: Child, events: EventEmitter) {
        self.watcher = Some(tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(page_url = events.page_url(), %status, "Player exited"),
                Err(e) => warn!(page_url = events.page_url(), error = %e, "Failed to wait for player"),
            }
            events.closed(true).await;
        }));
    }

    /// Send `quit` and give the player `grace` to exit, then kill its tree.
    ///
    /// Without a watcher the process belongs to the transport feeding its
    /// stdin, which runs the same handshake on stop.
    pub async fn close(&mut self, grace: Duration) {
        if let Some(mut watcher) = self.watcher.take()
            && !watcher.is_finished()
        {
            if let Err(e) = self.send_command("quit").await {
                debug!(endpoint = self.ipc.name(), error = %e, "Quit command not delivered");
            }
            if tokio::time::timeout(grace, &mut watcher).await.is_err() {
                warn!(pid = self.pid, grace_ms = grace.as_millis() as u64, "Player ignored quit, killing");
                self.kill_tree().await;
                // Let the watcher reap the killed process.
                if tokio::time::timeout(grace, &mut watcher).await.is_err() {
                    watcher.abort();
                }
            }
        }
        self.ipc.remove();
    }

    async fn kill_tree(&self) {
        let Some(pid) = self.pid else {
            return;
        };
        let killed = tokio::task::spawn_blocking(move || process_utils::kill_tree(pid))
            .await
            .unwrap_or_default();
        debug!(pid, killed, "Killed player tree");
    }
}
