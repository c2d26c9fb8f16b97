//! Per-session IPC endpoint of an external mpv process.

use std::io;
#[cfg(unix)]
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::streaming::session::SessionId;

const PIPE_PREFIX: &str = "mpv-pipe";

/// Address of mpv's JSON IPC server for one session.
///
/// Named pipe `\\.\pipe\mpv-pipe<id>` on Windows, a unix socket elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcEndpoint {
    name: String,
}

impl IpcEndpoint {
    #[cfg(windows)]
    pub fn for_session(id: SessionId) -> Self {
        Self {
            name: format!(r"\\.\pipe\{PIPE_PREFIX}{id}"),
        }
    }

    #[cfg(unix)]
    pub fn for_session(id: SessionId) -> Self {
        Self::in_dir(&std::env::temp_dir(), id)
    }

    #[cfg(unix)]
    pub fn in_dir(dir: &Path, id: SessionId) -> Self {
        Self {
            name: dir
                .join(format!("{PIPE_PREFIX}{}-{id}", std::process::id()))
                .to_string_lossy()
                .into_owned(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Command-line switch that makes mpv listen on this endpoint.
    pub fn mpv_arg(&self) -> String {
        format!("--input-ipc-server={}", self.name)
    }

    /// Send one text command, newline terminated.
    pub async fn send(&self, command: &str) -> io::Result<()> {
        let mut line = command.trim_end().to_string();
        line.push('\n');

        #[cfg(unix)]
        let mut conn = tokio::net::UnixStream::connect(&self.name).await?;
        #[cfg(windows)]
        let mut conn = tokio::net::windows::named_pipe::ClientOptions::new().open(&self.name)?;

        conn.write_all(line.as_bytes()).await?;
        conn.flush().await?;
        debug!(endpoint = %self.name, command = line.trim_end(), "Sent IPC command");
        Ok(())
    }

    #[cfg(unix)]
    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.name)
    }

    pub fn exists(&self) -> bool {
        std::path::Path::new(&self.name).exists()
    }

    /// Remove the endpoint from the filesystem. Named pipes vanish with their server.
    pub fn remove(&self) {
        #[cfg(unix)]
        match std::fs::remove_file(&self.name) {
            Ok(()) => debug!(endpoint = %self.name, "Removed IPC endpoint"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => debug!(endpoint = %self.name, error = %e, "Failed to remove IPC endpoint"),
        }
    }
}
