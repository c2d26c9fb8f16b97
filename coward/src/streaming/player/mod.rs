//! Player adapters: an external process or an embedded surface.

mod embedded;
mod external;
mod ipc;

pub use embedded::{EmbeddedPlayer, EmbeddedSettings, MediaSurface, SurfaceEvent, SurfaceFactory};
pub use external::{ExternalPlayer, PlayerConfig, PlayerInput};
pub use ipc::IpcEndpoint;

#[cfg(test)]
pub(crate) use embedded::testing;

use std::time::Duration;

/// The player side of a session.
#[derive(Debug)]
pub enum PlayerAdapter {
    External(ExternalPlayer),
    Embedded(EmbeddedPlayer),
}

impl PlayerAdapter {
    /// Tear the player down, allowing an external player `grace` to quit.
    pub async fn close(&mut self, grace: Duration) {
        match self {
            Self::External(player) => player.close(grace).await,
            Self::Embedded(player) => player.close().await,
        }
    }
}
