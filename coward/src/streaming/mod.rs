//! Media streaming bridge.
//!
//! A page that cannot play its own media is handed to the [`Supervisor`]. The
//! supervisor resolves the page through a plugin-based [`StreamResolver`],
//! starts one transport [`Strategy`] for it and attaches a player: either an
//! external process or an embedded [`MediaSurface`](player::MediaSurface).

pub mod events;
pub mod player;
pub mod resolver;
pub mod server;
pub mod session;
pub mod supervisor;
pub mod transport;

pub use events::{EventEmitter, SessionEvent, SessionUpdate, StreamEvent};
pub use resolver::{StreamHandle, StreamReader, StreamResolver, select_quality};
pub use session::{PageSession, SessionId, SessionState, StrategyKind};
pub use supervisor::{SessionSnapshot, Supervisor, SupervisorConfig, SupervisorHandle, UserPrompter};
pub use transport::{CHUNK_BYTES, PlaybackTarget, Strategy};
