//! Streaming supervisor.
//!
//! A single task owns every [`PageSession`] together with its transport and
//! player. Callers talk to it through a [`SupervisorHandle`]; workers report
//! back through [`SessionEvent`]s. All state transitions happen on the
//! supervisor task, so events for one page are handled in the order they
//! were emitted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::events::{EVENT_CHANNEL_CAPACITY, EventEmitter, SessionEvent, SessionUpdate, StreamEvent};
use super::player::{
    EmbeddedPlayer, EmbeddedSettings, ExternalPlayer, IpcEndpoint, PlayerAdapter, PlayerConfig,
    PlayerInput, SurfaceFactory,
};
use super::resolver::{StreamHandle, StreamResolver};
use super::server::{HttpServer, StreamRegistry};
use super::session::{PageSession, SessionId, SessionState, StrategyKind};
use super::transport::{
    FfmpegPipe, HttpServe, LocalRoll, MpvPipe, PlaybackTarget, Strategy, Transcoder,
};
use crate::ErrorKind;
use crate::config::{PlayerType, StreamingConfig};

/// Dialogs shown by the supervisor.
#[async_trait]
pub trait UserPrompter: Send + Sync {
    /// Ask whether the page should be opened in the external player.
    async fn confirm_external_player(&self, page_url: &str, title: &str) -> bool;
    fn show_one_player_only(&self, page_url: &str);
    fn show_buffering(&self, page_url: &str, title: &str);
    fn close_buffering(&self, page_url: &str);
    fn show_error(&self, page_url: &str, kind: ErrorKind);
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub player_type: PlayerType,
    pub player: PlayerConfig,
    pub ffmpeg_path: String,
    pub quality_preferences: Vec<String>,
    pub http_host: String,
    pub http_port: u16,
    pub udp_host: String,
    pub udp_port: u16,
    pub roll_bytes: u64,
    pub prebuffer_bytes: u64,
    pub prebuffer_poll: Duration,
    pub grace: Duration,
    /// Parent of the per-session rolling buffer directories.
    pub stream_dir: PathBuf,
}

impl SupervisorConfig {
    pub fn from_streaming(config: &StreamingConfig, stream_dir: PathBuf) -> Self {
        Self {
            player_type: config.player_type,
            player: PlayerConfig {
                binary: config.mpv_path.clone(),
                args: config.player_args.clone(),
            },
            ffmpeg_path: config.ffmpeg_path.clone(),
            quality_preferences: config.quality_preferences.clone(),
            http_host: config.http_host.clone(),
            http_port: config.http_port,
            udp_host: config.udp_host.clone(),
            udp_port: config.udp_port,
            roll_bytes: config.roll_bytes,
            prebuffer_bytes: config.prebuffer_bytes,
            prebuffer_poll: config.prebuffer_poll(),
            grace: config.grace(),
            stream_dir,
        }
    }

    fn embedded_settings(&self) -> EmbeddedSettings {
        EmbeddedSettings {
            prebuffer_bytes: self.prebuffer_bytes,
            poll: self.prebuffer_poll,
        }
    }
}

/// Point-in-time view of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub page_url: String,
    pub title: String,
    pub state: SessionState,
    pub strategy: StrategyKind,
    pub error: Option<String>,
}

impl From<&PageSession> for SessionSnapshot {
    fn from(session: &PageSession) -> Self {
        Self {
            session_id: session.id,
            page_url: session.page_url.clone(),
            title: session.title.clone(),
            state: session.state,
            strategy: session.strategy,
            error: session.error.map(|kind| kind.to_string()),
        }
    }
}

enum Command {
    Request {
        page_url: String,
        title: String,
        icon: Option<String>,
    },
    Close {
        page_url: String,
    },
    Snapshot(oneshot::Sender<Vec<SessionSnapshot>>),
    Shutdown(oneshot::Sender<()>),
    Consent {
        session_id: SessionId,
        page_url: String,
        accepted: bool,
    },
    Resolved {
        session_id: SessionId,
        page_url: String,
        result: Result<StreamHandle, ErrorKind>,
    },
}

/// Cloneable front end of a running supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<Command>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl SupervisorHandle {
    /// Ask to stream `page_url` externally.
    pub async fn request(&self, page_url: impl Into<String>, title: impl Into<String>, icon: Option<String>) {
        self.send(Command::Request {
            page_url: page_url.into(),
            title: title.into(),
            icon,
        })
        .await;
    }

    pub async fn close(&self, page_url: impl Into<String>) {
        self.send(Command::Close {
            page_url: page_url.into(),
        })
        .await;
    }

    pub async fn snapshot(&self) -> Vec<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx)).await;
        rx.await.unwrap_or_default()
    }

    /// Close every session and stop the supervisor.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx)).await;
        let _ = rx.await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    async fn send(&self, command: Command) {
        if self.tx.send(command).await.is_err() {
            debug!("Supervisor already stopped");
        }
    }
}

pub struct Supervisor {
    config: SupervisorConfig,
    resolver: StreamResolver,
    prompter: Arc<dyn UserPrompter>,
    surfaces: Option<Arc<dyn SurfaceFactory>>,
    registry: Arc<StreamRegistry>,
    http_server: Option<HttpServer>,
    sessions: HashMap<String, PageSession>,
    players: HashMap<String, PlayerAdapter>,
    transports: HashMap<String, Strategy>,
    /// Consent, resolve or player-watch task of each session.
    tasks: HashMap<String, JoinHandle<()>>,
    next_id: SessionId,
    commands: mpsc::WeakSender<Command>,
    events: mpsc::Sender<SessionEvent>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl Supervisor {
    /// Start the supervisor task.
    pub fn spawn(
        config: SupervisorConfig,
        resolver: StreamResolver,
        prompter: Arc<dyn UserPrompter>,
        surfaces: Option<Arc<dyn SurfaceFactory>>,
    ) -> (SupervisorHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (updates, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let supervisor = Self {
            config,
            resolver,
            prompter,
            surfaces,
            registry: Arc::new(StreamRegistry::new()),
            http_server: None,
            sessions: HashMap::new(),
            players: HashMap::new(),
            transports: HashMap::new(),
            tasks: HashMap::new(),
            next_id: 0,
            commands: command_tx.downgrade(),
            events: event_tx,
            updates: updates.clone(),
        };
        let task = tokio::spawn(supervisor.run(command_rx, event_rx));
        (
            SupervisorHandle {
                tx: command_tx,
                updates,
            },
            task,
        )
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut events: mpsc::Receiver<SessionEvent>) {
        info!(player_type = ?self.config.player_type, resolver = ?self.resolver, "Streaming supervisor started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(done)) => {
                        self.close_all().await;
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.close_all().await;
                        break;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event).await,
            }
        }
        info!("Streaming supervisor stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Request {
                page_url,
                title,
                icon,
            } => self.request(page_url, title, icon),
            Command::Close { page_url } => self.close_session(&page_url, false).await,
            Command::Snapshot(reply) => {
                let mut snapshot: Vec<SessionSnapshot> =
                    self.sessions.values().map(SessionSnapshot::from).collect();
                snapshot.sort_by_key(|s| s.session_id);
                let _ = reply.send(snapshot);
            }
            Command::Consent {
                session_id,
                page_url,
                accepted,
            } => self.on_consent(session_id, page_url, accepted).await,
            Command::Resolved {
                session_id,
                page_url,
                result,
            } => self.on_resolved(session_id, &page_url, result).await,
            // Handled by the loop.
            Command::Shutdown(_) => {}
        }
    }

    fn request(&mut self, page_url: String, title: String, icon: Option<String>) {
        if self.sessions.contains_key(&page_url) {
            info!(page_url = %page_url, "A player is already open for this page");
            self.prompter.show_one_player_only(&page_url);
            return;
        }
        let Some(commands) = self.commands.upgrade() else {
            return;
        };

        self.next_id += 1;
        let session = PageSession::new(
            self.next_id,
            page_url.clone(),
            title.clone(),
            self.config.quality_preferences.clone(),
            StrategyKind::for_player(self.config.player_type),
        )
        .with_icon(icon);
        let session_id = session.id;
        self.publish(&session, None);
        self.sessions.insert(page_url.clone(), session);

        let prompter = Arc::clone(&self.prompter);
        let task_url = page_url.clone();
        let task = tokio::spawn(async move {
            let accepted = prompter.confirm_external_player(&task_url, &title).await;
            let _ = commands
                .send(Command::Consent {
                    session_id,
                    page_url: task_url,
                    accepted,
                })
                .await;
        });
        self.tasks.insert(page_url, task);
    }

    async fn on_consent(&mut self, session_id: SessionId, page_url: String, accepted: bool) {
        if !self.is_current(&page_url, session_id) {
            return;
        }
        if !accepted {
            debug!(page_url = %page_url, "External player declined");
            self.close_session(&page_url, true).await;
            return;
        }
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        let Some(preferences) = self.transition(&page_url, SessionState::Resolving, None) else {
            return;
        };

        let resolver = self.resolver.clone();
        let task_url = page_url.clone();
        let task = tokio::spawn(async move {
            let result = resolver.resolve(&task_url, &preferences).await;
            let _ = commands
                .send(Command::Resolved {
                    session_id,
                    page_url: task_url,
                    result,
                })
                .await;
        });
        self.tasks.insert(page_url, task);
    }

    async fn on_resolved(&mut self, session_id: SessionId, page_url: &str, result: Result<StreamHandle, ErrorKind>) {
        let resolving = self
            .sessions
            .get(page_url)
            .is_some_and(|s| s.id == session_id && s.state == SessionState::Resolving);
        if !resolving {
            trace!(page_url, "Dropping stale resolve result");
            return;
        }
        match result {
            Ok(handle) => self.launch(page_url, handle).await,
            Err(kind) => self.fail(page_url, kind).await,
        }
    }

    async fn launch(&mut self, page_url: &str, handle: StreamHandle) {
        let Some(session) = self.sessions.get(page_url).cloned() else {
            return;
        };
        let events = EventEmitter::new(session.id, page_url, self.events.clone());

        let (mut strategy, player) = match self.build_strategy(&session).await {
            Ok(built) => built,
            Err(kind) => return self.fail(page_url, kind).await,
        };
        if let Some(player) = player {
            self.players.insert(page_url.to_string(), player);
        }

        self.transition(page_url, SessionState::Buffering, None);
        self.prompter.show_buffering(page_url, &session.title);

        let started = strategy.start(handle, &session, events.clone()).await;
        let target = strategy.playback_target();
        self.transports.insert(page_url.to_string(), strategy);
        if let Err(kind) = started {
            return self.fail(page_url, kind).await;
        }

        match self.attach_player(&session, target, events) {
            Ok(Some(player)) => {
                self.players.insert(page_url.to_string(), player);
            }
            Ok(None) => {}
            Err(kind) => self.fail(page_url, kind).await,
        }
    }

    /// Build the transport for `session`; `MpvPipe` also yields its player.
    async fn build_strategy(
        &mut self,
        session: &PageSession,
    ) -> Result<(Strategy, Option<PlayerAdapter>), ErrorKind> {
        let grace = self.config.grace;
        let strategy = match self.config.player_type {
            PlayerType::Mpv => {
                let ipc = IpcEndpoint::for_session(session.id);
                let (player, child) =
                    ExternalPlayer::spawn(&self.config.player, &PlayerInput::Stdin, ipc.clone(), &session.title)?;
                return Ok((
                    Strategy::MpvPipe(MpvPipe::new(child, ipc, grace)),
                    Some(PlayerAdapter::External(player)),
                ));
            }
            PlayerType::Http | PlayerType::QtFfServe => {
                let base_url = self.ensure_http_server().await?;
                Strategy::HttpServe(HttpServe::new(
                    Transcoder::new(&self.config.ffmpeg_path),
                    Arc::clone(&self.registry),
                    base_url,
                    grace,
                ))
            }
            PlayerType::Qt => Strategy::LocalRoll(LocalRoll::new(
                &self.config.stream_dir,
                session.id,
                self.config.roll_bytes,
                self.config.prebuffer_bytes,
                grace,
            )),
            PlayerType::QtFfUdp => Strategy::FfmpegPipe(FfmpegPipe::new(
                Transcoder::new(&self.config.ffmpeg_path),
                self.config.udp_host.clone(),
                self.config.udp_port,
                grace,
            )),
        };
        Ok((strategy, None))
    }

    /// Point a player at the running transport.
    fn attach_player(
        &mut self,
        session: &PageSession,
        target: Option<PlaybackTarget>,
        events: EventEmitter,
    ) -> Result<Option<PlayerAdapter>, ErrorKind> {
        let Some(target) = target else {
            return Err(ErrorKind::PluginTransient);
        };
        if matches!(target, PlaybackTarget::Attached) {
            return Ok(None);
        }

        let embedded = !matches!(self.config.player_type, PlayerType::Mpv | PlayerType::Http);
        if embedded && let Some(surfaces) = &self.surfaces {
            let (surface, surface_events) = surfaces.create(&session.title, &session.page_url)?;
            let player = EmbeddedPlayer::start(
                surface,
                surface_events,
                target,
                self.config.embedded_settings(),
                events,
            );
            return Ok(Some(PlayerAdapter::Embedded(player)));
        }

        let PlaybackTarget::Url(url) = target else {
            warn!(page_url = %session.page_url, "No embedded surface for rolling playback");
            return Err(ErrorKind::PlayerNotFound);
        };
        let (mut player, child) = ExternalPlayer::spawn(
            &self.config.player,
            &PlayerInput::Url(url),
            IpcEndpoint::for_session(session.id),
            &session.title,
        )?;
        player.watch(child, events);
        Ok(Some(PlayerAdapter::External(player)))
    }

    async fn ensure_http_server(&mut self) -> Result<String, ErrorKind> {
        if let Some(server) = &self.http_server {
            return Ok(server.base_url());
        }
        let server = HttpServer::start(&self.config.http_host, self.config.http_port, Arc::clone(&self.registry))
            .await
            .map_err(|e| {
                warn!(error = %e, "Cannot start stream server");
                ErrorKind::PluginTransient
            })?;
        let base_url = server.base_url();
        self.http_server = Some(server);
        Ok(base_url)
    }

    async fn handle_event(&mut self, SessionEvent { session_id, event }: SessionEvent) {
        let page_url = event.page_url().to_string();
        if !self.is_current(&page_url, session_id) {
            trace!(page_url = %page_url, session = session_id, "Dropping event of a closed session");
            return;
        }
        match event {
            StreamEvent::BufferingStarted { .. } => {
                debug!(page_url = %page_url, "Buffering started");
            }
            StreamEvent::StreamStarted { watch_url, .. } => {
                if self.state(&page_url) != Some(SessionState::Buffering) {
                    return;
                }
                if let Some(url) = &watch_url {
                    info!(page_url = %page_url, watch_url = %url, "Stream available on the local server");
                }
                self.transition(&page_url, SessionState::Playing, watch_url);
                self.prompter.close_buffering(&page_url);
            }
            StreamEvent::StreamError { kind, .. } => {
                if matches!(
                    self.state(&page_url),
                    Some(SessionState::Buffering | SessionState::Playing)
                ) {
                    self.fail(&page_url, kind).await;
                }
            }
            StreamEvent::Closed { graceful, .. } => self.close_session(&page_url, graceful).await,
        }
    }

    /// Errored, show the dialog, then close.
    async fn fail(&mut self, page_url: &str, kind: ErrorKind) {
        let Some(session) = self.sessions.get_mut(page_url) else {
            return;
        };
        if let Err(e) = session.fail(kind) {
            debug!(page_url, error = %e, "Session cannot fail from its state");
        } else {
            warn!(page_url, session = session.id, kind = ?kind, "Session failed");
            let session = session.clone();
            self.publish(&session, None);
            if kind.surfaced().dialog_message().is_some() {
                self.prompter.show_error(page_url, kind.surfaced());
            }
        }
        self.close_session(page_url, false).await;
    }

    /// Tear down everything the session owns and forget it.
    async fn close_session(&mut self, page_url: &str, graceful: bool) {
        let Some(mut session) = self.sessions.remove(page_url) else {
            return;
        };
        let was_buffering = session.state == SessionState::Buffering;

        if let Some(task) = self.tasks.remove(page_url) {
            task.abort();
        }
        // The transport goes first: MPV_PIPE runs the player's quit handshake itself.
        if let Some(mut strategy) = self.transports.remove(page_url) {
            strategy.stop().await;
        }
        if let Some(mut player) = self.players.remove(page_url) {
            player.close(self.config.grace).await;
        }

        if let Err(e) = session.transition(SessionState::Closed) {
            debug!(page_url, error = %e, "Unexpected close transition");
        }
        info!(
            page_url,
            session = session.id,
            graceful,
            elapsed_ms = session.started_at.elapsed().as_millis() as u64,
            "Session closed"
        );
        self.publish(&session, None);
        if was_buffering {
            self.prompter.close_buffering(page_url);
        }

        if self.sessions.is_empty()
            && let Some(server) = self.http_server.take()
        {
            server.stop(self.config.grace).await;
        }
    }

    async fn close_all(&mut self) {
        let urls: Vec<String> = self.sessions.keys().cloned().collect();
        for url in urls {
            self.close_session(&url, false).await;
        }
        if let Some(server) = self.http_server.take() {
            server.stop(self.config.grace).await;
        }
    }

    fn is_current(&self, page_url: &str, session_id: SessionId) -> bool {
        self.sessions.get(page_url).is_some_and(|s| s.id == session_id)
    }

    fn state(&self, page_url: &str) -> Option<SessionState> {
        self.sessions.get(page_url).map(|s| s.state)
    }

    /// Transition and publish. Returns the quality preferences on success.
    fn transition(&mut self, page_url: &str, to: SessionState, watch_url: Option<String>) -> Option<Vec<String>> {
        let session = self.sessions.get_mut(page_url)?;
        if let Err(e) = session.transition(to) {
            warn!(page_url, error = %e, "Rejected session transition");
            return None;
        }
        let session = session.clone();
        self.publish(&session, watch_url);
        Some(session.quality_preferences)
    }

    fn publish(&self, session: &PageSession, watch_url: Option<String>) {
        debug!(page_url = %session.page_url, session = session.id, state = %session.state, "Session state");
        // No subscribers is fine.
        let _ = self.updates.send(SessionUpdate {
            session_id: session.id,
            page_url: session.page_url.clone(),
            state: session.state,
            error: session.error.map(|kind| kind.to_string()),
            watch_url,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use proptest::prelude::{ProptestConfig, prop_oneof, proptest};
    use proptest::strategy::Strategy as PropStrategy;
    use rustc_hash::FxHashMap;
    use stream_extractor::{BoxedReader, ByteSource, ExtractorError, StreamExtractor, StreamListing};

    use super::*;
    use crate::streaming::player::testing::RecordingSurface;
    use crate::streaming::player::{MediaSurface, SurfaceEvent};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Dialog {
        OnePlayerOnly(String),
        Buffering(String),
        BufferingClosed(String),
        Error(String, ErrorKind),
    }

    struct RecordingPrompter {
        accept: bool,
        dialogs: Mutex<Vec<Dialog>>,
    }

    impl RecordingPrompter {
        fn new(accept: bool) -> Arc<Self> {
            Arc::new(Self {
                accept,
                dialogs: Mutex::new(Vec::new()),
            })
        }

        fn dialogs(&self) -> Vec<Dialog> {
            self.dialogs.lock().clone()
        }
    }

    #[async_trait]
    impl UserPrompter for RecordingPrompter {
        async fn confirm_external_player(&self, _page_url: &str, _title: &str) -> bool {
            self.accept
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

    /// Never finishes listing; counts calls.
    #[derive(Default)]
    struct PendingExtractor {
        calls: AtomicUsize,
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

    struct FailingExtractor;

    #[async_trait]
    impl StreamExtractor for FailingExtractor {
        fn name(&self) -> &str {
            "failing"
        }

        async fn list_streams(&self, _url: &str) -> Result<StreamListing, ExtractorError> {
            Err(ExtractorError::NoStreamsFound)
        }
    }

    #[derive(Debug)]
    struct MemorySource(Vec<u8>);

    #[async_trait]
    impl ByteSource for MemorySource {
        fn url(&self) -> &str {
            ""
        }

        async fn open(&self) -> Result<BoxedReader, ExtractorError> {
            Ok(Box::pin(std::io::Cursor::new(self.0.clone())))
        }
    }

    struct MemoryExtractor(usize);

    #[async_trait]
    impl StreamExtractor for MemoryExtractor {
        fn name(&self) -> &str {
            "memory"
        }

        async fn list_streams(&self, _url: &str) -> Result<StreamListing, ExtractorError> {
            let mut listing: StreamListing = FxHashMap::default();
            listing.insert("best".into(), Arc::new(MemorySource(vec![7u8; self.0])));
            Ok(listing)
        }
    }

    struct RecordingSurfaces(Arc<RecordingSurface>, Mutex<Option<mpsc::Sender<SurfaceEvent>>>);

    impl SurfaceFactory for RecordingSurfaces {
        fn create(
            &self,
            _title: &str,
            _page_url: &str,
        ) -> Result<(Arc<dyn MediaSurface>, mpsc::Receiver<SurfaceEvent>), ErrorKind> {
            let (tx, rx) = mpsc::channel(4);
            *self.1.lock() = Some(tx);
            Ok((self.0.clone(), rx))
        }
    }

    fn config(player_type: PlayerType, stream_dir: PathBuf) -> SupervisorConfig {
        let mut config = SupervisorConfig::from_streaming(&StreamingConfig::default(), stream_dir);
        config.player_type = player_type;
        config.prebuffer_bytes = 1024;
        config.prebuffer_poll = Duration::from_millis(10);
        config.roll_bytes = 16 * 1024;
        config
    }

    async fn wait_for_state(
        updates: &mut broadcast::Receiver<SessionUpdate>,
        state: SessionState,
    ) -> SessionUpdate {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let update = updates.recv().await.unwrap();
                if update.state == state {
                    return update;
                }
            }
        })
        .await
        .unwrap()
    }

    async fn settle(handle: &SupervisorHandle) -> Vec<SessionSnapshot> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.snapshot().await
    }

    #[tokio::test]
    async fn test_duplicate_request_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = Arc::new(PendingExtractor::default());
        let prompter = RecordingPrompter::new(true);
        let (handle, _task) = Supervisor::spawn(
            config(PlayerType::Mpv, dir.path().into()),
            StreamResolver::new(extractor.clone()),
            prompter.clone(),
            None,
        );

        let mut updates = handle.subscribe();
        handle.request("https://x/vid", "vid", None).await;
        wait_for_state(&mut updates, SessionState::Resolving).await;
        handle.request("https://x/vid", "vid", None).await;

        let snapshot = settle(&handle).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].state, SessionState::Resolving);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(prompter.dialogs(), vec![Dialog::OnePlayerOnly("https://x/vid".into())]);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_resolve_failure_shows_error_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let prompter = RecordingPrompter::new(true);
        let (handle, _task) = Supervisor::spawn(
            config(PlayerType::Mpv, dir.path().into()),
            StreamResolver::new(Arc::new(FailingExtractor)),
            prompter.clone(),
            None,
        );

        let mut updates = handle.subscribe();
        handle.request("https://x/none", "none", None).await;
        let errored = wait_for_state(&mut updates, SessionState::Errored).await;
        assert_eq!(errored.error.as_deref(), Some("no streams found"));
        wait_for_state(&mut updates, SessionState::Closed).await;

        assert!(handle.snapshot().await.is_empty());
        assert_eq!(
            prompter.dialogs(),
            vec![Dialog::Error("https://x/none".into(), ErrorKind::NoStreams)]
        );
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_declined_consent_creates_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = Arc::new(PendingExtractor::default());
        let (handle, _task) = Supervisor::spawn(
            config(PlayerType::Mpv, dir.path().into()),
            StreamResolver::new(extractor.clone()),
            RecordingPrompter::new(false),
            None,
        );

        let mut updates = handle.subscribe();
        handle.request("https://x/vid", "vid", None).await;
        wait_for_state(&mut updates, SessionState::Closed).await;
        assert!(handle.snapshot().await.is_empty());
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_rolling_session_plays_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let surface = Arc::new(RecordingSurface::default());
        let surfaces = Arc::new(RecordingSurfaces(surface.clone(), Mutex::new(None)));
        let prompter = RecordingPrompter::new(true);
        let (handle, _task) = Supervisor::spawn(
            config(PlayerType::Qt, dir.path().into()),
            StreamResolver::new(Arc::new(MemoryExtractor(64 * 1024))),
            prompter.clone(),
            Some(surfaces as Arc<dyn SurfaceFactory>),
        );

        let mut updates = handle.subscribe();
        handle.request("https://x/live", "live", None).await;
        let playing = wait_for_state(&mut updates, SessionState::Playing).await;

        let session_dir = dir.path().join(format!("session-{}", playing.session_id));
        assert!(session_dir.join("temp_1.mp4").exists());
        assert!(session_dir.join("temp_2.mp4").exists());

        handle.close("https://x/live").await;
        wait_for_state(&mut updates, SessionState::Closed).await;
        assert!(!session_dir.exists());
        assert!(surface.calls().contains(&"stop".to_string()));
        assert_eq!(
            prompter.dialogs()[..2],
            [
                Dialog::Buffering("https://x/live".into()),
                Dialog::BufferingClosed("https://x/live".into())
            ]
        );
        handle.shutdown().await;
    }

    #[derive(Debug, Clone)]
    enum Op {
        Request(usize),
        Close(usize),
    }

    fn op() -> impl PropStrategy<Value = Op> {
        prop_oneof![
            (0..3usize).prop_map(Op::Request),
            (0..3usize).prop_map(Op::Close),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_one_live_session_per_url(ops in proptest::collection::vec(op(), 1..16)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let dir = tempfile::tempdir().unwrap();
                let prompter = RecordingPrompter::new(true);
                let (handle, _task) = Supervisor::spawn(
                    config(PlayerType::Mpv, dir.path().into()),
                    StreamResolver::new(Arc::new(PendingExtractor::default())),
                    prompter.clone(),
                    None,
                );

                let mut live = [false; 3];
                let mut rejected = 0;
                for op in ops {
                    match op {
                        Op::Request(i) => {
                            handle.request(format!("https://x/{i}"), "t", None).await;
                            if live[i] {
                                rejected += 1;
                            }
                            live[i] = true;
                        }
                        Op::Close(i) => {
                            handle.close(format!("https://x/{i}")).await;
                            live[i] = false;
                        }
                    }

                    let snapshot = handle.snapshot().await;
                    let mut urls: Vec<&str> = snapshot.iter().map(|s| s.page_url.as_str()).collect();
                    urls.sort_unstable();
                    urls.dedup();
                    assert_eq!(urls.len(), snapshot.len());
                    assert_eq!(snapshot.len(), live.iter().filter(|l| **l).count());
                }

                let one_player_only = prompter
                    .dialogs()
                    .iter()
                    .filter(|d| matches!(d, Dialog::OnePlayerOnly(_)))
                    .count();
                assert_eq!(one_player_only, rejected);
                handle.shutdown().await;
            });
        }
    }
}
