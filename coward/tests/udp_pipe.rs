#![cfg(unix)]

mod common;

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use common::{FixedExtractor, RecordingPrompter, RecordingSurface, eventually};
use coward::ErrorKind;
use coward::config::{PlayerType, StreamingConfig};
use coward::streaming::player::{MediaSurface, SurfaceEvent, SurfaceFactory};
use coward::streaming::{SessionState, StreamResolver, Supervisor, SupervisorConfig};

/// Records its pid, reports one progress line and then idles like a
/// transcoder sending to UDP.
const FAKE_FFMPEG: &str = r#"#!/bin/sh
echo $$ > "$0.pid"
printf 'frame=1 size=1kB time=00:00:01.00\r' >&2
exec sleep 30
"#;

fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-ffmpeg");
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Hands out a single recording surface.
struct OneSurface {
    surface: Arc<RecordingSurface>,
    events: Mutex<Option<mpsc::Receiver<SurfaceEvent>>>,
}

impl SurfaceFactory for OneSurface {
    fn create(
        &self,
        _title: &str,
        _page_url: &str,
    ) -> Result<(Arc<dyn MediaSurface>, mpsc::Receiver<SurfaceEvent>), ErrorKind> {
        let events = self.events.lock().take().ok_or(ErrorKind::PlayerNotFound)?;
        let surface: Arc<dyn MediaSurface> = self.surface.clone();
        Ok((surface, events))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_udp_transcoder_killed_on_close() {
    let dir = tempfile::tempdir().unwrap();
    let ffmpeg = write_script(dir.path(), FAKE_FFMPEG);

    let mut config = SupervisorConfig::from_streaming(&StreamingConfig::default(), dir.path().join("stream"));
    config.player_type = PlayerType::QtFfUdp;
    config.ffmpeg_path = ffmpeg.to_string_lossy().into_owned();
    config.udp_host = "127.0.0.1".into();
    config.udp_port = 23_000;
    config.grace = Duration::from_millis(200);

    let (surface, _surface_tx, surface_rx) = common::surface();
    let factory: Arc<dyn SurfaceFactory> = Arc::new(OneSurface {
        surface: surface.clone(),
        events: Mutex::new(Some(surface_rx)),
    });

    let (supervisor, task) = Supervisor::spawn(
        config,
        StreamResolver::new(FixedExtractor::new(&["best"])),
        RecordingPrompter::new(),
        Some(factory),
    );
    let mut updates = supervisor.subscribe();

    supervisor.request("https://x/udp", "udp", None).await;
    let playing = common::wait_for_state(&mut updates, SessionState::Playing, Duration::from_secs(10)).await;
    assert!(playing.watch_url.is_none());
    eventually(Duration::from_secs(5), || !surface.plays().is_empty()).await;
    assert_eq!(surface.plays(), vec!["udp://127.0.0.1:23000".to_string()]);

    let transcoder_pid: u32 = std::fs::read_to_string(ffmpeg.with_extension("pid"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();

    supervisor.close("https://x/udp").await;
    common::wait_for_state(&mut updates, SessionState::Closed, Duration::from_secs(10)).await;

    assert!(surface.calls().contains(&"stop".to_string()));
    let children = process_utils::descendants(std::process::id());
    assert!(!children.contains(&transcoder_pid), "transcoder survived close");
    assert!(children.is_empty(), "leftover children: {children:?}");

    supervisor.shutdown().await;
    task.await.unwrap();
}
