#![cfg(unix)]

mod common;

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use common::{FixedExtractor, RecordingPrompter};
use coward::config::{PlayerType, StreamingConfig};
use coward::streaming::player::IpcEndpoint;
use coward::streaming::{SessionState, StreamResolver, Supervisor, SupervisorConfig};

/// Creates the IPC endpoint it is given, reads 64 KiB from stdin and exits.
const FAKE_PLAYER: &str = r#"#!/bin/sh
for arg in "$@"; do
  case "$arg" in
    --input-ipc-server=*) : > "${arg#--input-ipc-server=}" ;;
  esac
done
head -c 65536 > /dev/null
exit 0
"#;

fn write_fake_player(dir: &Path) -> String {
    let path = dir.join("fake-mpv");
    std::fs::write(&path, FAKE_PLAYER).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_graceful_player_close() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = SupervisorConfig::from_streaming(&StreamingConfig::default(), dir.path().join("stream"));
    config.player_type = PlayerType::Mpv;
    config.player.binary = write_fake_player(dir.path());
    config.player.args.clear();

    let prompter = RecordingPrompter::new();
    let (supervisor, task) = Supervisor::spawn(
        config,
        StreamResolver::new(FixedExtractor::new(&["best"])),
        prompter.clone(),
        None,
    );
    let mut updates = supervisor.subscribe();

    supervisor.request("https://x/live", "live", None).await;
    let playing = common::wait_for_state(&mut updates, SessionState::Playing, Duration::from_secs(10)).await;
    let closed = common::wait_for_state(&mut updates, SessionState::Closed, Duration::from_secs(10)).await;

    assert_eq!(closed.session_id, playing.session_id);
    assert_eq!(closed.page_url, "https://x/live");
    assert!(closed.error.is_none());
    assert!(!IpcEndpoint::for_session(closed.session_id).exists());
    assert!(supervisor.snapshot().await.is_empty());
    assert!(process_utils::descendants(std::process::id()).is_empty());

    supervisor.shutdown().await;
    task.await.unwrap();
}
