#![cfg(unix)]

mod common;

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::{FixedExtractor, RecordingPrompter};
use coward::config::{PlayerType, StreamingConfig};
use coward::streaming::{SessionState, StreamResolver, Supervisor, SupervisorConfig};

/// Records its pid, then copies the piped stream to stdout as if remuxed.
const FAKE_FFMPEG: &str = r#"#!/bin/sh
echo $$ > "$0.pid"
exec cat
"#;

/// Opens nothing and never answers IPC, so closing it ends in a kill.
const IDLE_PLAYER: &str = "#!/bin/sh\nexec sleep 30\n";

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn client() -> reqwest::Client {
    coward::utils::http_client::install_rustls_provider();
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_http_session_publishes_and_releases_slot() {
    let dir = tempfile::tempdir().unwrap();
    let ffmpeg = write_script(dir.path(), "fake-ffmpeg", FAKE_FFMPEG);
    let player = write_script(dir.path(), "fake-player", IDLE_PLAYER);

    let mut config = SupervisorConfig::from_streaming(&StreamingConfig::default(), dir.path().join("stream"));
    config.player_type = PlayerType::Http;
    config.ffmpeg_path = ffmpeg.to_string_lossy().into_owned();
    config.player.binary = player.to_string_lossy().into_owned();
    config.player.args.clear();
    config.http_host = "127.0.0.1".into();
    config.http_port = 0;
    config.grace = Duration::from_millis(200);

    let (supervisor, task) = Supervisor::spawn(
        config,
        StreamResolver::new(FixedExtractor::new(&["best"])),
        RecordingPrompter::new(),
        None,
    );
    let mut updates = supervisor.subscribe();

    supervisor.request("https://x/first", "first", None).await;
    let playing = common::wait_for_state(&mut updates, SessionState::Playing, Duration::from_secs(10)).await;
    let index_url = playing.watch_url.clone().expect("playing update carries the index URL");
    assert!(index_url.ends_with("/index/0"), "{index_url}");
    let stream_url = index_url.replace("/index/", "/stream/");

    let http = client();
    let page = http.get(&index_url).send().await.unwrap();
    assert_eq!(page.status(), reqwest::StatusCode::OK);
    assert!(page.text().await.unwrap().contains("<video src=\"/stream/0\""));

    let mut stream = http.get(&stream_url).send().await.unwrap();
    assert_eq!(stream.status(), reqwest::StatusCode::OK);
    let chunk = stream.chunk().await.unwrap().unwrap();
    assert!(!chunk.is_empty());
    assert!(chunk.iter().all(|b| *b == 0x47));
    drop(stream);

    let transcoder_pid: u32 = std::fs::read_to_string(ffmpeg.with_extension("pid"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();

    supervisor.close("https://x/first").await;
    let closed = common::wait_for_state(&mut updates, SessionState::Closed, Duration::from_secs(10)).await;
    assert_eq!(closed.session_id, playing.session_id);

    // Last session gone: the server is stopped and every child is reaped.
    assert!(client().get(&index_url).send().await.is_err());
    let children = process_utils::descendants(std::process::id());
    assert!(!children.contains(&transcoder_pid), "transcoder survived close");
    assert!(children.is_empty(), "leftover children: {children:?}");

    // A new session restarts the server on the next slot; the old slot is free.
    supervisor.request("https://x/second", "second", None).await;
    let playing = common::wait_for_state(&mut updates, SessionState::Playing, Duration::from_secs(10)).await;
    let second_index = playing.watch_url.clone().unwrap();
    assert!(second_index.ends_with("/index/1"), "{second_index}");
    let stale_index = second_index.replace("/index/1", "/index/0");

    let http = client();
    assert_eq!(http.get(&second_index).send().await.unwrap().status(), reqwest::StatusCode::OK);
    assert_eq!(
        http.get(&stale_index).send().await.unwrap().status(),
        reqwest::StatusCode::NOT_FOUND
    );

    supervisor.shutdown().await;
    task.await.unwrap();
    assert!(process_utils::descendants(std::process::id()).is_empty());
}
