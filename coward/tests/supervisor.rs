mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{Dialog, PendingExtractor, RecordingPrompter};
use coward::config::{PlayerType, StreamingConfig};
use coward::streaming::{SessionState, StreamResolver, Supervisor, SupervisorConfig};

#[tokio::test]
async fn test_concurrent_requests_are_deduplicated() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = SupervisorConfig::from_streaming(&StreamingConfig::default(), dir.path().into());
    config.player_type = PlayerType::Mpv;

    let extractor = Arc::new(PendingExtractor::default());
    let prompter = RecordingPrompter::new();
    let (supervisor, _task) = Supervisor::spawn(
        config,
        StreamResolver::new(extractor.clone()),
        prompter.clone(),
        None,
    );
    let mut updates = supervisor.subscribe();

    supervisor.request("https://x/vid", "vid", None).await;
    common::wait_for_state(&mut updates, SessionState::Resolving, Duration::from_secs(5)).await;

    supervisor.request("https://x/vid", "vid", None).await;
    let snapshot = supervisor.snapshot().await;

    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].state, SessionState::Resolving);
    assert!(prompter
        .dialogs()
        .contains(&Dialog::OnePlayerOnly("https://x/vid".into())));
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_other_pages_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let config = SupervisorConfig::from_streaming(&StreamingConfig::default(), dir.path().into());
    let extractor = Arc::new(PendingExtractor::default());
    let prompter = RecordingPrompter::new();
    let (supervisor, _task) = Supervisor::spawn(config, StreamResolver::new(extractor), prompter.clone(), None);

    supervisor.request("https://x/a", "a", None).await;
    supervisor.request("https://x/b", "b", None).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = supervisor.snapshot().await;
    assert_eq!(snapshot.len(), 2);
    assert!(prompter
        .dialogs()
        .iter()
        .all(|dialog| !matches!(dialog, Dialog::OnePlayerOnly(_))));

    supervisor.close("https://x/a").await;
    let snapshot = supervisor.snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].page_url, "https://x/b");

    supervisor.shutdown().await;
}
