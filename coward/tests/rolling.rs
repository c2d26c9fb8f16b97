mod common;

use std::time::Duration;

use tokio::sync::mpsc;

use common::{eventually, surface};
use coward::streaming::player::{EmbeddedPlayer, EmbeddedSettings, SurfaceEvent};
use coward::streaming::transport::RollingFileBuffer;
use coward::streaming::{EventEmitter, PlaybackTarget, StreamEvent};

const MIB: u64 = 1024 * 1024;

#[tokio::test]
async fn test_rolling_buffer_swap_and_player_handoff() {
    let dir = tempfile::tempdir().unwrap();
    let mut buffer = RollingFileBuffer::create(dir.path(), MIB).await.unwrap();
    let roll = buffer.handle();

    let (surface, surface_tx, surface_rx) = surface();
    let (event_tx, mut event_rx) = mpsc::channel(16);
    let mut player = EmbeddedPlayer::start(
        surface.clone(),
        surface_rx,
        PlaybackTarget::RollingFiles(roll.clone()),
        EmbeddedSettings {
            prebuffer_bytes: 64 * 1024,
            poll: Duration::from_millis(5),
        },
        EventEmitter::new(1, "https://x/vid", event_tx),
    );

    // Enough for the player to start on the first file.
    let total = (2.3 * MIB as f64) as usize;
    let chunk = vec![0x47u8; 8192];
    let mut written = 0;
    while written < 128 * 1024 {
        buffer.write(&chunk).await.unwrap();
        written += chunk.len();
    }
    eventually(Duration::from_secs(5), || surface.plays().len() == 1).await;

    while written < total {
        let take = chunk.len().min(total - written);
        buffer.write(&chunk[..take]).await.unwrap();
        written += take;
    }

    let first = roll.path(0).to_path_buf();
    let second = roll.path(1).to_path_buf();
    assert_eq!(std::fs::metadata(&first).unwrap().len(), MIB);
    assert_eq!(std::fs::metadata(&second).unwrap().len(), total as u64 - MIB);
    assert_eq!(roll.active_index(), 1);

    // End of the first file: the player moves to the file the writer is on.
    surface_tx.send(SurfaceEvent::EndOfMedia).await.unwrap();
    eventually(Duration::from_secs(5), || surface.plays().len() == 2).await;
    assert_eq!(
        surface.plays(),
        vec![
            first.to_string_lossy().into_owned(),
            second.to_string_lossy().into_owned()
        ]
    );
    assert_eq!(surface.calls().first().map(String::as_str), Some("loading"));

    // Closing the surface is a graceful close.
    surface_tx.send(SurfaceEvent::Closed).await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), event_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event.event,
        StreamEvent::Closed {
            page_url: "https://x/vid".into(),
            graceful: true
        }
    );
    player.close().await;
}

#[tokio::test]
async fn test_writer_waits_for_released_swap() {
    let dir = tempfile::tempdir().unwrap();
    let mut buffer = RollingFileBuffer::create(dir.path(), 1024).await.unwrap();
    let roll = buffer.handle();

    // The initial release allows exactly one swap.
    buffer.write(&[1u8; 3000]).await.unwrap();
    assert_eq!(roll.active_index(), 1);
    assert_eq!(buffer.written_in_active(), 3000 - 1024);
    assert!(!roll.swap_available());

    roll.release_swap();
    buffer.write(&[2u8; 10]).await.unwrap();
    assert_eq!(roll.active_index(), 0);
    assert_eq!(std::fs::metadata(roll.path(0)).unwrap().len(), 10);
}
