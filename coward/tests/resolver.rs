mod common;

use common::FixedExtractor;
use coward::ErrorKind;
use coward::streaming::StreamResolver;

fn prefs() -> Vec<String> {
    ["1080p", "720p60", "720p", "best"].into_iter().map(String::from).collect()
}

#[tokio::test]
async fn test_quality_preference_selection() {
    let resolver = StreamResolver::new(FixedExtractor::new(&["best", "720p", "480p"]));

    let handle = resolver.resolve("https://x/vid", &prefs()).await.unwrap();
    assert_eq!(handle.quality_label(), "720p");

    let mut reader = handle.open().await.unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(reader.read_chunk(&mut buf).await.unwrap(), 16);
    assert!(buf.iter().all(|b| *b == 0x47));
}

#[tokio::test]
async fn test_no_matching_quality() {
    let resolver = StreamResolver::new(FixedExtractor::new(&["480p", "360p"]));
    let err = resolver.resolve("https://x/vid", &prefs()).await.unwrap_err();
    assert_eq!(err, ErrorKind::NoMatchingQuality);
}

#[tokio::test]
async fn test_no_streams() {
    let resolver = StreamResolver::new(FixedExtractor::new(&[]));
    let err = resolver.resolve("https://x/vid", &prefs()).await.unwrap_err();
    assert_eq!(err, ErrorKind::NoStreams);
}
