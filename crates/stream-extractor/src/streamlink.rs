use std::collections::HashMap;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::task::{Context, Poll};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::{Child, ChildStdout};
use tracing::debug;

use crate::error::ExtractorError;
use crate::extractor::{BoxedReader, ByteSource, StreamExtractor, StreamListing};

const STREAMLINK_BIN: &str = "streamlink";

static ON_PATH: LazyLock<bool> = LazyLock::new(|| responds_to_version(STREAMLINK_BIN));

/// Whether `binary --version` runs and exits successfully.
fn responds_to_version(binary: &str) -> bool {
    process_utils::std_command(binary)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}

#[derive(Debug, Clone, Default)]
pub struct StreamlinkConfig {
    pub binary_path: Option<String>,
    pub extra_args: Vec<String>,
}

impl StreamlinkConfig {
    /// Configured binary, then `STREAMLINK_PATH`, then `streamlink` on PATH.
    pub fn binary_path(&self) -> String {
        match (&self.binary_path, std::env::var("STREAMLINK_PATH")) {
            (Some(path), _) => path.clone(),
            (None, Ok(path)) if !path.trim().is_empty() => path,
            _ => STREAMLINK_BIN.to_string(),
        }
    }
}

/// Extractor backed by the Streamlink CLI.
#[derive(Debug, Clone)]
pub struct StreamlinkExtractor {
    config: Arc<StreamlinkConfig>,
}

impl StreamlinkExtractor {
    /// Whether `streamlink` on PATH can be run.
    pub fn is_available() -> bool {
        *ON_PATH
    }

    /// Fails with [`ExtractorError::UnsupportedExtractor`] when the binary cannot be run.
    pub fn new(config: StreamlinkConfig) -> Result<Self, ExtractorError> {
        let binary = config.binary_path();
        let runnable = if binary == STREAMLINK_BIN {
            Self::is_available()
        } else {
            responds_to_version(&binary)
        };
        if !runnable {
            return Err(ExtractorError::UnsupportedExtractor);
        }
        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Run `streamlink --json` for `url`. Errors are reported inside the JSON too.
    async fn describe_page(&self, url: &str) -> Result<StreamlinkJson, ExtractorError> {
        let output = process_utils::tokio_command(self.config.binary_path())
            .args(["--json", "--url", url])
            .args(&self.config.extra_args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ExtractorError::Other(format!("streamlink did not start: {e}")))?;

        serde_json::from_slice(&output.stdout).map_err(|e| {
            ExtractorError::Other(format!(
                "unreadable streamlink listing ({e}): {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        })
    }

    fn listing_from_json(
        &self,
        page_url: &str,
        json: StreamlinkJson,
    ) -> Result<StreamListing, ExtractorError> {
        if let Some(err) = json.error.as_deref() {
            return Err(map_streamlink_error(err));
        }

        let streams = json.streams.ok_or(ExtractorError::NoStreamsFound)?;
        let mut listing: StreamListing = FxHashMap::default();
        for (label, stream) in streams {
            let source = StreamlinkSource {
                page_url: page_url.to_string(),
                quality: label.clone(),
                url: stream.url.unwrap_or_default(),
                config: Arc::clone(&self.config),
            };
            listing.insert(label, Arc::new(source));
        }

        if listing.is_empty() {
            return Err(ExtractorError::NoStreamsFound);
        }

        debug!(
            plugin = json.plugin.as_deref().unwrap_or("unknown"),
            count = listing.len(),
            "Streamlink listed streams"
        );
        Ok(listing)
    }
}

#[async_trait]
impl StreamExtractor for StreamlinkExtractor {
    fn name(&self) -> &str {
        "Streamlink"
    }

    async fn list_streams(&self, url: &str) -> Result<StreamListing, ExtractorError> {
        url::Url::parse(url).map_err(|e| ExtractorError::InvalidUrl(format!("{url}: {e}")))?;
        let json = self.describe_page(url).await?;
        self.listing_from_json(url, json)
    }
}

/// One quality of a page, opened through `streamlink --stdout`.
#[derive(Debug, Clone)]
pub struct StreamlinkSource {
    page_url: String,
    quality: String,
    url: String,
    config: Arc<StreamlinkConfig>,
}

impl StreamlinkSource {
    pub fn quality(&self) -> &str {
        &self.quality
    }
}

#[async_trait]
impl ByteSource for StreamlinkSource {
    fn url(&self) -> &str {
        &self.url
    }

    async fn open(&self) -> Result<BoxedReader, ExtractorError> {
        let mut cmd = process_utils::tokio_command(self.config.binary_path());
        cmd.arg("--stdout")
            .args(&self.config.extra_args)
            .arg(&self.page_url)
            .arg(&self.quality)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| ExtractorError::StreamError(format!("Failed to spawn streamlink: {e}")))?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ExtractorError::StreamError("Failed to capture streamlink stdout".to_string())
        })?;

        Ok(Box::pin(ChildReader {
            _child: child,
            stdout,
        }))
    }
}

/// Keeps the producing child alive for as long as its stdout is being read.
struct ChildReader {
    _child: Child,
    stdout: ChildStdout,
}

impl AsyncRead for ChildReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

fn map_streamlink_error(msg: &str) -> ExtractorError {
    let lower = msg.to_lowercase();
    if lower.contains("no plugin can handle url") {
        return ExtractorError::UnsupportedExtractor;
    }
    if lower.contains("no streams found") || lower.contains("no playable streams") {
        return ExtractorError::NoStreamsFound;
    }
    if lower.contains("could not open stream") || lower.contains("failed to read") {
        return ExtractorError::StreamError(msg.to_string());
    }
    ExtractorError::Other(msg.to_string())
}

#[derive(Debug, Clone, Deserialize)]
struct StreamlinkJson {
    #[serde(default)]
    plugin: Option<String>,
    #[serde(default)]
    streams: Option<HashMap<String, StreamlinkStream>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamlinkStream {
    #[serde(default)]
    url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> StreamlinkExtractor {
        StreamlinkExtractor {
            config: Arc::new(StreamlinkConfig::default()),
        }
    }

    #[test]
    fn test_listing_from_json() {
        let raw = r#"{
          "plugin": "hls",
          "streams": {
            "720p": { "type": "hls", "url": "https://example.com/720.m3u8" },
            "best": { "type": "hls", "url": "https://example.com/best.m3u8" }
          }
        }"#;

        let parsed: StreamlinkJson = serde_json::from_str(raw).unwrap();
        let listing = extractor()
            .listing_from_json("https://example.com/watch", parsed)
            .unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing["720p"].url(), "https://example.com/720.m3u8");
    }

    #[test]
    fn test_listing_from_json_error_field() {
        let raw = r#"{ "error": "No plugin can handle URL: https://x" }"#;
        let parsed: StreamlinkJson = serde_json::from_str(raw).unwrap();
        let err = extractor().listing_from_json("https://x", parsed).unwrap_err();
        assert!(matches!(err, ExtractorError::UnsupportedExtractor));
    }

    #[test]
    fn test_listing_from_json_empty_streams() {
        let raw = r#"{ "plugin": "twitch", "streams": {} }"#;
        let parsed: StreamlinkJson = serde_json::from_str(raw).unwrap();
        let err = extractor().listing_from_json("https://x", parsed).unwrap_err();
        assert!(matches!(err, ExtractorError::NoStreamsFound));
    }

    #[test]
    fn test_map_streamlink_error() {
        assert!(matches!(
            map_streamlink_error("No streams found on this URL"),
            ExtractorError::NoStreamsFound
        ));
        assert!(matches!(
            map_streamlink_error("Could not open stream: HTTP 403"),
            ExtractorError::StreamError(_)
        ));
        assert!(matches!(
            map_streamlink_error("Unable to validate response text"),
            ExtractorError::Other(_)
        ));
    }
}
