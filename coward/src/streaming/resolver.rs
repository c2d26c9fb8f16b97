//! Stream resolution: page URL plus quality preferences to an openable stream.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use stream_extractor::{BoxedReader, ByteSource, ExtractorError, StreamExtractor};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::ErrorKind;

/// Map an extractor failure onto the kinds the bridge reports.
pub fn map_extractor_error(err: &ExtractorError) -> ErrorKind {
    match err {
        ExtractorError::UnsupportedExtractor => ErrorKind::NoPlugin,
        ExtractorError::NoStreamsFound => ErrorKind::NoStreams,
        ExtractorError::StreamError(_) => ErrorKind::StreamError,
        _ => ErrorKind::PluginTransient,
    }
}

/// First preference that `available` accepts, in preference order.
pub fn select_quality<'a>(
    preferences: &'a [String],
    available: impl Fn(&str) -> bool,
) -> Option<&'a str> {
    preferences
        .iter()
        .map(String::as_str)
        .find(|label| available(label))
}

/// Resolves page URLs through a plugin-based extractor.
#[derive(Clone)]
pub struct StreamResolver {
    extractor: Arc<dyn StreamExtractor>,
}

impl fmt::Debug for StreamResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamResolver")
            .field("extractor", &self.extractor.name())
            .finish()
    }
}

impl StreamResolver {
    pub fn new(extractor: Arc<dyn StreamExtractor>) -> Self {
        Self { extractor }
    }

    /// Interrogate `page_url` and pick the first preferred quality it offers.
    pub async fn resolve(
        &self,
        page_url: &str,
        preferences: &[String],
    ) -> Result<StreamHandle, ErrorKind> {
        let started = Instant::now();
        let listing = self.extractor.list_streams(page_url).await.map_err(|e| {
            let kind = map_extractor_error(&e);
            warn!(page_url, error = %e, kind = ?kind, "Stream extraction failed");
            kind
        })?;

        if listing.is_empty() {
            return Err(ErrorKind::NoStreams);
        }

        let Some(label) = select_quality(preferences, |label| listing.contains_key(label)) else {
            debug!(
                page_url,
                available = ?listing.keys().collect::<Vec<_>>(),
                "No preferred quality available"
            );
            return Err(ErrorKind::NoMatchingQuality);
        };

        let source = Arc::clone(&listing[label]);
        let latency = started.elapsed();
        info!(
            page_url,
            quality = label,
            latency_ms = latency.as_millis() as u64,
            "Stream resolved"
        );
        Ok(StreamHandle::new(label, source, latency))
    }
}

/// Opaque result of a successful resolve.
///
/// A handle can be opened once; a second `open` reports [`ErrorKind::StreamEnded`].
#[derive(Debug)]
pub struct StreamHandle {
    quality_label: String,
    source: Arc<dyn ByteSource>,
    resolve_latency: Duration,
    opened: AtomicBool,
}

impl StreamHandle {
    pub fn new(
        quality_label: impl Into<String>,
        source: Arc<dyn ByteSource>,
        resolve_latency: Duration,
    ) -> Self {
        Self {
            quality_label: quality_label.into(),
            source,
            resolve_latency,
            opened: AtomicBool::new(false),
        }
    }

    pub fn quality_label(&self) -> &str {
        &self.quality_label
    }

    pub fn resolve_latency(&self) -> Duration {
        self.resolve_latency
    }

    /// Direct media URL, empty when the plugin does not expose one.
    pub fn source_url(&self) -> &str {
        self.source.url()
    }

    pub async fn open(&self) -> Result<StreamReader, ErrorKind> {
        if self.opened.swap(true, Ordering::AcqRel) {
            return Err(ErrorKind::StreamEnded);
        }
        let reader = self.source.open().await.map_err(|e| {
            warn!(quality = %self.quality_label, error = %e, "Failed to open stream");
            match e {
                ExtractorError::StreamError(_) => ErrorKind::StreamError,
                other => map_extractor_error(&other),
            }
        })?;
        Ok(StreamReader {
            inner: Some(reader),
        })
    }
}

/// Reader over an opened [`StreamHandle`].
pub struct StreamReader {
    inner: Option<BoxedReader>,
}

impl fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReader")
            .field("open", &self.inner.is_some())
            .finish()
    }
}

impl StreamReader {
    /// Read the next chunk into `buf`. `Ok(0)` is end of stream.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, ErrorKind> {
        let Some(reader) = self.inner.as_mut() else {
            return Err(ErrorKind::StreamEnded);
        };
        reader.read(buf).await.map_err(|e| {
            debug!(error = %e, "Stream read failed");
            ErrorKind::PluginTransient
        })
    }

    /// Release the underlying reader. Later reads report `StreamEnded`.
    pub fn close(&mut self) {
        self.inner = None;
    }
}
