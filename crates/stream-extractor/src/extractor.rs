use std::fmt::Debug;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::io::AsyncRead;

use crate::error::ExtractorError;

/// Reader over the bytes of an opened stream.
pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;

/// Quality label to byte source, as reported by an extractor.
pub type StreamListing = FxHashMap<String, Arc<dyn ByteSource>>;

/// A stream that can be opened to yield its bytes.
#[async_trait]
pub trait ByteSource: Send + Sync + Debug {
    /// The direct media URL behind this source, when the plugin exposes one.
    fn url(&self) -> &str;

    /// Open the stream. Every call yields an independent reader.
    async fn open(&self) -> Result<BoxedReader, ExtractorError>;
}

/// A plugin-based stream extractor.
#[async_trait]
pub trait StreamExtractor: Send + Sync {
    fn name(&self) -> &str;

    /// Interrogate `url` and list every stream the plugin layer found.
    async fn list_streams(&self, url: &str) -> Result<StreamListing, ExtractorError>;
}
