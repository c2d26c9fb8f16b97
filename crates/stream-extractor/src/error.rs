use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
    /// No plugin knows how to handle the URL.
    #[error("unsupported extractor")]
    UnsupportedExtractor,
    #[error("no streams found")]
    NoStreamsFound,
    /// A plugin matched but the stream itself could not be opened or read.
    #[error("stream error: {0}")]
    StreamError(String),
    #[error("other: {0}")]
    Other(String),
}
