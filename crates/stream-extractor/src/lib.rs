//! Stream extraction for media pages.
//!
//! A [`StreamExtractor`] turns a page URL into a [`StreamListing`]: a mapping
//! from quality label (`"best"`, `"720p"`, ...) to a [`ByteSource`] that can be
//! opened to read the media bytes. The default implementation shells out to
//! Streamlink, whose plugin system knows how to interrogate most media sites.

pub mod error;
pub mod extractor;
pub mod streamlink;

pub use error::ExtractorError;
pub use extractor::{BoxedReader, ByteSource, StreamExtractor, StreamListing};
pub use streamlink::{StreamlinkConfig, StreamlinkExtractor, StreamlinkSource};
