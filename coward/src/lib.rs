//! Media streaming bridge and request interceptor of the Coward browser.

pub mod adblock;
pub mod cli;
pub mod config;
pub mod detection;
pub mod driver;
pub mod error;
pub mod logging;
pub mod panic_hook;
pub mod streaming;
pub mod utils;

pub use error::{Error, ErrorKind, Result};
