//! Command-line flags.
//!
//! Every flag is optional and overrides the matching configuration value.
//! Unknown flags are dropped before parsing and a flag with an invalid value
//! is rejected on its own, so neither aborts start-up.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;
use clap::builder::BoolishValueParser;

use crate::config::{AppConfig, PlayerType};

#[derive(Parser, Debug, Default, Clone, PartialEq, Eq)]
#[command(name = "coward", version, about, long_about = None)]
pub struct Args {
    /// Delete every sibling cache directory of this one
    #[arg(long, value_name = "PATH")]
    pub delete_cache: Option<PathBuf>,

    /// Remove the stream temp folder before start
    #[arg(long)]
    pub delete_player_temp: bool,

    #[arg(long, value_name = "BOOL", value_parser = BoolishValueParser::new())]
    pub enable_debug: Option<bool>,

    #[arg(long, value_name = "BOOL", value_parser = BoolishValueParser::new())]
    pub enable_logging: Option<bool>,

    #[arg(long)]
    pub enable_dpi: bool,

    #[arg(long, value_name = "LEVEL")]
    pub security_level: Option<String>,

    #[arg(long, value_name = "BOOL", value_parser = BoolishValueParser::new())]
    pub allow_cookies: Option<bool>,

    #[arg(long, value_name = "BOOL", value_parser = BoolishValueParser::new())]
    pub allow_third_party_cookies: Option<bool>,

    #[arg(long, value_name = "BOOL", value_parser = BoolishValueParser::new())]
    pub enable_adblocker: Option<bool>,

    #[arg(long, value_name = "NAME")]
    pub theme: Option<String>,

    #[arg(long, value_enum)]
    pub player_type: Option<PlayerType>,

    #[arg(long)]
    pub incognito: bool,

    /// Flags dropped for an invalid value, as given on the command line.
    #[arg(skip)]
    pub rejected: Vec<String>,
}

/// Long flags that consume a value, and those that do not.
const VALUE_FLAGS: &[&str] = &[
    "--delete-cache",
    "--enable-debug",
    "--enable-logging",
    "--security-level",
    "--allow-cookies",
    "--allow-third-party-cookies",
    "--enable-adblocker",
    "--theme",
    "--player-type",
];
const SWITCH_FLAGS: &[&str] = &[
    "--delete-player-temp",
    "--enable-dpi",
    "--incognito",
    "--help",
    "-h",
    "--version",
    "-V",
];

impl Args {
    /// Parse the process arguments, ignoring anything unrecognised.
    pub fn parse_lenient() -> Self {
        Self::parse_lenient_from(std::env::args_os())
    }

    /// Each known flag is checked on its own first; one that fails is left
    /// out and recorded in [`Args::rejected`]. Help and version exit.
    pub fn parse_lenient_from<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let mut iter = args.into_iter().map(Into::into);
        let program = iter.next().unwrap_or_else(|| OsString::from("coward"));

        let mut kept = vec![program.clone()];
        let mut rejected = Vec::new();
        for group in known_flags(iter) {
            match Self::try_parse_from(std::iter::once(program.clone()).chain(group.iter().cloned())) {
                Ok(_) => kept.extend(group),
                Err(e) if is_exit_request(&e) => e.exit(),
                Err(_) => rejected.push(describe(&group)),
            }
        }

        let mut parsed = match Self::try_parse_from(&kept) {
            Ok(parsed) => parsed,
            // Flags valid alone but not together, e.g. one given twice.
            Err(_) => {
                rejected.extend(kept.iter().skip(1).map(|arg| arg.to_string_lossy().into_owned()));
                Self::default()
            }
        };
        parsed.rejected = rejected;
        parsed
    }

    /// Override configuration values with the flags that were given.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(debug) = self.enable_debug {
            config.logging.debug = debug;
        }
        if let Some(enabled) = self.enable_logging {
            config.logging.enabled = enabled;
        }
        if self.enable_dpi {
            config.general.enable_dpi = true;
        }
        if let Some(level) = &self.security_level {
            config.general.security_level = Some(level.clone());
        }
        if let Some(allow) = self.allow_cookies {
            config.privacy.allow_cookies = allow;
        }
        if let Some(allow) = self.allow_third_party_cookies {
            config.privacy.allow_third_party_cookies = allow;
        }
        if let Some(enabled) = self.enable_adblocker {
            config.adblock.enabled = enabled;
        }
        if let Some(theme) = &self.theme {
            config.general.theme = theme.clone();
        }
        if let Some(player_type) = self.player_type {
            config.streaming.player_type = player_type;
        }
        if self.incognito {
            config.general.incognito = true;
        }
    }
}

fn is_exit_request(e: &clap::Error) -> bool {
    matches!(
        e.kind(),
        clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
    )
}

fn describe(group: &[OsString]) -> String {
    group
        .iter()
        .map(|arg| arg.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Known flags, each with the value it consumes; everything else is dropped.
fn known_flags(mut args: impl Iterator<Item = OsString>) -> Vec<Vec<OsString>> {
    let mut groups = Vec::new();

    while let Some(arg) = args.next() {
        let Some(text) = arg.to_str() else {
            continue;
        };
        let name = text.split_once('=').map_or(text, |(name, _)| name);
        if VALUE_FLAGS.contains(&name) {
            let inline = text.contains('=');
            let mut group = vec![arg.clone()];
            if !inline && let Some(value) = args.next() {
                group.push(value);
            }
            groups.push(group);
        } else if SWITCH_FLAGS.contains(&text) {
            groups.push(vec![arg]);
        }
    }
    groups
}
