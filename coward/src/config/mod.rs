//! TOML-based configuration.
//!
//! Settings are read from `coward.toml` in the per-user configuration root.
//! Every section implements `Default`, so a missing or partial file yields the
//! built-in behavior. Command-line flags are applied on top (see [`crate::cli`]).

mod paths;

pub use paths::{AppPaths, delete_sibling_caches};

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Name of the configuration file inside the configuration root.
pub const CONFIG_FILE_NAME: &str = "coward.toml";

const MIB: u64 = 1024 * 1024;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub privacy: PrivacyConfig,
    pub streaming: StreamingConfig,
    pub adblock: AdblockConfig,
    pub logging: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub theme: String,
    pub incognito: bool,
    pub security_level: Option<String>,
    pub enable_dpi: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            theme: "dark".to_string(),
            incognito: false,
            security_level: None,
            enable_dpi: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    pub allow_cookies: bool,
    pub allow_third_party_cookies: bool,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            allow_cookies: true,
            allow_third_party_cookies: false,
        }
    }
}

/// How streamed media reaches a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PlayerType {
    /// External mpv fed through its stdin.
    #[default]
    Mpv,
    /// Transcoded fragmented MP4 served by the local HTTP server to an external player.
    Http,
    /// Embedded player reading a rolling pair of temp files.
    Qt,
    /// Embedded player reading an MPEG-TS stream the transcoder sends over UDP.
    #[value(name = "qt_ff_u")]
    #[serde(rename = "qt_ff_u")]
    QtFfUdp,
    /// Embedded player reading the transcoder output from the local HTTP server.
    #[value(name = "qt_ff_s")]
    #[serde(rename = "qt_ff_s")]
    QtFfServe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub player_type: PlayerType,
    pub mpv_path: String,
    pub player_args: Vec<String>,
    pub ffmpeg_path: String,
    pub streamlink_path: Option<String>,
    pub streamlink_args: Vec<String>,
    /// Quality labels in order of preference.
    pub quality_preferences: Vec<String>,
    pub http_host: String,
    pub http_port: u16,
    pub udp_host: String,
    pub udp_port: u16,
    pub roll_bytes: u64,
    pub prebuffer_bytes: u64,
    pub prebuffer_poll_ms: u64,
    pub grace_ms: u64,
    pub is_playing_poll_secs: u64,
    /// Clip looped by the embedded player while it waits for data.
    pub loading_clip: Option<PathBuf>,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            player_type: PlayerType::Mpv,
            mpv_path: "mpv".to_string(),
            player_args: Vec::new(),
            ffmpeg_path: "ffmpeg".to_string(),
            streamlink_path: None,
            streamlink_args: Vec::new(),
            quality_preferences: ["1080p", "720p60", "720p", "best"]
                .into_iter()
                .map(String::from)
                .collect(),
            http_host: "127.0.0.1".to_string(),
            http_port: 18_090,
            udp_host: "127.0.0.1".to_string(),
            udp_port: 23_000,
            roll_bytes: 50 * MIB,
            prebuffer_bytes: 5 * MIB,
            prebuffer_poll_ms: 300,
            grace_ms: 500,
            is_playing_poll_secs: 60,
            loading_clip: None,
        }
    }
}

impl StreamingConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn prebuffer_poll(&self) -> Duration {
        Duration::from_millis(self.prebuffer_poll_ms)
    }

    pub fn is_playing_poll(&self) -> Duration {
        Duration::from_secs(self.is_playing_poll_secs)
    }

    fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("MPV_PATH")
            && !path.trim().is_empty()
        {
            self.mpv_path = path;
        }
        if let Ok(path) = std::env::var("FFMPEG_PATH")
            && !path.trim().is_empty()
        {
            self.ffmpeg_path = path;
        }
        if let Ok(path) = std::env::var("STREAMLINK_PATH")
            && !path.trim().is_empty()
        {
            self.streamlink_path = Some(path);
        }
    }
}

/// One downloadable filter list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSourceConfig {
    pub url: String,
    /// File name inside the rules directory.
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdblockConfig {
    pub enabled: bool,
    pub general: RuleSourceConfig,
    pub privacy: RuleSourceConfig,
    /// URLs containing any of these are blocked before rules are consulted.
    pub deny_substrings: Vec<String>,
    pub rule_ttl_days: u64,
    pub fetch_timeout_secs: u64,
}

impl Default for AdblockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            general: RuleSourceConfig {
                url: "https://easylist.to/easylist/easylist.txt".to_string(),
                file: "easylist.txt".to_string(),
            },
            privacy: RuleSourceConfig {
                url: "https://easylist.to/easylist/easyprivacy.txt".to_string(),
                file: "easyprivacy.txt".to_string(),
            },
            deny_substrings: ["aswpsdkeu", "doubleclick.net", "googlesyndication.com"]
                .into_iter()
                .map(String::from)
                .collect(),
            rule_ttl_days: 7,
            fetch_timeout_secs: 30,
        }
    }
}

impl AdblockConfig {
    pub fn rule_ttl(&self) -> Duration {
        Duration::from_secs(self.rule_ttl_days * 24 * 60 * 60)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub enabled: bool,
    pub debug: bool,
    /// Number of log files kept in the logs directory.
    pub depth: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debug: false,
            depth: 10,
        }
    }
}

impl AppConfig {
    /// Load `coward.toml` from `root`, falling back to defaults.
    ///
    /// A missing file is normal; an unreadable or invalid one is reported and
    /// replaced by defaults so that configuration problems never block start-up.
    pub fn load(root: &Path) -> Self {
        let path = root.join(CONFIG_FILE_NAME);
        let mut config = match std::fs::read_to_string(&path) {
            Ok(content) => match Self::parse(&content) {
                Ok(config) => {
                    info!(path = %path.display(), "Configuration loaded");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Invalid config, using defaults");
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read config, using defaults");
                Self::default()
            }
        };
        config.streaming.apply_env();
        config
    }

    pub fn parse(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::parse(
            r#"
            [streaming]
            player_type = "qt_ff_u"
            http_port = 9000

            [adblock]
            deny_substrings = ["aswpsdkeu"]
            "#,
        )
        .unwrap();

        assert_eq!(config.streaming.player_type, PlayerType::QtFfUdp);
        assert_eq!(config.streaming.http_port, 9000);
        assert_eq!(config.streaming.roll_bytes, 50 * MIB);
        assert_eq!(config.adblock.deny_substrings, vec!["aswpsdkeu".to_string()]);
        assert_eq!(config.adblock.rule_ttl_days, 7);
        assert!(config.logging.enabled);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        assert!(AppConfig::parse("streaming = 3").is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(dir.path());
        assert_eq!(config.streaming.grace(), Duration::from_millis(500));
        assert_eq!(config.adblock.fetch_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_default_quality_preferences() {
        let config = StreamingConfig::default();
        assert_eq!(config.quality_preferences.last().map(String::as_str), Some("best"));
    }
}
