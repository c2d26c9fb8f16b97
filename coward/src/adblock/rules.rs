//! Filter-list files: staleness, download, and loading.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use rustc_hash::FxHashSet;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Interceptor;
use super::engine::{AdblockFilterEngine, FilterEngine};
use crate::config::{AdblockConfig, RuleSourceConfig};
use crate::utils::fs::{ensure_dir_all, io_error};
use crate::utils::http_client::build_rules_client;
use crate::{Error, ErrorKind, Result};

/// How often the background task re-checks rule freshness.
pub const REFRESH_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Whether the rule file at `path` is missing or older than `ttl` at `now`.
pub fn needs_refresh(path: &Path, now: SystemTime, ttl: Duration) -> bool {
    let modified = match std::fs::metadata(path).and_then(|meta| meta.modified()) {
        Ok(modified) => modified,
        Err(_) => return true,
    };
    match modified.checked_add(ttl) {
        Some(valid_until) => now >= valid_until,
        None => false,
    }
}

/// Download `url` and replace `dest` with the body.
///
/// The body is written next to `dest` first and renamed over it, so readers
/// never observe a partial list.
pub async fn fetch_rules(client: &reqwest::Client, url: &str, dest: &Path) -> Result<usize> {
    let response = client.get(url).send().await?.error_for_status()?;
    let body = response.text().await?;

    if let Some(parent) = dest.parent() {
        ensure_dir_all(parent).await?;
    }
    let temp_path = dest.with_extension("tmp");
    tokio::fs::write(&temp_path, body.as_bytes())
        .await
        .map_err(|e| io_error("writing rule list", &temp_path, e))?;
    tokio::fs::rename(&temp_path, dest)
        .await
        .map_err(|e| io_error("replacing rule list", dest, e))?;

    Ok(body.lines().count())
}

/// Read every existing file in `paths` and return the union of their rule
/// lines, first occurrence kept, blank lines dropped.
pub fn load_rule_lines(paths: &[PathBuf]) -> Result<Vec<String>> {
    let mut seen = FxHashSet::default();
    let mut lines = Vec::new();
    for path in paths {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(io_error("reading rule list", path, e)),
        };
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || seen.contains(line) {
                continue;
            }
            seen.insert(line.to_string());
            lines.push(line.to_string());
        }
    }
    Ok(lines)
}

/// Keeps the two rule files fresh and builds engines from them.
pub struct RuleManager {
    config: AdblockConfig,
    rules_dir: PathBuf,
    client: reqwest::Client,
}

impl RuleManager {
    pub fn new(config: AdblockConfig, rules_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = build_rules_client(config.fetch_timeout())?;
        Ok(Self {
            config,
            rules_dir: rules_dir.into(),
            client,
        })
    }

    fn sources(&self) -> [&RuleSourceConfig; 2] {
        [&self.config.general, &self.config.privacy]
    }

    pub fn rule_paths(&self) -> Vec<PathBuf> {
        self.sources()
            .iter()
            .map(|source| self.rules_dir.join(&source.file))
            .collect()
    }

    /// Download every missing or expired list. Returns whether any file changed.
    ///
    /// A failed download keeps the previous file.
    pub async fn refresh_if_stale(&self) -> bool {
        let now = SystemTime::now();
        let mut changed = false;
        for source in self.sources() {
            let path = self.rules_dir.join(&source.file);
            if !needs_refresh(&path, now, self.config.rule_ttl()) {
                debug!(path = %path.display(), "Rule list is fresh");
                continue;
            }
            match fetch_rules(&self.client, &source.url, &path).await {
                Ok(lines) => {
                    info!(url = %source.url, lines, "Rule list downloaded");
                    changed = true;
                }
                Err(e) => warn!(
                    url = %source.url,
                    kind = ?ErrorKind::DownloadRuleFetchFailed,
                    error = %e,
                    "Rule list download failed"
                ),
            }
        }
        changed
    }

    /// Build an engine from the files on disk; `None` when no file exists.
    pub async fn build_engine(&self) -> Result<Option<Arc<dyn FilterEngine>>> {
        let paths = self.rule_paths();
        if !paths.iter().any(|path| path.exists()) {
            return Ok(None);
        }
        let engine = tokio::task::spawn_blocking(move || -> Result<AdblockFilterEngine> {
            let lines = load_rule_lines(&paths)?;
            Ok(AdblockFilterEngine::from_lines(&lines))
        })
        .await
        .map_err(|e| Error::Other(format!("filter engine build panicked: {e}")))??;
        Ok(Some(Arc::new(engine)))
    }

    /// Refresh stale lists and install an engine into `interceptor`.
    ///
    /// Returns whether filtering is active. With no usable rule file on disk
    /// the interceptor's filtering is switched off for this run; deny
    /// substrings still apply.
    pub async fn initialize(&self, interceptor: &Interceptor) -> bool {
        if !self.config.enabled {
            interceptor.set_enabled(false);
            return false;
        }
        self.refresh_if_stale().await;
        match self.build_engine().await {
            Ok(Some(engine)) => {
                interceptor.swap_engine(engine);
                interceptor.set_enabled(true);
                true
            }
            Ok(None) => {
                warn!(dir = %self.rules_dir.display(), "No rule lists available, ad-blocking disabled");
                interceptor.set_enabled(false);
                false
            }
            Err(e) => {
                warn!(
                    dir = %self.rules_dir.display(),
                    kind = ?ErrorKind::DownloadRuleFetchFailed,
                    error = %e,
                    "Rule lists unusable, ad-blocking disabled"
                );
                interceptor.set_enabled(false);
                false
            }
        }
    }

    /// Re-check freshness every `every` and swap in a new engine when a list changed.
    pub fn spawn_refresh(
        self: Arc<Self>,
        interceptor: Arc<Interceptor>,
        every: Duration,
        stop: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; start-up already refreshed.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = interval.tick() => {}
                }
                if !self.refresh_if_stale().await {
                    continue;
                }
                match self.build_engine().await {
                    Ok(Some(engine)) => {
                        interceptor.swap_engine(engine);
                        info!("Filter engine reloaded");
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Filter engine rebuild failed"),
                }
            }
        })
    }
}
