use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::Result;
use crate::utils::fs;

/// Prefix shared by every engine cache directory.
pub const CACHE_DIR_PREFIX: &str = "coward_";

/// On-disk locations used by the application.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Per-user configuration root.
    pub root: PathBuf,
    /// Root of the per-run temporary tree.
    pub temp_root: PathBuf,
    engine_version: String,
}

impl AppPaths {
    pub fn new(root: impl Into<PathBuf>, temp_root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            temp_root: temp_root.into(),
            engine_version: "default".to_string(),
        }
    }

    /// Resolve the default locations.
    ///
    /// `COWARD_CONFIG_DIR` overrides the configuration root; otherwise the
    /// platform config directory is used, falling back to the working directory.
    pub fn discover() -> Self {
        let root = std::env::var_os("COWARD_CONFIG_DIR")
            .map(PathBuf::from)
            .or_else(|| dirs::config_dir().map(|dir| dir.join("Coward")))
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(root, std::env::temp_dir().join("coward"))
    }

    pub fn with_engine_version(mut self, version: impl Into<String>) -> Self {
        self.engine_version = version.into();
        self
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join("Coward.ini")
    }

    pub fn history_dir(&self) -> PathBuf {
        self.root.join("coward.history")
    }

    pub fn history_file(&self) -> PathBuf {
        self.history_dir().join("data.ini")
    }

    pub fn cache_root(&self) -> PathBuf {
        self.root.join(".cache")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_root()
            .join(format!("{CACHE_DIR_PREFIX}{}", self.engine_version))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(".logs")
    }

    pub fn rules_dir(&self) -> PathBuf {
        self.root.join("adblock")
    }

    pub fn stream_dir(&self) -> PathBuf {
        self.temp_root.join("stream")
    }

    /// Create the directories the application writes into.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.history_dir(),
            self.cache_dir(),
            self.logs_dir(),
            self.rules_dir(),
            self.stream_dir(),
        ] {
            fs::ensure_dir_all_sync_with_op("creating application directory", &dir)?;
        }
        Ok(())
    }

    /// Remove the stream temp folder.
    pub fn delete_player_temp(&self) -> Result<()> {
        info!(path = %self.stream_dir().display(), "Removing player temp folder");
        fs::remove_dir_all_if_exists(&self.stream_dir())
    }
}

/// Remove every sibling cache directory of `keep` except `keep` itself.
///
/// Only directories carrying the engine cache prefix are touched. Returns the
/// number of directories removed.
pub fn delete_sibling_caches(keep: &Path) -> Result<usize> {
    let Some(parent) = keep.parent() else {
        return Ok(0);
    };
    let keep_name = keep.file_name();

    let entries = match std::fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(fs::io_error("reading cache directory", parent, e)),
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() || Some(entry.file_name().as_os_str()) == keep_name {
            continue;
        }
        let is_cache = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(CACHE_DIR_PREFIX));
        if !is_cache {
            continue;
        }
        match fs::remove_dir_all_if_exists(&path) {
            Ok(()) => removed += 1,
            Err(e) => warn!(error = %e, "Failed to delete stale cache"),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let paths = AppPaths::new("/cfg", "/tmp/coward").with_engine_version("120");
        assert_eq!(paths.settings_file(), PathBuf::from("/cfg/Coward.ini"));
        assert_eq!(paths.history_file(), PathBuf::from("/cfg/coward.history/data.ini"));
        assert_eq!(paths.cache_dir(), PathBuf::from("/cfg/.cache/coward_120"));
        assert_eq!(paths.stream_dir(), PathBuf::from("/tmp/coward/stream"));
    }

    #[test]
    fn test_delete_sibling_caches() {
        let dir = tempfile::tempdir().unwrap();
        let keep = dir.path().join("coward_120");
        let stale = dir.path().join("coward_118");
        let unrelated = dir.path().join("other");
        for d in [&keep, &stale, &unrelated] {
            std::fs::create_dir_all(d).unwrap();
        }

        assert_eq!(delete_sibling_caches(&keep).unwrap(), 1);
        assert!(keep.exists());
        assert!(!stale.exists());
        assert!(unrelated.exists());
    }
}
