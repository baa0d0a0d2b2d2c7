use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::load_channel_ids;
use crate::registry::SourceRegistry;

/// Polls the config file and pushes changed channel lists into the registry.
pub struct ConfigWatcher {
    path: PathBuf,
    registry: Arc<SourceRegistry>,
    settle: Duration,
    last_modified: Mutex<Option<SystemTime>>,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>, registry: Arc<SourceRegistry>, settle: Duration) -> Self {
        Self {
            path: path.into(),
            registry,
            settle,
            last_modified: Mutex::new(None),
        }
    }

    /// Check once. Returns true if the registry was replaced.
    ///
    /// The first call only records the modification time.
    pub async fn poll_once(&self) -> Result<bool> {
        let modified = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta
                .modified()
                .context("Filesystem does not report modification times")?,
            // A missing file is left alone; it may be mid-rewrite
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to stat config file: {}", self.path.display())
                })
            }
        };

        let mut last = self.last_modified.lock().await;
        match *last {
            None => {
                *last = Some(modified);
                return Ok(false);
            }
            Some(prev) if modified <= prev => return Ok(false),
            Some(_) => *last = Some(modified),
        }
        drop(last);

        info!(path = %self.path.display(), "Config file changed, reloading channel list");
        // Give the writer a moment to finish
        tokio::time::sleep(self.settle).await;

        let ids = load_channel_ids(&self.path)
            .with_context(|| format!("Failed to reload {}", self.path.display()))?;
        let before = self.registry.len();
        self.registry.replace(ids);
        info!(
            "Channel list reloaded: {} -> {} source(s)",
            before,
            self.registry.len()
        );
        Ok(true)
    }

    /// Like [`poll_once`](Self::poll_once) but logs failures instead of returning them.
    pub async fn tick(&self) {
        if let Err(e) = self.poll_once().await {
            warn!("Config reload failed, keeping current channel list: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(path: &std::path::Path, ids: &str) {
        let mut file = std::fs::File::create(path).unwrap();
        write!(
            file,
            "[telegram]\nbot_token = \"t\"\nchannel_ids = \"{ids}\"\n\n[sink]\nurl = \"http://localhost:8080/api/v1/message\"\n"
        )
        .unwrap();
    }

    fn bump_mtime(path: &std::path::Path, by: Duration) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        let later = SystemTime::now() + by;
        file.set_modified(later).unwrap();
    }

    #[tokio::test]
    async fn test_first_poll_only_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relaybot.toml");
        write(&path, "-1,-2");

        let registry = Arc::new(SourceRegistry::with_ids([-9]));
        let watcher = ConfigWatcher::new(&path, Arc::clone(&registry), Duration::ZERO);

        assert!(!watcher.poll_once().await.unwrap());
        assert_eq!(registry.ids(), vec![-9]);
    }

    #[tokio::test]
    async fn test_change_replaces_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relaybot.toml");
        write(&path, "-1");

        let registry = Arc::new(SourceRegistry::with_ids([-1]));
        let watcher = ConfigWatcher::new(&path, Arc::clone(&registry), Duration::ZERO);
        watcher.poll_once().await.unwrap();

        write(&path, "-3,-2");
        bump_mtime(&path, Duration::from_secs(5));

        assert!(watcher.poll_once().await.unwrap());
        assert_eq!(registry.ids(), vec![-3, -2]);

        // Unchanged file: nothing happens
        assert!(!watcher.poll_once().await.unwrap());
    }

    #[tokio::test]
    async fn test_broken_file_keeps_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relaybot.toml");
        write(&path, "-1");

        let registry = Arc::new(SourceRegistry::with_ids([-1]));
        let watcher = ConfigWatcher::new(&path, Arc::clone(&registry), Duration::ZERO);
        watcher.poll_once().await.unwrap();

        std::fs::write(&path, "[telegram\nnot toml").unwrap();
        bump_mtime(&path, Duration::from_secs(5));

        assert!(watcher.poll_once().await.is_err());
        assert_eq!(registry.ids(), vec![-1]);
    }

    #[tokio::test]
    async fn test_missing_file_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(SourceRegistry::new());
        let watcher = ConfigWatcher::new(
            dir.path().join("absent.toml"),
            Arc::clone(&registry),
            Duration::ZERO,
        );
        assert!(!watcher.poll_once().await.unwrap());
    }
}
