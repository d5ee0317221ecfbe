//! Configuration hot reload.
//!
//! ## Responsibility
//! Follow the governor TOML file and publish each new, valid configuration.
//!
//! ## Guarantees
//! - Subscribers only ever see configs that passed [`validate`](super::validation::validate)
//! - A burst of filesystem events produces one reload (settle window)
//! - An edit that leaves the effective config unchanged is not republished
//! - [`ConfigWatcher::latest`] always holds the last accepted config
//! - The reload task ends when the `ConfigWatcher` is dropped
//!
//! ## NOT Responsible For
//! - Rebuilding a running [`Governor`](crate::Governor); subscribers decide
//!   what to apply

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::loader::load_from_file;
use super::validation::ConfigError;
use super::GovernorConfig;

/// Quiet period after the last relevant event before the file is re-read.
const SETTLE: Duration = Duration::from_millis(250);

fn io_error(path: &Path, err: notify::Error) -> ConfigError {
    ConfigError::Io {
        file: path.display().to_string(),
        source: std::io::Error::other(err.to_string()),
    }
}

fn touches(event: &notify::Event, file: &Path) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == file.file_name())
}

/// Follows a governor TOML file and broadcasts validated reloads.
pub struct ConfigWatcher {
    updates: broadcast::Sender<GovernorConfig>,
    latest: Arc<RwLock<GovernorConfig>>,
    // Dropping the watcher closes the event channel, which ends the task.
    _fs: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Follow `path`, starting from `initial`.
    ///
    /// `initial` is not broadcast; load it with [`load_from_file`] first.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the platform watcher cannot be created
    /// or the file's directory cannot be watched.
    pub fn new(
        path: PathBuf,
        initial: GovernorConfig,
    ) -> Result<(Self, broadcast::Receiver<GovernorConfig>), ConfigError> {
        let (updates, rx) = broadcast::channel(8);
        let latest = Arc::new(RwLock::new(initial));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut fs = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| {
                if let Ok(event) = res {
                    let _ = event_tx.send(event);
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| io_error(&path, e))?;

        // Editors often save by writing a temp file and renaming it over the
        // original, so the directory is watched rather than the file.
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        fs.watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| io_error(&dir, e))?;

        tokio::spawn(reload_loop(path, event_rx, updates.clone(), Arc::clone(&latest)));

        Ok((
            Self {
                updates,
                latest,
                _fs: fs,
            },
            rx,
        ))
    }

    /// Subscribe to accepted reloads.
    pub fn subscribe(&self) -> broadcast::Receiver<GovernorConfig> {
        self.updates.subscribe()
    }

    /// The last accepted config.
    pub fn latest(&self) -> GovernorConfig {
        self.latest.read().clone()
    }
}

async fn reload_loop(
    path: PathBuf,
    mut events: mpsc::UnboundedReceiver<notify::Event>,
    updates: broadcast::Sender<GovernorConfig>,
    latest: Arc<RwLock<GovernorConfig>>,
) {
    while let Some(event) = events.recv().await {
        if !touches(&event, &path) {
            continue;
        }

        // Absorb the rest of the burst.
        loop {
            match tokio::time::timeout(SETTLE, events.recv()).await {
                Ok(Some(_)) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }

        match load_from_file(&path) {
            Ok(config) => {
                if *latest.read() == config {
                    debug!(path = %path.display(), "config rewritten without changes");
                    continue;
                }
                info!(
                    path = %path.display(),
                    rapid_mode = config.engagement.rapid_mode,
                    "governor config reloaded"
                );
                *latest.write() = config.clone();
                let _ = updates.send(config);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config reload rejected, keeping current");
            }
        }
    }
    debug!(path = %path.display(), "config watcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::load_from_str;

    const BASE: &str = "[engagement]\nwindow_minutes = 60\nmoderate_threshold = 3\nhigh_threshold = 6\n";

    fn start(dir: &tempfile::TempDir) -> (PathBuf, ConfigWatcher, broadcast::Receiver<GovernorConfig>) {
        let path = dir.path().join("governor.toml");
        std::fs::write(&path, BASE).unwrap();
        let initial = load_from_str(BASE, "base").unwrap();
        let (watcher, rx) = ConfigWatcher::new(path.clone(), initial).unwrap();
        (path, watcher, rx)
    }

    #[tokio::test]
    async fn test_valid_edit_is_broadcast_and_retained() {
        let dir = tempfile::tempdir().unwrap();
        let (path, watcher, mut rx) = start(&dir);
        tokio::time::sleep(Duration::from_millis(200)).await;

        std::fs::write(&path, BASE.replace("high_threshold = 6", "high_threshold = 9")).unwrap();

        let config = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("reload within timeout")
            .unwrap();
        assert_eq!(config.engagement.high_threshold, 9);
        assert_eq!(watcher.latest().engagement.high_threshold, 9);
    }

    #[tokio::test]
    async fn test_invalid_edit_is_not_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let (path, watcher, mut rx) = start(&dir);
        tokio::time::sleep(Duration::from_millis(200)).await;

        std::fs::write(&path, "[engagement]\nmoderate_threshold = 9\nhigh_threshold = 1\n").unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(result.is_err(), "invalid config must not be broadcast");
        assert_eq!(watcher.latest().engagement.high_threshold, 6);
    }

    #[tokio::test]
    async fn test_unchanged_rewrite_is_not_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _watcher, mut rx) = start(&dir);
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Same effective config, different text.
        std::fs::write(&path, format!("# touched\n{BASE}")).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let result = ConfigWatcher::new(
            PathBuf::from("/definitely/nonexistent/dir/governor.toml"),
            GovernorConfig::default(),
        );
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
