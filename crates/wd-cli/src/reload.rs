//! Live reload of the configuration file.
//!
//! The directory holding the configuration file is watched through
//! `notify-debouncer-mini`. When the file changes, it is parsed again and, if
//! its directory list differs from the running one, the controller is asked
//! to switch. A broken file is logged and the current session keeps running.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wd_core::Config;
use wd_watcher::WatchController;

/// Debounce window for configuration file events.
pub const RELOAD_DEBOUNCE: Duration = Duration::from_millis(500);

/// Watches a configuration file and applies directory changes to a controller.
pub struct ConfigReloader {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    _debouncer: Debouncer<RecommendedWatcher>,
    path: Utf8PathBuf,
}

impl std::fmt::Debug for ConfigReloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigReloader")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ConfigReloader {
    /// Starts watching `path` on behalf of `controller`.
    ///
    /// # Errors
    ///
    /// Returns the `notify` error if the file's directory cannot be watched.
    pub fn spawn(
        path: &Utf8Path,
        controller: Arc<WatchController>,
        debounce: Duration,
    ) -> Result<Self, notify::Error> {
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let file_name = path.file_name().unwrap_or_default().to_owned();

        let mut debouncer = new_debouncer(debounce, move |res: DebounceEventResult| match res {
            Ok(events) => {
                let touched = events
                    .iter()
                    .any(|event| event.path.file_name() == Some(OsStr::new(&file_name)));
                if touched {
                    let _ = change_tx.send(());
                }
            }
            Err(error) => warn!(error = %error, "Configuration watcher error"),
        })?;

        // Editors often replace the file, so watch its directory instead.
        let parent = match path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
        debouncer
            .watcher()
            .watch(parent.as_std_path(), RecursiveMode::NonRecursive)?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(reload_loop(
            path.to_owned(),
            controller,
            change_rx,
            shutdown_rx,
        ));

        info!(path = %path, "Watching configuration file");
        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
            _debouncer: debouncer,
            path: path.to_owned(),
        })
    }

    /// Stops watching and waits for an in-flight reload to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "Configuration reload task failed");
            }
        }
    }
}

impl Drop for ConfigReloader {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn reload_loop(
    path: Utf8PathBuf,
    controller: Arc<WatchController>,
    mut changes: mpsc::UnboundedReceiver<()>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            change = changes.recv() => {
                if change.is_none() {
                    break;
                }
                match apply(&path, &controller).await {
                    Ok(true) => info!(path = %path, dirs = ?controller.dirs(), "Configuration reloaded"),
                    Ok(false) => debug!(path = %path, "Configuration changed, directories unchanged"),
                    Err(err) => warn!(path = %path, error = %err, "Failed to apply configuration change"),
                }
            }
        }
    }
}

/// Re-reads the configuration at `path` and switches directories if needed.
///
/// Returns `true` if the controller was updated.
pub async fn apply(path: &Utf8Path, controller: &WatchController) -> color_eyre::Result<bool> {
    let config = Config::from_file(path)?;
    let dirs = config.watch.unique_dirs();

    if let Some(current) = controller.grace_period() {
        if current != config.watch.grace_period() {
            warn!(
                current_ms = current.as_millis(),
                configured_ms = config.watch.grace_period_ms,
                "Grace period changes take effect after a restart"
            );
        }
    }

    if dirs == controller.dirs() {
        return Ok(false);
    }

    controller.update_dirs(&dirs).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const GRACE: Duration = Duration::from_millis(200);

    struct Fixture {
        _temp: TempDir,
        base: Utf8PathBuf,
        config: Utf8PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().expect("Failed to create temp directory");
        let base = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("Invalid path");
        fs::create_dir(base.join("a")).unwrap();
        fs::create_dir(base.join("b")).unwrap();
        let config = base.join("adwatchd.json");
        Fixture {
            _temp: temp,
            base,
            config,
        }
    }

    fn write_config(path: &Utf8Path, dirs: &[Utf8PathBuf]) {
        let config = Config {
            watch: wd_core::WatchConfig {
                dirs: dirs.to_vec(),
                grace_period_ms: 200,
            },
            verbose: 0,
        };
        fs::write(path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_apply_unchanged_dirs() {
        let fx = fixture();
        let a = fx.base.join("a");
        write_config(&fx.config, &[a.clone()]);
        let controller = WatchController::default();
        controller.start(&[a], GRACE).await.unwrap();

        assert!(!apply(&fx.config, &controller).await.unwrap());
        controller.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_apply_switches_dirs() {
        let fx = fixture();
        let (a, b) = (fx.base.join("a"), fx.base.join("b"));
        write_config(&fx.config, &[b.clone(), a.clone()]);
        let controller = WatchController::default();
        controller.start(&[a.clone()], GRACE).await.unwrap();

        assert!(apply(&fx.config, &controller).await.unwrap());
        assert_eq!(controller.dirs(), vec![b, a]);
        controller.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_apply_invalid_file_keeps_session() {
        let fx = fixture();
        let a = fx.base.join("a");
        fs::write(&fx.config, "{ not json").unwrap();
        let controller = WatchController::default();
        controller.start(&[a.clone()], GRACE).await.unwrap();

        assert!(apply(&fx.config, &controller).await.is_err());
        assert!(controller.is_running());
        assert_eq!(controller.dirs(), vec![a]);
        controller.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_reloader_follows_file_changes() {
        let fx = fixture();
        let (a, b) = (fx.base.join("a"), fx.base.join("b"));
        write_config(&fx.config, &[a.clone()]);
        let controller = Arc::new(WatchController::default());
        controller.start(&[a], GRACE).await.unwrap();

        let reloader = ConfigReloader::spawn(
            &fx.config,
            Arc::clone(&controller),
            Duration::from_millis(100),
        )
        .unwrap();
        write_config(&fx.config, &[b.clone()]);

        let started = std::time::Instant::now();
        while controller.dirs() != vec![b.clone()] && started.elapsed() < Duration::from_secs(5) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(controller.dirs(), vec![b]);

        reloader.shutdown().await;
        controller.stop().await.unwrap();
    }
}
