//! Reloads the engine when its workbook file changes on disk.

use crate::engine::SalesEngine;
use crate::error::{Result, SalesEngineError};
use crate::source::FileStamp;
use chrono::{DateTime, Utc};
use futures::Stream;
use log::{debug, info, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Emitted after a file change has been loaded into a new snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataUpdated {
    pub last_modified: DateTime<Utc>,
    pub generation: u64,
}

/// Caller's end of a running watch. Dropping it leaves the watch running
/// until its token is cancelled.
pub struct WatchHandle {
    updates: mpsc::UnboundedReceiver<DataUpdated>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    /// Next update, or `None` once the watch has stopped.
    pub async fn next_update(&mut self) -> Option<DataUpdated> {
        self.updates.recv().await
    }

    pub fn into_stream(self) -> impl Stream<Item = DataUpdated> {
        futures::stream::unfold(self, |mut handle| async move {
            let update = handle.next_update().await?;
            Some((update, handle))
        })
    }

    /// False when the watch failed to start or has already stopped.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the watch task to exit.
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Watch task ended abnormally: {}", e);
            }
        }
    }
}

/// Starts watching the engine's workbook file. Must be called from within a
/// tokio runtime.
///
/// Setup failures (no file behind the source, unwatchable directory) are
/// logged and yield a handle whose update stream is already closed; the
/// engine keeps serving its cache either way.
pub fn watch_for_changes(engine: Arc<SalesEngine>, cancel: CancellationToken) -> WatchHandle {
    let (tx, updates) = mpsc::unbounded_channel();

    let task = match start(&engine) {
        Ok((watcher, signals, path)) => {
            info!("Watching {} for changes", path.display());
            let debounce = Duration::from_millis(engine.config().debounce_ms);
            // Compare against what the cached snapshot was built from, so a
            // change made before the watch started is not missed.
            let last_stamp = match engine.current_snapshot() {
                Some(snapshot) => snapshot.source_stamp,
                None => FileStamp::read(&path),
            };
            let loop_state = WatchLoop {
                engine,
                path,
                debounce,
                cancel: cancel.clone(),
                updates: tx,
                last_stamp,
            };
            Some(tokio::spawn(loop_state.run(watcher, signals)))
        }
        Err(e) => {
            warn!("File watcher not started: {}", e);
            None
        }
    };

    WatchHandle {
        updates,
        cancel,
        task,
    }
}

fn start(
    engine: &SalesEngine,
) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<()>, PathBuf)> {
    let path = engine
        .watch_path()
        .ok_or_else(|| SalesEngineError::Config("workbook source has no file to watch".to_string()))?;
    let file_name = path
        .file_name()
        .map(OsString::from)
        .ok_or_else(|| SalesEngineError::Config(format!("{} is not a file path", path.display())))?;
    let dir = watch_dir(&path);

    let (tx, signals) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if matches!(event.kind, EventKind::Access(_)) {
                return;
            }
            if event
                .paths
                .iter()
                .any(|p| p.file_name() == Some(file_name.as_os_str()))
            {
                let _ = tx.send(());
            }
        }
        Err(e) => warn!("File watch error: {}", e),
    })?;

    // Editors replace files on save, so watch the directory rather than the
    // file itself.
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    Ok((watcher, signals, path))
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

struct WatchLoop {
    engine: Arc<SalesEngine>,
    path: PathBuf,
    debounce: Duration,
    cancel: CancellationToken,
    updates: mpsc::UnboundedSender<DataUpdated>,
    last_stamp: Option<FileStamp>,
}

impl WatchLoop {
    async fn run(mut self, watcher: RecommendedWatcher, mut signals: mpsc::UnboundedReceiver<()>) {
        // Held for the life of the loop; dropping it removes the OS watch.
        let _watcher = watcher;

        let mut running =
            self.engine.current_snapshot().is_none() || self.reload_if_changed().await;

        'watch: while running {
            tokio::select! {
                _ = self.cancel.cancelled() => break 'watch,
                signal = signals.recv() => {
                    if signal.is_none() {
                        break 'watch;
                    }
                }
            }

            // Wait for the file to go quiet.
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break 'watch,
                    _ = tokio::time::sleep(self.debounce) => break,
                    signal = signals.recv() => {
                        if signal.is_none() {
                            break 'watch;
                        }
                    }
                }
            }

            running = self.reload_if_changed().await;
        }

        info!("Stopped watching {}", self.path.display());
    }

    /// Returns false when the watch should stop.
    async fn reload_if_changed(&mut self) -> bool {
        let stamp = FileStamp::read(&self.path);
        if stamp == self.last_stamp {
            debug!("Ignoring event for {}: file unchanged", self.path.display());
            return true;
        }
        // Recorded up front so a file that fails to load is not retried
        // until it changes again.
        self.last_stamp = stamp;
        self.reload(stamp).await
    }

    async fn reload(&mut self, stamp: Option<FileStamp>) -> bool {
        if self.engine.is_shut_down() {
            return false;
        }
        debug!("Change detected in {}; reloading", self.path.display());

        let engine = Arc::clone(&self.engine);
        match tokio::task::spawn_blocking(move || engine.reload()).await {
            Ok(Ok(snapshot)) => {
                self.last_stamp = snapshot.source_stamp.or(stamp);
                let last_modified = snapshot
                    .last_modified
                    .or_else(|| stamp.and_then(|s| s.modified_utc()))
                    .unwrap_or_else(Utc::now);
                let update = DataUpdated {
                    last_modified,
                    generation: snapshot.generation,
                };
                if self.updates.send(update).is_err() {
                    debug!("No listener for data updates");
                }
                true
            }
            Ok(Err(SalesEngineError::ShutDown)) => false,
            Ok(Err(e)) => {
                warn!("Reload after change to {} failed: {}", self.path.display(), e);
                true
            }
            Err(e) => {
                warn!("Reload task failed: {}", e);
                true
            }
        }
    }
}
