//! Drop-zone folder watcher.
//!
//! Feeds newly created regular files in one directory (non-recursive) into
//! the file intake queue.

use std::path::PathBuf;

use anyhow::{Context, Result};
use lumen_core::WorkerHandle;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::queue::IntakeSender;

pub struct FolderWatcher {
    dir: PathBuf,
    queue: IntakeSender<PathBuf>,
}

impl FolderWatcher {
    pub fn new(dir: impl Into<PathBuf>, queue: IntakeSender<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            queue,
        }
    }

    /// Create the directory if needed, register the OS watch and start
    /// forwarding. Fails only if the directory or the watch cannot be set up.
    pub fn spawn(self) -> Result<WorkerHandle> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create drop zone {}", self.dir.display()))?;

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let _ = event_tx.send(event);
                }
                Err(e) => tracing::warn!("Folder watch error: {}", e),
            },
            Config::default(),
        )
        .context("Failed to create folder watcher")?;
        watcher
            .watch(&self.dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", self.dir.display()))?;

        tracing::info!("Watching drop zone: {}", self.dir.display());
        let queue = self.queue;

        Ok(WorkerHandle::spawn("FolderWatcher", move |mut stop| async move {
            // Dropping the watcher unregisters the OS watch.
            let _watcher = watcher;
            loop {
                tokio::select! {
                    _ = stop.stopped() => break,
                    event = event_rx.recv() => {
                        let Some(event) = event else { break };
                        if !matches!(event.kind, EventKind::Create(_)) {
                            continue;
                        }
                        for path in event.paths.into_iter().filter(|p| p.is_file()) {
                            tracing::info!("New file detected: {}", path.display());
                            if !queue.send(path) {
                                tracing::warn!("File intake queue is closed");
                            }
                        }
                    }
                }
            }
            tracing::info!("FolderWatcher stopped watching");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{intake_queue, Dequeued};
    use lumen_core::Daemon;
    use std::time::Duration;

    #[tokio::test]
    async fn test_creates_missing_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let zone = dir.path().join("dropzone");
        let (tx, _rx) = intake_queue();
        let handle = FolderWatcher::new(&zone, tx).spawn().unwrap();
        assert!(zone.is_dir());
        assert!(handle.is_alive());
        handle.stop().await;
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn test_new_file_is_enqueued() {
        let dir = tempfile::TempDir::new().unwrap();
        let (tx, mut rx) = intake_queue();
        let handle = FolderWatcher::new(dir.path(), tx).spawn().unwrap();

        let dropped = dir.path().join("hello.txt");
        std::fs::write(&dropped, "hi").unwrap();

        let mut seen = None;
        for _ in 0..40 {
            if let Dequeued::Item(path) = rx.recv_timeout(Duration::from_millis(50)).await {
                seen = Some(path);
                break;
            }
        }
        handle.stop().await;
        let seen = seen.expect("watcher should report the new file");
        assert_eq!(seen.file_name(), dropped.file_name());
    }
}
