//! Background worker plumbing
//!
//! Every daemon runs as one tokio task paired with a stop flag. The task
//! receives a [`StopSignal`] and is expected to check it on every loop
//! iteration and after every bounded wait; the owner keeps a
//! [`WorkerHandle`], which is the `Daemon` the pulse polls for liveness.

use async_trait::async_trait;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::Daemon;

/// Cooperative stop flag handed to a worker task.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `period`, waking early if stop is raised.
    /// Returns `true` when the worker should exit.
    pub async fn sleep(&mut self, period: Duration) -> bool {
        if self.is_stopped() {
            return true;
        }
        let closed = tokio::select! {
            _ = tokio::time::sleep(period) => false,
            changed = self.rx.changed() => changed.is_err(),
        };
        closed || self.is_stopped()
    }

    /// Resolves once stop is raised or the owning handle is gone.
    pub async fn stopped(&mut self) {
        while !self.is_stopped() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Owner side of a spawned worker.
pub struct WorkerHandle {
    name: String,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerHandle {
    /// Spawn `body` on the tokio runtime with a fresh stop signal.
    pub fn spawn<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(StopSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let (stop_tx, rx) = watch::channel(false);
        let task = tokio::spawn(body(StopSignal { rx }));
        tracing::info!("{} started", name);
        Self {
            name,
            stop_tx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Raise the stop flag without waiting for the task to exit.
    pub fn signal_stop(&self) {
        // Err only means the task already dropped its receiver.
        let _ = self.stop_tx.send(true);
    }
}

#[async_trait]
impl Daemon for WorkerHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_alive(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    async fn stop(&self) {
        tracing::info!("Stopping {}...", self.name);
        self.signal_stop();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(task) = task else {
            tracing::debug!("{} already stopped", self.name);
            return;
        };
        match task.await {
            Ok(()) => tracing::info!("{} stopped", self.name),
            Err(e) if e.is_panic() => tracing::error!("{} worker had panicked: {}", self.name, e),
            Err(e) => tracing::warn!("{} worker ended abnormally: {}", self.name, e),
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_worker_stops_on_signal() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let handle = WorkerHandle::spawn("ticker", move |mut stop| async move {
            loop {
                counter.fetch_add(1, Ordering::SeqCst);
                if stop.sleep(Duration::from_millis(5)).await {
                    break;
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(handle.is_alive());
        handle.stop().await;
        assert!(!handle.is_alive());
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn test_sleep_wakes_early_on_stop() {
        let handle = WorkerHandle::spawn("sleeper", |mut stop| async move {
            stop.sleep(Duration::from_secs(3600)).await;
        });
        let started = std::time::Instant::now();
        handle.stop().await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_panicked_worker_reports_dead() {
        let handle = WorkerHandle::spawn("crasher", |_stop| async move {
            panic!("boom");
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_alive());
        // Joining a panicked task is logged, not propagated
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let handle = WorkerHandle::spawn("once", |mut stop| async move {
            stop.sleep(Duration::from_secs(60)).await;
        });
        handle.stop().await;
        handle.stop().await;
        assert_eq!(handle.name(), "once");
    }

    #[tokio::test]
    async fn test_stopped_resolves_on_signal() {
        let handle = WorkerHandle::spawn("waiter", |mut stop| async move {
            stop.stopped().await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.is_alive());
        handle.stop().await;
        assert!(!handle.is_alive());
    }
}
