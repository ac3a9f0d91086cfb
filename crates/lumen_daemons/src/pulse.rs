//! Pulse Coordinator
//!
//! The top-level scheduler. Every tick it:
//! 1. Builds a `PulseSnapshot` from store reads and daemon liveness checks
//! 2. Broadcasts it as `pulse` to its own observers
//! 3. While the mode is idle, runs the maintenance sequence inline
//!
//! Maintenance steps run one after another, each in its own task with a
//! timeout, so a failing, panicking or hung step is logged and the next
//! step still runs. The snapshot is always taken before maintenance.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use lumen_core::config::PulseConfig;
use lumen_core::{Daemon, DaemonHealth, Mode, Observer, PulseSnapshot, WorkerHandle};
use lumen_memory::{ObserverRegistry, SharedStateStore};
use tokio::sync::RwLock;

/// Which maintenance steps completed on a tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub decayed: bool,
    pub migrated: bool,
    pub context_rebuilt: bool,
    pub overrides_pruned: bool,
    /// Steps that errored, panicked or timed out.
    pub failures: usize,
}

pub struct PulseCoordinator {
    store: Arc<SharedStateStore>,
    daemons: RwLock<Vec<Arc<dyn Daemon>>>,
    observers: ObserverRegistry,
    interval: Duration,
    step_timeout: Duration,
    worker: Mutex<Option<WorkerHandle>>,
}

impl PulseCoordinator {
    pub fn new(store: Arc<SharedStateStore>, config: &PulseConfig) -> Self {
        Self {
            store,
            daemons: RwLock::new(Vec::new()),
            observers: ObserverRegistry::new(),
            interval: config.interval(),
            step_timeout: config.step_timeout(),
            worker: Mutex::new(None),
        }
    }

    pub fn with_intervals(mut self, interval: Duration, step_timeout: Duration) -> Self {
        self.interval = interval;
        self.step_timeout = step_timeout;
        self
    }

    pub async fn register_daemon(&self, daemon: Arc<dyn Daemon>) {
        tracing::debug!("Pulse now tracking {}", daemon.name());
        self.daemons.write().await.push(daemon);
    }

    pub async fn register_observer(&self, observer: Arc<dyn Observer>) {
        self.observers.register(observer).await;
    }

    pub async fn notify_observers(&self, event: &str, data: &serde_json::Value) -> usize {
        self.observers.notify(event, data).await
    }

    // ========================================================================
    // Tick
    // ========================================================================

    pub async fn collect_snapshot(&self) -> PulseSnapshot {
        let daemon_health: BTreeMap<String, DaemonHealth> = self
            .daemons
            .read()
            .await
            .iter()
            .map(|d| (d.name().to_string(), DaemonHealth::from_alive(d.is_alive())))
            .collect();

        self.store.pulse_snapshot(daemon_health).await
    }

    /// One full pulse: snapshot, broadcast, then idle maintenance.
    pub async fn tick(&self) -> PulseSnapshot {
        let snapshot = self.collect_snapshot().await;
        match serde_json::to_value(&snapshot) {
            Ok(data) => {
                self.observers.notify("pulse", &data).await;
            }
            Err(e) => tracing::warn!("Could not serialize pulse: {}", e),
        }
        tracing::debug!(
            "Pulse fired: mood={} mode={} scene={} memories={}",
            snapshot.mood,
            snapshot.mode,
            snapshot.scene,
            snapshot.memory_count
        );

        if snapshot.mode == Mode::Idle {
            let report = self.run_maintenance().await;
            if report.failures > 0 {
                tracing::warn!("Idle maintenance finished with {} failed step(s)", report.failures);
            }
        }
        snapshot
    }

    /// Decay mood, migrate long-term memories, rebuild a stale context and
    /// drop expired overrides, in that order.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        let store = self.store.clone();
        report.decayed = self
            .guarded("decay_mood", async move {
                Ok::<_, anyhow::Error>(store.decay_mood().await)
            })
            .await
            .is_some();

        let store = self.store.clone();
        report.migrated = self
            .guarded("migrate_long_term_memories", async move {
                store.migrate_long_term_memories().await
            })
            .await
            .is_some();

        let store = self.store.clone();
        report.context_rebuilt = self
            .guarded("rebuild_prompt_context", async move {
                // The rebuild clears the stale flag itself.
                if store.is_context_stale().await {
                    store.rebuild_prompt_context().await?;
                }
                Ok::<(), anyhow::Error>(())
            })
            .await
            .is_some();

        let store = self.store.clone();
        report.overrides_pruned = self
            .guarded("prune_expired_overrides", async move {
                Ok::<_, anyhow::Error>(store.prune_expired_overrides().await)
            })
            .await
            .is_some();

        report.failures = [
            report.decayed,
            report.migrated,
            report.context_rebuilt,
            report.overrides_pruned,
        ]
        .iter()
        .filter(|ok| !**ok)
        .count();
        report
    }

    /// Run one step on its own task, bounded by the step timeout. `None`
    /// means the step failed and was logged.
    async fn guarded<F, T>(&self, step: &str, fut: F) -> Option<T>
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let task = tokio::spawn(fut);
        let abort = task.abort_handle();
        match tokio::time::timeout(self.step_timeout, task).await {
            Ok(Ok(Ok(value))) => Some(value),
            Ok(Ok(Err(e))) => {
                tracing::warn!("Maintenance step {} failed: {:#}", step, e);
                None
            }
            Ok(Err(e)) => {
                tracing::error!("Maintenance step {} panicked: {}", step, e);
                None
            }
            Err(_) => {
                abort.abort();
                tracing::warn!(
                    "Maintenance step {} timed out after {:?}",
                    step,
                    self.step_timeout
                );
                None
            }
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|w| w.is_alive())
    }

    /// Start ticking. Returns `false` if already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.as_ref().is_some_and(|w| w.is_alive()) {
            tracing::info!("PulseCoordinator already running");
            return false;
        }
        let pulse = self.clone();
        *worker = Some(WorkerHandle::spawn("PulseCoordinator", move |mut stop| async move {
            loop {
                pulse.tick().await;
                if stop.sleep(pulse.interval).await {
                    break;
                }
            }
        }));
        true
    }

    /// Stop ticking and wait for the current tick to finish.
    pub async fn stop(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match worker {
            Some(worker) => worker.stop().await,
            None => tracing::debug!("PulseCoordinator not running"),
        }
    }
}
