//! Observer fan-out
//!
//! Both the state store and the pulse coordinator broadcast through an
//! [`ObserverRegistry`]. The registry never holds its own lock while calling
//! out: the observer list is cloned first, so a callback may register more
//! observers or call back into the store.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use lumen_core::{LumenError, Observer};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<Vec<Arc<dyn Observer>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, observer: Arc<dyn Observer>) {
        self.observers.write().await.push(observer);
    }

    pub async fn len(&self) -> usize {
        self.observers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Deliver `event` to every observer in registration order.
    ///
    /// Returns the number of observers that failed (error or panic). A
    /// failure is logged and delivery continues with the next observer.
    pub async fn notify(&self, event: &str, data: &serde_json::Value) -> usize {
        let observers: Vec<Arc<dyn Observer>> = self.observers.read().await.clone();
        let mut failures = 0;
        for (idx, observer) in observers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| observer.on_event(event, data))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::warn!("{}", failure(idx, event, &format!("{:#}", e)));
                }
                Err(_) => {
                    failures += 1;
                    tracing::error!("{}", failure(idx, event, "panicked"));
                }
            }
        }
        failures
    }
}

fn failure(idx: usize, event: &str, reason: &str) -> LumenError {
    LumenError::Observer(format!("#{} on '{}': {}", idx, event, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter(hits: Arc<AtomicUsize>) -> Arc<dyn Observer> {
        Arc::new(move |_: &str, _: &serde_json::Value| -> anyhow::Result<()> {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_failing_observer_does_not_block_others() {
        let registry = ObserverRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        registry.register(counter(hits.clone())).await;
        registry
            .register(Arc::new(|_: &str, _: &serde_json::Value| -> anyhow::Result<()> {
                anyhow::bail!("renderer offline")
            }))
            .await;
        registry
            .register(Arc::new(|_: &str, _: &serde_json::Value| -> anyhow::Result<()> {
                panic!("renderer crashed")
            }))
            .await;
        registry.register(counter(hits.clone())).await;

        let failures = registry.notify("mood_changed", &json!({"old": "neutral", "new": "happy"})).await;
        assert_eq!(failures, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_observer_may_register_during_notify() {
        let registry = Arc::new(ObserverRegistry::new());
        let inner = registry.clone();
        registry
            .register(Arc::new(move |_: &str, _: &serde_json::Value| -> anyhow::Result<()> {
                // Must not deadlock: the read guard is gone by the time we run.
                assert!(inner.observers.try_write().is_ok());
                Ok(())
            }))
            .await;
        assert_eq!(registry.notify("pulse", &json!({})).await, 0);
    }

    #[test]
    fn test_failure_is_reported_as_observer_error() {
        let err = failure(1, "pulse", "renderer offline");
        assert!(matches!(err, LumenError::Observer(_)));
        assert_eq!(err.to_string(), "observer failed: #1 on 'pulse': renderer offline");
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let registry = ObserverRegistry::new();
        assert!(registry.is_empty().await);
        assert_eq!(registry.notify("pulse", &serde_json::Value::Null).await, 0);
    }
}
