//! Trigger Watcher
//!
//! Polls the newest short-term memories and applies the mood/scene effects
//! of every lore trigger rule whose keyword appears in an item's text. Each
//! item fires the table at most once, so a rule does not keep re-applying
//! its mood after idle decay has reset it.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::SecondsFormat;
use lumen_core::{MemoryItem, Tier, TriggerRule, WorkerHandle};
use lumen_memory::SharedStateStore;
use tokio::sync::Mutex;

/// Read the rule table. A missing or invalid file yields no rules.
pub fn load_rules(path: &Path) -> Vec<TriggerRule> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("Trigger file not found: {}", path.display());
            return Vec::new();
        }
        Err(e) => {
            tracing::warn!("Could not read trigger file {}: {}", path.display(), e);
            return Vec::new();
        }
    };
    match serde_json::from_str::<Vec<TriggerRule>>(&raw) {
        Ok(rules) => {
            tracing::info!("Loaded {} lore triggers from {}", rules.len(), path.display());
            rules
        }
        Err(e) => {
            tracing::warn!("Invalid JSON in trigger file {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Identity of one version of an item. A rewrite stamps `edited_timestamp`,
/// so rewritten text is matched again.
fn item_key(item: &MemoryItem) -> String {
    let edited = item
        .edited_timestamp
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Nanos, true))
        .unwrap_or_default();
    match item.id {
        Some(id) => format!("{}@{}", id, edited),
        None => format!("{}|{}", item.timestamp.to_rfc3339(), item.text),
    }
}

pub struct TriggerWatcher {
    store: Arc<SharedStateStore>,
    rules: Vec<TriggerRule>,
    window: usize,
    interval: Duration,
    seen: Mutex<HashSet<String>>,
}

impl TriggerWatcher {
    pub fn new(store: Arc<SharedStateStore>, rules: Vec<TriggerRule>) -> Self {
        Self {
            store,
            rules,
            window: 20,
            interval: Duration::from_secs(5),
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// One poll. Returns how many rule matches were applied.
    pub async fn scan(&self) -> usize {
        if self.rules.is_empty() {
            return 0;
        }
        let recent = self.store.recent_memories(Tier::Short, self.window).await;
        let mut seen = self.seen.lock().await;
        let mut applied = 0;

        for item in &recent {
            if !seen.insert(item_key(item)) {
                continue;
            }
            for rule in self.rules.iter().filter(|r| r.matches(&item.text)) {
                tracing::info!("Lore trigger fired: '{}'", rule.keyword);
                if let Some(mood) = &rule.mood {
                    self.store.update_mood(mood).await;
                }
                if let Some(scene) = &rule.scene {
                    if let Err(e) = self.store.set_scene(scene).await {
                        tracing::warn!("Trigger '{}' could not set scene: {}", rule.keyword, e);
                    }
                }
                applied += 1;
            }
        }

        // Items that fell out of the window never come back into it.
        let window: HashSet<String> = recent.iter().map(item_key).collect();
        seen.retain(|k| window.contains(k));
        applied
    }

    pub fn spawn(self: Arc<Self>) -> WorkerHandle {
        WorkerHandle::spawn("TriggerWatcher", move |mut stop| async move {
            loop {
                self.scan().await;
                if stop.sleep(self.interval).await {
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_rules_tolerates_missing_and_invalid() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(load_rules(&dir.path().join("missing.json")).is_empty());

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "[{").unwrap();
        assert!(load_rules(&bad).is_empty());

        let good = dir.path().join("good.json");
        std::fs::write(
            &good,
            r#"[{"trigger":"storm","mood":"jealous"},{"trigger":"office","scene":"office"}]"#,
        )
        .unwrap();
        let rules = load_rules(&good);
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].scene.as_deref(), Some("office"));
    }
}
