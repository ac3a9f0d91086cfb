//! Shared State Store
//!
//! Sole owner of the `PersonaState`. Every read copies out of a single
//! `tokio::sync::Mutex` section; every mutation runs to completion inside
//! one section, then (with the lock released) makes exactly one persistence
//! attempt and one observer broadcast.
//!
//! Persistence is serialized by a dedicated save lock and always writes the
//! state as it is at save time, so concurrent mutators cannot leave an older
//! snapshot on disk after a newer one.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use lumen_core::{
    DaemonHealth, LumenError, ManualOverride, MemoryItem, Mode, Observer, OverrideKey,
    PersonaState, PulseSnapshot, Recollection, SceneSource, SceneState, SemanticMemory,
    StateSink, Tier, NEUTRAL_MOOD,
};
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::observer::ObserverRegistry;

/// Short-term items included in a rebuilt prompt context.
const CONTEXT_SHORT_ITEMS: usize = 5;
/// Long-term recollections peeked for a rebuilt prompt context.
const CONTEXT_LONG_ITEMS: usize = 3;

struct Inner {
    state: PersonaState,
    /// Bumped whenever the context is marked stale, so a rebuild that raced
    /// with a mutation does not clear a flag it never accounted for.
    context_epoch: u64,
}

impl Inner {
    fn mark_stale(&mut self) {
        self.state.context_stale = true;
        self.context_epoch += 1;
    }
}

pub struct SharedStateStore {
    inner: Arc<Mutex<Inner>>,
    save_lock: Mutex<()>,
    sink: Arc<dyn StateSink>,
    semantic: Arc<dyn SemanticMemory>,
    scenes: Arc<dyn SceneSource>,
    observers: ObserverRegistry,
}

impl SharedStateStore {
    /// Load the durable snapshot if there is one. A missing or unreadable
    /// snapshot starts from defaults; construction itself never fails.
    pub async fn open(
        sink: Arc<dyn StateSink>,
        semantic: Arc<dyn SemanticMemory>,
        scenes: Arc<dyn SceneSource>,
    ) -> Self {
        let state = match sink.load().await {
            Ok(Some(state)) => {
                tracing::info!(
                    "Loaded persona state (mood={}, mode={}, {} short / {} long memories)",
                    state.mood,
                    state.mode,
                    state.short_term_memory.len(),
                    state.long_term_memory.len()
                );
                state
            }
            Ok(None) => {
                tracing::info!("No saved persona state, starting fresh");
                PersonaState::default()
            }
            Err(e) => {
                tracing::warn!("Could not load persona state ({:#}), starting fresh", e);
                PersonaState::default()
            }
        };

        Self {
            inner: Arc::new(Mutex::new(Inner {
                state,
                context_epoch: 0,
            })),
            save_lock: Mutex::new(()),
            sink,
            semantic,
            scenes,
            observers: ObserverRegistry::new(),
        }
    }

    // ========================================================================
    // Persistence & observers
    // ========================================================================

    /// Write the current snapshot. Failures are logged; the in-memory state
    /// stays authoritative and the next mutation retries.
    pub async fn save_state(&self) {
        let _guard = self.save_lock.lock().await;
        let snapshot = self.inner.lock().await.state.clone();
        if let Err(e) = self.sink.save(&snapshot).await {
            let err = LumenError::Persistence(format!("{:#}", e));
            tracing::warn!("{}", err);
        }
    }

    pub async fn register_observer(&self, observer: Arc<dyn Observer>) {
        self.observers.register(observer).await;
    }

    /// Broadcast to every registered observer; returns how many failed.
    pub async fn notify_observers(&self, event: &str, data: serde_json::Value) -> usize {
        self.observers.notify(event, &data).await
    }

    async fn commit(&self, event: &str, data: serde_json::Value) {
        self.save_state().await;
        self.notify_observers(event, data).await;
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn get_mood(&self) -> String {
        self.inner.lock().await.state.effective_mood(Utc::now())
    }

    pub async fn get_mode(&self) -> Mode {
        self.inner.lock().await.state.effective_mode(Utc::now())
    }

    pub async fn get_scene(&self) -> SceneState {
        self.inner.lock().await.state.scene.clone()
    }

    /// Full copy of the persona record.
    pub async fn snapshot(&self) -> PersonaState {
        self.inner.lock().await.state.clone()
    }

    pub async fn get_memories(&self, tier: Tier) -> Vec<MemoryItem> {
        self.inner.lock().await.state.memories(tier).clone()
    }

    /// The newest `n` items of a tier, oldest first.
    pub async fn recent_memories(&self, tier: Tier, n: usize) -> Vec<MemoryItem> {
        let inner = self.inner.lock().await;
        let items = inner.state.memories(tier);
        items[items.len().saturating_sub(n)..].to_vec()
    }

    pub async fn memory_count(&self, tier: Tier) -> usize {
        self.inner.lock().await.state.memories(tier).len()
    }

    /// Mood, mode, scene and short-term count copied in one lock section,
    /// so a pulse never mixes two states.
    pub async fn pulse_snapshot(
        &self,
        daemon_health: BTreeMap<String, DaemonHealth>,
    ) -> PulseSnapshot {
        let inner = self.inner.lock().await;
        let now = Utc::now();
        PulseSnapshot {
            mood: inner.state.effective_mood(now),
            mode: inner.state.effective_mode(now),
            scene: inner.state.scene.name.clone(),
            memory_count: inner.state.short_term_memory.len(),
            daemon_health,
            timestamp: now,
        }
    }

    pub async fn prompt_context(&self) -> Option<String> {
        self.inner.lock().await.state.prompt_context.clone()
    }

    // ========================================================================
    // Mood / mode / scene
    // ========================================================================

    /// Replace the mood. Broadcasts `mood_changed` on every call, even when
    /// the value is unchanged.
    pub async fn update_mood(&self, new_mood: &str) {
        let old = {
            let mut inner = self.inner.lock().await;
            let old = std::mem::replace(&mut inner.state.mood, new_mood.to_string());
            inner.state.touch();
            inner.mark_stale();
            old
        };
        tracing::debug!("Mood {} -> {}", old, new_mood);
        self.commit("mood_changed", json!({ "old": old, "new": new_mood }))
            .await;
    }

    /// Reset a non-neutral mood. Returns whether anything changed; a mood that
    /// is already neutral is left alone with no save and no broadcast.
    pub async fn decay_mood(&self) -> bool {
        let old = {
            let mut inner = self.inner.lock().await;
            if inner.state.mood == NEUTRAL_MOOD {
                return false;
            }
            let old = std::mem::replace(&mut inner.state.mood, NEUTRAL_MOOD.to_string());
            inner.state.touch();
            inner.mark_stale();
            old
        };
        tracing::info!("Mood decayed: {} -> {}", old, NEUTRAL_MOOD);
        self.commit("mood_changed", json!({ "old": old, "new": NEUTRAL_MOOD }))
            .await;
        true
    }

    /// Switch mode. Unknown names are rejected with state unchanged.
    pub async fn set_mode(&self, mode: &str) -> Result<Mode, LumenError> {
        let new_mode: Mode = match mode.parse() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Rejected mode change: {}", e);
                return Err(e);
            }
        };
        let old = {
            let mut inner = self.inner.lock().await;
            let old = std::mem::replace(&mut inner.state.mode, new_mode);
            inner.state.touch();
            old
        };
        tracing::info!("Mode {} -> {}", old, new_mode);
        self.commit(
            "mode_changed",
            json!({ "old": old.as_str(), "new": new_mode.as_str() }),
        )
        .await;
        Ok(new_mode)
    }

    /// Load the named scene and swap it in. The payload is fetched before the
    /// lock is taken; the name and payload are replaced together.
    pub async fn set_scene(&self, name: &str) -> Result<(), LumenError> {
        if !is_valid_scene_name(name) {
            let err = LumenError::InvalidScene(name.to_string());
            tracing::warn!("{}", err);
            return Err(err);
        }
        let payload = match self.scenes.load_scene(name).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                let err = LumenError::SceneUnavailable {
                    name: name.to_string(),
                    reason: "not found".to_string(),
                };
                tracing::warn!("{}", err);
                return Err(err);
            }
            Err(e) => {
                let err = LumenError::SceneUnavailable {
                    name: name.to_string(),
                    reason: format!("{:#}", e),
                };
                tracing::warn!("{}", err);
                return Err(err);
            }
        };

        let old = {
            let mut inner = self.inner.lock().await;
            let old = std::mem::replace(
                &mut inner.state.scene,
                SceneState {
                    name: name.to_string(),
                    payload: Some(payload),
                },
            );
            inner.state.touch();
            inner.mark_stale();
            old.name
        };
        tracing::info!("Scene {} -> {}", old, name);
        self.commit("scene_changed", json!({ "old": old, "new": name }))
            .await;
        Ok(())
    }

    // ========================================================================
    // Memories
    // ========================================================================

    pub async fn add_memory(&self, text: &str, tier: Tier) -> MemoryItem {
        self.add_memory_item(MemoryItem::new(text), tier).await
    }

    /// Append a prepared item (source/metadata already attached). The item is
    /// stamped with the current time and given an id if it lacks one.
    ///
    /// Indexing into the semantic backend is spawned and never awaited; when
    /// it succeeds for a long-term item the item is marked migrated.
    pub async fn add_memory_item(&self, mut item: MemoryItem, tier: Tier) -> MemoryItem {
        item.timestamp = Utc::now();
        if item.id.is_none() {
            item.id = Some(Uuid::new_v4());
        }

        {
            let mut inner = self.inner.lock().await;
            inner.state.memories_mut(tier).push(item.clone());
            inner.state.touch();
            inner.mark_stale();
        }

        self.commit(
            "memory_added",
            json!({ "id": item.id, "tier": tier.as_str(), "text": item.text }),
        )
        .await;

        self.spawn_index(&item, tier);
        item
    }

    fn spawn_index(&self, item: &MemoryItem, tier: Tier) {
        let semantic = self.semantic.clone();
        let inner = self.inner.clone();
        let id = item.id;
        let text = item.text.clone();
        let mut metadata = item.metadata.clone();
        if tier == Tier::Long {
            metadata.migrated = true;
        }
        tokio::spawn(async move {
            if let Err(e) = semantic.index(&text, tier, &metadata).await {
                tracing::warn!("Semantic indexing failed ({} tier): {:#}", tier, e);
                return;
            }
            if tier == Tier::Long {
                let mut inner = inner.lock().await;
                if let Some(found) = inner
                    .state
                    .long_term_memory
                    .iter_mut()
                    .find(|m| m.id.is_some() && m.id == id)
                {
                    found.metadata.migrated = true;
                }
            }
        });
    }

    /// Replace the text of the item with `id`. Returns `false` (with no save
    /// and no broadcast) when no such item exists in that tier.
    pub async fn rewrite_memory(&self, id: Uuid, new_text: &str, tier: Tier) -> bool {
        {
            let mut inner = self.inner.lock().await;
            let Some(item) = inner
                .state
                .memories_mut(tier)
                .iter_mut()
                .find(|m| m.id == Some(id))
            else {
                tracing::debug!("rewrite_memory: no {} memory with id {}", tier, id);
                return false;
            };
            item.text = new_text.to_string();
            item.edited_timestamp = Some(Utc::now());
            inner.state.touch();
            inner.mark_stale();
        }
        self.commit(
            "memory_rewritten",
            json!({ "id": id, "tier": tier.as_str(), "text": new_text }),
        )
        .await;
        true
    }

    /// Keep only the newest `limit` short-term items. Returns how many were
    /// dropped; nothing is saved or broadcast when that is zero.
    pub async fn prune_short_term(&self, limit: usize) -> usize {
        let removed = {
            let mut inner = self.inner.lock().await;
            let items = &mut inner.state.short_term_memory;
            if items.len() <= limit {
                return 0;
            }
            items.sort_by_key(|m| m.timestamp);
            let excess = items.len() - limit;
            items.drain(..excess);
            inner.state.touch();
            inner.mark_stale();
            excess
        };
        tracing::info!("Pruned {} short-term memories (limit {})", removed, limit);
        self.commit("memories_pruned", json!({ "tier": "short", "removed": removed }))
            .await;
        removed
    }

    /// Forward every long-term item not yet migrated to the semantic backend.
    /// Each item is marked once its indexing succeeds, so it is migrated at
    /// most once. Returns the number migrated by this call.
    pub async fn migrate_long_term_memories(&self) -> Result<usize> {
        let pending: Vec<MemoryItem> = {
            let inner = self.inner.lock().await;
            inner
                .state
                .long_term_memory
                .iter()
                .filter(|m| !m.metadata.migrated)
                .cloned()
                .collect()
        };
        if pending.is_empty() {
            return Ok(0);
        }

        let mut done = Vec::with_capacity(pending.len());
        let mut failed = 0usize;
        for item in &pending {
            let mut metadata = item.metadata.clone();
            metadata.migrated = true;
            match self.semantic.index(&item.text, Tier::Long, &metadata).await {
                Ok(()) => done.push(item),
                Err(e) => {
                    failed += 1;
                    tracing::warn!("Failed to migrate long-term memory: {:#}", e);
                }
            }
        }

        if !done.is_empty() {
            {
                let mut inner = self.inner.lock().await;
                for item in inner.state.long_term_memory.iter_mut() {
                    let matched = done.iter().any(|d| match (d.id, item.id) {
                        (Some(a), Some(b)) => a == b,
                        _ => d.timestamp == item.timestamp && d.text == item.text,
                    });
                    if matched {
                        item.metadata.migrated = true;
                    }
                }
                inner.state.touch();
            }
            tracing::info!("Migrated {} long-term memories", done.len());
            self.commit("memories_migrated", json!({ "count": done.len() }))
                .await;
        }

        if failed > 0 {
            anyhow::bail!(
                "{} of {} long-term memories failed to migrate",
                failed,
                pending.len()
            );
        }
        Ok(done.len())
    }

    // ========================================================================
    // Prompt context
    // ========================================================================

    pub async fn mark_context_stale(&self) {
        self.inner.lock().await.mark_stale();
    }

    pub async fn clear_context_stale(&self) {
        self.inner.lock().await.state.context_stale = false;
    }

    pub async fn is_context_stale(&self) -> bool {
        self.inner.lock().await.state.context_stale
    }

    /// Reassemble the derived prompt context from mood, scene, recent
    /// short-term memories and a peek at long-term recollections, then clear
    /// the stale flag (unless something re-staled it in the meantime).
    pub async fn rebuild_prompt_context(&self) -> Result<String> {
        let (mood, scene, recent, epoch) = {
            let inner = self.inner.lock().await;
            let now = Utc::now();
            let short = &inner.state.short_term_memory;
            let recent: Vec<String> = short[short.len().saturating_sub(CONTEXT_SHORT_ITEMS)..]
                .iter()
                .map(|m| m.text.clone())
                .collect();
            (
                inner.state.effective_mood(now),
                inner.state.scene.name.clone(),
                recent,
                inner.context_epoch,
            )
        };

        let long = self.peek_memories(Tier::Long, CONTEXT_LONG_ITEMS).await;
        let context = render_context(&mood, &scene, &recent, &long);

        let cleared = {
            let mut inner = self.inner.lock().await;
            inner.state.prompt_context = Some(context.clone());
            let cleared = inner.context_epoch == epoch;
            if cleared {
                inner.state.context_stale = false;
            }
            inner.state.touch();
            cleared
        };
        if !cleared {
            tracing::debug!("Context went stale again during rebuild, leaving flag set");
        }
        tracing::info!("Rebuilt prompt context ({} chars)", context.len());
        self.commit(
            "context_rebuilt",
            json!({ "length": context.len(), "stale": !cleared }),
        )
        .await;
        Ok(context)
    }

    // ========================================================================
    // Manual overrides
    // ========================================================================

    /// Force `key` to `value` for `ttl`. Mode values are validated like
    /// `set_mode`.
    pub async fn force_override(
        &self,
        key: OverrideKey,
        value: &str,
        ttl: Duration,
    ) -> Result<ManualOverride, LumenError> {
        if key == OverrideKey::Mode {
            if let Err(e) = value.parse::<Mode>() {
                tracing::warn!("Rejected mode override: {}", e);
                return Err(e);
            }
        }
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| LumenError::InvalidOverride(format!("ttl out of range: {}", e)))?;
        let expires_at = Utc::now().checked_add_signed(ttl).ok_or_else(|| {
            LumenError::InvalidOverride(format!("ttl of {}s is out of range", ttl.num_seconds()))
        })?;
        let forced = ManualOverride {
            value: value.to_string(),
            expires_at,
        };

        {
            let mut inner = self.inner.lock().await;
            inner.state.manual_overrides.insert(key, forced.clone());
            inner.state.touch();
            if key == OverrideKey::Mood {
                inner.mark_stale();
            }
        }
        tracing::info!("Override {:?}={} until {}", key, value, forced.expires_at);
        self.commit(
            "override_set",
            json!({ "key": key, "value": value, "expires_at": forced.expires_at }),
        )
        .await;
        Ok(forced)
    }

    /// Remove an override early. Returns whether one was present.
    pub async fn clear_override(&self, key: OverrideKey) -> bool {
        {
            let mut inner = self.inner.lock().await;
            if inner.state.manual_overrides.remove(&key).is_none() {
                return false;
            }
            inner.state.touch();
            if key == OverrideKey::Mood {
                inner.mark_stale();
            }
        }
        self.commit("override_cleared", json!({ "key": key })).await;
        true
    }

    /// Overrides that have not yet expired.
    pub async fn active_overrides(&self) -> BTreeMap<OverrideKey, ManualOverride> {
        let now = Utc::now();
        self.inner
            .lock()
            .await
            .state
            .manual_overrides
            .iter()
            .filter(|(_, o)| o.is_active(now))
            .map(|(k, o)| (*k, o.clone()))
            .collect()
    }

    /// Drop expired overrides. Returns how many were removed.
    pub async fn prune_expired_overrides(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<OverrideKey> = {
            let mut inner = self.inner.lock().await;
            let expired: Vec<OverrideKey> = inner
                .state
                .manual_overrides
                .iter()
                .filter(|(_, o)| !o.is_active(now))
                .map(|(k, _)| *k)
                .collect();
            if expired.is_empty() {
                return 0;
            }
            for key in &expired {
                inner.state.manual_overrides.remove(key);
            }
            inner.state.touch();
            if expired.contains(&OverrideKey::Mood) {
                inner.mark_stale();
            }
            expired
        };
        tracing::debug!("Expired overrides: {:?}", expired);
        self.commit("overrides_expired", json!({ "keys": expired }))
            .await;
        expired.len()
    }

    // ========================================================================
    // Semantic queries
    // ========================================================================

    pub async fn search_memories(&self, query: &str, tier: Tier, n: usize) -> Vec<Recollection> {
        self.semantic
            .search(query, tier, n)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Semantic search failed: {:#}", e);
                Vec::new()
            })
    }

    pub async fn peek_memories(&self, tier: Tier, n: usize) -> Vec<Recollection> {
        self.semantic.peek(tier, n).await.unwrap_or_else(|e| {
            tracing::warn!("Semantic peek failed: {:#}", e);
            Vec::new()
        })
    }
}

fn is_valid_scene_name(name: &str) -> bool {
    !name.trim().is_empty() && !name.contains("..") && !name.contains(['/', '\\'])
}

fn render_context(mood: &str, scene: &str, recent: &[String], long: &[Recollection]) -> String {
    let mut parts = vec![format!("Current Mood: {}", mood), format!("Current Scene: {}", scene)];
    if !recent.is_empty() {
        parts.push(String::new());
        parts.push("Recent Short-Term Memories:".to_string());
        parts.extend(recent.iter().map(|t| format!("- {}", t)));
    }
    if !long.is_empty() {
        parts.push(String::new());
        parts.push("Relevant Long-Term Memories:".to_string());
        parts.extend(long.iter().map(|r| format!("- {}", r.text)));
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemorySink;
    use crate::semantic::InMemorySemanticIndex;
    use async_trait::async_trait;

    struct NoScenes;

    #[async_trait]
    impl SceneSource for NoScenes {
        async fn load_scene(&self, name: &str) -> Result<Option<serde_json::Value>> {
            Ok((name == "office").then(|| json!({ "backdrop": "desk" })))
        }
    }

    async fn store() -> (SharedStateStore, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let store = SharedStateStore::open(
            sink.clone(),
            Arc::new(InMemorySemanticIndex::new()),
            Arc::new(NoScenes),
        )
        .await;
        (store, sink)
    }

    #[tokio::test]
    async fn test_recent_memories_are_oldest_first() {
        let (store, _) = store().await;
        for text in ["a", "b", "c"] {
            store.add_memory(text, Tier::Short).await;
        }
        let recent: Vec<String> = store
            .recent_memories(Tier::Short, 2)
            .await
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(recent, vec!["b", "c"]);
        assert_eq!(store.recent_memories(Tier::Long, 5).await.len(), 0);
    }

    #[tokio::test]
    async fn test_scene_swap_and_rejection() {
        let (store, sink) = store().await;
        store.set_scene("office").await.unwrap();
        let scene = store.get_scene().await;
        assert_eq!(scene.name, "office");
        assert_eq!(scene.payload.unwrap()["backdrop"], "desk");

        let saves = sink.save_count();
        let err = store.set_scene("moon").await.unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(store.get_scene().await.name, "office");
        assert_eq!(sink.save_count(), saves);
    }

    #[tokio::test]
    async fn test_mode_override_is_validated_and_wins() {
        let (store, _) = store().await;
        assert!(store
            .force_override(OverrideKey::Mode, "sleep", Duration::from_secs(60))
            .await
            .is_err());
        assert!(store.active_overrides().await.is_empty());

        store
            .force_override(OverrideKey::Mode, "chat", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get_mode().await, Mode::Chat);
        assert_eq!(store.snapshot().await.mode, Mode::Idle);

        assert!(store.clear_override(OverrideKey::Mode).await);
        assert!(!store.clear_override(OverrideKey::Mode).await);
        assert_eq!(store.get_mode().await, Mode::Idle);
    }

    #[tokio::test]
    async fn test_huge_override_ttl_is_rejected() {
        let (store, sink) = store().await;
        let saves = sink.save_count();
        let err = store
            .force_override(
                OverrideKey::Mood,
                "sleepy",
                Duration::from_secs(9_000_000_000_000),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LumenError::InvalidOverride(_)));
        assert!(store.active_overrides().await.is_empty());
        assert_eq!(sink.save_count(), saves);
    }

    #[tokio::test]
    async fn test_pulse_snapshot_reads_effective_values() {
        let (store, _) = store().await;
        store.add_memory("one", Tier::Short).await;
        store.add_memory("kept", Tier::Long).await;
        store.set_scene("office").await.unwrap();
        store
            .force_override(OverrideKey::Mood, "tired", Duration::from_secs(60))
            .await
            .unwrap();

        let mut health = BTreeMap::new();
        health.insert("Worker".to_string(), DaemonHealth::Alive);
        let snapshot = store.pulse_snapshot(health).await;
        assert_eq!(snapshot.mood, "tired");
        assert_eq!(snapshot.mode, Mode::Idle);
        assert_eq!(snapshot.scene, "office");
        assert_eq!(snapshot.memory_count, 1);
        assert_eq!(snapshot.daemon_health["Worker"], DaemonHealth::Alive);
    }

    #[tokio::test]
    async fn test_scene_names_are_validated_before_loading() {
        let (store, sink) = store().await;
        let saves = sink.save_count();
        for bad in ["", "  ", "../office", "a/b", "a\\b"] {
            let err = store.set_scene(bad).await.unwrap_err();
            assert!(matches!(err, LumenError::InvalidScene(_)), "{bad:?}");
            assert!(err.is_configuration());
        }
        assert_eq!(store.get_scene().await.name, lumen_core::DEFAULT_SCENE);
        assert_eq!(sink.save_count(), saves);
    }

    #[tokio::test]
    async fn test_expired_overrides_are_pruned() {
        let (store, _) = store().await;
        store
            .force_override(OverrideKey::Mood, "tired", Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.get_mood().await, NEUTRAL_MOOD);
        assert_eq!(store.prune_expired_overrides().await, 1);
        assert_eq!(store.prune_expired_overrides().await, 0);
        assert!(store.snapshot().await.manual_overrides.is_empty());
    }

    #[tokio::test]
    async fn test_prune_short_term_keeps_newest() {
        let (store, sink) = store().await;
        for i in 0..5 {
            store.add_memory(&format!("m{}", i), Tier::Short).await;
        }
        let saves = sink.save_count();
        assert_eq!(store.prune_short_term(10).await, 0);
        assert_eq!(sink.save_count(), saves);

        assert_eq!(store.prune_short_term(2).await, 3);
        let left: Vec<String> = store
            .get_memories(Tier::Short)
            .await
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(left, vec!["m3", "m4"]);
    }

    #[tokio::test]
    async fn test_rebuild_context_contents_and_flag() {
        let (store, _) = store().await;
        store.update_mood("happy").await;
        store.add_memory("water the plants", Tier::Short).await;
        assert!(store.is_context_stale().await);

        let context = store.rebuild_prompt_context().await.unwrap();
        assert!(context.contains("Current Mood: happy"));
        assert!(context.contains("- water the plants"));
        assert!(!store.is_context_stale().await);
        assert_eq!(store.prompt_context().await.as_deref(), Some(context.as_str()));
    }

    #[tokio::test]
    async fn test_migration_runs_once_per_item() {
        let mut seeded = PersonaState::default();
        seeded.long_term_memory.push(MemoryItem::new("old secret"));
        seeded.long_term_memory.push(MemoryItem::new("old fact"));
        let index = Arc::new(InMemorySemanticIndex::new());
        let store = SharedStateStore::open(
            Arc::new(MemorySink::with_state(seeded)),
            index.clone(),
            Arc::new(NoScenes),
        )
        .await;

        assert_eq!(store.migrate_long_term_memories().await.unwrap(), 2);
        assert_eq!(store.migrate_long_term_memories().await.unwrap(), 0);
        assert_eq!(index.len(Tier::Long).await, 2);
        assert!(store
            .get_memories(Tier::Long)
            .await
            .iter()
            .all(|m| m.metadata.migrated));
    }
}
