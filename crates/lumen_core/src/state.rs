//! Persona state data model
//!
//! `PersonaState` is the single mutable record shared by every daemon. It is
//! owned exclusively by the state store in `lumen_memory`; everything in this
//! module is plain data so that snapshots can be cloned out of the lock and
//! serialized as the durable snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::LumenError;

/// Mood every decay returns to.
pub const NEUTRAL_MOOD: &str = "neutral";

/// Scene name used before any scene has been loaded.
pub const DEFAULT_SCENE: &str = "default";

// =============================================================================
// Mode
// =============================================================================

/// Operating mode. Idle-time maintenance only runs in `Idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Idle,
    Assist,
    Chat,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Idle, Mode::Assist, Mode::Chat];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Idle => "idle",
            Mode::Assist => "assist",
            Mode::Chat => "chat",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = LumenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Mode::Idle),
            "assist" => Ok(Mode::Assist),
            "chat" => Ok(Mode::Chat),
            other => Err(LumenError::InvalidMode(other.to_string())),
        }
    }
}

// =============================================================================
// Tier
// =============================================================================

/// Short-term vs. long-term classification of a stored memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Short,
    Long,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Short => "short",
            Tier::Long => "long",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Memory items
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    Normal,
    High,
}

/// Free-form metadata attached to a memory. `tags` and `sensitivity` are the
/// keys the core understands; anything else rides along in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitivity: Option<Sensitivity>,
    /// Set once the item has been forwarded to the semantic backend by the
    /// long-term migration pass.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub migrated: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MemoryMetadata {
    pub fn tagged<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn is_sensitive(&self) -> bool {
        self.sensitivity == Some(Sensitivity::High)
    }
}

/// One remembered text, in chronological (insertion) order within its tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Present on every item created by this process; snapshots written by
    /// older builds may lack it, and such items cannot be rewritten.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: MemoryMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_timestamp: Option<DateTime<Utc>>,
}

impl MemoryItem {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Some(Uuid::new_v4()),
            timestamp: Utc::now(),
            text: text.into(),
            source: None,
            metadata: MemoryMetadata::default(),
            edited_timestamp: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_metadata(mut self, metadata: MemoryMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

// =============================================================================
// Scene
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneState {
    pub name: String,
    /// Scene definition loaded from the scene source; `None` for the
    /// built-in default scene.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Default for SceneState {
    fn default() -> Self {
        Self {
            name: DEFAULT_SCENE.to_string(),
            payload: None,
        }
    }
}

// =============================================================================
// Manual overrides
// =============================================================================

/// Fields that can be forced for a bounded time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideKey {
    Mode,
    Mood,
}

impl FromStr for OverrideKey {
    type Err = LumenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mode" => Ok(OverrideKey::Mode),
            "mood" => Ok(OverrideKey::Mood),
            other => Err(LumenError::InvalidOverride(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualOverride {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl ManualOverride {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

// =============================================================================
// PersonaState
// =============================================================================

/// The shared persona record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaState {
    pub mood: String,
    pub mode: Mode,
    pub scene: SceneState,
    pub short_term_memory: Vec<MemoryItem>,
    pub long_term_memory: Vec<MemoryItem>,
    pub context_stale: bool,
    /// Last assembled prompt context, if a rebuild has ever run.
    pub prompt_context: Option<String>,
    pub last_updated: DateTime<Utc>,
    pub manual_overrides: BTreeMap<OverrideKey, ManualOverride>,
}

impl Default for PersonaState {
    fn default() -> Self {
        Self {
            mood: NEUTRAL_MOOD.to_string(),
            mode: Mode::default(),
            scene: SceneState::default(),
            short_term_memory: Vec::new(),
            long_term_memory: Vec::new(),
            context_stale: false,
            prompt_context: None,
            last_updated: Utc::now(),
            manual_overrides: BTreeMap::new(),
        }
    }
}

impl PersonaState {
    pub fn memories(&self, tier: Tier) -> &Vec<MemoryItem> {
        match tier {
            Tier::Short => &self.short_term_memory,
            Tier::Long => &self.long_term_memory,
        }
    }

    pub fn memories_mut(&mut self, tier: Tier) -> &mut Vec<MemoryItem> {
        match tier {
            Tier::Short => &mut self.short_term_memory,
            Tier::Long => &mut self.long_term_memory,
        }
    }

    /// Stamp `last_updated`. Called on every successful mutation.
    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    pub fn active_override(&self, key: OverrideKey, now: DateTime<Utc>) -> Option<&str> {
        self.manual_overrides
            .get(&key)
            .filter(|o| o.is_active(now))
            .map(|o| o.value.as_str())
    }

    /// Mood as readers see it: an active override wins over the stored value.
    pub fn effective_mood(&self, now: DateTime<Utc>) -> String {
        self.active_override(OverrideKey::Mood, now)
            .unwrap_or(&self.mood)
            .to_string()
    }

    /// Mode as readers see it. Override values are validated when forced, but
    /// a hand-edited snapshot could still carry junk, so fall back quietly.
    pub fn effective_mode(&self, now: DateTime<Utc>) -> Mode {
        self.active_override(OverrideKey::Mode, now)
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.mode)
    }
}

// =============================================================================
// Pulse snapshot
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonHealth {
    Alive,
    Dead,
}

impl DaemonHealth {
    pub fn from_alive(alive: bool) -> Self {
        if alive {
            DaemonHealth::Alive
        } else {
            DaemonHealth::Dead
        }
    }
}

/// Status broadcast on every pulse. Built fresh each tick and dropped after
/// the broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseSnapshot {
    pub mood: String,
    pub mode: Mode,
    pub scene: String,
    pub memory_count: usize,
    pub daemon_health: BTreeMap<String, DaemonHealth>,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Trigger rules
// =============================================================================

/// Keyword-to-effect mapping loaded from the lore trigger table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRule {
    #[serde(rename = "trigger", alias = "keyword")]
    pub keyword: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<String>,
}

impl TriggerRule {
    /// Case-insensitive substring test against a memory's text.
    pub fn matches(&self, text: &str) -> bool {
        !self.keyword.is_empty() && text.to_lowercase().contains(&self.keyword.to_lowercase())
    }
}
