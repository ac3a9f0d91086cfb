pub mod config;
pub mod error;
pub mod keywords;
pub mod state;
pub mod worker;

pub use config::LumenConfig;
pub use error::LumenError;
pub use keywords::KeywordTagger;
pub use state::{
    DaemonHealth, ManualOverride, MemoryItem, MemoryMetadata, Mode, OverrideKey, PersonaState,
    PulseSnapshot, SceneState, Sensitivity, Tier, TriggerRule, DEFAULT_SCENE, NEUTRAL_MOOD,
};
pub use worker::{StopSignal, WorkerHandle};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// A text returned by the semantic backend, with whatever metadata it was
/// indexed under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recollection {
    pub text: String,
    pub metadata: MemoryMetadata,
}

/// Durable home of the persona snapshot.
#[async_trait]
pub trait StateSink: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    async fn load(&self) -> anyhow::Result<Option<PersonaState>>;
    async fn save(&self, state: &PersonaState) -> anyhow::Result<()>;
}

/// Vector/semantic memory backend. Indexing is best-effort.
#[async_trait]
pub trait SemanticMemory: Send + Sync {
    async fn index(&self, text: &str, tier: Tier, metadata: &MemoryMetadata) -> anyhow::Result<()>;
    async fn search(&self, query: &str, tier: Tier, limit: usize) -> anyhow::Result<Vec<Recollection>>;
    /// Most recently indexed items, newest first.
    async fn peek(&self, tier: Tier, limit: usize) -> anyhow::Result<Vec<Recollection>>;
}

/// NLP tagging. Infallible by contract: implementations return at least one
/// fallback tag when they cannot derive anything.
#[async_trait]
pub trait Tagger: Send + Sync {
    async fn tag(&self, text: &str, is_secret: bool) -> BTreeSet<String>;
}

/// Source of scene definitions keyed by name.
#[async_trait]
pub trait SceneSource: Send + Sync {
    /// `Ok(None)` when no scene of that name exists.
    async fn load_scene(&self, name: &str) -> anyhow::Result<Option<serde_json::Value>>;
}

/// Receives messages classified as commands.
#[async_trait]
pub trait CommandRouter: Send + Sync {
    async fn route(&self, raw_message: &str) -> anyhow::Result<()>;
}

/// Extracts text from a dropped file.
#[async_trait]
pub trait FileParser: Send + Sync {
    /// Unsupported extensions yield `LumenError::UnsupportedFile`; read or
    /// decode failures yield `LumenError::Parse`. An empty string is a
    /// successful parse of an empty file.
    async fn parse(&self, path: &Path) -> Result<String, LumenError>;
}

/// Anything that wants to hear about state events or pulses.
///
/// Callbacks run outside the state lock and may call back into the store.
/// A returned error (or a panic) is logged by the broadcaster and does not
/// affect other observers.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: &str, data: &serde_json::Value) -> anyhow::Result<()>;
}

impl<F> Observer for F
where
    F: Fn(&str, &serde_json::Value) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &str, data: &serde_json::Value) -> anyhow::Result<()> {
        self(event, data)
    }
}

/// Liveness/stop capability the pulse coordinator polls. Concrete daemon
/// types are never visible to the pulse.
#[async_trait]
pub trait Daemon: Send + Sync {
    fn name(&self) -> &str;
    fn is_alive(&self) -> bool;
    /// Raise the stop flag and join the worker.
    async fn stop(&self);
}
