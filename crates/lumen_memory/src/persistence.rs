//! Durable snapshot sinks for `PersonaState`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use lumen_core::{PersonaState, StateSink};
use tokio::sync::Mutex;

// ============================================================================
// JSON file
// ============================================================================

/// Pretty-printed JSON snapshot on disk.
///
/// Saves go through a sibling temp file and a rename so a crash mid-write
/// leaves the previous snapshot intact.
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateSink for JsonFileSink {
    async fn load(&self) -> Result<Option<PersonaState>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };
        let state = serde_json::from_str(&raw)
            .with_context(|| format!("Corrupt state snapshot at {}", self.path.display()))?;
        Ok(Some(state))
    }

    async fn save(&self, state: &PersonaState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let body = serde_json::to_vec_pretty(state).context("Failed to serialize state")?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Keeps the last saved snapshot in memory. Used for ephemeral runs
/// (`--ephemeral`) and by tests that count save calls.
#[derive(Default)]
pub struct MemorySink {
    snapshot: Mutex<Option<PersonaState>>,
    saves: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing snapshot, as if it had been saved earlier.
    pub fn with_state(state: PersonaState) -> Self {
        Self {
            snapshot: Mutex::new(Some(state)),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub async fn last_saved(&self) -> Option<PersonaState> {
        self.snapshot.lock().await.clone()
    }
}

#[async_trait]
impl StateSink for MemorySink {
    async fn load(&self) -> Result<Option<PersonaState>> {
        Ok(self.snapshot.lock().await.clone())
    }

    async fn save(&self, state: &PersonaState) -> Result<()> {
        *self.snapshot.lock().await = Some(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
