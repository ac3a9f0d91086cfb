//! Memory Lifecycle Manager
//!
//! Owns a staging buffer of recently ingested items, separate from the
//! persona's short/long tiers. A sweep ages items out of the buffer into an
//! append-only archive. Both the buffer and the archive are JSON lists on
//! disk; the archive is never pruned here.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use lumen_core::config::{LifecycleConfig, MalformedTimestampPolicy};
use lumen_core::WorkerHandle;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

/// Entries shown by [`MemoryLifecycleManager::prepare_prompt_context`].
const SUMMARY_ITEMS: usize = 5;

/// One staged item. The timestamp is kept as raw JSON so a hand-edited or
/// foreign buffer with a bad timestamp still loads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedMemory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub timestamp: Value,
    #[serde(default)]
    pub content: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl StagedMemory {
    pub fn new(id: Option<String>, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            timestamp: Value::String(timestamp.to_rfc3339()),
            content: content.into(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    /// Parsed timestamp. Accepts RFC 3339 and naive ISO-8601 (read as UTC).
    pub fn parsed_timestamp(&self) -> Result<DateTime<Utc>> {
        let raw = self
            .timestamp
            .as_str()
            .with_context(|| format!("timestamp is not a string: {}", self.timestamp))?;
        parse_timestamp(raw)
    }

    fn label(&self) -> &str {
        self.id.as_deref().unwrap_or("unknown id")
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }
    anyhow::bail!("unrecognised timestamp '{}'", raw)
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub archived: usize,
    pub retained: usize,
    /// Items whose timestamp could not be read (counted in `retained` or
    /// `archived` according to the policy).
    pub malformed: usize,
}

pub struct MemoryLifecycleManager {
    memory_path: PathBuf,
    archive_path: PathBuf,
    expiration: chrono::Duration,
    malformed_policy: MalformedTimestampPolicy,
    active: Mutex<Vec<StagedMemory>>,
}

impl MemoryLifecycleManager {
    /// Load the active buffer. A missing, corrupt or non-list file starts the
    /// buffer empty.
    pub async fn open(config: &LifecycleConfig) -> Self {
        let active = load_buffer(&config.memory_path).await;
        tracing::info!("Lifecycle manager loaded {} staged memories", active.len());
        Self {
            memory_path: config.memory_path.clone(),
            archive_path: config.archive_path.clone(),
            expiration: chrono::Duration::from_std(config.expiration())
                .unwrap_or(chrono::Duration::MAX),
            malformed_policy: config.malformed_timestamps,
            active: Mutex::new(active),
        }
    }

    pub async fn len(&self) -> usize {
        self.active.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn items(&self) -> Vec<StagedMemory> {
        self.active.lock().await.clone()
    }

    /// Append to the buffer and persist it.
    pub async fn stage(&self, item: StagedMemory) -> Result<()> {
        let mut active = self.active.lock().await;
        active.push(item);
        save_list(&self.memory_path, &active[..]).await
    }

    /// Move every item older than the expiration threshold to the archive,
    /// then persist what is left.
    ///
    /// If the archive cannot be written the expired items stay in the buffer
    /// and the error is returned; nothing is lost.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut active = self.active.lock().await;
        let mut report = SweepReport::default();
        // Original positions, so a failed archive write restores the order.
        let mut keep: Vec<(usize, StagedMemory)> = Vec::with_capacity(active.len());
        let mut expired: Vec<(usize, StagedMemory)> = Vec::new();

        for (pos, item) in active.drain(..).enumerate() {
            match item.parsed_timestamp() {
                Ok(ts) if now - ts > self.expiration => expired.push((pos, item)),
                Ok(_) => keep.push((pos, item)),
                Err(e) => {
                    report.malformed += 1;
                    tracing::warn!("Error processing staged memory {}: {:#}", item.label(), e);
                    match self.malformed_policy {
                        MalformedTimestampPolicy::Retain => keep.push((pos, item)),
                        MalformedTimestampPolicy::Archive => expired.push((pos, item)),
                    }
                }
            }
        }

        if !expired.is_empty() {
            let batch: Vec<&StagedMemory> = expired.iter().map(|(_, item)| item).collect();
            if let Err(e) = self.append_archive(&batch).await {
                keep.extend(expired);
                keep.sort_by_key(|(pos, _)| *pos);
                *active = keep.into_iter().map(|(_, item)| item).collect();
                return Err(e);
            }
            for (_, item) in &expired {
                tracing::debug!("Archived staged memory {}", item.label());
            }
            tracing::info!("Expired {} staged memories", expired.len());
        }

        report.archived = expired.len();
        report.retained = keep.len();
        *active = keep.into_iter().map(|(_, item)| item).collect();
        save_list(&self.memory_path, &active[..]).await?;
        Ok(report)
    }

    /// Append to the archive. An archive holding valid JSON that is not a
    /// list is reset; one that does not parse at all is left untouched and
    /// the append fails.
    async fn append_archive(&self, items: &[&StagedMemory]) -> Result<()> {
        let mut archive: Vec<Value> = match tokio::fs::read_to_string(&self.archive_path).await {
            Ok(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Array(list)) => list,
                Ok(_) => {
                    tracing::warn!(
                        "Archive {} is not a JSON list, resetting it",
                        self.archive_path.display()
                    );
                    Vec::new()
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Archive {} is corrupt", self.archive_path.display())
                    })
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read {}", self.archive_path.display()))
            }
        };
        for item in items {
            archive.push(serde_json::to_value(item)?);
        }
        save_list(&self.archive_path, &archive[..]).await
    }

    /// Short text summary of the newest staged items.
    pub async fn prepare_prompt_context(&self) -> String {
        let active = self.active.lock().await;
        if active.is_empty() {
            return "(No recent memories.)".to_string();
        }
        active[active.len().saturating_sub(SUMMARY_ITEMS)..]
            .iter()
            .map(|item| {
                let ts = item.timestamp.as_str().unwrap_or("unknown");
                format!("[{}] {}", ts, item.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Run `sweep` every `interval` until stopped.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> WorkerHandle {
        WorkerHandle::spawn("MemoryLifecycle", move |mut stop| async move {
            loop {
                if let Err(e) = self.sweep(Utc::now()).await {
                    tracing::warn!("Lifecycle sweep failed: {:#}", e);
                }
                if stop.sleep(interval).await {
                    break;
                }
            }
        })
    }
}

async fn load_buffer(path: &Path) -> Vec<StagedMemory> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            tracing::warn!("Could not read {}: {}. Starting fresh.", path.display(), e);
            return Vec::new();
        }
    };
    let list = match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Array(list)) => list,
        Ok(_) => {
            tracing::warn!("{} is not a list. Resetting to empty list.", path.display());
            return Vec::new();
        }
        Err(e) => {
            tracing::warn!("{} is corrupted ({}). Starting fresh.", path.display(), e);
            return Vec::new();
        }
    };
    list.into_iter()
        .filter_map(|v| match serde_json::from_value::<StagedMemory>(v) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!("Skipping unreadable staged entry: {}", e);
                None
            }
        })
        .collect()
}

/// Write through a sibling `.tmp` file and rename, so a crash mid-write
/// never leaves a truncated list behind.
async fn save_list<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let body = serde_json::to_vec_pretty(items)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, body)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))
}
