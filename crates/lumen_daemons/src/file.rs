//! File Intake
//!
//! Consumes dropped file paths, extracts text through a [`FileParser`] and
//! hands non-empty results to a [`MemoryInjector`]. Unsupported or failed
//! parses are logged and skipped.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lumen_core::{FileParser, LumenError, MemoryItem, MemoryMetadata, Tier, WorkerHandle};
use lumen_memory::{MemoryLifecycleManager, SharedStateStore, StagedMemory};

use crate::queue::{Dequeued, IntakeReceiver};

// ============================================================================
// Parser
// ============================================================================

/// Dispatches on the lowercased file extension. Plain text and markdown are
/// read as UTF-8; JSON is validated and kept as its original text.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionParser;

impl ExtensionParser {
    async fn read_text(path: &Path) -> Result<String, LumenError> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| LumenError::Parse {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl FileParser for ExtensionParser {
    async fn parse(&self, path: &Path) -> Result<String, LumenError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "txt" | "md" => Self::read_text(path).await,
            "json" => {
                let raw = Self::read_text(path).await?;
                serde_json::from_str::<serde_json::Value>(&raw).map_err(|e| LumenError::Parse {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
                Ok(raw)
            }
            // No PDF text extraction backend yet
            _ => Err(LumenError::UnsupportedFile {
                path: path.display().to_string(),
                extension,
            }),
        }
    }
}

// ============================================================================
// Injector
// ============================================================================

/// Receives parsed file content. Called on the intake loop, so
/// implementations hand the work off instead of doing it inline.
pub trait MemoryInjector: Send + Sync {
    fn inject(&self, content: String, origin: &Path);
}

impl<F> MemoryInjector for F
where
    F: Fn(String, &Path) + Send + Sync,
{
    fn inject(&self, content: String, origin: &Path) {
        self(content, origin)
    }
}

/// Writes file content into the state store (and optionally the staging
/// buffer) from a spawned task.
pub struct StoreInjector {
    store: Arc<SharedStateStore>,
    staging: Option<Arc<MemoryLifecycleManager>>,
    tier: Tier,
}

impl StoreInjector {
    pub fn new(store: Arc<SharedStateStore>) -> Self {
        Self {
            store,
            staging: None,
            tier: Tier::Short,
        }
    }

    pub fn with_staging(mut self, staging: Arc<MemoryLifecycleManager>) -> Self {
        self.staging = Some(staging);
        self
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }
}

impl MemoryInjector for StoreInjector {
    fn inject(&self, content: String, origin: &Path) {
        let store = self.store.clone();
        let staging = self.staging.clone();
        let tier = self.tier;
        let origin = origin.display().to_string();

        tokio::spawn(async move {
            let mut metadata = MemoryMetadata::default();
            metadata
                .extra
                .insert("path".to_string(), serde_json::Value::String(origin.clone()));
            let item = MemoryItem::new(content)
                .with_source("file")
                .with_metadata(metadata);
            let stored = store.add_memory_item(item, tier).await;

            if let Some(staging) = staging {
                let staged = StagedMemory::new(
                    stored.id.map(|id| id.to_string()),
                    stored.text,
                    stored.timestamp,
                )
                .with_extra("source", "file")
                .with_extra("path", origin);
                if let Err(e) = staging.stage(staged).await {
                    tracing::warn!("Failed to stage file content: {:#}", e);
                }
            }
        });
    }
}

// ============================================================================
// Daemon
// ============================================================================

pub struct FileIntake {
    parser: Arc<dyn FileParser>,
    injector: Arc<dyn MemoryInjector>,
    poll_timeout: Duration,
}

impl FileIntake {
    pub fn new(parser: Arc<dyn FileParser>, injector: Arc<dyn MemoryInjector>) -> Self {
        Self {
            parser,
            injector,
            poll_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Parse one file and inject its content. Returns whether anything was
    /// handed to the injector.
    pub async fn process(&self, path: &Path) -> bool {
        tracing::debug!("Processing file: {}", path.display());
        match self.parser.parse(path).await {
            Ok(content) if content.trim().is_empty() => {
                tracing::debug!("Skipping empty file {}", path.display());
                false
            }
            Ok(content) => {
                self.injector.inject(content, path);
                tracing::info!("Injected content from {}", path.display());
                true
            }
            Err(e @ LumenError::UnsupportedFile { .. }) => {
                tracing::info!("{}. Skipping.", e);
                false
            }
            Err(e) => {
                tracing::warn!("{}", e);
                false
            }
        }
    }

    pub fn spawn(self: Arc<Self>, mut queue: IntakeReceiver<PathBuf>) -> WorkerHandle {
        WorkerHandle::spawn("FileIntake", move |stop| async move {
            while !stop.is_stopped() {
                match queue.recv_timeout(self.poll_timeout).await {
                    Dequeued::Item(path) => {
                        let intake = self.clone();
                        let shown = path.display().to_string();
                        let item = tokio::spawn(async move { intake.process(&path).await });
                        if let Err(e) = item.await {
                            tracing::error!("File intake panicked on {}: {}", shown, e);
                        }
                    }
                    Dequeued::Timeout => {}
                    Dequeued::Sentinel | Dequeued::Closed => {
                        tracing::info!("FileIntake received shutdown sentinel");
                        break;
                    }
                }
            }
            tracing::info!("FileIntake loop exited");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect {
        got: Mutex<Vec<(String, PathBuf)>>,
    }

    impl MemoryInjector for Collect {
        fn inject(&self, content: String, origin: &Path) {
            self.got.lock().unwrap().push((content, origin.to_path_buf()));
        }
    }

    #[tokio::test]
    async fn test_parser_dispatch() {
        let dir = tempfile::TempDir::new().unwrap();
        let txt = dir.path().join("note.TXT");
        let json = dir.path().join("data.json");
        let bad_json = dir.path().join("bad.json");
        let pdf = dir.path().join("scan.pdf");
        std::fs::write(&txt, "hello").unwrap();
        std::fs::write(&json, r#"{"a":1}"#).unwrap();
        std::fs::write(&bad_json, "{").unwrap();
        std::fs::write(&pdf, "%PDF").unwrap();

        let parser = ExtensionParser;
        assert_eq!(parser.parse(&txt).await.unwrap(), "hello");
        assert_eq!(parser.parse(&json).await.unwrap(), r#"{"a":1}"#);
        assert!(matches!(parser.parse(&bad_json).await, Err(LumenError::Parse { .. })));
        assert!(matches!(
            parser.parse(&pdf).await,
            Err(LumenError::UnsupportedFile { extension, .. }) if extension == "pdf"
        ));
        assert!(matches!(
            parser.parse(&dir.path().join("missing.md")).await,
            Err(LumenError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn test_only_non_empty_parses_are_injected() {
        let dir = tempfile::TempDir::new().unwrap();
        let full = dir.path().join("a.md");
        let empty = dir.path().join("b.txt");
        let binary = dir.path().join("c.bin");
        std::fs::write(&full, "# Title").unwrap();
        std::fs::write(&empty, "  \n").unwrap();
        std::fs::write(&binary, [0u8, 1, 2]).unwrap();

        let collect = Arc::new(Collect::default());
        let intake = FileIntake::new(Arc::new(ExtensionParser), collect.clone());

        assert!(intake.process(&full).await);
        assert!(!intake.process(&empty).await);
        assert!(!intake.process(&binary).await);

        let got = collect.got.lock().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0], ("# Title".to_string(), full));
    }

    struct CrashOnBoom;

    #[async_trait]
    impl FileParser for CrashOnBoom {
        async fn parse(&self, path: &Path) -> Result<String, LumenError> {
            if path.file_stem().is_some_and(|s| s == "boom") {
                panic!("parser crashed");
            }
            ExtensionParser.parse(path).await
        }
    }

    #[tokio::test]
    async fn test_loop_survives_parser_panic() {
        let dir = tempfile::TempDir::new().unwrap();
        let boom = dir.path().join("boom.txt");
        let fine = dir.path().join("fine.txt");
        std::fs::write(&fine, "still here").unwrap();

        let (tx, rx) = crate::queue::intake_queue();
        let collect = Arc::new(Collect::default());
        let intake = Arc::new(
            FileIntake::new(Arc::new(CrashOnBoom), collect.clone())
                .with_poll_timeout(Duration::from_millis(20)),
        );
        let handle = intake.spawn(rx);
        tx.send(boom);
        tx.send(fine.clone());

        for _ in 0..100 {
            if !collect.got.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            collect.got.lock().unwrap().as_slice(),
            [("still here".to_string(), fine)]
        );
        assert!(lumen_core::Daemon::is_alive(&handle));
        lumen_core::Daemon::stop(&handle).await;
    }

    #[tokio::test]
    async fn test_loop_exits_on_sentinel() {
        let (tx, rx) = crate::queue::intake_queue();
        let collect = Arc::new(Collect::default());
        let intake = Arc::new(
            FileIntake::new(Arc::new(ExtensionParser), collect.clone())
                .with_poll_timeout(Duration::from_millis(20)),
        );
        let handle = intake.spawn(rx);
        tx.close();
        for _ in 0..50 {
            if !lumen_core::Daemon::is_alive(&handle) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!lumen_core::Daemon::is_alive(&handle));
    }
}
