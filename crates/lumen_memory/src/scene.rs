use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use lumen_core::SceneSource;

/// Scene definitions stored as `<dir>/<name>.json`.
pub struct DirSceneSource {
    dir: PathBuf,
}

impl DirSceneSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scene names are bare identifiers; anything that could escape the
    /// directory is treated as "no such scene".
    fn is_safe_name(name: &str) -> bool {
        !name.is_empty()
            && !name.contains("..")
            && !name.contains('/')
            && !name.contains('\\')
    }
}

#[async_trait]
impl SceneSource for DirSceneSource {
    async fn load_scene(&self, name: &str) -> Result<Option<serde_json::Value>> {
        if !Self::is_safe_name(name) {
            tracing::debug!("Rejecting scene name {:?}", name);
            return Ok(None);
        }
        let path = self.dir.join(format!("{}.json", name));
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };
        let payload = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid scene JSON in {}", path.display()))?;
        Ok(Some(payload))
    }
}
