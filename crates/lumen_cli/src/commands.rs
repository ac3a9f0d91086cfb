//! Console command router.
//!
//! Handles `/`-prefixed lines typed at the console:
//!
//! | command | effect |
//! |---|---|
//! | `/mode <idle\|assist\|chat>` | set the interaction mode |
//! | `/scene <name>` | load a scene definition |
//! | `/mood <mood>` | set the mood |
//! | `/force <mode\|mood> <value> <secs>` | override for a bounded time |
//! | `/clear <mode\|mood>` | drop an override early |
//! | `/status` | print a short state summary |

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use lumen_core::{CommandRouter, OverrideKey, Tier};
use lumen_memory::SharedStateStore;

pub struct ConsoleRouter {
    store: Arc<SharedStateStore>,
}

impl ConsoleRouter {
    pub fn new(store: Arc<SharedStateStore>) -> Self {
        Self { store }
    }

    /// Run one command and return the reply shown to the user. Unknown
    /// commands are logged and answered with a hint.
    pub async fn execute(&self, raw: &str) -> Result<String> {
        let mut parts = raw.split_whitespace();
        let command = parts.next().unwrap_or_default().to_lowercase();
        let args: Vec<&str> = parts.collect();

        match (command.as_str(), args.as_slice()) {
            ("/mode", [mode]) => {
                let mode = self.store.set_mode(mode).await?;
                Ok(format!("Mode set to {}", mode))
            }
            ("/scene", [name]) => {
                self.store.set_scene(name).await?;
                Ok(format!("Scene set to {}", name))
            }
            ("/mood", [mood]) => {
                self.store.update_mood(mood).await;
                Ok(format!("Mood set to {}", mood))
            }
            ("/force", [key, value, secs]) => {
                let key: OverrideKey = key.parse()?;
                let secs: u64 = secs
                    .parse()
                    .with_context(|| format!("'{}' is not a number of seconds", secs))?;
                let forced = self
                    .store
                    .force_override(key, value, Duration::from_secs(secs))
                    .await?;
                Ok(format!(
                    "Forced {} to {} until {}",
                    override_name(key),
                    forced.value,
                    forced.expires_at.format("%H:%M:%S")
                ))
            }
            ("/clear", [key]) => {
                let key: OverrideKey = key.parse()?;
                if self.store.clear_override(key).await {
                    Ok(format!("Cleared {} override", override_name(key)))
                } else {
                    Ok(format!("No {} override active", override_name(key)))
                }
            }
            ("/status", []) => Ok(self.status().await),
            ("/mode" | "/scene" | "/mood" | "/force" | "/clear" | "/status", _) => {
                bail!("usage: {}", usage(&command))
            }
            _ => {
                tracing::warn!("Unknown command: {}", raw.trim());
                Ok(format!("Unknown command '{}'", command))
            }
        }
    }

    async fn status(&self) -> String {
        let mut lines = vec![
            format!("mood:   {}", self.store.get_mood().await),
            format!("mode:   {}", self.store.get_mode().await),
            format!("scene:  {}", self.store.get_scene().await.name),
            format!(
                "memory: {} short / {} long",
                self.store.memory_count(Tier::Short).await,
                self.store.memory_count(Tier::Long).await
            ),
        ];
        for (key, forced) in self.store.active_overrides().await {
            lines.push(format!(
                "forced: {}={} until {}",
                override_name(key),
                forced.value,
                forced.expires_at.format("%H:%M:%S")
            ));
        }
        lines.join("\n")
    }
}

#[async_trait]
impl CommandRouter for ConsoleRouter {
    async fn route(&self, raw_message: &str) -> Result<()> {
        let reply = self.execute(raw_message).await?;
        println!("{}", reply);
        Ok(())
    }
}

fn override_name(key: OverrideKey) -> &'static str {
    match key {
        OverrideKey::Mode => "mode",
        OverrideKey::Mood => "mood",
    }
}

fn usage(command: &str) -> &'static str {
    match command {
        "/mode" => "/mode <idle|assist|chat>",
        "/scene" => "/scene <name>",
        "/mood" => "/mood <mood>",
        "/force" => "/force <mode|mood> <value> <secs>",
        "/clear" => "/clear <mode|mood>",
        _ => "/status",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::Mode;
    use lumen_memory::{DirSceneSource, InMemorySemanticIndex, MemorySink};

    async fn router(scenes: &std::path::Path) -> (ConsoleRouter, Arc<SharedStateStore>) {
        let store = Arc::new(
            SharedStateStore::open(
                Arc::new(MemorySink::new()),
                Arc::new(InMemorySemanticIndex::new()),
                Arc::new(DirSceneSource::new(scenes)),
            )
            .await,
        );
        (ConsoleRouter::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_mode_and_mood_commands() {
        let dir = tempfile::TempDir::new().unwrap();
        let (router, store) = router(dir.path()).await;

        assert_eq!(router.execute("/mode chat").await.unwrap(), "Mode set to chat");
        assert_eq!(store.get_mode().await, Mode::Chat);

        router.execute("/mood happy").await.unwrap();
        assert_eq!(store.get_mood().await, "happy");
    }

    #[tokio::test]
    async fn test_invalid_mode_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let (router, store) = router(dir.path()).await;
        assert!(router.execute("/mode dancing").await.is_err());
        assert_eq!(store.get_mode().await, Mode::Idle);
    }

    #[tokio::test]
    async fn test_scene_command_loads_definition() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("office.json"), r#"{"lighting":"dim"}"#).unwrap();
        let (router, store) = router(dir.path()).await;

        router.execute("/scene office").await.unwrap();
        assert_eq!(store.get_scene().await.name, "office");
        assert!(router.execute("/scene attic").await.is_err());
        assert_eq!(store.get_scene().await.name, "office");
    }

    #[tokio::test]
    async fn test_force_and_clear_override() {
        let dir = tempfile::TempDir::new().unwrap();
        let (router, store) = router(dir.path()).await;

        let reply = router.execute("/force mood sleepy 60").await.unwrap();
        assert!(reply.starts_with("Forced mood to sleepy"));
        assert_eq!(store.get_mood().await, "sleepy");

        assert!(router.execute("/force mode nonsense 60").await.is_err());
        assert!(router.execute("/force weather rain 60").await.is_err());
        assert!(router.execute("/force mood sleepy soon").await.is_err());
        assert!(router.execute("/force mood sleepy 9000000000000").await.is_err());

        assert_eq!(router.execute("/clear mood").await.unwrap(), "Cleared mood override");
        assert_eq!(router.execute("/clear mood").await.unwrap(), "No mood override active");
    }

    #[tokio::test]
    async fn test_status_and_unknown() {
        let dir = tempfile::TempDir::new().unwrap();
        let (router, store) = router(dir.path()).await;
        store.add_memory("first", Tier::Short).await;

        let status = router.execute("/status").await.unwrap();
        assert!(status.contains("mode:   idle"));
        assert!(status.contains("memory: 1 short / 0 long"));

        assert_eq!(
            router.execute("/dance now").await.unwrap(),
            "Unknown command '/dance'"
        );
        let err = router.execute("/mode").await.unwrap_err();
        assert!(err.to_string().contains("usage: /mode"));
    }
}
