//! Message Intake
//!
//! Consumes chat/console messages from an intake queue, classifies each
//! one and routes it. The loop only classifies and dispatches: tagging,
//! storing, staging and the background-context refresh are all spawned and
//! never awaited, so queue latency is bounded by classification cost.

use std::sync::Arc;
use std::time::Duration;

use lumen_core::keywords::{detect_mood, detect_topic};
use lumen_core::{
    CommandRouter, MemoryItem, MemoryMetadata, Recollection, Sensitivity, Tagger, Tier,
    WorkerHandle,
};
use lumen_memory::{MemoryLifecycleManager, SharedStateStore, StagedMemory};
use tokio::sync::RwLock;

use crate::queue::{Dequeued, IntakeReceiver};

// ============================================================================
// Intent classification
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Command,
    Note,
    Secret,
    /// Blank input. Handled as a note.
    Unknown,
}

pub fn classify_intent(message: &str) -> Intent {
    let normalized = message.trim().to_lowercase();
    if normalized.starts_with('/') {
        Intent::Command
    } else if normalized.contains("secret") || normalized.contains("encrypt") {
        Intent::Secret
    } else if !normalized.is_empty() {
        Intent::Note
    } else {
        Intent::Unknown
    }
}

/// Mood and topic detected from the last processed message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Detected {
    pub mood: Option<&'static str>,
    pub topic: Option<&'static str>,
}

impl Detected {
    pub fn from_text(text: &str) -> Self {
        Self {
            mood: detect_mood(text),
            topic: detect_topic(text),
        }
    }
}

// ============================================================================
// Background context
// ============================================================================

/// "Relevant memories" block refreshed after every message.
#[derive(Default)]
pub struct BackgroundContext {
    rendered: RwLock<String>,
}

impl BackgroundContext {
    pub async fn current(&self) -> String {
        self.rendered.read().await.clone()
    }

    async fn replace(&self, rendered: String) {
        *self.rendered.write().await = rendered;
    }

    async fn refresh(&self, store: &SharedStateStore, detected: Detected, limit: usize) {
        let query: Vec<&str> = [detected.topic, detected.mood].into_iter().flatten().collect();
        let recollections = if query.is_empty() {
            store.peek_memories(Tier::Long, limit).await
        } else {
            store.search_memories(&query.join(" "), Tier::Long, limit).await
        };
        let rendered = render_recollections(&recollections);
        tracing::debug!("Background context refreshed ({} memories)", recollections.len());
        self.replace(rendered).await;
    }
}

fn render_recollections(recollections: &[Recollection]) -> String {
    recollections
        .iter()
        .map(|r| {
            let tags: Vec<&str> = r.metadata.tags.iter().map(String::as_str).collect();
            format!("({}) {}", tags.join(", "), r.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Daemon
// ============================================================================

pub struct MessageIntake {
    store: Arc<SharedStateStore>,
    router: Arc<dyn CommandRouter>,
    tagger: Arc<dyn Tagger>,
    staging: Option<Arc<MemoryLifecycleManager>>,
    background: Arc<BackgroundContext>,
    context_limit: usize,
    poll_timeout: Duration,
}

impl MessageIntake {
    pub fn new(
        store: Arc<SharedStateStore>,
        router: Arc<dyn CommandRouter>,
        tagger: Arc<dyn Tagger>,
    ) -> Self {
        Self {
            store,
            router,
            tagger,
            staging: None,
            background: Arc::new(BackgroundContext::default()),
            context_limit: 5,
            poll_timeout: Duration::from_secs(1),
        }
    }

    /// Also stage stored notes into the lifecycle buffer.
    pub fn with_staging(mut self, staging: Arc<MemoryLifecycleManager>) -> Self {
        self.staging = Some(staging);
        self
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn with_context_limit(mut self, limit: usize) -> Self {
        self.context_limit = limit;
        self
    }

    pub fn background(&self) -> Arc<BackgroundContext> {
        self.background.clone()
    }

    /// Process one message. `last` carries the mood/topic detected from the
    /// previous message and is updated in place.
    pub async fn handle(&self, message: &str, last: &mut Detected) -> Intent {
        let intent = classify_intent(message);
        tracing::debug!("Message classified as {:?}", intent);

        match intent {
            Intent::Command => {
                if let Err(e) = self.router.route(message).await {
                    tracing::warn!("Command router failed: {:#}", e);
                }
            }
            Intent::Note => self.spawn_store(message, false),
            Intent::Secret => self.spawn_store(message, true),
            Intent::Unknown => {
                tracing::debug!("Unknown intent, treating as note");
                self.spawn_store(message, false);
            }
        }

        let detected = Detected::from_text(message);
        if detected != *last {
            self.store.mark_context_stale().await;
        }
        *last = detected;

        let background = self.background.clone();
        let store = self.store.clone();
        let limit = self.context_limit;
        tokio::spawn(async move {
            background.refresh(&store, detected, limit).await;
        });

        intent
    }

    fn spawn_store(&self, text: &str, secret: bool) {
        let store = self.store.clone();
        let tagger = self.tagger.clone();
        let staging = self.staging.clone();
        let text = text.to_string();

        tokio::spawn(async move {
            let tags = tagger.tag(&text, secret).await;
            let mut metadata = MemoryMetadata {
                tags,
                ..MemoryMetadata::default()
            };
            let (source, tier) = if secret {
                metadata.sensitivity = Some(Sensitivity::High);
                ("secret", Tier::Long)
            } else {
                ("note", Tier::Short)
            };

            let item = MemoryItem::new(text)
                .with_source(source)
                .with_metadata(metadata);
            let stored = store.add_memory_item(item, tier).await;
            tracing::debug!("Stored {} in {} memory", source, tier);

            // Secrets stay out of the plain staging buffer.
            if let (Some(staging), false) = (staging, secret) {
                let staged = StagedMemory::new(
                    stored.id.map(|id| id.to_string()),
                    stored.text,
                    stored.timestamp,
                )
                .with_extra("source", source)
                .with_extra("tier", tier.as_str());
                if let Err(e) = staging.stage(staged).await {
                    tracing::warn!("Failed to stage note: {:#}", e);
                }
            }
        });
    }

    /// Assemble a reply prompt from mood, topic, the staged recent items and
    /// the last background context. Kicks off a fresh background refresh for
    /// the next turn.
    pub async fn build_prompt(&self, user_message: &str, last: Detected) -> String {
        let recent = match &self.staging {
            Some(staging) => staging.prepare_prompt_context().await,
            None => String::new(),
        };
        let background = self.background.current().await;

        let refresh = self.background.clone();
        let store = self.store.clone();
        let limit = self.context_limit;
        tokio::spawn(async move {
            refresh.refresh(&store, last, limit).await;
        });

        format!(
            "Current mood: {}\nCurrent topic: {}\nRecent chat:\n{}\nRelevant memories:\n{}\nUser: {}\n",
            last.mood.unwrap_or("neutral"),
            last.topic.unwrap_or("general"),
            recent,
            background,
            user_message
        )
    }

    /// Run the intake loop until the stop flag, the sentinel, or queue
    /// closure.
    pub fn spawn(self: Arc<Self>, mut queue: IntakeReceiver<String>) -> WorkerHandle {
        WorkerHandle::spawn("MessageIntake", move |stop| async move {
            let mut last = Detected::default();
            while !stop.is_stopped() {
                match queue.recv_timeout(self.poll_timeout).await {
                    Dequeued::Item(message) => {
                        // Own task per item: a panic fails the item, not the loop.
                        let intake = self.clone();
                        let item = tokio::spawn(async move {
                            let mut detected = last;
                            intake.handle(&message, &mut detected).await;
                            detected
                        });
                        match item.await {
                            Ok(detected) => last = detected,
                            Err(e) => tracing::error!("Message handling panicked: {}", e),
                        }
                    }
                    Dequeued::Timeout => {}
                    Dequeued::Sentinel | Dequeued::Closed => {
                        tracing::info!("MessageIntake received shutdown sentinel");
                        break;
                    }
                }
            }
            tracing::info!("MessageIntake loop exited");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_intent() {
        assert_eq!(classify_intent("/mode chat"), Intent::Command);
        assert_eq!(classify_intent("  /status"), Intent::Command);
        assert_eq!(classify_intent("my SECRET is 42"), Intent::Secret);
        assert_eq!(classify_intent("please encrypt this"), Intent::Secret);
        assert_eq!(classify_intent("remind me: meeting at 5"), Intent::Note);
        assert_eq!(classify_intent("   "), Intent::Unknown);
    }

    #[test]
    fn test_command_wins_over_secret() {
        assert_eq!(classify_intent("/secret"), Intent::Command);
    }

    #[test]
    fn test_detected_from_text() {
        let d = Detected::from_text("so happy about the project");
        assert_eq!(d.mood, Some("happy"));
        assert_eq!(d.topic, Some("project"));
        assert_eq!(Detected::from_text("hmm"), Detected::default());
    }
}
