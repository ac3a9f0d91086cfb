//! In-process semantic memory
//!
//! A stand-in for a vector store: texts are indexed per tier and ranked
//! against a query by word overlap. Good enough to drive background context
//! and prompt rebuilds without an embedding model.

use std::collections::{BTreeSet, HashMap};

use anyhow::Result;
use async_trait::async_trait;
use lumen_core::keywords::words;
use lumen_core::{MemoryMetadata, Recollection, SemanticMemory, Tier};
use tokio::sync::RwLock;

struct Entry {
    text: String,
    terms: BTreeSet<String>,
    metadata: MemoryMetadata,
}

#[derive(Default)]
pub struct InMemorySemanticIndex {
    tiers: RwLock<HashMap<Tier, Vec<Entry>>>,
}

impl InMemorySemanticIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, tier: Tier) -> usize {
        self.tiers.read().await.get(&tier).map_or(0, Vec::len)
    }
}

fn recollection(entry: &Entry) -> Recollection {
    Recollection {
        text: entry.text.clone(),
        metadata: entry.metadata.clone(),
    }
}

#[async_trait]
impl SemanticMemory for InMemorySemanticIndex {
    async fn index(&self, text: &str, tier: Tier, metadata: &MemoryMetadata) -> Result<()> {
        let entry = Entry {
            text: text.to_string(),
            terms: words(text).into_iter().collect(),
            metadata: metadata.clone(),
        };
        self.tiers.write().await.entry(tier).or_default().push(entry);
        Ok(())
    }

    async fn search(&self, query: &str, tier: Tier, limit: usize) -> Result<Vec<Recollection>> {
        let query_terms: BTreeSet<String> = words(query).into_iter().collect();
        if query_terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let tiers = self.tiers.read().await;
        let Some(entries) = tiers.get(&tier) else {
            return Ok(Vec::new());
        };

        // (score, insertion index); newer entries win ties
        let mut scored: Vec<(usize, usize)> = entries
            .iter()
            .enumerate()
            .filter_map(|(idx, e)| {
                let score = e.terms.intersection(&query_terms).count()
                    + e.metadata.tags.iter().filter(|t| query_terms.contains(*t)).count();
                (score > 0).then_some((score, idx))
            })
            .collect();
        scored.sort_by(|a, b| b.cmp(a));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, idx)| recollection(&entries[idx]))
            .collect())
    }

    async fn peek(&self, tier: Tier, limit: usize) -> Result<Vec<Recollection>> {
        let tiers = self.tiers.read().await;
        Ok(tiers
            .get(&tier)
            .map(|entries| entries.iter().rev().take(limit).map(recollection).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_search_ranks_by_overlap() {
        let index = InMemorySemanticIndex::new();
        let meta = MemoryMetadata::default();
        index.index("buy milk", Tier::Long, &meta).await.unwrap();
        index.index("project meeting notes", Tier::Long, &meta).await.unwrap();
        index.index("meeting", Tier::Long, &meta).await.unwrap();

        let hits = index.search("Project meeting", Tier::Long, 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "project meeting notes");
        assert!(index.search("meeting", Tier::Short, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tags_count_towards_score() {
        let index = InMemorySemanticIndex::new();
        index
            .index("call the dentist", Tier::Short, &MemoryMetadata::tagged(["reminder"]))
            .await
            .unwrap();
        let hits = index.search("reminder", Tier::Short, 1).await.unwrap();
        assert_eq!(hits[0].text, "call the dentist");
    }

    #[tokio::test]
    async fn test_peek_is_newest_first() {
        let index = InMemorySemanticIndex::new();
        for text in ["one", "two", "three"] {
            index.index(text, Tier::Long, &MemoryMetadata::default()).await.unwrap();
        }
        let peeked: Vec<String> = index
            .peek(Tier::Long, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.text)
            .collect();
        assert_eq!(peeked, vec!["three", "two"]);
        assert_eq!(index.len(Tier::Long).await, 3);
    }
}
