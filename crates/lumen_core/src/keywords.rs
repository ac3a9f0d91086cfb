//! Keyword heuristics shared by the intake daemons.
//!
//! Mood and topic detection are word-membership tests against small fixed
//! lists. They only steer the background context refresh, so a miss simply
//! yields `None`. The same word lists seed the fallback tagger.

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::Tagger;

const MOOD_WORDS: &[(&str, &[&str])] = &[
    ("happy", &["happy", "joy", "excited", "glad", "great"]),
    ("sad", &["sad", "down", "depressed", "lonely", "upset"]),
    ("angry", &["angry", "mad", "frustrated", "furious", "annoyed"]),
    ("tired", &["tired", "exhausted", "sleepy", "drained"]),
];

const TOPIC_WORDS: &[(&str, &[&str])] = &[
    ("project", &["project", "projects"]),
    ("meeting", &["meeting", "meetings", "call"]),
    ("reminder", &["reminder", "remind", "reminders"]),
    ("todo", &["todo", "todos", "task", "tasks"]),
];

const STOPWORDS: &[&str] = &[
    "about", "after", "again", "also", "been", "before", "being", "could", "does", "from",
    "have", "here", "just", "like", "more", "much", "only", "other", "should", "some", "than",
    "that", "their", "them", "then", "there", "these", "they", "this", "very", "want", "were",
    "what", "when", "where", "which", "while", "will", "with", "would", "your",
];

/// Tag attached when nothing else could be derived.
pub const FALLBACK_TAG: &str = "general";

/// Tag attached to anything stored through the secret path.
pub const SECRET_TAG: &str = "secret";

const MAX_WORD_TAGS: usize = 8;

/// Lowercase alphanumeric words of `text`, in order.
pub fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

fn detect(table: &'static [(&'static str, &'static [&'static str])], text: &str) -> Option<&'static str> {
    let found: BTreeSet<String> = words(text).collect();
    table
        .iter()
        .find(|(_, list)| list.iter().any(|w| found.contains(*w)))
        .map(|(label, _)| *label)
}

/// Detect a coarse mood from message text. First matching list wins.
pub fn detect_mood(text: &str) -> Option<&'static str> {
    detect(MOOD_WORDS, text)
}

/// Detect a coarse topic from message text. First matching list wins.
pub fn detect_topic(text: &str) -> Option<&'static str> {
    detect(TOPIC_WORDS, text)
}

/// Derive a tag set from text: detected mood/topic labels plus up to a
/// handful of content words. Never returns an empty set.
pub fn keyword_tags(text: &str, is_secret: bool) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    if let Some(mood) = detect_mood(text) {
        tags.insert(mood.to_string());
    }
    if let Some(topic) = detect_topic(text) {
        tags.insert(topic.to_string());
    }
    for word in words(text)
        .filter(|w| w.chars().count() >= 4 && !w.chars().all(|c| c.is_ascii_digit()))
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .take(MAX_WORD_TAGS)
    {
        tags.insert(word);
    }
    if is_secret {
        tags.insert(SECRET_TAG.to_string());
    }
    if tags.is_empty() {
        tags.insert(FALLBACK_TAG.to_string());
    }
    tags
}

/// Tagger used when no NLP backend is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordTagger;

#[async_trait]
impl Tagger for KeywordTagger {
    async fn tag(&self, text: &str, is_secret: bool) -> BTreeSet<String> {
        keyword_tags(text, is_secret)
    }
}
