use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which of the four memory kinds an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Fact,
    Thought,
    Intention,
    Message,
}

/// `(subject, attribute)` identifies a fact for upsert purposes: recording a
/// new fact with the same pair replaces the previous value rather than
/// accumulating duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactMetadata {
    pub subject: String,
    pub attribute: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Agent,
}

/// Kind-specific structured data. `Fact` carries the dedup key, `Thought`
/// carries recursion depth, `Intention` carries a due time and fulfillment
/// flag, `Message` carries the conversation recipient and role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum MemoryData {
    Fact {
        metadata: FactMetadata,
    },
    Thought {
        depth: u32,
    },
    Intention {
        due_at: Option<DateTime<Utc>>,
        fulfilled: bool,
    },
    Message {
        recipient: String,
        role: MessageRole,
    },
}

impl MemoryData {
    pub fn kind(&self) -> MemoryKind {
        match self {
            MemoryData::Fact { .. } => MemoryKind::Fact,
            MemoryData::Thought { .. } => MemoryKind::Thought,
            MemoryData::Intention { .. } => MemoryKind::Intention,
            MemoryData::Message { .. } => MemoryKind::Message,
        }
    }
}

/// A single memory record. `content` is the human-readable text; `data`
/// carries the kind-specific structure used for dedup and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub content: String,
    pub data: MemoryData,
    pub source: String,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(content: impl Into<String>, data: MemoryData, source: impl Into<String>, confidence: f32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            data,
            source: source.into(),
            confidence: confidence.clamp(0.0, 1.0),
            created_at: now,
            last_accessed_at: now,
        }
    }

    pub fn kind(&self) -> MemoryKind {
        self.data.kind()
    }

    /// Fact identity used for upsert dedup; `None` for non-fact entries.
    pub fn fact_key(&self) -> Option<(&str, &str)> {
        match &self.data {
            MemoryData::Fact { metadata } => Some((metadata.subject.as_str(), metadata.attribute.as_str())),
            _ => None,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = now;
    }
}

/// Truncate `s` to at most `max_chars` characters, respecting UTF-8
/// boundaries, appending an ellipsis when truncated.
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{truncated}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fact_key_only_present_on_fact_entries() {
        let now = Utc::now();
        let fact = MemoryEntry::new(
            "likes tea",
            MemoryData::Fact { metadata: FactMetadata { subject: "user".into(), attribute: "beverage".into() } },
            "chat",
            0.8,
            now,
        );
        assert_eq!(fact.fact_key(), Some(("user", "beverage")));

        let thought = MemoryEntry::new("hmm", MemoryData::Thought { depth: 1 }, "cognition", 0.5, now);
        assert_eq!(thought.fact_key(), None);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello world", 5), "hell…");
    }
}
