use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::decay::decay_score;
use crate::event_log::{MemoryEventLog, MemoryRecordEvent};
use crate::schema::{FactMetadata, MemoryData, MemoryEntry, MemoryKind, MessageRole};
use crate::store::MemoryStore;

/// The facts/thoughts/intentions/messages store, backed by an append-only
/// event log for durability across restarts.
pub struct MemoryProvider {
    store: MemoryStore,
    event_log: Option<MemoryEventLog>,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self { store: MemoryStore::default(), event_log: None }
    }
}

impl MemoryProvider {
    /// Load (or create) a provider backed by an event log at `path`, replaying
    /// any existing entries.
    pub async fn with_event_log(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let log = MemoryEventLog::new(path.clone());
        let mut store = MemoryStore::default();

        let events = log.load()?;
        let replayed = events.len();
        for event in events {
            if event.entry.fact_key().is_some() {
                store.upsert_fact(event.entry);
            } else {
                store.insert(event.entry);
            }
        }
        info!(path = %path.display(), replayed, "memory loaded from event log");

        Ok(Self { store, event_log: Some(log) })
    }

    pub fn all(&self) -> &[MemoryEntry] {
        self.store.all()
    }

    pub fn get(&self, id: Uuid) -> Option<&MemoryEntry> {
        self.store.get(id)
    }

    /// Look up the current value of a fact keyed `(subject, attribute)`.
    pub fn get_fact(&self, subject: &str, attribute: &str) -> Option<&MemoryEntry> {
        self.store.get_fact(subject, attribute)
    }

    async fn persist(&self, entry: &MemoryEntry) -> Result<()> {
        if let Some(log) = &self.event_log {
            let event = MemoryRecordEvent { event_id: Uuid::new_v4(), occurred_at: entry.created_at, entry: entry.clone() };
            log.append(&event).await?;
        } else {
            warn!(kind = ?entry.kind(), "no event log configured — entry is ephemeral");
        }
        Ok(())
    }

    /// Upsert a fact keyed on `(subject, attribute)`, replacing any previous
    /// value for the same pair.
    pub async fn upsert_fact(
        &mut self,
        subject: impl Into<String>,
        attribute: impl Into<String>,
        value: impl Into<String>,
        confidence: f32,
        source: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<MemoryEntry> {
        let metadata = FactMetadata { subject: subject.into(), attribute: attribute.into() };
        let entry = MemoryEntry::new(value, MemoryData::Fact { metadata }, source, confidence, now);
        self.persist(&entry).await?;
        debug!(subject = %entry_subject(&entry), "fact upserted");
        self.store.upsert_fact(entry.clone());
        Ok(entry)
    }

    pub async fn add_thought(&mut self, content: impl Into<String>, depth: u32, source: impl Into<String>, now: DateTime<Utc>) -> Result<MemoryEntry> {
        let entry = MemoryEntry::new(content, MemoryData::Thought { depth }, source, 1.0, now);
        self.persist(&entry).await?;
        self.store.insert(entry.clone());
        Ok(entry)
    }

    pub async fn add_intention(
        &mut self,
        content: impl Into<String>,
        due_at: Option<DateTime<Utc>>,
        source: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<MemoryEntry> {
        let entry = MemoryEntry::new(content, MemoryData::Intention { due_at, fulfilled: false }, source, 1.0, now);
        self.persist(&entry).await?;
        self.store.insert(entry.clone());
        Ok(entry)
    }

    pub fn mark_intention_fulfilled(&mut self, id: Uuid) -> bool {
        if let Some(entry) = self.store.get_mut(id) {
            if let MemoryData::Intention { fulfilled, .. } = &mut entry.data {
                *fulfilled = true;
                return true;
            }
        }
        false
    }

    pub async fn add_message(
        &mut self,
        content: impl Into<String>,
        recipient: impl Into<String>,
        role: MessageRole,
        source: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<MemoryEntry> {
        let entry = MemoryEntry::new(content, MemoryData::Message { recipient: recipient.into(), role }, source, 1.0, now);
        self.persist(&entry).await?;
        self.store.insert(entry.clone());
        Ok(entry)
    }

    pub fn by_kind(&self, kind: MemoryKind) -> Vec<&MemoryEntry> {
        self.store.all().iter().filter(|e| e.kind() == kind).collect()
    }

    /// Case-insensitive substring search over content, newest first.
    pub fn search(&self, query: &str, limit: usize) -> Vec<&MemoryEntry> {
        let needle = query.to_lowercase();
        let mut hits: Vec<&MemoryEntry> = self
            .store
            .all()
            .iter()
            .filter(|e| e.content.to_lowercase().contains(&needle))
            .collect();
        hits.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        hits.truncate(limit);
        hits
    }

    /// Drop entries whose decay score has fallen below `min_score`. Does not
    /// touch the durable event log — the log remains the full history.
    pub fn prune_decayed(&mut self, now: DateTime<Utc>, min_score: f64) -> usize {
        self.store.prune_decayed(now, min_score, decay_score)
    }
}

fn entry_subject(entry: &MemoryEntry) -> String {
    entry.fact_key().map(|(s, a)| format!("{s}.{a}")).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_fact_replaces_previous_value_in_store_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut provider = MemoryProvider::with_event_log(&path).await.unwrap();

        let now = Utc::now();
        provider.upsert_fact("user", "name", "Alice", 0.9, "chat", now).await.unwrap();
        provider.upsert_fact("user", "name", "Alicia", 0.9, "chat", now).await.unwrap();

        assert_eq!(provider.by_kind(MemoryKind::Fact).len(), 1);
        assert_eq!(provider.by_kind(MemoryKind::Fact)[0].content, "Alicia");

        let reloaded = MemoryProvider::with_event_log(&path).await.unwrap();
        assert_eq!(reloaded.by_kind(MemoryKind::Fact)[0].content, "Alicia");
    }

    #[tokio::test]
    async fn search_finds_case_insensitive_substring() {
        let mut provider = MemoryProvider::default();
        let now = Utc::now();
        provider.add_thought("The weather is sunny today", 0, "cognition", now).await.unwrap();
        let hits = provider.search("WEATHER", 10);
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn prune_decayed_leaves_confident_facts() {
        let mut provider = MemoryProvider::default();
        let now = Utc::now();
        provider.add_thought("ephemeral", 0, "cognition", now).await.unwrap();
        provider.upsert_fact("user", "name", "Alice", 1.0, "chat", now).await.unwrap();

        let far_future = now + chrono::Duration::hours(48);
        let removed = provider.prune_decayed(far_future, 0.2);
        assert_eq!(removed, 1);
        assert_eq!(provider.by_kind(MemoryKind::Fact).len(), 1);
    }

    #[tokio::test]
    async fn get_fact_returns_current_value_after_replacement() {
        let mut provider = MemoryProvider::default();
        let now = Utc::now();
        provider.upsert_fact("user", "age", "30", 0.9, "chat", now).await.unwrap();
        provider.upsert_fact("user", "age", "31", 0.9, "chat", now).await.unwrap();
        assert_eq!(provider.get_fact("user", "age").unwrap().content, "31");
        assert!(provider.get_fact("user", "missing").is_none());
    }

    #[tokio::test]
    async fn mark_intention_fulfilled_updates_entry() {
        let mut provider = MemoryProvider::default();
        let now = Utc::now();
        let entry = provider.add_intention("follow up with user", None, "agent", now).await.unwrap();
        assert!(provider.mark_intention_fulfilled(entry.id));
        let stored = provider.get(entry.id).unwrap();
        match &stored.data {
            MemoryData::Intention { fulfilled, .. } => assert!(*fulfilled),
            _ => panic!("expected intention"),
        }
    }
}
