use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::schema::MemoryEntry;

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Vec<MemoryEntry>,
    by_id: HashMap<Uuid, usize>,
    /// Index from fact `(subject, attribute)` to its slot, so upsert is O(1)
    /// instead of a linear scan.
    by_fact_key: HashMap<(String, String), usize>,
}

impl MemoryStore {
    /// Insert a non-fact entry. Returns `false` if the id already exists.
    pub fn insert(&mut self, entry: MemoryEntry) -> bool {
        if self.by_id.contains_key(&entry.id) {
            return false;
        }
        self.push(entry);
        true
    }

    /// Insert or replace a fact keyed on `(subject, attribute)`. Returns the
    /// replaced entry, if any.
    pub fn upsert_fact(&mut self, entry: MemoryEntry) -> Option<MemoryEntry> {
        let key = entry
            .fact_key()
            .map(|(s, a)| (s.to_string(), a.to_string()))
            .expect("upsert_fact requires a Fact entry");

        if let Some(&idx) = self.by_fact_key.get(&key) {
            let old = std::mem::replace(&mut self.entries[idx], entry);
            self.by_id.remove(&old.id);
            self.by_id.insert(self.entries[idx].id, idx);
            Some(old)
        } else {
            self.push(entry);
            let idx = self.entries.len() - 1;
            self.by_fact_key.insert(key, idx);
            None
        }
    }

    fn push(&mut self, entry: MemoryEntry) {
        let idx = self.entries.len();
        self.by_id.insert(entry.id, idx);
        if let Some((s, a)) = entry.fact_key() {
            self.by_fact_key.insert((s.to_string(), a.to_string()), idx);
        }
        self.entries.push(entry);
    }

    pub fn all(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn get(&self, id: Uuid) -> Option<&MemoryEntry> {
        self.by_id.get(&id).and_then(|&i| self.entries.get(i))
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut MemoryEntry> {
        let idx = *self.by_id.get(&id)?;
        self.entries.get_mut(idx)
    }

    /// Look up a fact by its `(subject, attribute)` key.
    pub fn get_fact(&self, subject: &str, attribute: &str) -> Option<&MemoryEntry> {
        let &idx = self.by_fact_key.get(&(subject.to_string(), attribute.to_string()))?;
        self.entries.get(idx)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_id.clear();
        self.by_fact_key.clear();
    }

    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&MemoryEntry) -> bool,
    {
        self.entries.retain(|entry| keep(entry));
        self.reindex();
    }

    /// Drop entries whose decay score under `score_fn` falls below
    /// `min_score`. Returns the number removed.
    pub fn prune_decayed<F>(&mut self, now: DateTime<Utc>, min_score: f64, score_fn: F) -> usize
    where
        F: Fn(&MemoryEntry, DateTime<Utc>) -> f64,
    {
        let before = self.entries.len();
        self.entries.retain(|entry| score_fn(entry, now) >= min_score);
        self.reindex();
        before - self.entries.len()
    }

    fn reindex(&mut self) {
        self.by_id = self.entries.iter().enumerate().map(|(i, e)| (e.id, i)).collect();
        self.by_fact_key = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.fact_key().map(|(s, a)| ((s.to_string(), a.to_string()), i)))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FactMetadata, MemoryData};

    fn fact(subject: &str, attribute: &str, content: &str, now: DateTime<Utc>) -> MemoryEntry {
        MemoryEntry::new(
            content,
            MemoryData::Fact { metadata: FactMetadata { subject: subject.into(), attribute: attribute.into() } },
            "test",
            0.8,
            now,
        )
    }

    #[test]
    fn upsert_fact_replaces_same_subject_attribute() {
        let now = Utc::now();
        let mut store = MemoryStore::default();
        store.upsert_fact(fact("user", "favorite_color", "blue", now));
        let replaced = store.upsert_fact(fact("user", "favorite_color", "green", now));

        assert!(replaced.is_some());
        assert_eq!(store.len(), 1);
        assert_eq!(store.all()[0].content, "green");
    }

    #[test]
    fn upsert_fact_keeps_distinct_keys_separate() {
        let now = Utc::now();
        let mut store = MemoryStore::default();
        store.upsert_fact(fact("user", "favorite_color", "blue", now));
        store.upsert_fact(fact("user", "favorite_food", "pasta", now));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn prune_decayed_removes_low_scoring_entries() {
        let now = Utc::now();
        let mut store = MemoryStore::default();
        store.upsert_fact(fact("user", "a", "1", now));
        store.upsert_fact(fact("user", "b", "2", now));

        let removed = store.prune_decayed(now, 0.5, |e, _| if e.content == "1" { 0.1 } else { 0.9 });
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.all()[0].content, "2");
    }
}
