//! Acknowledgment registry (§4.3, §9): a small keyed map from
//! `(pattern_id, condition_key)` to the last acknowledged value, used by
//! the pattern detector and wake engine to suppress re-firing on
//! insignificant changes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// Default condition key used when a pattern doesn't distinguish between
/// multiple simultaneous conditions.
pub const DEFAULT_CONDITION_KEY: &str = "default";

#[derive(Debug, Clone)]
struct Acknowledgment {
    value: f64,
    acknowledged_at: DateTime<Utc>,
}

/// Time-indexed acknowledgment map. A pattern acknowledged at value `v` is
/// suppressed for subsequent values within `significant_change_threshold`
/// of `v`; a larger delta clears the acknowledgment and lets the pattern
/// fire again.
#[derive(Debug, Clone, Default)]
pub struct AcknowledgmentRegistry {
    entries: HashMap<(String, String), Acknowledgment>,
}

impl AcknowledgmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acknowledge(&mut self, pattern_id: &str, condition_key: &str, value: f64, now: DateTime<Utc>) {
        self.entries
            .insert((pattern_id.to_string(), condition_key.to_string()), Acknowledgment { value, acknowledged_at: now });
    }

    /// Whether `condition_value` should be suppressed for this pattern,
    /// given `significant_change_threshold`. Clears the acknowledgment as a
    /// side effect when the delta is large enough to allow re-firing.
    pub fn is_suppressed(&mut self, pattern_id: &str, condition_key: &str, condition_value: f64, significant_change_threshold: f64) -> bool {
        let key = (pattern_id.to_string(), condition_key.to_string());
        let Some(ack) = self.entries.get(&key) else {
            return false;
        };
        if (condition_value - ack.value).abs() < significant_change_threshold {
            true
        } else {
            self.entries.remove(&key);
            false
        }
    }

    /// Clear the acknowledgment for a pattern that did not match this tick,
    /// so it can fire again on re-occurrence (§4.3).
    pub fn clear(&mut self, pattern_id: &str, condition_key: &str) {
        self.entries.remove(&(pattern_id.to_string(), condition_key.to_string()));
    }

    /// Drop acknowledgments older than `max_age`, independent of the
    /// suppression-threshold logic above — a periodic sweep operation per
    /// the design notes (§9).
    pub fn sweep(&mut self, now: DateTime<Utc>, max_age: chrono::Duration) {
        self.entries.retain(|_, ack| now - ack.acknowledged_at < max_age);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn small_delta_is_suppressed() {
        let mut reg = AcknowledgmentRegistry::new();
        reg.acknowledge("sudden_silence", DEFAULT_CONDITION_KEY, 0.9, now());
        assert!(reg.is_suppressed("sudden_silence", DEFAULT_CONDITION_KEY, 0.95, 0.2));
    }

    #[test]
    fn large_delta_clears_and_is_not_suppressed() {
        let mut reg = AcknowledgmentRegistry::new();
        reg.acknowledge("sudden_silence", DEFAULT_CONDITION_KEY, 0.9, now());
        assert!(!reg.is_suppressed("sudden_silence", DEFAULT_CONDITION_KEY, 0.6, 0.2));
        // Cleared: an immediately following check against the old value no
        // longer suppresses either.
        assert!(!reg.is_suppressed("sudden_silence", DEFAULT_CONDITION_KEY, 0.9, 0.2));
    }

    #[test]
    fn sweep_drops_stale_entries() {
        let mut reg = AcknowledgmentRegistry::new();
        reg.acknowledge("p", DEFAULT_CONDITION_KEY, 0.5, now());
        reg.sweep(now() + chrono::Duration::days(2), chrono::Duration::days(1));
        assert!(reg.is_empty());
    }
}
