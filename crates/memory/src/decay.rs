use chrono::{DateTime, Utc};

use crate::schema::{MemoryEntry, MemoryKind};

/// Half-life, in hours, used by the decay score for each kind. Facts and
/// intentions decay slowly; thoughts and messages decay fast since they are
/// only relevant to the conversation that produced them.
fn half_life_hours(kind: MemoryKind) -> f64 {
    match kind {
        MemoryKind::Fact => 24.0 * 30.0,
        MemoryKind::Intention => 24.0 * 14.0,
        MemoryKind::Message => 24.0,
        MemoryKind::Thought => 6.0,
    }
}

/// Exponential recency decay scaled by confidence:
/// `confidence * 0.5^(age_hours / half_life_hours)`.
pub fn decay_score(entry: &MemoryEntry, now: DateTime<Utc>) -> f64 {
    let age_hours = (now - entry.last_accessed_at).num_seconds().max(0) as f64 / 3600.0;
    let half_life = half_life_hours(entry.kind());
    let recency = 0.5_f64.powf(age_hours / half_life);
    entry.confidence as f64 * recency
}
