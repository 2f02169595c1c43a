//! Signal aggregator (C4): one rolling bucket per `(type, source)` (§4.3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use soma_core::{Signal, SignalKind};

/// Direction a bucket's value has been moving, derived from the last two
/// updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Stable,
    Increasing,
    Decreasing,
    Volatile,
}

/// How large a relative swing between consecutive values counts as
/// "volatile" rather than a simple increase/decrease.
const VOLATILE_SWING_RATIO: f64 = 0.5;

/// Rolling aggregate for one `(type, source)` key. Signals are retained
/// individually (so `prune` can evict expired ones and recompute min/max/
/// avg/count) rather than folded into running statistics that can't be
/// un-added.
#[derive(Debug, Clone)]
pub struct AggregateBucket {
    pub kind: SignalKind,
    pub source: String,
    signals: Vec<Signal>,
    pub current_value: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub rate_of_change: f64,
    pub last_update: DateTime<Utc>,
    pub trend: Trend,
}

impl AggregateBucket {
    fn new(signal: &Signal) -> Self {
        let value = signal.metrics.value;
        Self {
            kind: signal.kind,
            source: signal.source.clone(),
            signals: vec![signal.clone()],
            current_value: value,
            min: value,
            max: value,
            avg: value,
            rate_of_change: signal.metrics.rate_of_change.unwrap_or(0.0),
            last_update: signal.timestamp,
            trend: Trend::Stable,
        }
    }

    pub fn count(&self) -> usize {
        self.signals.len()
    }

    fn add(&mut self, signal: &Signal) {
        let previous = self.current_value;
        self.signals.push(signal.clone());
        self.current_value = signal.metrics.value;
        self.min = self.min.min(signal.metrics.value);
        self.max = self.max.max(signal.metrics.value);
        self.avg = self.signals.iter().map(|s| s.metrics.value).sum::<f64>() / self.signals.len() as f64;
        self.rate_of_change = signal.metrics.value - previous;
        self.last_update = signal.timestamp;
        self.trend = classify_trend(previous, signal.metrics.value);
    }

    /// Drop signals that have expired as of `now`; recompute derived stats
    /// from what remains. Returns `true` if the bucket is now empty (a
    /// pruning caller should remove it).
    fn prune(&mut self, now: DateTime<Utc>) -> bool {
        self.signals.retain(|s| !s.is_expired(now));
        if self.signals.is_empty() {
            return true;
        }
        self.min = self.signals.iter().map(|s| s.metrics.value).fold(f64::INFINITY, f64::min);
        self.max = self.signals.iter().map(|s| s.metrics.value).fold(f64::NEG_INFINITY, f64::max);
        self.avg = self.signals.iter().map(|s| s.metrics.value).sum::<f64>() / self.signals.len() as f64;
        self.current_value = self.signals.last().map(|s| s.metrics.value).unwrap_or(self.current_value);
        false
    }
}

fn classify_trend(previous: f64, current: f64) -> Trend {
    let delta = current - previous;
    if delta.abs() < f64::EPSILON {
        return Trend::Stable;
    }
    let denom = previous.abs().max(f64::EPSILON);
    if (delta.abs() / denom) > VOLATILE_SWING_RATIO {
        Trend::Volatile
    } else if delta > 0.0 {
        Trend::Increasing
    } else {
        Trend::Decreasing
    }
}

/// Keyed bucket store. Created on first signal for a `(type, source)` pair,
/// pruned when empty and all contained signals have expired.
#[derive(Debug, Clone, Default)]
pub struct SignalAggregator {
    buckets: HashMap<(SignalKind, String), AggregateBucket>,
}

impl SignalAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_all(&mut self, signals: &[Signal]) {
        for signal in signals {
            let key = (signal.kind, signal.source.clone());
            self.buckets.entry(key).and_modify(|b| b.add(signal)).or_insert_with(|| AggregateBucket::new(signal));
        }
    }

    pub fn get(&self, kind: SignalKind, source: &str) -> Option<&AggregateBucket> {
        self.buckets.get(&(kind, source.to_string()))
    }

    pub fn get_all_aggregates(&self) -> Vec<&AggregateBucket> {
        self.buckets.values().collect()
    }

    /// Drop expired signals from every bucket; remove buckets that are now
    /// empty. Returns the number of buckets removed.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let to_remove: Vec<(SignalKind, String)> =
            self.buckets.iter_mut().filter(|(_, bucket)| bucket.prune(now)).map(|(key, _)| key.clone()).collect();
        let removed = to_remove.len();
        for key in to_remove {
            self.buckets.remove(&key);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soma_core::{Metrics, Priority};

    fn now() -> DateTime<Utc> {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    fn signal(kind: SignalKind, source: &str, value: f64, at: DateTime<Utc>) -> Signal {
        Signal::new(kind, source, Priority::Normal, Metrics::new(value), at)
    }

    #[test]
    fn two_signals_same_key_share_one_bucket() {
        let mut agg = SignalAggregator::new();
        agg.add_all(&[
            signal(SignalKind::ContactUrge, "telegram", 0.3, now()),
            signal(SignalKind::ContactUrge, "telegram", 0.5, now()),
        ]);
        assert_eq!(agg.len(), 1);
        let bucket = agg.get(SignalKind::ContactUrge, "telegram").unwrap();
        assert_eq!(bucket.count(), 2);
        assert_eq!(bucket.current_value, 0.5);
    }

    #[test]
    fn different_sources_get_separate_buckets() {
        let mut agg = SignalAggregator::new();
        agg.add_all(&[signal(SignalKind::ContactUrge, "telegram", 0.3, now()), signal(SignalKind::ContactUrge, "email", 0.3, now())]);
        assert_eq!(agg.len(), 2);
    }

    #[test]
    fn prune_drops_empty_buckets_after_all_signals_expire() {
        let mut agg = SignalAggregator::new();
        agg.add_all(&[signal(SignalKind::AggregateUpdated, "core", 0.1, now())]);
        assert_eq!(agg.len(), 1);
        let removed = agg.prune(now() + chrono::Duration::hours(2));
        assert_eq!(removed, 1);
        assert!(agg.is_empty());
    }

    #[test]
    fn trend_detects_volatile_swing() {
        let mut agg = SignalAggregator::new();
        agg.add_all(&[signal(SignalKind::ContactUrge, "telegram", 0.2, now())]);
        agg.add_all(&[signal(SignalKind::ContactUrge, "telegram", 0.9, now())]);
        assert_eq!(agg.get(SignalKind::ContactUrge, "telegram").unwrap().trend, Trend::Volatile);
    }

    #[test]
    fn trend_detects_gentle_increase() {
        let mut agg = SignalAggregator::new();
        agg.add_all(&[signal(SignalKind::ContactUrge, "telegram", 0.5, now())]);
        agg.add_all(&[signal(SignalKind::ContactUrge, "telegram", 0.55, now())]);
        assert_eq!(agg.get(SignalKind::ContactUrge, "telegram").unwrap().trend, Trend::Increasing);
    }
}
