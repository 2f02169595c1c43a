//! The signal envelope — the common shape for every stimulus that flows
//! through the pipeline: sensory input, internal neuron readings,
//! aggregator/pattern-detector output, plugin events, and thoughts.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which side of the pipeline produced a signal. Every [`SignalKind`] belongs
/// to exactly one partition; the partition is what the wake engine and
/// aggregator key most of their behaviour on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalPartition {
    /// External inputs: a channel delivering a user message, a webhook, etc.
    Sensory,
    /// Internal neuron readings (energy, contact urge, threshold crossings).
    Internal,
    /// Derived from aggregation / pattern detection.
    Meta,
    /// Emitted by a plugin.
    Plugin,
    /// A thought produced by a previous cognition run.
    Thought,
}

/// The closed tag set of signal types. New variants must be added here and
/// given a partition + default TTL below — nothing downstream switches on an
/// open string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    UserMessage,
    ChannelEvent,
    ContactUrge,
    ThresholdCrossed,
    PatternBreak,
    AggregateUpdated,
    PluginEvent,
    Thought,
}

impl SignalKind {
    pub fn partition(self) -> SignalPartition {
        match self {
            SignalKind::UserMessage | SignalKind::ChannelEvent => SignalPartition::Sensory,
            SignalKind::ContactUrge | SignalKind::ThresholdCrossed => SignalPartition::Internal,
            SignalKind::PatternBreak | SignalKind::AggregateUpdated => SignalPartition::Meta,
            SignalKind::PluginEvent => SignalPartition::Plugin,
            SignalKind::Thought => SignalPartition::Thought,
        }
    }

    /// Per-type TTL table. `None` means the signal accumulates indefinitely
    /// and is only evicted by explicit pruning logic elsewhere (e.g. bucket
    /// emptiness in the aggregator).
    pub fn default_ttl(self) -> Option<Duration> {
        match self {
            SignalKind::UserMessage => Some(Duration::from_secs(15 * 60)),
            SignalKind::ChannelEvent => Some(Duration::from_secs(15 * 60)),
            SignalKind::ContactUrge => Some(Duration::from_secs(60 * 60)),
            SignalKind::ThresholdCrossed => Some(Duration::from_secs(30 * 60)),
            SignalKind::PatternBreak => Some(Duration::from_secs(60 * 60)),
            SignalKind::AggregateUpdated => Some(Duration::from_secs(10 * 60)),
            SignalKind::PluginEvent => Some(Duration::from_secs(30 * 60)),
            SignalKind::Thought => None,
        }
    }
}

/// Priority ladder. Ordering matters: `Critical` must compare greater than
/// everything else so the wake engine can use a simple `>=` check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Idle,
    Low,
    Normal,
    High,
    Critical,
}

/// The primary metric plus the optional derived readings the aggregator
/// computes once a bucket has history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub value: f64,
    pub previous_value: Option<f64>,
    pub rate_of_change: Option<f64>,
    pub confidence: Option<f64>,
}

impl Metrics {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            previous_value: None,
            rate_of_change: None,
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Typed payload, discriminated by `kind` in the wire shape. Only a subset of
/// [`SignalKind`]s carry structured data; everything else relies on `metrics`
/// alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SignalData {
    UserMessage {
        text: String,
        channel: String,
        recipient: String,
    },
    PluginEvent {
        plugin_id: String,
        payload: serde_json::Value,
    },
    ThresholdCrossed {
        threshold: f64,
        observed: f64,
    },
    PatternBreak {
        pattern_id: String,
        condition_key: String,
        condition_value: f64,
    },
    Thought {
        depth: u32,
        root_thought_id: Option<Uuid>,
        parent_thought_id: Option<Uuid>,
        content: String,
    },
}

/// The uniform envelope every component of the pipeline passes around.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub priority: Priority,
    pub metrics: Metrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<SignalData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
}

impl Signal {
    /// Construct a signal with a freshly generated id, `now` as its
    /// timestamp, and the kind's default TTL applied.
    pub fn new(kind: SignalKind, source: impl Into<String>, priority: Priority, metrics: Metrics, now: DateTime<Utc>) -> Self {
        let expires_at = kind
            .default_ttl()
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|d| now + d);
        Self {
            id: Uuid::new_v4(),
            kind,
            source: source.into(),
            timestamp: now,
            priority,
            metrics,
            data: None,
            expires_at,
            correlation_id: None,
            parent_id: None,
        }
    }

    pub fn with_data(mut self, data: SignalData) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Expired signals are eligible for eviction.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    pub fn partition(&self) -> SignalPartition {
        self.kind.partition()
    }

    pub fn is_thought(&self) -> bool {
        self.partition() == SignalPartition::Thought
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn priority_ordering_puts_critical_highest() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert!(Priority::Low > Priority::Idle);
    }

    #[test]
    fn thought_signals_have_no_ttl() {
        let s = Signal::new(SignalKind::Thought, "cognition", Priority::Normal, Metrics::new(1.0), now());
        assert!(s.expires_at.is_none());
        assert!(!s.is_expired(now() + chrono::Duration::days(365)));
    }

    #[test]
    fn user_message_expires_after_ttl() {
        let s = Signal::new(SignalKind::UserMessage, "telegram", Priority::High, Metrics::new(1.0), now());
        assert!(!s.is_expired(now()));
        assert!(s.is_expired(now() + chrono::Duration::hours(1)));
    }

    #[test]
    fn partition_mapping_is_stable() {
        assert_eq!(SignalKind::UserMessage.partition(), SignalPartition::Sensory);
        assert_eq!(SignalKind::ContactUrge.partition(), SignalPartition::Internal);
        assert_eq!(SignalKind::PatternBreak.partition(), SignalPartition::Meta);
        assert_eq!(SignalKind::PluginEvent.partition(), SignalPartition::Plugin);
        assert_eq!(SignalKind::Thought.partition(), SignalPartition::Thought);
    }
}
