//! Pattern detector (C5): anomaly/silence detection with acknowledgment
//! memory (§4.3).
//!
//! Only the `sudden_silence` pattern is implemented. The source disables a
//! rate-spike and an energy-pressure-conflict detector; per the spec's open
//! questions (§9) those are treated as removed, not merely disabled, here.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use soma_config::PatternConfig;
use soma_core::{Metrics, Priority, Signal, SignalData, SignalKind};

use crate::ack::{AcknowledgmentRegistry, DEFAULT_CONDITION_KEY};

pub const SUDDEN_SILENCE_PATTERN_ID: &str = "sudden_silence";

/// A detected pattern, ready to be turned into a `PatternBreak` signal.
#[derive(Debug, Clone)]
pub struct PatternMatch {
    pub pattern_id: String,
    pub condition_key: String,
    pub condition_value: f64,
    pub confidence: f64,
}

impl PatternMatch {
    pub fn into_signal(self, source: impl Into<String>, now: DateTime<Utc>) -> Signal {
        Signal::new(SignalKind::PatternBreak, source, Priority::Normal, Metrics::new(self.confidence).with_confidence(self.confidence), now)
            .with_data(SignalData::PatternBreak { pattern_id: self.pattern_id, condition_key: self.condition_key, condition_value: self.condition_value })
    }
}

/// Detects sudden silence after a period of activity, and owns the
/// acknowledgment registry that suppresses re-fires on insignificant value
/// changes (§4.3).
pub struct PatternDetector {
    config: PatternConfig,
    ack: AcknowledgmentRegistry,
    /// Timestamps of recent sensory activity (any `user_message` or
    /// `channel_event` signal), used to compute the recent-activity window.
    activity_history: VecDeque<DateTime<Utc>>,
    last_activity_at: Option<DateTime<Utc>>,
}

impl PatternDetector {
    pub fn new(config: PatternConfig) -> Self {
        Self { config, ack: AcknowledgmentRegistry::new(), activity_history: VecDeque::new(), last_activity_at: None }
    }

    /// Record this tick's sensory activity and evaluate `sudden_silence`.
    /// Returns `Some` only when the pattern matched *and* was not suppressed
    /// by a prior acknowledgment at a close value.
    pub fn detect(&mut self, tick_signals: &[Signal], now: DateTime<Utc>) -> Option<PatternMatch> {
        let threshold = chrono::Duration::seconds(self.config.sudden_silence_threshold_secs as i64);
        let window = threshold * 3;

        let current_tick_user_messages = tick_signals.iter().filter(|s| s.kind == SignalKind::UserMessage).count();
        let is_sensory_activity = |s: &Signal| matches!(s.kind, SignalKind::UserMessage | SignalKind::ChannelEvent);

        for signal in tick_signals.iter().filter(|s| is_sensory_activity(s)) {
            self.activity_history.push_back(signal.timestamp);
            self.last_activity_at = Some(self.last_activity_at.map_or(signal.timestamp, |prev| prev.max(signal.timestamp)));
        }
        while self.activity_history.front().is_some_and(|t| now - *t > window) {
            self.activity_history.pop_front();
        }

        let Some(last_activity_at) = self.last_activity_at else {
            return None;
        };

        let average_activity = self.activity_history.len() as f64;
        let silence_duration = now - last_activity_at;

        let matched = average_activity > 1.0 && current_tick_user_messages == 0 && silence_duration > threshold;

        if !matched {
            self.ack.clear(SUDDEN_SILENCE_PATTERN_ID, DEFAULT_CONDITION_KEY);
            return None;
        }

        let confidence = (silence_duration.num_milliseconds() as f64 / (2.0 * threshold.num_milliseconds() as f64)).min(1.0);

        if self.ack.is_suppressed(SUDDEN_SILENCE_PATTERN_ID, DEFAULT_CONDITION_KEY, confidence, self.significant_change_threshold()) {
            return None;
        }

        Some(PatternMatch { pattern_id: SUDDEN_SILENCE_PATTERN_ID.to_string(), condition_key: DEFAULT_CONDITION_KEY.to_string(), condition_value: confidence, confidence })
    }

    fn significant_change_threshold(&self) -> f64 {
        0.2
    }

    pub fn acknowledge(&mut self, pattern_id: &str, condition_key: &str, value: f64, now: DateTime<Utc>) {
        self.ack.acknowledge(pattern_id, condition_key, value, now);
    }

    pub fn sweep_acknowledgments(&mut self, now: DateTime<Utc>) {
        self.ack.sweep(now, chrono::Duration::seconds(self.config.acknowledgment_suppression_secs as i64 * 4));
    }
}

/// Unused by the emitted signal but kept so callers can generate a stable
/// correlation id for a `PatternBreak` signal chain if they want one.
pub fn new_correlation_id() -> Uuid {
    Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2026-01-01T12:00:00Z".parse().unwrap()
    }

    fn user_message(at: DateTime<Utc>) -> Signal {
        Signal::new(SignalKind::UserMessage, "telegram", Priority::Normal, Metrics::new(1.0), at)
    }

    fn config() -> PatternConfig {
        PatternConfig { sudden_silence_threshold_secs: 3600, acknowledgment_suppression_secs: 1800 }
    }

    #[test]
    fn no_activity_history_never_matches() {
        let mut detector = PatternDetector::new(config());
        assert!(detector.detect(&[], now()).is_none());
    }

    #[test]
    fn silence_after_active_period_matches() {
        let mut detector = PatternDetector::new(config());
        let base = now();
        detector.detect(&[user_message(base), user_message(base + chrono::Duration::minutes(1))], base);

        let later = base + chrono::Duration::hours(2);
        let result = detector.detect(&[], later);
        assert!(result.is_some());
        let m = result.unwrap();
        assert_eq!(m.pattern_id, SUDDEN_SILENCE_PATTERN_ID);
        assert!(m.confidence > 0.0);
    }

    #[test]
    fn acknowledged_close_value_is_suppressed() {
        let mut detector = PatternDetector::new(config());
        let base = now();
        detector.detect(&[user_message(base), user_message(base + chrono::Duration::minutes(1))], base);

        let fire_at = base + chrono::Duration::hours(2);
        let first = detector.detect(&[], fire_at).unwrap();
        detector.acknowledge(SUDDEN_SILENCE_PATTERN_ID, DEFAULT_CONDITION_KEY, first.confidence, fire_at);

        // Re-evaluate a moment later at a close confidence value: suppressed.
        let still_silent = fire_at + chrono::Duration::minutes(1);
        assert!(detector.detect(&[], still_silent).is_none());
    }

    #[test]
    fn current_tick_user_message_suppresses_match() {
        let mut detector = PatternDetector::new(config());
        let base = now();
        detector.detect(&[user_message(base), user_message(base + chrono::Duration::minutes(1))], base);

        let later = base + chrono::Duration::hours(2);
        assert!(detector.detect(&[user_message(later)], later).is_none());
    }
}
