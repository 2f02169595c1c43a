//! Threshold / wake engine (C6): decides whether this tick should run
//! cognition (§4.4).

use uuid::Uuid;

use soma_config::WakeConfig;
use soma_core::{Priority, Signal, SignalKind};

/// Validates a plugin event's payload against its registered schema. Events
/// that fail validation are dropped with a warning before they can
/// influence a wake decision (§4.4). Left as a collaborator seam — the
/// concrete schema registry lives wherever plugins are registered, outside
/// this crate's scope.
pub trait PluginEventValidator: Send + Sync {
    fn validate(&self, plugin_id: &str, payload: &serde_json::Value) -> bool;
}

/// A validator that accepts every plugin event — used when no plugin
/// schema registry is wired up.
pub struct PermissiveValidator;

impl PluginEventValidator for PermissiveValidator {
    fn validate(&self, _plugin_id: &str, _payload: &serde_json::Value) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct WakeDecision {
    pub should_wake: bool,
    pub reason: Option<String>,
    pub trigger_signals: Vec<Uuid>,
}

impl WakeDecision {
    fn wake(reason: impl Into<String>, trigger_signals: Vec<Uuid>) -> Self {
        Self { should_wake: true, reason: Some(reason.into()), trigger_signals }
    }

    fn sleep() -> Self {
        Self { should_wake: false, reason: None, trigger_signals: Vec::new() }
    }
}

/// C6: a gated disjunction evaluated in spec order — first match wins
/// (§4.4). `energy` and `base_threshold`'s energy-derived multiplier are
/// supplied by the caller via `calculate_wake_threshold` (owned by
/// `soma-core::Energy`) so this engine stays a pure function of its inputs.
pub struct WakeEngine {
    config: WakeConfig,
}

impl WakeEngine {
    pub fn new(config: WakeConfig) -> Self {
        Self { config }
    }

    /// Decide whether to wake cognition this tick.
    ///
    /// - `tick_signals`: every signal produced this tick (after plugin-event
    ///   schema validation has already dropped invalid ones — see
    ///   [`filter_valid_plugin_events`]).
    /// - `energy`: the current energy scalar.
    /// - `wake_threshold`: `energy.calculate_wake_threshold(config.base_threshold)`,
    ///   computed by the caller since `soma-thinker` doesn't depend on `soma-core::Energy`'s
    ///   owning crate's full config surface.
    pub fn decide(&self, tick_signals: &[Signal], energy: f64, wake_threshold: f64) -> WakeDecision {
        if let Some(signal) = tick_signals.iter().find(|s| s.priority >= Priority::High || s.kind == SignalKind::UserMessage) {
            return WakeDecision::wake(format!("{:?} priority signal ({:?})", signal.priority, signal.kind), vec![signal.id]);
        }

        if let Some(signal) = tick_signals.iter().find(|s| s.kind == SignalKind::Thought) {
            return WakeDecision::wake("thought signal must be processed", vec![signal.id]);
        }

        if energy < self.config.energy_wake_floor {
            return WakeDecision::sleep();
        }

        if let Some(signal) =
            tick_signals.iter().find(|s| matches!(s.kind, SignalKind::ContactUrge | SignalKind::ThresholdCrossed) && s.metrics.value > wake_threshold)
        {
            return WakeDecision::wake(format!("{:?} exceeded wake threshold {wake_threshold:.3}", signal.kind), vec![signal.id]);
        }

        if let Some(signal) = tick_signals.iter().find(|s| s.kind == SignalKind::PatternBreak) {
            return WakeDecision::wake("pattern break signal", vec![signal.id]);
        }

        WakeDecision::sleep()
    }
}

/// Validate every `PluginEvent` signal against `validator`, dropping (and
/// logging) invalid ones before they reach [`WakeEngine::decide`].
pub fn filter_valid_plugin_events(signals: Vec<Signal>, validator: &dyn PluginEventValidator) -> Vec<Signal> {
    signals
        .into_iter()
        .filter(|s| match &s.data {
            Some(soma_core::SignalData::PluginEvent { plugin_id, payload }) => {
                let ok = validator.validate(plugin_id, payload);
                if !ok {
                    tracing::warn!(%plugin_id, "dropping plugin event: failed schema validation");
                }
                ok
            }
            _ => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use soma_core::{Metrics, SignalData};

    fn now() -> chrono::DateTime<chrono::Utc> {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    fn engine() -> WakeEngine {
        WakeEngine::new(WakeConfig::default())
    }

    #[test]
    fn critical_priority_always_wakes_even_below_energy_floor() {
        let e = engine();
        let signal = Signal::new(SignalKind::ContactUrge, "core", Priority::Critical, Metrics::new(0.1), now());
        let decision = e.decide(&[signal], 0.05, 0.9);
        assert!(decision.should_wake);
    }

    #[test]
    fn normal_priority_contact_urge_is_suppressed_below_energy_floor() {
        let e = engine();
        let signal = Signal::new(SignalKind::ContactUrge, "core", Priority::Normal, Metrics::new(0.95), now());
        let decision = e.decide(&[signal], 0.05, 0.2);
        assert!(!decision.should_wake);
    }

    #[test]
    fn user_message_always_wakes_regardless_of_priority() {
        let e = engine();
        let signal = Signal::new(SignalKind::UserMessage, "telegram", Priority::Low, Metrics::new(0.0), now())
            .with_data(SignalData::UserMessage { text: "hi".into(), channel: "telegram".into(), recipient: "u1".into() });
        let decision = e.decide(&[signal], 0.5, 0.5);
        assert!(decision.should_wake);
    }

    #[test]
    fn thought_bypasses_energy_gate() {
        let e = engine();
        let signal = Signal::new(SignalKind::Thought, "cognition", Priority::Idle, Metrics::new(0.0), now())
            .with_data(SignalData::Thought { depth: 0, root_thought_id: None, parent_thought_id: None, content: "hmm".into() });
        let decision = e.decide(&[signal], 0.0, 0.9);
        assert!(decision.should_wake);
    }

    #[test]
    fn threshold_crossed_wakes_when_value_exceeds_threshold() {
        let e = engine();
        let signal = Signal::new(SignalKind::ThresholdCrossed, "core", Priority::Normal, Metrics::new(0.8), now());
        let decision = e.decide(&[signal], 0.7, 0.6);
        assert!(decision.should_wake);
    }

    #[test]
    fn no_signals_means_no_wake() {
        let e = engine();
        assert!(!e.decide(&[], 0.8, 0.5).should_wake);
    }

    #[test]
    fn invalid_plugin_event_is_dropped_before_wake_decision() {
        struct RejectAll;
        impl PluginEventValidator for RejectAll {
            fn validate(&self, _plugin_id: &str, _payload: &serde_json::Value) -> bool {
                false
            }
        }
        let signal = Signal::new(SignalKind::PluginEvent, "plugin:x", Priority::High, Metrics::new(1.0), now())
            .with_data(SignalData::PluginEvent { plugin_id: "x".into(), payload: serde_json::json!({}) });
        let filtered = filter_valid_plugin_events(vec![signal], &RejectAll);
        assert!(filtered.is_empty());
    }
}
