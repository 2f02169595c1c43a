//! Pre-cognition layer: aggregation, pattern detection, and the wake
//! decision (C4, C5, C6). "Thinks about whether to think."

pub mod ack;
pub mod aggregator;
pub mod pattern;
pub mod wake;

pub use ack::{AcknowledgmentRegistry, DEFAULT_CONDITION_KEY};
pub use aggregator::{AggregateBucket, SignalAggregator, Trend};
pub use pattern::{PatternDetector, PatternMatch, SUDDEN_SILENCE_PATTERN_ID};
pub use wake::{filter_valid_plugin_events, PermissiveValidator, PluginEventValidator, WakeDecision, WakeEngine};
