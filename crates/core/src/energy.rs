//! Energy model — the single scalar that drives wake-threshold and
//! tick-interval gating.

use serde::{Deserialize, Serialize};

/// What kind of activity is draining energy. Each variant has its own
/// configured drain amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainKind {
    Tick,
    Event,
    Llm,
    Message,
    MotorOneshot,
    MotorAgentic,
}

/// What kind of activity is recharging energy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RechargeKind {
    Time,
    Night,
    PositiveFeedback,
}

/// `positive_feedback` recharges at this multiple of the base amount.
const POSITIVE_FEEDBACK_MULTIPLIER: f64 = 5.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyConfig {
    pub min_energy: f64,
    pub max_energy: f64,
    pub initial_energy: f64,

    pub drain_tick: f64,
    pub drain_event: f64,
    pub drain_llm: f64,
    pub drain_message: f64,
    pub drain_motor_oneshot: f64,
    pub drain_motor_agentic: f64,

    pub recharge_time: f64,
    pub recharge_night_multiplier: f64,

    /// Local hour (0-23) at which night recharge begins.
    pub night_start_hour: u32,
    /// Local hour (0-23) at which night recharge ends (exclusive).
    pub night_end_hour: u32,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            min_energy: 0.0,
            max_energy: 1.0,
            initial_energy: 0.8,
            drain_tick: 0.001,
            drain_event: 0.003,
            drain_llm: 0.02,
            drain_message: 0.01,
            drain_motor_oneshot: 0.015,
            drain_motor_agentic: 0.04,
            recharge_time: 0.002,
            recharge_night_multiplier: 3.0,
            night_start_hour: 22,
            night_end_hour: 6,
        }
    }
}

impl EnergyConfig {
    fn drain_amount(&self, kind: DrainKind) -> f64 {
        match kind {
            DrainKind::Tick => self.drain_tick,
            DrainKind::Event => self.drain_event,
            DrainKind::Llm => self.drain_llm,
            DrainKind::Message => self.drain_message,
            DrainKind::MotorOneshot => self.drain_motor_oneshot,
            DrainKind::MotorAgentic => self.drain_motor_agentic,
        }
    }

    /// Night is determined by wall-clock hour against the configured
    /// `[night_start_hour, night_end_hour)` window, with wrap-around when
    /// start > end.
    pub fn is_night(&self, local_hour: u32) -> bool {
        let (start, end) = (self.night_start_hour, self.night_end_hour);
        if start <= end {
            local_hour >= start && local_hour < end
        } else {
            local_hour >= start || local_hour < end
        }
    }
}

/// The single energy scalar plus the config and clamp/round behavior that
/// define every mutation. Always stays in `[min_energy, max_energy]`, rounded
/// to 3 decimals after every mutation.
#[derive(Debug, Clone)]
pub struct Energy {
    value: f64,
    config: EnergyConfig,
}

impl Energy {
    pub fn new(config: EnergyConfig) -> Self {
        let value = round3(config.initial_energy.clamp(config.min_energy, config.max_energy));
        Self { value, config }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn config(&self) -> &EnergyConfig {
        &self.config
    }

    fn apply(&mut self, delta: f64) {
        let clamped = (self.value + delta).clamp(self.config.min_energy, self.config.max_energy);
        self.value = round3(clamped);
    }

    pub fn drain(&mut self, kind: DrainKind) {
        let amount = self.config.drain_amount(kind);
        self.apply(-amount);
    }

    pub fn recharge(&mut self, kind: RechargeKind, multiplier: f64) {
        let base = match kind {
            RechargeKind::Time => self.config.recharge_time,
            RechargeKind::Night => self.config.recharge_time * self.config.recharge_night_multiplier,
            RechargeKind::PositiveFeedback => self.config.recharge_time * POSITIVE_FEEDBACK_MULTIPLIER,
        };
        self.apply(base * multiplier);
    }

    /// Picks `time` or `night` recharge based on the caller-supplied local
    /// hour (injected so callers can test DST/hour boundaries deterministically
    /// instead of reading the wall clock here).
    pub fn tick_recharge(&mut self, local_hour: u32) {
        if self.config.is_night(local_hour) {
            self.recharge(RechargeKind::Night, 1.0);
        } else {
            self.recharge(RechargeKind::Time, 1.0);
        }
    }

    /// `min(base * (1 + (1 - energy)), 0.99)`.
    pub fn calculate_wake_threshold(&self, base: f64) -> f64 {
        (base * (1.0 + (1.0 - self.value))).min(0.99)
    }

    /// `1 + (1 - energy)`.
    pub fn calculate_tick_multiplier(&self) -> f64 {
        1.0 + (1.0 - self.value)
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_clamps_at_min() {
        let mut e = Energy::new(EnergyConfig { initial_energy: 0.001, drain_tick: 0.01, ..Default::default() });
        e.drain(DrainKind::Tick);
        assert_eq!(e.value(), 0.0);
    }

    #[test]
    fn recharge_clamps_at_max() {
        let mut e = Energy::new(EnergyConfig { initial_energy: 0.999, recharge_time: 0.01, ..Default::default() });
        e.recharge(RechargeKind::Time, 1.0);
        assert_eq!(e.value(), 1.0);
    }

    #[test]
    fn values_are_rounded_to_3_decimals() {
        let mut e = Energy::new(EnergyConfig { initial_energy: 0.80005, ..Default::default() });
        // constructor itself rounds
        assert_eq!(e.value(), 0.8);
        e.drain(DrainKind::Event); // 0.003
        assert_eq!(e.value(), 0.797);
    }

    #[test]
    fn wake_threshold_never_exceeds_cap() {
        let e = Energy::new(EnergyConfig { initial_energy: 0.0, ..Default::default() });
        for base in [0.1, 0.3, 0.5, 0.9, 1.0] {
            let t = e.calculate_wake_threshold(base);
            assert!(t <= (base * 2.0_f64).min(0.99) + 1e-9);
            assert!(t <= 0.99 + 1e-9);
        }
    }

    #[test]
    fn night_window_wraps_around_midnight() {
        let cfg = EnergyConfig { night_start_hour: 22, night_end_hour: 6, ..Default::default() };
        assert!(cfg.is_night(23));
        assert!(cfg.is_night(0));
        assert!(cfg.is_night(5));
        assert!(!cfg.is_night(6));
        assert!(!cfg.is_night(21));
    }

    #[test]
    fn night_window_non_wrapping() {
        let cfg = EnergyConfig { night_start_hour: 1, night_end_hour: 5, ..Default::default() };
        assert!(cfg.is_night(2));
        assert!(!cfg.is_night(6));
        assert!(!cfg.is_night(0));
    }

    #[test]
    fn tick_recharge_uses_night_multiplier() {
        let mut day = Energy::new(EnergyConfig { initial_energy: 0.5, ..Default::default() });
        let mut night = day.clone();
        day.tick_recharge(12);
        night.tick_recharge(23);
        assert!(night.value() > day.value());
    }
}
