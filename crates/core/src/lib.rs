pub mod energy;
pub mod signal;

pub use energy::{DrainKind, Energy, EnergyConfig, RechargeKind};
pub use signal::{Metrics, Priority, Signal, SignalData, SignalKind, SignalPartition};
