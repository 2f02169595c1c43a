//! The scheduler (C3) and core loop orchestrator (C13): the outermost
//! layer of the pipeline. Owns every per-tick collaborator (energy,
//! aggregator, pattern detector, wake engine, agentic loop, memory,
//! conversation manager, scheduler) and exposes the adapters that let
//! `soma-tools`/`soma-agent` observe and mutate that state through their
//! own port traits rather than a back-reference to the orchestrator.

pub mod error;
pub mod orchestrator;
pub mod ports;
pub mod schedule_store;
pub mod scheduler;

pub use error::ScheduleError;
pub use orchestrator::{Orchestrator, OutboundMessage, TickReport};
pub use schedule_store::ScheduleStore;
pub use scheduler::{fire_id, Frequency, MonthlyConstraint, Recurrence, Scheduler, ScheduleEntry, SchedulerLimits, ScheduleOptions};
