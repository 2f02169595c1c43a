//! Error types owned by `soma-runtime` (§2.2: leaf-crate errors go through
//! `thiserror`; the orchestrator wraps these with `anyhow::Context` at its
//! own boundary).

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
    #[error("unknown schedule id: {0}")]
    NotFound(Uuid),
    #[error("owner {owner} has reached its schedule quota of {limit}")]
    ScheduleLimitExceeded { owner: String, limit: usize },
}
