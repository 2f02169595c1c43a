//! Collaborator ports used by built-in tools.
//!
//! Per the design notes on shared-mutable state (§9): tools never hold a
//! back-reference to the orchestrator. Instead the orchestrator hands each
//! call a [`ToolContext`] bundling trait objects for whichever collaborators
//! that turn's tools need — memory, agent state, user model, scheduler. The
//! concrete implementations (backed by `soma-memory`, `soma-runtime`'s
//! scheduler, etc.) are wired at startup; this crate only defines the seams.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::registry::ToolError;

/// Read/write access to the agent's own state (energy snapshot, mood,
/// interests — whatever `soma-runtime` chooses to expose as JSON).
#[async_trait]
pub trait AgentStatePort: Send + Sync {
    async fn get_state(&self) -> serde_json::Value;
    async fn update_state(&self, patch: serde_json::Value) -> Result<(), ToolError>;
    async fn set_interest(&self, topic: String, weight: f64) -> Result<(), ToolError>;
}

/// Read-only view of the user model the `remember` field policy writes
/// into.
#[async_trait]
pub trait UserModelPort: Send + Sync {
    async fn get_user_model(&self) -> serde_json::Value;
}

/// A single search hit returned from memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHit {
    pub id: Uuid,
    pub content: String,
    pub kind: String,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
}

/// Memory read/write surface used by `core.memory` and `core.remember`.
#[async_trait]
pub trait MemoryPort: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Vec<MemoryHit>;

    /// Upsert a fact keyed on `(subject, attribute)`. The field-policy
    /// check (§4.8) happens in the `core.remember` tool body *before* this
    /// is called — by the time this runs the write is already approved.
    async fn upsert_fact(
        &self,
        subject: String,
        attribute: String,
        value: String,
        confidence: f32,
        source: String,
    ) -> Result<Uuid, ToolError>;

    async fn add_intention(&self, content: String, due_at: Option<DateTime<Utc>>, source: String) -> Result<Uuid, ToolError>;

    /// Current value of a fact keyed `(subject, attribute)`, if one exists.
    /// Used by `core.remember` to populate the §4.8 `max_delta` check with a
    /// real previous value.
    async fn get_fact(&self, subject: &str, attribute: &str) -> Option<String>;
}

/// Minimal recurrence spec mirrored from C3's schedule entry (§3), passed
/// opaquely through the tool layer to whatever `SchedulerPort`
/// implementation owns the real schedule store.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScheduleRequest {
    pub next_fire_at: DateTime<Utc>,
    pub recurrence: Option<serde_json::Value>,
    pub timezone: Option<String>,
    pub local_time: Option<String>,
    pub data: serde_json::Value,
}

/// Scheduler surface used by `core.schedule`.
#[async_trait]
pub trait SchedulerPort: Send + Sync {
    async fn schedule(&self, owner: &str, request: ScheduleRequest) -> Result<Uuid, ToolError>;
    async fn cancel(&self, owner: &str, id: Uuid) -> Result<bool, ToolError>;
    async fn list(&self, owner: &str) -> Vec<Uuid>;
}

/// Bundle of collaborator ports handed to every tool invocation. Any port
/// left unset (`None`) makes the tools that need it fail with a clear
/// "not available in this context" error instead of panicking.
#[derive(Clone, Default)]
pub struct ToolContext {
    pub agent_state: Option<Arc<dyn AgentStatePort>>,
    pub user_model: Option<Arc<dyn UserModelPort>>,
    pub memory: Option<Arc<dyn MemoryPort>>,
    pub scheduler: Option<Arc<dyn SchedulerPort>>,
    /// Recipient of the current turn, if any — used by tools that need to
    /// know who they're acting on behalf of (`core.user_model`, `core.say`
    /// is intercepted by the loop so it doesn't need this, but `core.remember`
    /// does when scoping `user.*` fields).
    pub recipient: Option<String>,
}

impl ToolContext {
    pub fn require_memory(&self) -> Result<&Arc<dyn MemoryPort>, ToolError> {
        self.memory.as_ref().ok_or_else(|| ToolError::new("memory is not available in this context"))
    }

    pub fn require_agent_state(&self) -> Result<&Arc<dyn AgentStatePort>, ToolError> {
        self.agent_state.as_ref().ok_or_else(|| ToolError::new("agent state is not available in this context"))
    }

    pub fn require_user_model(&self) -> Result<&Arc<dyn UserModelPort>, ToolError> {
        self.user_model.as_ref().ok_or_else(|| ToolError::new("user model is not available in this context"))
    }

    pub fn require_scheduler(&self) -> Result<&Arc<dyn SchedulerPort>, ToolError> {
        self.scheduler.as_ref().ok_or_else(|| ToolError::new("scheduler is not available in this context"))
    }
}
