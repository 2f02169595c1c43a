//! Concrete implementations of `soma_tools`'s collaborator ports and
//! `soma_memory`'s `Compactor`, wiring the orchestrator's durable state
//! into the seams the tool layer and agentic loop were built against.
//!
//! `MemoryProvider`'s mutating methods take `&mut self` (§2.4), so every
//! adapter here shares the same `Arc<tokio::sync::Mutex<MemoryProvider>>`
//! the orchestrator itself holds rather than owning a private copy.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use soma_llm::{ChatMessage, CompletionRequest, LlmProvider};
use soma_memory::conversation::{Compactor, ConversationMessage};
use soma_memory::{MemoryKind, MemoryProvider};
use soma_tools::ports::{AgentStatePort, MemoryHit, MemoryPort, ScheduleRequest, SchedulerPort, UserModelPort};
use soma_tools::ToolError;

use crate::scheduler::{Recurrence, ScheduleOptions, Scheduler};

/// Read/write surface over the shared memory provider, implementing
/// `MemoryPort` for tool calls.
pub struct MemoryAdapter {
    memory: Arc<AsyncMutex<MemoryProvider>>,
    clock: Arc<dyn soma_agent::Clock>,
}

impl MemoryAdapter {
    pub fn new(memory: Arc<AsyncMutex<MemoryProvider>>, clock: Arc<dyn soma_agent::Clock>) -> Self {
        Self { memory, clock }
    }
}

#[async_trait]
impl MemoryPort for MemoryAdapter {
    async fn search(&self, query: &str, limit: usize) -> Vec<MemoryHit> {
        let memory = self.memory.lock().await;
        memory
            .search(query, limit)
            .into_iter()
            .map(|entry| MemoryHit {
                id: entry.id,
                content: entry.content.clone(),
                kind: format!("{:?}", entry.kind()).to_lowercase(),
                confidence: entry.confidence,
                created_at: entry.created_at,
            })
            .collect()
    }

    async fn upsert_fact(&self, subject: String, attribute: String, value: String, confidence: f32, source: String) -> Result<Uuid, ToolError> {
        let now = self.clock.now();
        let mut memory = self.memory.lock().await;
        let entry = memory.upsert_fact(subject, attribute, value, confidence, source, now).await.map_err(|e| ToolError::new(e.to_string()))?;
        Ok(entry.id)
    }

    async fn add_intention(&self, content: String, due_at: Option<DateTime<Utc>>, source: String) -> Result<Uuid, ToolError> {
        let now = self.clock.now();
        let mut memory = self.memory.lock().await;
        let entry = memory.add_intention(content, due_at, source, now).await.map_err(|e| ToolError::new(e.to_string()))?;
        Ok(entry.id)
    }

    async fn get_fact(&self, subject: &str, attribute: &str) -> Option<String> {
        let memory = self.memory.lock().await;
        memory.get_fact(subject, attribute).map(|entry| entry.content.clone())
    }
}

/// JSON-shaped view over the agent's own state (§4.5 `core.agent`): a
/// small in-memory document merged by shallow object patch, mirrored to
/// memory as a `Fact` keyed `(agent, state)` so it survives a restart.
pub struct AgentStateAdapter {
    state: Arc<AsyncMutex<Value>>,
    memory: Arc<AsyncMutex<MemoryProvider>>,
    clock: Arc<dyn soma_agent::Clock>,
}

impl AgentStateAdapter {
    pub fn new(state: Arc<AsyncMutex<Value>>, memory: Arc<AsyncMutex<MemoryProvider>>, clock: Arc<dyn soma_agent::Clock>) -> Self {
        Self { state, memory, clock }
    }

    async fn persist(&self, state: &Value) {
        let now = self.clock.now();
        let mut memory = self.memory.lock().await;
        if let Err(e) = memory.upsert_fact("agent", "state", state.to_string(), 1.0, "core.agent", now).await {
            tracing::warn!(error = %e, "failed to persist agent state snapshot");
        }
    }
}

#[async_trait]
impl AgentStatePort for AgentStateAdapter {
    async fn get_state(&self) -> Value {
        self.state.lock().await.clone()
    }

    async fn update_state(&self, patch: Value) -> Result<(), ToolError> {
        let mut state = self.state.lock().await;
        merge_json(&mut state, &patch);
        let snapshot = state.clone();
        drop(state);
        self.persist(&snapshot).await;
        Ok(())
    }

    async fn set_interest(&self, topic: String, weight: f64) -> Result<(), ToolError> {
        let mut state = self.state.lock().await;
        if !state.is_object() {
            *state = serde_json::json!({});
        }
        let interests = state.as_object_mut().unwrap().entry("interests").or_insert_with(|| serde_json::json!({}));
        if !interests.is_object() {
            *interests = serde_json::json!({});
        }
        interests.as_object_mut().unwrap().insert(topic, serde_json::json!(weight));
        let snapshot = state.clone();
        drop(state);
        self.persist(&snapshot).await;
        Ok(())
    }
}

/// Shallow recursive merge: objects merge key-by-key, any other value
/// (including arrays) replaces the prior value outright.
fn merge_json(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                merge_json(base_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (base, patch) => {
            *base = patch.clone();
        }
    }
}

/// Read-only view of `user.*` facts, assembled on demand from memory.
pub struct UserModelAdapter {
    memory: Arc<AsyncMutex<MemoryProvider>>,
}

impl UserModelAdapter {
    pub fn new(memory: Arc<AsyncMutex<MemoryProvider>>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl UserModelPort for UserModelAdapter {
    async fn get_user_model(&self) -> Value {
        let memory = self.memory.lock().await;
        let mut fields = serde_json::Map::new();
        for entry in memory.by_kind(MemoryKind::Fact) {
            if let Some((subject, attribute)) = entry.fact_key() {
                if subject == "user" {
                    fields.insert(attribute.to_string(), serde_json::json!(entry.content));
                }
            }
        }
        Value::Object(fields)
    }
}

/// Scheduler surface used by `core.schedule`, backed by the same
/// `Scheduler` the orchestrator's tick loop drains due signals from.
pub struct SchedulerAdapter {
    scheduler: Arc<AsyncMutex<Scheduler>>,
    clock: Arc<dyn soma_agent::Clock>,
}

impl SchedulerAdapter {
    pub fn new(scheduler: Arc<AsyncMutex<Scheduler>>, clock: Arc<dyn soma_agent::Clock>) -> Self {
        Self { scheduler, clock }
    }
}

#[async_trait]
impl SchedulerPort for SchedulerAdapter {
    async fn schedule(&self, owner: &str, request: ScheduleRequest) -> Result<Uuid, ToolError> {
        let recurrence = match request.recurrence {
            Some(value) => Some(serde_json::from_value::<Recurrence>(value).map_err(|e| ToolError::new(format!("invalid recurrence: {e}")))?),
            None => None,
        };
        let opts = ScheduleOptions { next_fire_at: request.next_fire_at, recurrence, timezone: request.timezone, local_time: request.local_time, data: request.data };
        let now = self.clock.now();
        let mut scheduler = self.scheduler.lock().await;
        scheduler.schedule(owner, opts, now).map_err(|e| ToolError::new(e.to_string()))
    }

    async fn cancel(&self, owner: &str, id: Uuid) -> Result<bool, ToolError> {
        let mut scheduler = self.scheduler.lock().await;
        Ok(scheduler.cancel(owner, id))
    }

    async fn list(&self, owner: &str) -> Vec<Uuid> {
        let scheduler = self.scheduler.lock().await;
        scheduler.list(owner)
    }
}

/// Summarizes a conversation history into a single durable message via the
/// LLM provider, grounding the fire-and-forget compaction hook
/// (`ConversationManager::spawn_compaction`) on a real completion instead
/// of a stub.
pub struct LlmCompactor {
    llm: Arc<dyn LlmProvider>,
}

impl LlmCompactor {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Compactor for LlmCompactor {
    async fn compact(&self, messages: &[ConversationMessage]) -> Option<String> {
        if messages.is_empty() {
            return None;
        }
        let transcript = messages.iter().map(|m| format!("{:?}: {}", m.role, m.content)).collect::<Vec<_>>().join("\n");
        let request = CompletionRequest {
            messages: vec![
                ChatMessage::system("Summarize this conversation into a short durable memory of what was discussed and decided. Reply with plain text, no preamble."),
                ChatMessage::user(transcript),
            ],
            json_response: false,
            ..Default::default()
        };
        match self.llm.complete(request).await {
            Ok(response) => response.content,
            Err(e) => {
                tracing::warn!(error = %e, "conversation compaction completion failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_json_replaces_leaf_and_preserves_siblings() {
        let mut base = serde_json::json!({"mood": "curious", "interests": {"rust": 0.5}});
        merge_json(&mut base, &serde_json::json!({"mood": "focused"}));
        assert_eq!(base, serde_json::json!({"mood": "focused", "interests": {"rust": 0.5}}));
    }

    #[test]
    fn merge_json_merges_nested_objects_recursively() {
        let mut base = serde_json::json!({"interests": {"rust": 0.5, "music": 0.2}});
        merge_json(&mut base, &serde_json::json!({"interests": {"rust": 0.9}}));
        assert_eq!(base, serde_json::json!({"interests": {"rust": 0.9, "music": 0.2}}));
    }

    #[tokio::test]
    async fn agent_state_adapter_round_trips_a_patch() {
        let clock: Arc<dyn soma_agent::Clock> = Arc::new(soma_agent::FixedClock::new(Utc::now()));
        let memory = Arc::new(AsyncMutex::new(MemoryProvider::default()));
        let adapter = AgentStateAdapter::new(Arc::new(AsyncMutex::new(serde_json::json!({}))), memory, clock);

        adapter.update_state(serde_json::json!({"mood": "curious"})).await.unwrap();
        assert_eq!(adapter.get_state().await, serde_json::json!({"mood": "curious"}));

        adapter.set_interest("rust".to_string(), 0.8).await.unwrap();
        assert_eq!(adapter.get_state().await["interests"]["rust"], serde_json::json!(0.8));
    }

    #[tokio::test]
    async fn memory_adapter_get_fact_reflects_latest_upsert() {
        let clock: Arc<dyn soma_agent::Clock> = Arc::new(soma_agent::FixedClock::new(Utc::now()));
        let memory = Arc::new(AsyncMutex::new(MemoryProvider::default()));
        let adapter = MemoryAdapter::new(memory, clock);

        assert!(adapter.get_fact("user", "age").await.is_none());
        adapter.upsert_fact("user".to_string(), "age".to_string(), "30".to_string(), 0.9, "chat".to_string()).await.unwrap();
        assert_eq!(adapter.get_fact("user", "age").await, Some("30".to_string()));
    }

    #[tokio::test]
    async fn user_model_adapter_exposes_only_user_scoped_facts() {
        let clock: Arc<dyn soma_agent::Clock> = Arc::new(soma_agent::FixedClock::new(Utc::now()));
        let memory = Arc::new(AsyncMutex::new(MemoryProvider::default()));
        {
            let mut guard = memory.lock().await;
            guard.upsert_fact("user", "name", "Alice", 0.9, "test", clock.now()).await.unwrap();
            guard.upsert_fact("agent", "mood", "curious", 0.9, "test", clock.now()).await.unwrap();
        }
        let adapter = UserModelAdapter::new(memory);
        let model = adapter.get_user_model().await;
        assert_eq!(model["name"], serde_json::json!("Alice"));
        assert!(model.get("mood").is_none());
    }
}
