//! `core.memory` (search/save) and `core.remember` (field-policy-gated fact
//! writer) (§4.5, §4.8).

use async_trait::async_trait;
use serde::Deserialize;

use crate::field_policy::{EvidenceSource, FieldPolicyTable};
use crate::ports::ToolContext;
use crate::registry::{Tool, ToolError};

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum MemoryArgs {
    Search {
        query: String,
        #[serde(default = "default_limit")]
        limit: usize,
    },
    Save {
        content: String,
        #[serde(default)]
        due_at: Option<chrono::DateTime<chrono::Utc>>,
    },
}

fn default_limit() -> usize {
    10
}

pub struct MemoryTool;

#[async_trait]
impl Tool for MemoryTool {
    fn name(&self) -> &str {
        "core.memory"
    }

    fn description(&self) -> &str {
        "Search prior facts, thoughts, intentions and messages, or save a new intention. Accepts action \"search\" or \"save\"."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ["search", "save"]},
                "query": {"type": "string"},
                "limit": {"type": "integer"},
                "content": {"type": "string"},
                "due_at": {"type": "string", "format": "date-time"}
            },
            "required": ["action"]
        })
    }

    fn tags(&self) -> Vec<String> {
        vec!["memory".to_string()]
    }

    fn has_side_effects(&self) -> bool {
        true
    }

    fn max_calls_per_turn(&self) -> u32 {
        5
    }

    fn validate(&self, args: &serde_json::Value) -> Result<(), ToolError> {
        serde_json::from_value::<MemoryArgs>(args.clone()).map(|_| ()).map_err(|e| ToolError::new(e.to_string()))
    }

    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<serde_json::Value, ToolError> {
        let parsed: MemoryArgs = serde_json::from_value(args).map_err(|e| ToolError::new(e.to_string()))?;
        let memory = ctx.require_memory()?;
        match parsed {
            MemoryArgs::Search { query, limit } => {
                let hits = memory.search(&query, limit).await;
                Ok(serde_json::json!({"hits": hits}))
            }
            MemoryArgs::Save { content, due_at } => {
                let id = memory.add_intention(content, due_at, "core.memory".to_string()).await?;
                Ok(serde_json::json!({"id": id}))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RememberArgs {
    subject: String,
    attribute: String,
    value: String,
    confidence: f32,
    source: EvidenceSource,
    #[serde(default)]
    evidence: Option<String>,
    #[serde(default)]
    is_user_fact: bool,
}

/// Writes a fact to the user model after checking the per-field policy
/// (§4.8). A write that fails policy returns `success=false` with a
/// diagnostic *before* any side effect — the memory upsert never runs.
pub struct RememberTool {
    pub policy: FieldPolicyTable,
}

impl RememberTool {
    pub fn new(policy: FieldPolicyTable) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for RememberTool {
    fn name(&self) -> &str {
        "core.remember"
    }

    fn description(&self) -> &str {
        "Record a fact about the user or the agent, keyed on subject and attribute. Overwrites any prior value for the same pair."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "subject": {"type": "string"},
                "attribute": {"type": "string"},
                "value": {"type": "string"},
                "confidence": {"type": "number", "minimum": 0, "maximum": 1},
                "source": {"type": "string", "enum": ["user_quote", "user_explicit", "user_implicit", "inferred", "system"]},
                "evidence": {"type": "string"},
                "is_user_fact": {"type": "boolean"}
            },
            "required": ["subject", "attribute", "value", "confidence", "source"]
        })
    }

    fn tags(&self) -> Vec<String> {
        vec!["memory".to_string(), "user_model".to_string()]
    }

    fn has_side_effects(&self) -> bool {
        true
    }

    fn max_calls_per_turn(&self) -> u32 {
        5
    }

    fn validate(&self, args: &serde_json::Value) -> Result<(), ToolError> {
        serde_json::from_value::<RememberArgs>(args.clone()).map(|_| ()).map_err(|e| ToolError::new(e.to_string()))
    }

    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<serde_json::Value, ToolError> {
        let parsed: RememberArgs = serde_json::from_value(args).map_err(|e| ToolError::new(e.to_string()))?;
        let field = format!("{}.{}", parsed.subject, parsed.attribute);

        let memory = ctx.require_memory()?;
        let previous_numeric = memory.get_fact(&parsed.subject, &parsed.attribute).await.and_then(|v| v.parse::<f64>().ok());
        let new_numeric = parsed.value.parse::<f64>().ok();

        self.policy
            .check(&field, parsed.confidence, parsed.source, previous_numeric, new_numeric)
            .map_err(ToolError::new)?;

        let id = memory
            .upsert_fact(
                parsed.subject.clone(),
                parsed.attribute.clone(),
                parsed.value.clone(),
                parsed.confidence,
                parsed.evidence.clone().unwrap_or_default(),
            )
            .await?;
        Ok(serde_json::json!({
            "id": id,
            "subject": parsed.subject,
            "attribute": parsed.attribute,
            "value": parsed.value,
            "confidence": parsed.confidence,
            "source": parsed.source,
            "evidence": parsed.evidence,
            "is_user_fact": parsed.is_user_fact,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{MemoryHit, MemoryPort};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeMemory {
        facts: Mutex<Vec<(String, String, String, f32)>>,
    }

    #[async_trait]
    impl MemoryPort for FakeMemory {
        async fn search(&self, _query: &str, _limit: usize) -> Vec<MemoryHit> {
            vec![]
        }
        async fn upsert_fact(&self, subject: String, attribute: String, value: String, confidence: f32, _source: String) -> Result<uuid::Uuid, ToolError> {
            self.facts.lock().unwrap().push((subject, attribute, value, confidence));
            Ok(uuid::Uuid::new_v4())
        }
        async fn add_intention(&self, _content: String, _due_at: Option<chrono::DateTime<chrono::Utc>>, _source: String) -> Result<uuid::Uuid, ToolError> {
            Ok(uuid::Uuid::new_v4())
        }
        async fn get_fact(&self, subject: &str, attribute: &str) -> Option<String> {
            self.facts.lock().unwrap().iter().rev().find(|(s, a, ..)| s == subject && a == attribute).map(|(_, _, v, _)| v.clone())
        }
    }

    fn ctx_with_memory() -> (ToolContext, Arc<FakeMemory>) {
        let memory = Arc::new(FakeMemory::default());
        let ctx = ToolContext { memory: Some(memory.clone() as Arc<dyn MemoryPort>), ..Default::default() };
        (ctx, memory)
    }

    #[tokio::test]
    async fn remember_rejects_low_confidence_user_fact_before_side_effect() {
        let tool = RememberTool::new(FieldPolicyTable::default());
        let (ctx, memory) = ctx_with_memory();
        let args = serde_json::json!({
            "subject": "user", "attribute": "name", "value": "Alice",
            "confidence": 0.3, "source": "user_explicit"
        });
        let result = tool.execute(args, &ctx).await;
        assert!(result.is_err());
        assert!(memory.facts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn remember_accepts_high_confidence_user_quote() {
        let tool = RememberTool::new(FieldPolicyTable::default());
        let (ctx, memory) = ctx_with_memory();
        let args = serde_json::json!({
            "subject": "user", "attribute": "name", "value": "Alice",
            "confidence": 0.95, "source": "user_explicit"
        });
        tool.execute(args, &ctx).await.unwrap();
        assert_eq!(memory.facts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remember_rejects_numeric_jump_past_max_delta() {
        let mut policy = FieldPolicyTable::default();
        policy.overrides.insert(
            "user.age".to_string(),
            crate::field_policy::FieldPolicyEntry { min_confidence: 0.5, require_source: None, escalate_if_uncertain: false, max_delta: Some(2.0) },
        );
        let tool = RememberTool::new(policy);
        let (ctx, memory) = ctx_with_memory();

        tool.execute(
            serde_json::json!({"subject": "user", "attribute": "age", "value": "30", "confidence": 0.9, "source": "user_quote"}),
            &ctx,
        )
        .await
        .unwrap();

        let result = tool
            .execute(
                serde_json::json!({"subject": "user", "attribute": "age", "value": "40", "confidence": 0.9, "source": "user_quote"}),
                &ctx,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(memory.facts.lock().unwrap().len(), 1);
    }
}
