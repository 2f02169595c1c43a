//! `core.thought`: emits a thought for the agent loop to collect and merge
//! into a single `EMIT_THOUGHT` intent at compile time (§4.6, §9).
//!
//! The agentic loop intercepts this call before it reaches the registry in
//! most cases (to apply depth/recursion bookkeeping against the trigger
//! signal), but the descriptor and executor live here so the tool's schema
//! is defined in one place and the registry can still validate/execute it
//! directly in tests or non-intercepted contexts.

use async_trait::async_trait;
use serde::Deserialize;

use crate::ports::ToolContext;
use crate::registry::{Tool, ToolError};

#[derive(Debug, Deserialize)]
struct ThoughtArgs {
    content: String,
    #[serde(default)]
    depth: Option<u32>,
}

pub struct ThoughtTool;

#[async_trait]
impl Tool for ThoughtTool {
    fn name(&self) -> &str {
        "core.thought"
    }

    fn description(&self) -> &str {
        "Record an internal thought for later reflection. Thoughts are never sent to the user directly."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": {"type": "string"},
                "depth": {"type": "integer"}
            },
            "required": ["content"]
        })
    }

    fn tags(&self) -> Vec<String> {
        vec!["cognition".to_string()]
    }

    fn has_side_effects(&self) -> bool {
        true
    }

    fn max_calls_per_turn(&self) -> u32 {
        3
    }

    fn validate(&self, args: &serde_json::Value) -> Result<(), ToolError> {
        serde_json::from_value::<ThoughtArgs>(args.clone()).map(|_| ()).map_err(|e| ToolError::new(e.to_string()))
    }

    async fn execute(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<serde_json::Value, ToolError> {
        let parsed: ThoughtArgs = serde_json::from_value(args).map_err(|e| ToolError::new(e.to_string()))?;
        Ok(serde_json::json!({"content": parsed.content, "depth": parsed.depth}))
    }
}
