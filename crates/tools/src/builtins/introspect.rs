//! `core.introspect`: minimal "soul" introspection — a read-only snapshot
//! of the agent's own declared identity, not the narrative/vault layer
//! dropped as a Non-goal.

use async_trait::async_trait;

use crate::ports::ToolContext;
use crate::registry::{Tool, ToolError};

pub struct IntrospectTool {
    pub identity_name: String,
}

#[async_trait]
impl Tool for IntrospectTool {
    fn name(&self) -> &str {
        "core.introspect"
    }

    fn description(&self) -> &str {
        "Read the agent's own declared identity (name and current energy/state). Read-only."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    fn tags(&self) -> Vec<String> {
        vec!["state".to_string(), "read_only".to_string()]
    }

    fn max_calls_per_turn(&self) -> u32 {
        2
    }

    fn validate(&self, _args: &serde_json::Value) -> Result<(), ToolError> {
        Ok(())
    }

    async fn execute(&self, _args: serde_json::Value, ctx: &ToolContext) -> Result<serde_json::Value, ToolError> {
        let state = match &ctx.agent_state {
            Some(state) => state.get_state().await,
            None => serde_json::Value::Null,
        };
        Ok(serde_json::json!({"name": self.identity_name, "state": state}))
    }
}
