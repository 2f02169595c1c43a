//! `core.agent` (agent-state getter/updater), `core.user_model` (read-only
//! getter), and `core.set_interest` (§4.5).

use async_trait::async_trait;
use serde::Deserialize;

use crate::ports::ToolContext;
use crate::registry::{Tool, ToolError};

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum AgentStateArgs {
    Get,
    Update { patch: serde_json::Value },
}

pub struct AgentStateTool;

#[async_trait]
impl Tool for AgentStateTool {
    fn name(&self) -> &str {
        "core.agent"
    }

    fn description(&self) -> &str {
        "Read or update the agent's own state (energy, mood, active goals). Accepts action \"get\" or \"update\"."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ["get", "update"]},
                "patch": {"type": "object"}
            },
            "required": ["action"]
        })
    }

    fn tags(&self) -> Vec<String> {
        vec!["state".to_string()]
    }

    fn has_side_effects(&self) -> bool {
        true
    }

    fn max_calls_per_turn(&self) -> u32 {
        4
    }

    fn validate(&self, args: &serde_json::Value) -> Result<(), ToolError> {
        serde_json::from_value::<AgentStateArgs>(args.clone()).map(|_| ()).map_err(|e| ToolError::new(e.to_string()))
    }

    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<serde_json::Value, ToolError> {
        let parsed: AgentStateArgs = serde_json::from_value(args).map_err(|e| ToolError::new(e.to_string()))?;
        let state = ctx.require_agent_state()?;
        match parsed {
            AgentStateArgs::Get => Ok(state.get_state().await),
            AgentStateArgs::Update { patch } => {
                state.update_state(patch).await?;
                Ok(serde_json::json!({"updated": true}))
            }
        }
    }
}

pub struct UserModelTool;

#[async_trait]
impl Tool for UserModelTool {
    fn name(&self) -> &str {
        "core.user_model"
    }

    fn description(&self) -> &str {
        "Read the current user model snapshot. Read-only."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    fn tags(&self) -> Vec<String> {
        vec!["state".to_string(), "read_only".to_string()]
    }

    fn max_calls_per_turn(&self) -> u32 {
        4
    }

    fn validate(&self, _args: &serde_json::Value) -> Result<(), ToolError> {
        Ok(())
    }

    async fn execute(&self, _args: serde_json::Value, ctx: &ToolContext) -> Result<serde_json::Value, ToolError> {
        let user_model = ctx.require_user_model()?;
        Ok(user_model.get_user_model().await)
    }
}

#[derive(Debug, Deserialize)]
struct SetInterestArgs {
    topic: String,
    weight: f64,
}

/// One of the two tools whose intent is compiled and applied *immediately*
/// during loop execution (§4.6), alongside `core.remember`.
pub struct SetInterestTool;

#[async_trait]
impl Tool for SetInterestTool {
    fn name(&self) -> &str {
        "core.set_interest"
    }

    fn description(&self) -> &str {
        "Adjust how strongly the agent is interested in a topic, on a 0-1 weight scale."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "topic": {"type": "string"},
                "weight": {"type": "number", "minimum": 0, "maximum": 1}
            },
            "required": ["topic", "weight"]
        })
    }

    fn tags(&self) -> Vec<String> {
        vec!["state".to_string()]
    }

    fn has_side_effects(&self) -> bool {
        true
    }

    fn max_calls_per_turn(&self) -> u32 {
        4
    }

    fn validate(&self, args: &serde_json::Value) -> Result<(), ToolError> {
        let parsed: SetInterestArgs = serde_json::from_value(args.clone()).map_err(|e| ToolError::new(e.to_string()))?;
        if !(0.0..=1.0).contains(&parsed.weight) {
            return Err(ToolError::new("weight must be within [0, 1]"));
        }
        Ok(())
    }

    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<serde_json::Value, ToolError> {
        let parsed: SetInterestArgs = serde_json::from_value(args).map_err(|e| ToolError::new(e.to_string()))?;
        let state = ctx.require_agent_state()?;
        state.set_interest(parsed.topic.clone(), parsed.weight).await?;
        Ok(serde_json::json!({"topic": parsed.topic, "weight": parsed.weight}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_interest_rejects_out_of_range_weight() {
        let tool = SetInterestTool;
        assert!(tool.validate(&serde_json::json!({"topic": "rust", "weight": 1.5})).is_err());
        assert!(tool.validate(&serde_json::json!({"topic": "rust", "weight": 0.5})).is_ok());
    }
}
