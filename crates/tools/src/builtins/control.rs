//! `core.say`, `core.defer`, `core.escalate` (§4.6): loop-terminal or
//! loop-intercepted tools. The agentic loop intercepts all three before
//! they would otherwise reach [`crate::registry::ToolRegistry::execute`] —
//! `say` synthesizes an immediate `SEND_MESSAGE` intent and continues the
//! loop, `defer` and `escalate` end it. The descriptors below exist so the
//! LLM sees their schemas like any other tool and so tests can exercise the
//! validation path directly.

use async_trait::async_trait;
use serde::Deserialize;

use crate::ports::ToolContext;
use crate::registry::{Tool, ToolError};

#[derive(Debug, Deserialize)]
struct SayArgs {
    message: String,
}

pub struct SayTool;

#[async_trait]
impl Tool for SayTool {
    fn name(&self) -> &str {
        "core.say"
    }

    fn description(&self) -> &str {
        "Send an intermediate message to the user without ending the turn. Intercepted by the loop as an immediate SEND_MESSAGE intent."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {"message": {"type": "string"}}, "required": ["message"]})
    }

    fn tags(&self) -> Vec<String> {
        vec!["communication".to_string()]
    }

    fn has_side_effects(&self) -> bool {
        true
    }

    fn max_calls_per_turn(&self) -> u32 {
        3
    }

    fn validate(&self, args: &serde_json::Value) -> Result<(), ToolError> {
        serde_json::from_value::<SayArgs>(args.clone()).map(|_| ()).map_err(|e| ToolError::new(e.to_string()))
    }

    async fn execute(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<serde_json::Value, ToolError> {
        let parsed: SayArgs = serde_json::from_value(args).map_err(|e| ToolError::new(e.to_string()))?;
        Ok(serde_json::json!({"message": parsed.message}))
    }
}

#[derive(Debug, Deserialize)]
struct DeferArgs {
    signal_type: String,
    reason: String,
    hours: f64,
}

pub struct DeferTool;

#[async_trait]
impl Tool for DeferTool {
    fn name(&self) -> &str {
        "core.defer"
    }

    fn description(&self) -> &str {
        "End this turn without responding, deferring the decision until a signal of the given type next arrives after the given number of hours."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "signal_type": {"type": "string"},
                "reason": {"type": "string"},
                "hours": {"type": "number", "minimum": 0}
            },
            "required": ["signal_type", "reason", "hours"]
        })
    }

    fn tags(&self) -> Vec<String> {
        vec!["control".to_string()]
    }

    fn max_calls_per_turn(&self) -> u32 {
        1
    }

    fn validate(&self, args: &serde_json::Value) -> Result<(), ToolError> {
        let parsed: DeferArgs = serde_json::from_value(args.clone()).map_err(|e| ToolError::new(e.to_string()))?;
        if parsed.hours < 0.0 {
            return Err(ToolError::new("hours must be non-negative"));
        }
        Ok(())
    }

    async fn execute(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<serde_json::Value, ToolError> {
        let parsed: DeferArgs = serde_json::from_value(args).map_err(|e| ToolError::new(e.to_string()))?;
        Ok(serde_json::json!({"signal_type": parsed.signal_type, "reason": parsed.reason, "hours": parsed.hours}))
    }
}

#[derive(Debug, Deserialize)]
struct EscalateArgs {
    reason: String,
}

pub struct EscalateTool;

#[async_trait]
impl Tool for EscalateTool {
    fn name(&self) -> &str {
        "core.escalate"
    }

    fn description(&self) -> &str {
        "End this turn by escalating to a human operator, with a reason."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {"reason": {"type": "string"}}, "required": ["reason"]})
    }

    fn tags(&self) -> Vec<String> {
        vec!["control".to_string()]
    }

    fn max_calls_per_turn(&self) -> u32 {
        1
    }

    fn validate(&self, args: &serde_json::Value) -> Result<(), ToolError> {
        serde_json::from_value::<EscalateArgs>(args.clone()).map(|_| ()).map_err(|e| ToolError::new(e.to_string()))
    }

    async fn execute(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<serde_json::Value, ToolError> {
        let parsed: EscalateArgs = serde_json::from_value(args).map_err(|e| ToolError::new(e.to_string()))?;
        Ok(serde_json::json!({"reason": parsed.reason}))
    }
}
