//! `core.tools`: the lazy-schema meta-tool (§4.5). In lazy mode every other
//! tool is exposed to the LLM as a name+description stub; calling this tool
//! with a target name returns that tool's full schema.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Deserialize;

use crate::ports::ToolContext;
use crate::registry::{Tool, ToolError, ToolRegistry};

#[derive(Debug, Deserialize)]
struct MetaArgs {
    name: String,
}

/// Holds a back-reference to the registry it's registered into, set once
/// via [`MetaTool::bind`] after both are constructed (the registry itself
/// can't hand out `Arc<Self>` mid-construction).
pub struct MetaTool {
    registry: RwLock<Option<Arc<ToolRegistry>>>,
}

impl Default for MetaTool {
    fn default() -> Self {
        Self { registry: RwLock::new(None) }
    }
}

impl MetaTool {
    pub fn bind(&self, registry: Arc<ToolRegistry>) {
        *self.registry.write().unwrap() = Some(registry);
    }
}

#[async_trait]
impl Tool for MetaTool {
    fn name(&self) -> &str {
        crate::registry::META_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Fetch the full parameter schema for another tool by name. Required before calling any tool whose schema wasn't already shown in full."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {"name": {"type": "string"}}, "required": ["name"]})
    }

    fn tags(&self) -> Vec<String> {
        vec!["meta".to_string(), "read_only".to_string()]
    }

    fn max_calls_per_turn(&self) -> u32 {
        10
    }

    fn validate(&self, args: &serde_json::Value) -> Result<(), ToolError> {
        serde_json::from_value::<MetaArgs>(args.clone()).map(|_| ()).map_err(|e| ToolError::new(e.to_string()))
    }

    async fn execute(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<serde_json::Value, ToolError> {
        let parsed: MetaArgs = serde_json::from_value(args).map_err(|e| ToolError::new(e.to_string()))?;
        let registry = self.registry.read().unwrap();
        let registry = registry.as_ref().ok_or_else(|| ToolError::new("meta tool not bound to a registry"))?;
        let schema = registry.full_schema(&parsed.name).ok_or_else(|| ToolError::new(format!("no such tool: {}", parsed.name)))?;
        Ok(serde_json::to_value(schema).map_err(|e| ToolError::new(e.to_string()))?)
    }
}
