//! Tool registry (C7): a keyed collection of declarative tool descriptors
//! with validation, limits, and schema export.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ports::ToolContext;

/// Name of the meta-tool used to fetch another tool's full schema in lazy
/// mode. Excluded from `cards()`.
pub const META_TOOL_NAME: &str = "core.tools";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolError {
    pub message: String,
}

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ToolError {}

/// Result of invoking a tool through the registry. Unknown tools,
/// validation failures, and executor errors all surface here as
/// `success = false` — nothing ever throws back into the agentic loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub result_id: Uuid,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(tool_call_id: impl Into<String>, tool_name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            result_id: Uuid::new_v4(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(tool_call_id: impl Into<String>, tool_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            result_id: Uuid::new_v4(),
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// A request to invoke a tool by name with a raw argument map.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub tool_call_id: String,
    pub tool_name: String,
    pub args: serde_json::Value,
}

/// Compact listing entry: `cards()` returns these, alphabetically sorted,
/// excluding the meta-tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCard {
    pub name: String,
    /// First sentence of the tool's description.
    pub summary: String,
    pub tags: Vec<String>,
}

/// Minimal stub used in lazy-schema mode for every tool except the
/// meta-tool: the LLM sees a name + description but must call
/// `core.tools` to retrieve the actual parameter schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolStub {
    pub name: String,
    pub description: String,
}

/// The full descriptor exposed over `full_schema`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub tags: Vec<String>,
    pub has_side_effects: bool,
    pub max_calls_per_turn: u32,
}

/// Implemented by every built-in tool. `validate` runs before `execute` so
/// malformed arguments never reach the executor body; both return
/// `Result<_, ToolError>` rather than panicking — the registry turns any
/// `Err` into a non-success `ToolResult`.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;
    fn tags(&self) -> Vec<String>;
    fn has_side_effects(&self) -> bool {
        false
    }
    fn max_calls_per_turn(&self) -> u32 {
        8
    }

    fn validate(&self, args: &serde_json::Value) -> Result<(), ToolError>;

    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<serde_json::Value, ToolError>;
}

fn first_sentence(description: &str) -> String {
    description
        .split_once(". ")
        .map(|(first, _)| format!("{first}."))
        .unwrap_or_else(|| description.to_string())
}

/// A keyed collection of [`Tool`] implementations.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// When true, `cards()`/`llm_specs()` hide full schemas behind the
    /// meta-tool; only `core.tools` exposes its own full schema directly.
    pub lazy_schema: bool,
    /// Fallback used when a tool isn't named in `per_tool_limits` and
    /// defines no override of its own (`Tool::max_calls_per_turn`'s default
    /// of 8 already covers that case for every built-in, so this mostly
    /// matters for tools registered without an explicit override).
    default_max_calls_per_turn: u32,
    /// Config-driven overrides (§4.6 `maxCallsPerTurn`, §7 resource
    /// exhaustion), keyed by tool name. Takes precedence over both the
    /// tool's own `max_calls_per_turn()` and `default_max_calls_per_turn`.
    per_tool_limits: HashMap<String, u32>,
}

impl ToolRegistry {
    pub fn new(lazy_schema: bool) -> Self {
        Self { tools: HashMap::new(), lazy_schema, default_max_calls_per_turn: 8, per_tool_limits: HashMap::new() }
    }

    /// Apply config-driven call limits on top of an already-built registry.
    pub fn with_call_limits(mut self, default_max_calls_per_turn: u32, per_tool_limits: HashMap<String, u32>) -> Self {
        self.default_max_calls_per_turn = default_max_calls_per_turn;
        self.per_tool_limits = per_tool_limits;
        self
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Effective per-turn call limit for `name`: a `per_tool_limits`
    /// override wins, then the tool's own `max_calls_per_turn()`, then the
    /// registry-wide default for tools with no stronger opinion.
    pub fn max_calls_per_turn(&self, name: &str) -> u32 {
        if let Some(&limit) = self.per_tool_limits.get(name) {
            return limit;
        }
        self.tools.get(name).map(|t| t.max_calls_per_turn()).unwrap_or(self.default_max_calls_per_turn)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Execute a tool by name. Unknown tools, validation failures, and
    /// executor errors are all folded into a `success = false` result —
    /// this function itself never returns an `Err`.
    pub async fn execute(&self, request: ToolCallRequest, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.tools.get(&request.tool_name) else {
            return ToolResult::failure(request.tool_call_id, request.tool_name.clone(), format!("unknown tool: {}", request.tool_name));
        };

        if let Err(e) = tool.validate(&request.args) {
            return ToolResult::failure(request.tool_call_id, request.tool_name, e.to_string());
        }

        match tool.execute(request.args, ctx).await {
            Ok(data) => ToolResult::ok(request.tool_call_id, request.tool_name, data),
            Err(e) => ToolResult::failure(request.tool_call_id, request.tool_name, e.to_string()),
        }
    }

    /// Compact cards listing: name + first-sentence description + tags,
    /// alphabetically sorted, excluding the meta-tool.
    pub fn cards(&self) -> Vec<ToolCard> {
        let mut cards: Vec<ToolCard> = self
            .tools
            .values()
            .filter(|t| t.name() != META_TOOL_NAME)
            .map(|t| ToolCard { name: t.name().to_string(), summary: first_sentence(t.description()), tags: t.tags() })
            .collect();
        cards.sort_by(|a, b| a.name.cmp(&b.name));
        cards
    }

    /// Full schema for a single tool.
    pub fn full_schema(&self, name: &str) -> Option<ToolSchema> {
        let tool = self.tools.get(name)?;
        Some(ToolSchema {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters_schema(),
            tags: tool.tags(),
            has_side_effects: tool.has_side_effects(),
            max_calls_per_turn: self.max_calls_per_turn(name),
        })
    }

    /// Name + description stubs for every tool except the meta-tool, used
    /// in lazy-schema mode.
    pub fn stubs(&self) -> Vec<ToolStub> {
        let mut stubs: Vec<ToolStub> = self
            .tools
            .values()
            .filter(|t| t.name() != META_TOOL_NAME)
            .map(|t| ToolStub { name: t.name().to_string(), description: t.description().to_string() })
            .collect();
        stubs.sort_by(|a, b| a.name.cmp(&b.name));
        stubs
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ToolContext;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "core.echo"
        }
        fn description(&self) -> &str {
            "Echoes back its input. Useful only for tests."
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        fn tags(&self) -> Vec<String> {
            vec!["debug".into()]
        }
        fn validate(&self, args: &serde_json::Value) -> Result<(), ToolError> {
            if args.get("text").is_none() {
                return Err(ToolError::new("missing required field: text"));
            }
            Ok(())
        }
        async fn execute(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<serde_json::Value, ToolError> {
            Ok(args)
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::default()
    }

    #[tokio::test]
    async fn unknown_tool_returns_failure_not_error() {
        let registry = ToolRegistry::new(false);
        let result = registry
            .execute(ToolCallRequest { tool_call_id: "1".into(), tool_name: "nope".into(), args: serde_json::json!({}) }, &ctx())
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn validation_failure_never_reaches_executor() {
        let mut registry = ToolRegistry::new(false);
        registry.register(Arc::new(EchoTool));
        let result = registry
            .execute(ToolCallRequest { tool_call_id: "1".into(), tool_name: "core.echo".into(), args: serde_json::json!({}) }, &ctx())
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("missing required field"));
    }

    #[tokio::test]
    async fn successful_execution_rounds_trips_data() {
        let mut registry = ToolRegistry::new(false);
        registry.register(Arc::new(EchoTool));
        let result = registry
            .execute(
                ToolCallRequest { tool_call_id: "1".into(), tool_name: "core.echo".into(), args: serde_json::json!({"text": "hi"}) },
                &ctx(),
            )
            .await;
        assert!(result.success);
        assert_eq!(result.data.unwrap()["text"], "hi");
    }

    #[test]
    fn per_tool_limit_override_wins_over_tool_default() {
        let mut registry = ToolRegistry::new(false);
        registry.register(Arc::new(EchoTool));
        assert_eq!(registry.max_calls_per_turn("core.echo"), 8);

        let registry = registry.with_call_limits(8, HashMap::from([("core.echo".to_string(), 2)]));
        assert_eq!(registry.max_calls_per_turn("core.echo"), 2);
        assert_eq!(registry.max_calls_per_turn("core.unregistered"), 8);
    }

    #[test]
    fn cards_excludes_meta_tool_and_sorts_alphabetically() {
        struct MetaTool;
        #[async_trait]
        impl Tool for MetaTool {
            fn name(&self) -> &str {
                META_TOOL_NAME
            }
            fn description(&self) -> &str {
                "Fetch a tool's full schema."
            }
            fn parameters_schema(&self) -> serde_json::Value {
                serde_json::json!({})
            }
            fn tags(&self) -> Vec<String> {
                vec![]
            }
            fn validate(&self, _args: &serde_json::Value) -> Result<(), ToolError> {
                Ok(())
            }
            async fn execute(&self, _args: serde_json::Value, _ctx: &ToolContext) -> Result<serde_json::Value, ToolError> {
                Ok(serde_json::json!({}))
            }
        }

        let mut registry = ToolRegistry::new(true);
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(MetaTool));

        let cards = registry.cards();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].name, "core.echo");
    }
}
