//! Tool registry (C7): declarative tools with validation, limits, and
//! schema export, plus the built-in `core.*` tool set (§4.5).

pub mod builtins;
pub mod field_policy;
pub mod ports;
pub mod registry;

use std::collections::HashMap;
use std::sync::Arc;

pub use builtins::{
    AgentStateTool, DeferTool, EscalateTool, IntrospectTool, MemoryTool, MetaTool, RememberTool, SayTool, ScheduleTool,
    SetInterestTool, ThoughtTool, TimeTool, UserModelTool,
};
pub use field_policy::{EvidenceSource, FieldPolicyEntry, FieldPolicyTable};
pub use ports::{AgentStatePort, MemoryHit, MemoryPort, ScheduleRequest, SchedulerPort, ToolContext, UserModelPort};
pub use registry::{Tool, ToolCallRequest, ToolCard, ToolError, ToolRegistry, ToolResult, ToolSchema, ToolStub, META_TOOL_NAME};

/// Build the registry of every `core.*` built-in, with the meta-tool bound
/// for lazy-schema lookups. `default_max_calls_per_turn`/`per_tool_limits`
/// come from `config.tools` (§4.6 `maxCallsPerTurn`) and are layered on top
/// of each tool's own `max_calls_per_turn()` via `ToolRegistry::max_calls_per_turn`.
pub fn default_registry(
    lazy_schema: bool,
    identity_name: String,
    schedule_owner: String,
    field_policy: FieldPolicyTable,
    default_max_calls_per_turn: u32,
    per_tool_limits: HashMap<String, u32>,
) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new(lazy_schema);
    registry.register(Arc::new(TimeTool::default()));
    registry.register(Arc::new(MemoryTool));
    registry.register(Arc::new(RememberTool::new(field_policy)));
    registry.register(Arc::new(AgentStateTool));
    registry.register(Arc::new(UserModelTool));
    registry.register(Arc::new(SetInterestTool));
    registry.register(Arc::new(ThoughtTool));
    registry.register(Arc::new(ScheduleTool { owner: schedule_owner }));
    registry.register(Arc::new(IntrospectTool { identity_name }));
    registry.register(Arc::new(SayTool));
    registry.register(Arc::new(DeferTool));
    registry.register(Arc::new(EscalateTool));

    let meta = Arc::new(MetaTool::default());
    registry.register(meta.clone());

    let registry = registry.with_call_limits(default_max_calls_per_turn, per_tool_limits);
    let registry = Arc::new(registry);
    meta.bind(registry.clone());
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_exposes_every_core_tool() {
        let registry = default_registry(true, "Soma".to_string(), "core".to_string(), FieldPolicyTable::default(), 8, HashMap::new());
        let names = registry.names();
        for expected in [
            "core.time",
            "core.memory",
            "core.remember",
            "core.agent",
            "core.user_model",
            "core.set_interest",
            "core.thought",
            "core.schedule",
            "core.introspect",
            "core.say",
            "core.defer",
            "core.escalate",
            "core.tools",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn lazy_mode_meta_tool_resolves_full_schema_for_other_tools() {
        let registry = default_registry(true, "Soma".to_string(), "core".to_string(), FieldPolicyTable::default(), 8, HashMap::new());
        let schema = registry.full_schema("core.remember");
        assert!(schema.is_some());
    }

    #[test]
    fn default_registry_applies_per_tool_limit_override() {
        let registry = default_registry(
            true,
            "Soma".to_string(),
            "core".to_string(),
            FieldPolicyTable::default(),
            8,
            HashMap::from([("core.remember".to_string(), 2)]),
        );
        assert_eq!(registry.max_calls_per_turn("core.remember"), 2);
    }
}
