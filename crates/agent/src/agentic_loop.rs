//! The agentic loop (C8, §4.6): a bounded multi-iteration state machine
//! that alternates LLM completions and tool calls until it reaches a
//! terminal. This is the component the design notes call out as the
//! hardest piece of the whole runtime — most of the retry/forced-respond
//! machinery below exists to keep a misbehaving model from looping forever
//! or leaving half-applied state behind.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use soma_config::LoopConfig;
use soma_core::{Signal, SignalData};
use soma_llm::{ChatMessage, ChatResponse, CompletionRequest, LlmProvider, ToolCall, ToolOffer};
use soma_prompt::Prompt;
use soma_tools::{ToolCallRequest, ToolContext, ToolRegistry, ToolResult, META_TOOL_NAME};

use crate::clock::Clock;
use crate::intent::{dispatch_tool_result, Intent, IntentContext};
use crate::loop_state::{call_signature, CollectedToolResult, ConversationStatus, ExecutedTool, LoopState, Terminal};
use crate::response::parse_response;

/// Names the loop intercepts directly rather than routing through the
/// registry's `execute` (§4.6 "Intercepted tools").
const INTERCEPTED_SAY: &str = "core.say";
const INTERCEPTED_DEFER: &str = "core.defer";
const INTERCEPTED_ESCALATE: &str = "core.escalate";
const INTERCEPTED_THOUGHT: &str = "core.thought";

/// Tool names whose successful result is compiled and applied immediately
/// so later tool calls in the same loop observe the new state (§4.6
/// "Immediate-intent application").
const IMMEDIATE_APPLY_TOOLS: [&str; 2] = ["core.remember", "core.set_interest"];

/// An upper bound on how many times the loop will demand a forced response
/// before giving up and synthesizing `noAction` itself — distinct from
/// `LoopConfig::max_iterations`, which bounds the whole run.
const FORCE_RESPOND_MAX_ATTEMPTS: u32 = 2;

/// Per-tool `maxCallsPerTurn` violations (§4.6, §7) force a response once
/// the model has ignored the limit this many times in one turn.
const MAX_LIMIT_VIOLATIONS: u32 = 2;

/// Callback collaborator for immediate-intent application. The orchestrator
/// supplies an implementation that mutates memory/agent-state/conversation
/// in place and returns once the mutation is durable.
#[async_trait]
pub trait ImmediateIntentSink: Send + Sync {
    async fn apply_immediate(&self, intent: Intent);
}

/// A no-op sink for tests and contexts that don't need immediate-apply
/// semantics observed anywhere.
#[derive(Default)]
pub struct NullImmediateIntentSink;

#[async_trait]
impl ImmediateIntentSink for NullImmediateIntentSink {
    async fn apply_immediate(&self, _intent: Intent) {}
}

/// Set by the orchestrator when a new signal supersedes the one that
/// triggered the current loop run (§5 "Cancellation"). Checked at the top
/// of every iteration and before every tool call.
pub type AbortFlag = AtomicBool;

pub struct AgenticLoop {
    registry: Arc<ToolRegistry>,
    llm: Arc<dyn LlmProvider>,
    config: LoopConfig,
    clock: Arc<dyn Clock>,
}

impl AgenticLoop {
    pub fn new(registry: Arc<ToolRegistry>, llm: Arc<dyn LlmProvider>, config: LoopConfig, clock: Arc<dyn Clock>) -> Self {
        Self { registry, llm, config, clock }
    }

    /// Run the loop to a terminal. `tick_id` and `trigger.id` become the
    /// trace metadata on every intent this run's tool calls immediately
    /// apply.
    #[tracing::instrument(skip_all, fields(trigger_id = %trigger.id, tick_id = %tick_id))]
    pub async fn run(
        &self,
        prompt: Prompt,
        trigger: &Signal,
        ctx: ToolContext,
        sink: &dyn ImmediateIntentSink,
        abort: &AbortFlag,
        tick_id: Uuid,
    ) -> (Terminal, LoopState) {
        let started_at = self.clock.now();
        let (thought_depth, root_id, this_id) = thought_lineage(trigger);
        let mut state = LoopState::new(started_at, thought_depth, root_id, this_id);

        let mut messages = vec![ChatMessage::system(prompt.system), ChatMessage::user(prompt.user)];

        let intent_ctx = IntentContext { tick_id, parent_signal_id: trigger.id, recipient: ctx.recipient.clone(), now: started_at };

        loop {
            state.iteration += 1;

            if abort.load(Ordering::SeqCst) {
                return (Terminal::NoAction { reason: "superseded".to_string() }, state);
            }
            if state.iteration > self.config.max_iterations {
                return (Terminal::NoAction { reason: "max_iterations_exceeded".to_string() }, state);
            }
            if state.tool_call_count >= self.config.max_tool_calls {
                return (Terminal::NoAction { reason: "max_tool_calls_exceeded".to_string() }, state);
            }
            let elapsed_ms = (self.clock.now() - state.started_at).num_milliseconds().max(0) as u64;
            if elapsed_ms >= self.config.timeout_ms {
                return (Terminal::NoAction { reason: "timeout".to_string() }, state);
            }

            let force_final = state.force_respond || state.iteration >= self.config.max_iterations;
            let tools = if force_final { Vec::new() } else { build_tool_offers(&self.registry) };

            let request = CompletionRequest { messages: messages.clone(), tools, json_response: true, ..Default::default() };
            let response = match self.llm.complete(request).await {
                Ok(response) => response,
                Err(e) => {
                    if state.provider_error_retried {
                        return (Terminal::NoAction { reason: format!("provider_error: {e}") }, state);
                    }
                    state.provider_error_retried = true;
                    tracing::warn!(error = %e, "llm provider error, retrying once without tools");
                    continue;
                }
            };

            if response.tool_calls.is_empty() {
                match self.handle_text_response(&response, &mut state, &mut messages) {
                    Some(terminal) => return (terminal, state),
                    None => continue,
                }
            }

            messages.push(ChatMessage::assistant_tool_calls(response.tool_calls.clone()));

            for call in &response.tool_calls {
                if abort.load(Ordering::SeqCst) {
                    return (Terminal::NoAction { reason: "superseded".to_string() }, state);
                }

                if let Some(terminal) = self.dispatch_call(call, &mut state, &ctx, &intent_ctx, sink, &mut messages).await {
                    return (terminal, state);
                }
            }

            if state.force_respond {
                state.ever_forced_respond = true;
                state.force_respond_attempts += 1;
                if state.force_respond_attempts > FORCE_RESPOND_MAX_ATTEMPTS {
                    return (Terminal::NoAction { reason: "force_respond_exhausted".to_string() }, state);
                }
                messages.push(ChatMessage::user(
                    "Repeated or failing tool calls detected. Respond now as JSON: \
                     {\"response\": string, \"status\": \"active\"|\"awaiting_answer\"|\"closed\"|\"idle\"}."
                        .to_string(),
                ));
            }
        }
    }

    fn handle_text_response(&self, response: &ChatResponse, state: &mut LoopState, messages: &mut Vec<ChatMessage>) -> Option<Terminal> {
        let text = response.content.clone().unwrap_or_default();
        match parse_response(&text, self.config.allow_plain_text) {
            Ok(parsed) => {
                state.conversation_status = parsed.status;
                let confidence = state.compute_confidence();
                Some(Terminal::Respond { text: parsed.text, status: parsed.status, confidence })
            }
            Err(e) => {
                if state.malformed_retried {
                    return Some(Terminal::NoAction { reason: format!("malformed_response: {e}") });
                }
                state.malformed_retried = true;
                messages.push(ChatMessage::assistant(text));
                messages.push(ChatMessage::user(format!(
                    "Your previous response was malformed ({e}). Respond as JSON: \
                     {{\"response\": string, \"status\"?: string, \"urgent\"?: bool}}."
                )));
                None
            }
        }
    }

    async fn dispatch_call(
        &self,
        call: &ToolCall,
        state: &mut LoopState,
        ctx: &ToolContext,
        intent_ctx: &IntentContext,
        sink: &dyn ImmediateIntentSink,
        messages: &mut Vec<ChatMessage>,
    ) -> Option<Terminal> {
        state.tool_call_count += 1;
        let args: Value = serde_json::from_str(&call.function.arguments).unwrap_or(Value::Null);
        let name = call.function.name.as_str();
        let calls_this_turn = {
            let counter = state.tool_call_counts.entry(name.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };

        let limit = self.registry.max_calls_per_turn(name);
        if calls_this_turn > limit {
            state.limit_violation_count += 1;
            if state.limit_violation_count >= MAX_LIMIT_VIOLATIONS {
                state.force_respond = true;
            }
            let error = format!("tool {name} exceeded max_calls_per_turn ({limit}) for this turn");
            messages.push(ChatMessage::tool_result(call.id.clone(), serde_json::json!({"error": error}).to_string()));
            state.tool_results.push(CollectedToolResult {
                result: ToolResult::failure(call.id.clone(), name.to_string(), error),
                immediately_applied: false,
            });
            return None;
        }

        match name {
            INTERCEPTED_SAY => {
                let message = args.get("message").and_then(Value::as_str).unwrap_or_default().to_string();
                if let Some(recipient) = &ctx.recipient {
                    sink.apply_immediate(Intent::SendMessage {
                        recipient: recipient.clone(),
                        text: message.clone(),
                        status: state.conversation_status,
                        confidence: state.compute_confidence(),
                        trace: trace_for(intent_ctx, Some(call.id.clone())),
                    })
                    .await;
                }
                state.executed_tools.push(ExecutedTool { tool_name: INTERCEPTED_SAY.to_string(), has_side_effects: true });
                messages.push(ChatMessage::tool_result(call.id.clone(), serde_json::json!({"sent": true}).to_string()));
                None
            }
            INTERCEPTED_DEFER => {
                let signal_type = args.get("signal_type").and_then(Value::as_str).unwrap_or("unknown").to_string();
                let reason = args.get("reason").and_then(Value::as_str).unwrap_or_default().to_string();
                let hours = args.get("hours").and_then(Value::as_f64).unwrap_or(0.0);
                state.executed_tools.push(ExecutedTool { tool_name: INTERCEPTED_DEFER.to_string(), has_side_effects: true });
                Some(Terminal::Defer { signal_type, reason, hours })
            }
            INTERCEPTED_ESCALATE => {
                let reason = args.get("reason").and_then(Value::as_str).unwrap_or_default().to_string();
                state.executed_tools.push(ExecutedTool { tool_name: INTERCEPTED_ESCALATE.to_string(), has_side_effects: true });
                Some(Terminal::NoAction { reason: format!("escalated: {reason}") })
            }
            INTERCEPTED_THOUGHT => {
                self.handle_thought(&args, state, call, messages);
                None
            }
            name => {
                let request = ToolCallRequest { tool_call_id: call.id.clone(), tool_name: name.to_string(), args: args.clone() };
                let result = self.registry.execute(request, ctx).await;
                let sig = call_signature(name, &args);
                let has_side_effects = self.registry.get(name).map(|t| t.has_side_effects()).unwrap_or(false);
                state.executed_tools.push(ExecutedTool { tool_name: name.to_string(), has_side_effects });

                if result.success {
                    bump_and_check(&mut state.identical_call_counts, &sig, self.config.identical_call_limit, &mut state.force_respond);
                } else {
                    bump_and_check(&mut state.failed_call_counts, &sig, self.config.failed_call_limit, &mut state.force_respond);
                }

                let immediately_applied = result.success && IMMEDIATE_APPLY_TOOLS.contains(&name);
                if immediately_applied {
                    if let Some(data) = result.data.clone() {
                        if let Some(intent) = dispatch_tool_result(name, &call.id, data, intent_ctx) {
                            sink.apply_immediate(intent).await;
                        }
                    }
                }

                let payload = if result.success {
                    result.data.clone().unwrap_or(Value::Null)
                } else {
                    serde_json::json!({"error": result.error.clone().unwrap_or_default()})
                };
                messages.push(ChatMessage::tool_result(call.id.clone(), payload.to_string()));
                state.tool_results.push(CollectedToolResult { result, immediately_applied });
                None
            }
        }
    }

    /// Thought recursion (§4.6 "Thought recursion limits"): depth is the
    /// trigger's depth + 1, capped at `config.max_thought_depth`. Thoughts
    /// beyond the cap are rejected rather than silently dropped so the
    /// model knows to stop recursing.
    fn handle_thought(&self, args: &Value, state: &mut LoopState, call: &ToolCall, messages: &mut Vec<ChatMessage>) {
        let content = args.get("content").and_then(Value::as_str).unwrap_or_default().to_string();
        let next_depth = state.trigger_thought_depth.map(|d| d + 1).unwrap_or(0);

        if next_depth > self.config.max_thought_depth {
            messages.push(ChatMessage::tool_result(
                call.id.clone(),
                serde_json::json!({"error": "max thought recursion depth exceeded"}).to_string(),
            ));
            return;
        }

        state.collected_thoughts.push(content);
        state.executed_tools.push(ExecutedTool { tool_name: INTERCEPTED_THOUGHT.to_string(), has_side_effects: true });
        messages.push(ChatMessage::tool_result(call.id.clone(), serde_json::json!({"recorded": true}).to_string()));
    }
}

fn trace_for(ctx: &IntentContext, tool_call_id: Option<String>) -> crate::intent::IntentTrace {
    crate::intent::IntentTrace { tick_id: ctx.tick_id, parent_signal_id: ctx.parent_signal_id, tool_call_id }
}

/// Bumps the signature's counter and sets `force_respond` once the counter
/// reaches `limit` (§4.6 retry detection).
fn bump_and_check(counts: &mut HashMap<String, u32>, signature: &str, limit: u32, force_respond: &mut bool) {
    let count = counts.entry(signature.to_string()).or_insert(0);
    *count += 1;
    if *count >= limit {
        *force_respond = true;
    }
}

/// Extracts `(depth, root_thought_id, this_thought_id)` from a trigger
/// signal, if it is itself a thought (§4.6 "Thought recursion limits").
fn thought_lineage(trigger: &Signal) -> (Option<u32>, Option<Uuid>, Option<Uuid>) {
    match &trigger.data {
        Some(SignalData::Thought { depth, root_thought_id, .. }) => (Some(*depth), root_thought_id.or(Some(trigger.id)), Some(trigger.id)),
        _ => (None, None, None),
    }
}

/// Builds the tool offer list the LLM sees this iteration. In lazy-schema
/// mode every tool except the meta-tool is offered as a name+description
/// stub with an opaque parameter schema — the model must call
/// `core.tools` to fetch the real one before a validated call succeeds.
fn build_tool_offers(registry: &ToolRegistry) -> Vec<ToolOffer> {
    if registry.lazy_schema {
        let mut offers: Vec<ToolOffer> = registry
            .stubs()
            .into_iter()
            .map(|stub| ToolOffer { name: stub.name, description: stub.description, parameters: serde_json::json!({"type": "object"}) })
            .collect();
        if let Some(meta) = registry.full_schema(META_TOOL_NAME) {
            offers.push(ToolOffer { name: meta.name, description: meta.description, parameters: meta.parameters });
        }
        offers
    } else {
        registry
            .names()
            .into_iter()
            .filter_map(|name| registry.full_schema(&name))
            .map(|schema| ToolOffer { name: schema.name, description: schema.description, parameters: schema.parameters })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use soma_core::{Metrics, Priority, SignalKind};
    use soma_llm::{FinishReason, ScriptedProvider, ToolCallFunction};
    use soma_tools::{default_registry, FieldPolicyTable, MemoryHit, MemoryPort, ToolError};
    use std::sync::Mutex;

    use crate::clock::FixedClock;

    #[derive(Default)]
    struct FakeMemory;

    #[async_trait]
    impl MemoryPort for FakeMemory {
        async fn search(&self, _query: &str, _limit: usize) -> Vec<MemoryHit> {
            vec![]
        }
        async fn upsert_fact(&self, _subject: String, _attribute: String, _value: String, _confidence: f32, _source: String) -> Result<Uuid, ToolError> {
            Ok(Uuid::new_v4())
        }
        async fn add_intention(&self, _content: String, _due_at: Option<chrono::DateTime<Utc>>, _source: String) -> Result<Uuid, ToolError> {
            Ok(Uuid::new_v4())
        }
        async fn get_fact(&self, _subject: &str, _attribute: &str) -> Option<String> {
            None
        }
    }

    fn trigger() -> Signal {
        Signal::new(SignalKind::UserMessage, "telegram", Priority::High, Metrics::new(1.0), Utc::now())
    }

    fn prompt() -> Prompt {
        Prompt { system: "system half".to_string(), user: "## Current State\nuser half".to_string() }
    }

    fn loop_with(responses: Vec<ChatResponse>, config: LoopConfig) -> AgenticLoop {
        let registry = default_registry(true, "Soma".to_string(), "core".to_string(), FieldPolicyTable::default(), 8, HashMap::new());
        let llm = Arc::new(ScriptedProvider::new(responses));
        let clock = Arc::new(FixedClock::new(Utc::now()));
        AgenticLoop::new(registry, llm, config, clock)
    }

    fn text_response(text: &str) -> ChatResponse {
        ChatResponse { content: Some(text.to_string()), tool_calls: vec![], finish_reason: FinishReason::Stop, model: "test".into(), usage: None }
    }

    fn tool_call_response(name: &str, args: Value) -> ChatResponse {
        ChatResponse {
            content: None,
            tool_calls: vec![ToolCall { id: "call-1".to_string(), r#type: "function".to_string(), function: ToolCallFunction { name: name.to_string(), arguments: args.to_string() } }],
            finish_reason: FinishReason::ToolCalls,
            model: "test".into(),
            usage: None,
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        applied: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ImmediateIntentSink for RecordingSink {
        async fn apply_immediate(&self, intent: Intent) {
            let label = match &intent {
                Intent::SendMessage { .. } => "send_message",
                Intent::Remember { .. } => "remember",
                Intent::SetInterest { .. } => "set_interest",
                _ => "other",
            };
            self.applied.lock().unwrap().push(label.to_string());
        }
    }

    #[tokio::test]
    async fn well_formed_json_response_terminates_respond() {
        let agentic = loop_with(vec![text_response(r#"{"response": "hello there", "status": "active"}"#)], LoopConfig::default());
        let (terminal, _state) = agentic
            .run(prompt(), &trigger(), ToolContext { recipient: Some("user-1".into()), ..Default::default() }, &NullImmediateIntentSink, &AbortFlag::new(false), Uuid::new_v4())
            .await;
        assert!(matches!(terminal, Terminal::Respond { text, .. } if text == "hello there"));
    }

    #[tokio::test]
    async fn malformed_response_is_retried_once_then_no_action() {
        let agentic = loop_with(vec![text_response("not json"), text_response("still not json")], LoopConfig::default());
        let (terminal, state) = agentic
            .run(prompt(), &trigger(), ToolContext::default(), &NullImmediateIntentSink, &AbortFlag::new(false), Uuid::new_v4())
            .await;
        assert!(matches!(terminal, Terminal::NoAction { .. }));
        assert!(state.malformed_retried);
    }

    #[tokio::test]
    async fn core_say_synthesizes_immediate_send_message_and_continues() {
        let responses = vec![
            tool_call_response("core.say", serde_json::json!({"message": "checking now"})),
            text_response(r#"{"response": "done", "status": "closed"}"#),
        ];
        let agentic = loop_with(responses, LoopConfig::default());
        let sink = RecordingSink::default();
        let (terminal, state) = agentic
            .run(prompt(), &trigger(), ToolContext { recipient: Some("user-1".into()), ..Default::default() }, &sink, &AbortFlag::new(false), Uuid::new_v4())
            .await;
        assert!(matches!(terminal, Terminal::Respond { .. }));
        assert_eq!(sink.applied.lock().unwrap().as_slice(), ["send_message"]);
        assert!(state.tool_results.is_empty());
    }

    #[tokio::test]
    async fn core_defer_terminates_with_defer_terminal() {
        let responses = vec![tool_call_response("core.defer", serde_json::json!({"signal_type": "contact_urge", "reason": "busy", "hours": 3.0}))];
        let agentic = loop_with(responses, LoopConfig::default());
        let (terminal, _state) = agentic
            .run(prompt(), &trigger(), ToolContext::default(), &NullImmediateIntentSink, &AbortFlag::new(false), Uuid::new_v4())
            .await;
        assert!(matches!(terminal, Terminal::Defer { hours, .. } if hours == 3.0));
    }

    #[tokio::test]
    async fn core_remember_is_applied_immediately_and_flagged() {
        let args = serde_json::json!({"subject": "user", "attribute": "name", "value": "Alice", "confidence": 0.95, "source": "user_explicit"});
        let responses = vec![tool_call_response("core.remember", args), text_response(r#"{"response": "noted", "status": "active"}"#)];
        let agentic = loop_with(responses, LoopConfig::default());
        let sink = RecordingSink::default();
        let ctx = ToolContext { recipient: Some("user-1".into()), memory: Some(Arc::new(FakeMemory) as Arc<dyn MemoryPort>), ..Default::default() };
        let (_terminal, state) = agentic.run(prompt(), &trigger(), ctx, &sink, &AbortFlag::new(false), Uuid::new_v4()).await;
        assert_eq!(sink.applied.lock().unwrap().as_slice(), ["remember"]);
        assert!(state.tool_results[0].immediately_applied);
    }

    #[tokio::test]
    async fn abort_flag_short_circuits_to_superseded() {
        let agentic = loop_with(vec![text_response(r#"{"response": "too late"}"#)], LoopConfig::default());
        let abort = AbortFlag::new(true);
        let (terminal, _state) = agentic
            .run(prompt(), &trigger(), ToolContext::default(), &NullImmediateIntentSink, &abort, Uuid::new_v4())
            .await;
        assert!(matches!(terminal, Terminal::NoAction { reason } if reason == "superseded"));
    }

    #[tokio::test]
    async fn repeated_identical_tool_calls_force_a_response() {
        let mut config = LoopConfig::default();
        config.identical_call_limit = 1;
        let responses = vec![
            tool_call_response("core.time", serde_json::json!({})),
            text_response(r#"{"response": "ok now", "status": "active"}"#),
        ];
        let agentic = loop_with(responses, config);
        let (terminal, state) = agentic
            .run(prompt(), &trigger(), ToolContext::default(), &NullImmediateIntentSink, &AbortFlag::new(false), Uuid::new_v4())
            .await;
        assert!(matches!(terminal, Terminal::Respond { .. }));
        assert!(state.ever_forced_respond);
    }

    #[tokio::test]
    async fn per_tool_call_limit_violations_synthesize_failures_and_force_respond() {
        let per_tool_limits = HashMap::from([("core.time".to_string(), 1)]);
        let registry = default_registry(true, "Soma".to_string(), "core".to_string(), FieldPolicyTable::default(), 8, per_tool_limits);
        let llm = Arc::new(ScriptedProvider::new(vec![
            tool_call_response("core.time", serde_json::json!({})),
            tool_call_response("core.time", serde_json::json!({})),
            tool_call_response("core.time", serde_json::json!({})),
            text_response(r#"{"response": "ok", "status": "active"}"#),
        ]));
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let agentic = AgenticLoop::new(registry, llm, LoopConfig::default(), clock);

        let (terminal, state) = agentic
            .run(prompt(), &trigger(), ToolContext::default(), &NullImmediateIntentSink, &AbortFlag::new(false), Uuid::new_v4())
            .await;

        assert!(matches!(terminal, Terminal::Respond { .. }));
        assert_eq!(state.limit_violation_count, 2);
        assert!(state.ever_forced_respond);
        assert_eq!(state.tool_results.iter().filter(|r| !r.result.success && r.result.error.as_deref().unwrap_or("").contains("max_calls_per_turn")).count(), 2);
    }

    #[tokio::test]
    async fn exceeding_max_iterations_yields_no_action() {
        let mut config = LoopConfig::default();
        config.max_iterations = 1;
        let responses = vec![tool_call_response("core.time", serde_json::json!({})), tool_call_response("core.time", serde_json::json!({}))];
        let agentic = loop_with(responses, config);
        let (terminal, _state) = agentic
            .run(prompt(), &trigger(), ToolContext::default(), &NullImmediateIntentSink, &AbortFlag::new(false), Uuid::new_v4())
            .await;
        assert!(matches!(terminal, Terminal::NoAction { .. }));
    }

    #[tokio::test]
    async fn thought_beyond_max_depth_is_rejected_but_loop_continues() {
        let trigger_thought = Signal::new(SignalKind::Thought, "cognition", Priority::Normal, Metrics::new(1.0), Utc::now()).with_data(SignalData::Thought {
            depth: 5,
            root_thought_id: None,
            parent_thought_id: None,
            content: "deep thought".to_string(),
        });
        let responses = vec![
            tool_call_response("core.thought", serde_json::json!({"content": "too deep"})),
            text_response(r#"{"response": "done", "status": "active"}"#),
        ];
        let agentic = loop_with(responses, LoopConfig::default());
        let (terminal, state) = agentic
            .run(prompt(), &trigger_thought, ToolContext::default(), &NullImmediateIntentSink, &AbortFlag::new(false), Uuid::new_v4())
            .await;
        assert!(matches!(terminal, Terminal::Respond { .. }));
        assert!(state.collected_thoughts.is_empty());
    }

    #[test]
    fn lazy_mode_tool_offers_expose_meta_tool_schema() {
        let registry = default_registry(true, "Soma".to_string(), "core".to_string(), FieldPolicyTable::default(), 8, HashMap::new());
        let offers = build_tool_offers(&registry);
        assert!(offers.iter().any(|o| o.name == META_TOOL_NAME));
        let say = offers.iter().find(|o| o.name == "core.say").unwrap();
        assert_eq!(say.parameters, serde_json::json!({"type": "object"}));
    }

    #[test]
    fn non_lazy_mode_tool_offers_expose_full_schemas() {
        let registry = default_registry(false, "Soma".to_string(), "core".to_string(), FieldPolicyTable::default(), 8, HashMap::new());
        let offers = build_tool_offers(&registry);
        let remember = offers.iter().find(|o| o.name == "core.remember").unwrap();
        assert!(remember.parameters.get("properties").is_some());
    }
}
