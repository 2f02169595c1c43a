//! Intent compiler (C9, §4.7): turns a terminal plus the loop's collected
//! tool results into an ordered list of typed intents. Compilation is pure
//! — applying an intent to memory/conversation/schedule/energy state is the
//! orchestrator's job, not this crate's.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::loop_state::{ConversationStatus, LoopState, Terminal};

/// Trace metadata every compiled intent carries (§4.7 "Every intent
/// receives trace metadata").
#[derive(Debug, Clone)]
pub struct IntentTrace {
    pub tick_id: Uuid,
    pub parent_signal_id: Uuid,
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Intent {
    EmitThought { content: String, trace: IntentTrace },
    UpdateState { patch: Value, trace: IntentTrace },
    ScheduleEvent { request: Value, trace: IntentTrace },
    Remember { subject: String, attribute: String, value: Value, confidence: f64, source: Option<String>, evidence: Option<String>, is_user_fact: bool, trace: IntentTrace },
    SetInterest { topic: String, weight: f64, trace: IntentTrace },
    SendMessage { recipient: String, text: String, status: ConversationStatus, confidence: f64, trace: IntentTrace },
    DeferSignal { signal_type: String, defer_until: DateTime<Utc>, reason: String, trace: IntentTrace },
}

/// Compilation context: the bits the compiler needs beyond the loop state
/// itself (§4.7, step 3's recipient lookup).
pub struct IntentContext {
    pub tick_id: Uuid,
    pub parent_signal_id: Uuid,
    pub recipient: Option<String>,
    pub now: DateTime<Utc>,
}

fn trace(ctx: &IntentContext, tool_call_id: Option<String>) -> IntentTrace {
    IntentTrace { tick_id: ctx.tick_id, parent_signal_id: ctx.parent_signal_id, tool_call_id }
}

/// Compile a terminal and the tool results collected during the loop into
/// an ordered `Intent` list (§4.7).
pub fn compile_intents(terminal: &Terminal, state: &LoopState, ctx: &IntentContext) -> Vec<Intent> {
    let mut intents = Vec::new();

    // 1. Merged thought, if any were collected.
    if !state.collected_thoughts.is_empty() {
        intents.push(Intent::EmitThought {
            content: state.collected_thoughts.join("\n"),
            trace: trace(ctx, None),
        });
    }

    // 2. Dispatch every non-immediate, non-thought tool result by name.
    for collected in &state.tool_results {
        if collected.immediately_applied {
            continue;
        }
        let result = &collected.result;
        if result.tool_name == "core.thought" {
            continue;
        }
        if !result.success {
            continue;
        }
        let Some(data) = result.data.clone() else { continue };
        if let Some(intent) = dispatch_tool_result(&result.tool_name, &result.tool_call_id, data, ctx) {
            intents.push(intent);
        }
    }

    // 3. Respond -> SEND_MESSAGE, only when a recipient is known.
    // 4. Defer -> DEFER_SIGNAL.
    match terminal {
        Terminal::Respond { text, status, confidence } => {
            if let Some(recipient) = &ctx.recipient {
                intents.push(Intent::SendMessage {
                    recipient: recipient.clone(),
                    text: text.clone(),
                    status: *status,
                    confidence: *confidence,
                    trace: trace(ctx, None),
                });
            } else {
                tracing::warn!("respond terminal produced with no known recipient; dropping rather than delivering elsewhere");
            }
        }
        Terminal::Defer { signal_type, reason, hours } => {
            let defer_ms = (hours * 3_600_000.0).round() as i64;
            intents.push(Intent::DeferSignal {
                signal_type: signal_type.clone(),
                defer_until: ctx.now + chrono::Duration::milliseconds(defer_ms.max(0)),
                reason: reason.clone(),
                trace: trace(ctx, None),
            });
        }
        Terminal::NoAction { .. } => {}
    }

    intents
}

pub(crate) fn dispatch_tool_result(tool_name: &str, tool_call_id: &str, data: Value, ctx: &IntentContext) -> Option<Intent> {
    let tool_call_id = Some(tool_call_id.to_string());
    match tool_name {
        "core.agent" if data.get("updated").and_then(Value::as_bool) == Some(true) => {
            Some(Intent::UpdateState { patch: data, trace: trace(ctx, tool_call_id) })
        }
        "core.schedule" if data.get("action").and_then(Value::as_str) == Some("create") => {
            Some(Intent::ScheduleEvent { request: data, trace: trace(ctx, tool_call_id) })
        }
        "core.remember" => {
            let subject = data.get("subject")?.as_str()?.to_string();
            let attribute = data.get("attribute")?.as_str()?.to_string();
            let value = data.get("value")?.clone();
            let confidence = data.get("confidence").and_then(Value::as_f64).unwrap_or(0.5);
            let source = data.get("source").and_then(Value::as_str).map(str::to_string);
            let evidence = data.get("evidence").and_then(Value::as_str).map(str::to_string);
            let is_user_fact = data.get("is_user_fact").and_then(Value::as_bool).unwrap_or(subject == "user");
            Some(Intent::Remember { subject, attribute, value, confidence, source, evidence, is_user_fact, trace: trace(ctx, tool_call_id) })
        }
        "core.set_interest" => {
            let topic = data.get("topic")?.as_str()?.to_string();
            let weight = data.get("weight").and_then(Value::as_f64).unwrap_or(0.5);
            Some(Intent::SetInterest { topic, weight, trace: trace(ctx, tool_call_id) })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loop_state::CollectedToolResult;
    use soma_tools::ToolResult;

    fn ctx() -> IntentContext {
        IntentContext { tick_id: Uuid::new_v4(), parent_signal_id: Uuid::new_v4(), recipient: Some("user-1".to_string()), now: Utc::now() }
    }

    fn state_with_results(results: Vec<CollectedToolResult>) -> LoopState {
        let mut state = LoopState::new(Utc::now(), None, None, None);
        state.tool_results = results;
        state
    }

    #[test]
    fn respond_with_known_recipient_emits_send_message() {
        let terminal = Terminal::Respond { text: "hi".into(), status: ConversationStatus::Active, confidence: 0.8 };
        let state = state_with_results(vec![]);
        let intents = compile_intents(&terminal, &state, &ctx());
        assert!(matches!(intents.last(), Some(Intent::SendMessage { .. })));
    }

    #[test]
    fn respond_without_recipient_is_dropped() {
        let terminal = Terminal::Respond { text: "hi".into(), status: ConversationStatus::Active, confidence: 0.8 };
        let state = state_with_results(vec![]);
        let mut context = ctx();
        context.recipient = None;
        let intents = compile_intents(&terminal, &state, &context);
        assert!(intents.iter().all(|i| !matches!(i, Intent::SendMessage { .. })));
    }

    #[test]
    fn defer_terminal_computes_defer_until_from_hours() {
        let terminal = Terminal::Defer { signal_type: "contact_urge".into(), reason: "busy".into(), hours: 2.0 };
        let state = state_with_results(vec![]);
        let context = ctx();
        let intents = compile_intents(&terminal, &state, &context);
        let Some(Intent::DeferSignal { defer_until, .. }) = intents.into_iter().find(|i| matches!(i, Intent::DeferSignal { .. })) else {
            panic!("expected a DeferSignal intent");
        };
        assert_eq!((defer_until - context.now).num_hours(), 2);
    }

    #[test]
    fn immediately_applied_remember_produces_no_duplicate_intent() {
        let result = ToolResult::ok(
            "call-1",
            "core.remember",
            serde_json::json!({"subject": "user", "attribute": "name", "value": "Alice", "confidence": 0.95}),
        );
        let state = state_with_results(vec![CollectedToolResult { result, immediately_applied: true }]);
        let terminal = Terminal::NoAction { reason: "done".into() };
        let intents = compile_intents(&terminal, &state, &ctx());
        assert!(intents.iter().all(|i| !matches!(i, Intent::Remember { .. })));
    }

    #[test]
    fn non_immediate_remember_compiles_to_remember_intent() {
        let result = ToolResult::ok(
            "call-1",
            "core.remember",
            serde_json::json!({"subject": "user", "attribute": "name", "value": "Alice", "confidence": 0.95, "source": "user_explicit"}),
        );
        let state = state_with_results(vec![CollectedToolResult { result, immediately_applied: false }]);
        let terminal = Terminal::NoAction { reason: "done".into() };
        let intents = compile_intents(&terminal, &state, &ctx());
        assert!(intents.iter().any(|i| matches!(i, Intent::Remember { subject, .. } if subject == "user")));
    }

    #[test]
    fn collected_thoughts_merge_into_single_emit_thought() {
        let mut state = state_with_results(vec![]);
        state.collected_thoughts = vec!["first".into(), "second".into()];
        let terminal = Terminal::NoAction { reason: "done".into() };
        let intents = compile_intents(&terminal, &state, &ctx());
        let thoughts: Vec<_> = intents.iter().filter(|i| matches!(i, Intent::EmitThought { .. })).collect();
        assert_eq!(thoughts.len(), 1);
        assert!(matches!(thoughts[0], Intent::EmitThought { content, .. } if content.contains("first") && content.contains("second")));
    }

    #[test]
    fn unknown_tool_result_produces_no_intent() {
        let result = ToolResult::ok("call-1", "core.time", serde_json::json!({"now": "2026-01-01T00:00:00Z"}));
        let state = state_with_results(vec![CollectedToolResult { result, immediately_applied: false }]);
        let terminal = Terminal::NoAction { reason: "done".into() };
        let intents = compile_intents(&terminal, &state, &ctx());
        assert!(intents.is_empty());
    }

    #[test]
    fn failed_tool_result_produces_no_intent() {
        let result = ToolResult::failure("call-1", "core.remember", "policy rejected");
        let state = state_with_results(vec![CollectedToolResult { result, immediately_applied: false }]);
        let terminal = Terminal::NoAction { reason: "done".into() };
        let intents = compile_intents(&terminal, &state, &ctx());
        assert!(intents.is_empty());
    }
}
