//! Prompt assembly (step 2 of §4.6): builds the per-iteration LLM prompt
//! from the trigger signal, agent state, identity, conversation history,
//! user-model snapshot, and prior tool results, then splits it at the
//! `## Current State` sentinel into system/user halves.

use chrono::{DateTime, Utc};

use soma_core::Signal;
use soma_memory::{ConversationMessage, MessageRole};
use soma_tools::{ToolCard, ToolResult};

/// Everything from here down belongs in the user half of the split.
pub const SENTINEL: &str = "## Current State";

/// Pre-computed inputs for one loop iteration's prompt. Building this is
/// the caller's job (reading state snapshots, truncating history); this
/// module's `build_prompt` is a pure function of the struct.
pub struct PromptInputs<'a> {
    pub identity_name: &'a str,
    pub now: DateTime<Utc>,
    pub trigger: &'a Signal,
    pub agent_state: &'a serde_json::Value,
    pub user_model: &'a serde_json::Value,
    pub history: &'a [ConversationMessage],
    pub max_history_messages: usize,
    pub tool_cards: &'a [ToolCard],
    pub prior_tool_results: &'a [ToolResult],
}

/// The assembled prompt, already split at [`SENTINEL`].
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    /// Rejoin into a single string — mainly useful for logging and tests
    /// that want to assert against the full text.
    pub fn joined(&self) -> String {
        format!("{}\n\n{}\n\n{}", self.system, SENTINEL, self.user)
    }
}

pub fn build_prompt(inputs: &PromptInputs<'_>) -> Prompt {
    let system = build_system_half(inputs);
    let user = build_user_half(inputs);
    Prompt { system, user }
}

fn build_system_half(inputs: &PromptInputs<'_>) -> String {
    format!(
        "You are {name}, an autonomic agent. You reason in short turns and act \
         through tools rather than narrating what you would do.\n\n\
         AVAILABLE TOOLS:\n{tools}",
        name = inputs.identity_name,
        tools = build_tools_block(inputs.tool_cards),
    )
}

fn build_user_half(inputs: &PromptInputs<'_>) -> String {
    format!(
        "{sentinel}\n{state}\n\n\
         USER MODEL:\n{user_model}\n\n\
         RECENT CONVERSATION:\n{history}\n\n\
         TRIGGER:\n{trigger}\n\n\
         {tool_results}\
         Respond as JSON: {{\"response\": string, \"status\"?: string, \"urgent\"?: bool}}, \
         or call a tool.",
        sentinel = SENTINEL,
        state = build_state_block(inputs),
        user_model = pretty(inputs.user_model),
        history = build_history_block(inputs.history, inputs.max_history_messages),
        trigger = build_trigger_block(inputs.trigger, inputs.now),
        tool_results = build_tool_results_block(inputs.prior_tool_results),
    )
}

fn build_tools_block(cards: &[ToolCard]) -> String {
    if cards.is_empty() {
        return "(none)".to_string();
    }
    cards
        .iter()
        .map(|c| format!("- {} [{}]: {}", c.name, c.tags.join(","), c.summary))
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_state_block(inputs: &PromptInputs<'_>) -> String {
    format!("now: {}\nagent state: {}", inputs.now.to_rfc3339(), pretty(inputs.agent_state))
}

fn build_history_block(history: &[ConversationMessage], max_messages: usize) -> String {
    if history.is_empty() {
        return "(no prior messages)".to_string();
    }
    let start = history.len().saturating_sub(max_messages);
    history[start..]
        .iter()
        .map(|m| {
            let role = match m.role {
                MessageRole::User => "user",
                MessageRole::Agent => "assistant",
            };
            format!("[{}] {}: {}", m.at.to_rfc3339(), role, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_trigger_block(trigger: &Signal, now: DateTime<Utc>) -> String {
    format!(
        "kind={:?} source={} priority={:?} age_secs={} value={:.3}",
        trigger.kind,
        trigger.source,
        trigger.priority,
        (now - trigger.timestamp).num_seconds().max(0),
        trigger.metrics.value,
    )
}

fn build_tool_results_block(results: &[ToolResult]) -> String {
    if results.is_empty() {
        return String::new();
    }
    let body = results
        .iter()
        .map(|r| {
            if r.success {
                format!("- {} -> {}", r.tool_name, pretty(r.data.as_ref().unwrap_or(&serde_json::Value::Null)))
            } else {
                format!("- {} -> error: {}", r.tool_name, r.error.as_deref().unwrap_or("unknown"))
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!("PRIOR TOOL RESULTS THIS TURN:\n{body}\n\n")
}

fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}
