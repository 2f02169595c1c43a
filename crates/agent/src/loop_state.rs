//! Loop state (§3 "Loop state (C8)"): the per-invocation mutable record
//! threaded through the agentic loop's iterations.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use soma_tools::ToolResult;
use uuid::Uuid;

/// Status the LLM must report when it terminates with `respond` (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    AwaitingAnswer,
    Closed,
    Idle,
}

/// The loop's terminal state: exactly one of `respond`, `no_action`, or
/// `defer` (§3, glossary "Terminal").
#[derive(Debug, Clone)]
pub enum Terminal {
    Respond { text: String, status: ConversationStatus, confidence: f64 },
    NoAction { reason: String },
    Defer { signal_type: String, reason: String, hours: f64 },
}

/// A single entry in the executed-tool log.
#[derive(Debug, Clone)]
pub struct ExecutedTool {
    pub tool_name: String,
    pub has_side_effects: bool,
}

/// A tool result collected during the loop, tagged with whether its intent
/// was already compiled and applied immediately (§4.6 "Immediate-intent
/// application") — C9 must not re-emit those.
#[derive(Debug, Clone)]
pub struct CollectedToolResult {
    pub result: ToolResult,
    pub immediately_applied: bool,
}

/// Stable per-call signature — `name + hash(args)` — used to detect
/// repeated failures and repeated identical calls (§4.6).
pub fn call_signature(name: &str, args: &serde_json::Value) -> String {
    let canonical = serde_json::to_string(args).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{name}:{:x}", hasher.finalize())
}

/// Per-invocation mutable record (§3). Built fresh for every loop run.
#[derive(Debug, Clone)]
pub struct LoopState {
    pub iteration: u32,
    pub tool_call_count: u32,
    pub started_at: DateTime<Utc>,
    pub collected_thoughts: Vec<String>,
    pub executed_tools: Vec<ExecutedTool>,
    pub failed_call_counts: HashMap<String, u32>,
    pub identical_call_counts: HashMap<String, u32>,
    pub tool_call_counts: HashMap<String, u32>,
    pub limit_violation_count: u32,
    pub force_respond: bool,
    pub force_respond_attempts: u32,
    pub ever_forced_respond: bool,
    pub conversation_status: ConversationStatus,
    pub malformed_retried: bool,
    pub provider_error_retried: bool,
    pub tool_results: Vec<CollectedToolResult>,
    /// Thought tree bookkeeping for recursion limits (§4.6 "Thought
    /// recursion limits"). `None` unless the trigger signal was itself a
    /// thought.
    pub trigger_thought_depth: Option<u32>,
    pub trigger_thought_root_id: Option<Uuid>,
    pub trigger_thought_id: Option<Uuid>,
}

impl LoopState {
    pub fn new(started_at: DateTime<Utc>, trigger_thought_depth: Option<u32>, trigger_thought_root_id: Option<Uuid>, trigger_thought_id: Option<Uuid>) -> Self {
        Self {
            iteration: 0,
            tool_call_count: 0,
            started_at,
            collected_thoughts: Vec::new(),
            executed_tools: Vec::new(),
            failed_call_counts: HashMap::new(),
            identical_call_counts: HashMap::new(),
            tool_call_counts: HashMap::new(),
            limit_violation_count: 0,
            force_respond: false,
            force_respond_attempts: 0,
            ever_forced_respond: false,
            conversation_status: ConversationStatus::Active,
            malformed_retried: false,
            provider_error_retried: false,
            tool_results: Vec::new(),
            trigger_thought_depth,
            trigger_thought_root_id,
            trigger_thought_id,
        }
    }

    /// Base confidence 0.8, minus 0.2 if ever forced to respond, minus 0.1
    /// if beyond iteration 3, clamped to `[0.1, 1.0]` (§4.6 "Confidence
    /// contract").
    pub fn compute_confidence(&self) -> f64 {
        let mut confidence = 0.8;
        if self.ever_forced_respond {
            confidence -= 0.2;
        }
        if self.iteration > 3 {
            confidence -= 0.1;
        }
        confidence.clamp(0.1, 1.0)
    }
}
