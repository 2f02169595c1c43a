//! The LLM provider contract (§6): a trait-only collaborator. No concrete
//! vendor HTTP client lives here (Non-goal) — `soma-agent`'s loop is
//! generic over any [`LlmProvider`] implementation, and this crate ships a
//! deterministic [`ScriptedProvider`] test double alongside the trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: Some(content.into()), tool_calls: vec![], tool_call_id: None }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: Some(content.into()), tool_calls: vec![], tool_call_id: None }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: Some(content.into()), tool_calls: vec![], tool_call_id: None }
    }
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self { role: ChatRole::Assistant, content: None, tool_calls, tool_call_id: None }
    }
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: ChatRole::Tool, content: Some(content.into()), tool_calls: vec![], tool_call_id: Some(tool_call_id.into()) }
    }
}

/// A tool call requested by the model, following the function-calling
/// shape common to OpenAI-compatible chat completion APIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_tool_call_type")]
    pub r#type: String,
    pub function: ToolCallFunction,
}

fn default_tool_call_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    /// JSON-encoded arguments string, per §6's wire shape. Callers parse
    /// this into a `serde_json::Value` before validating against a tool's
    /// schema.
    pub arguments: String,
}

/// Declarative tool offered to the model in its native tool-calling
/// format, built from a `soma-tools::ToolSchema` or stub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOffer {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Why a completion stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// The response shape every provider implementation must produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub model: String,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// Parameters for a single completion request (§6).
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub tools: Vec<ToolOffer>,
    /// Whether the provider should force JSON-shaped output. Honored on a
    /// best-effort basis — the loop still defensively parses the response
    /// (§4.6 response parsing).
    pub json_response: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider returned an error response: {0}")]
    Provider(String),
    #[error("request timed out")]
    Timeout,
}

/// The LLM provider contract (§6). Implementations are concrete HTTP
/// clients (Non-goal here — left to the host application) or, for tests,
/// [`ScriptedProvider`].
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<ChatResponse, LlmError>;
}

/// A deterministic test double that replays a fixed sequence of responses,
/// one per call, so agentic-loop tests don't depend on network access or a
/// real model. Returns an error (not a panic) once exhausted.
pub struct ScriptedProvider {
    responses: std::sync::Mutex<std::collections::VecDeque<ChatResponse>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self { responses: std::sync::Mutex::new(responses.into()) }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(&self, _request: CompletionRequest) -> Result<ChatResponse, LlmError> {
        let mut responses = self.responses.lock().unwrap();
        responses.pop_front().ok_or_else(|| LlmError::Provider("scripted provider exhausted".to_string()))
    }
}

/// Extract and parse a JSON payload from `response`, tolerating a fenced
/// code block wrapper (```json ... ```), since models routinely wrap
/// structured output that way.
pub fn extract_json_output<T: serde::de::DeserializeOwned>(response: &str) -> Option<T> {
    let trimmed = response.trim();
    let candidate = if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        let after_lang = after_fence.trim_start_matches(|c: char| c.is_alphabetic());
        let end = after_lang.find("```").unwrap_or(after_lang.len());
        after_lang[..end].trim()
    } else {
        trimmed
    };
    serde_json::from_str(candidate).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_provider_replays_responses_in_order() {
        let provider = ScriptedProvider::new(vec![
            ChatResponse { content: Some("first".into()), tool_calls: vec![], finish_reason: FinishReason::Stop, model: "test".into(), usage: None },
            ChatResponse { content: Some("second".into()), tool_calls: vec![], finish_reason: FinishReason::Stop, model: "test".into(), usage: None },
        ]);
        let first = provider.complete(CompletionRequest::default()).await.unwrap();
        let second = provider.complete(CompletionRequest::default()).await.unwrap();
        assert_eq!(first.content.unwrap(), "first");
        assert_eq!(second.content.unwrap(), "second");
    }

    #[tokio::test]
    async fn scripted_provider_errors_when_exhausted() {
        let provider = ScriptedProvider::new(vec![]);
        assert!(provider.complete(CompletionRequest::default()).await.is_err());
    }

    #[test]
    fn extract_json_output_handles_fenced_blocks() {
        let text = "```json\n{\"response\": \"hi\"}\n```";
        #[derive(Deserialize)]
        struct Shape {
            response: String,
        }
        let parsed: Shape = extract_json_output(text).unwrap();
        assert_eq!(parsed.response, "hi");
    }

    #[test]
    fn extract_json_output_handles_bare_json() {
        #[derive(Deserialize)]
        struct Shape {
            response: String,
        }
        let parsed: Shape = extract_json_output("{\"response\": \"hi\"}").unwrap();
        assert_eq!(parsed.response, "hi");
    }
}
