//! A deterministic, network-free [`LlmProvider`] used only by this demo
//! host. Concrete vendor HTTP clients are a Non-goal of the core (§1); a
//! real host application supplies its own provider implementation and
//! wires it into `soma_runtime::Orchestrator::new` exactly where this one
//! is wired in `main.rs`.

use async_trait::async_trait;
use soma_llm::{ChatRole, CompletionRequest, ChatResponse, FinishReason, LlmError, LlmProvider};

pub struct EchoProvider {
    identity_name: String,
}

impl EchoProvider {
    pub fn new(identity_name: String) -> Self {
        Self { identity_name }
    }
}

#[async_trait]
impl LlmProvider for EchoProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<ChatResponse, LlmError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .and_then(|m| m.content.as_deref())
            .unwrap_or("");

        let reply = format!("{} heard: {}", self.identity_name, last_user.lines().last().unwrap_or(last_user));
        let payload = serde_json::json!({"response": reply, "status": "active"}).to_string();

        Ok(ChatResponse {
            content: Some(payload),
            tool_calls: vec![],
            finish_reason: FinishReason::Stop,
            model: "echo-provider".to_string(),
            usage: None,
        })
    }
}
