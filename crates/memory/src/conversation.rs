use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::schema::MessageRole;

#[derive(Debug, Clone)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
    pub at: DateTime<Utc>,
}

/// Collaborator that can summarize an overflowing conversation history into a
/// single compacted message. Kept as a trait here (rather than a concrete LLM
/// dependency) so this crate never depends on a specific provider.
#[async_trait]
pub trait Compactor: Send + Sync {
    async fn compact(&self, messages: &[ConversationMessage]) -> Option<String>;
}

/// Per-recipient rolling history with a compaction hook that fires once a
/// recipient's history crosses `compact_after`.
pub struct ConversationManager {
    histories: HashMap<String, Vec<ConversationMessage>>,
    max_retained: usize,
    compact_after: usize,
}

impl ConversationManager {
    pub fn new(max_retained: usize, compact_after: usize) -> Self {
        Self { histories: HashMap::new(), max_retained, compact_after }
    }

    pub fn append(&mut self, recipient: impl Into<String>, role: MessageRole, content: impl Into<String>, now: DateTime<Utc>) {
        let history = self.histories.entry(recipient.into()).or_default();
        history.push(ConversationMessage { role, content: content.into(), at: now });
        if history.len() > self.max_retained {
            let drop_count = history.len() - self.max_retained;
            history.drain(0..drop_count);
        }
    }

    pub fn history(&self, recipient: &str) -> &[ConversationMessage] {
        self.histories.get(recipient).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn needs_compaction(&self, recipient: &str) -> bool {
        self.history(recipient).len() >= self.compact_after
    }

    /// Replace a recipient's full history with a single compacted message,
    /// dispatched fire-and-forget via `tokio::spawn` so the caller doesn't
    /// block the current turn on summarization latency. The compacted
    /// message is installed once the compactor finishes; a failed or skipped
    /// compaction leaves the history untouched.
    pub fn spawn_compaction(self: &Arc<tokio::sync::Mutex<Self>>, recipient: String, compactor: Arc<dyn Compactor>, now: DateTime<Utc>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let messages = {
                let guard = manager.lock().await;
                guard.history(&recipient).to_vec()
            };
            if messages.is_empty() {
                return;
            }
            match compactor.compact(&messages).await {
                Some(summary) => {
                    let mut guard = manager.lock().await;
                    guard.histories.insert(
                        recipient.clone(),
                        vec![ConversationMessage { role: MessageRole::Agent, content: summary, at: now }],
                    );
                    info!(%recipient, "conversation history compacted");
                }
                None => warn!(%recipient, "compaction produced no summary — history left unchanged"),
            }
        });
    }
}
