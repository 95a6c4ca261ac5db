use std::sync::Arc;

use async_trait::async_trait;

use crate::agent_engine::history::Transcript;
use crate::errors::{PilotError, PilotResult};
use crate::llm::provider::LlmProvider;
use crate::llm::types::{CallConfig, ToolDef};
use crate::tools::types::ToolCallRequest;

/// What the reasoning backend wants to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum ReasoningStep {
    FinalAnswer {
        text: String,
    },
    ToolCall {
        /// Free text emitted next to the call, possibly empty.
        thought: String,
        call: ToolCallRequest,
        /// Further calls in the same reply. They are not executed.
        ignored_calls: usize,
    },
}

/// The decision-maker of the agent loop. An `Err` is a backend failure
/// (unreachable, timed out, unusable reply), never a tool failure.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    async fn complete(&self, transcript: &Transcript, tools: &[ToolDef]) -> PilotResult<ReasoningStep>;
}

/// Adapts a chat-completions provider to [`ReasoningBackend`].
pub struct ProviderBackend {
    provider: Arc<dyn LlmProvider>,
    call: CallConfig,
}

impl ProviderBackend {
    pub fn new(provider: Arc<dyn LlmProvider>, call: CallConfig) -> Self {
        Self { provider, call }
    }
}

#[async_trait]
impl ReasoningBackend for ProviderBackend {
    async fn complete(&self, transcript: &Transcript, tools: &[ToolDef]) -> PilotResult<ReasoningStep> {
        let reply = self
            .provider
            .chat(transcript.to_chat_messages(), tools.to_vec(), &self.call)
            .await?;

        let mut calls = reply.tool_calls.into_iter();
        if let Some(first) = calls.next() {
            let arguments = parse_arguments(&first.function.arguments);
            let id = if first.id.is_empty() {
                format!("call_{}", uuid::Uuid::new_v4().simple())
            } else {
                first.id
            };
            return Ok(ReasoningStep::ToolCall {
                thought: reply.content.trim().to_string(),
                call: ToolCallRequest {
                    id,
                    name: first.function.name,
                    arguments,
                },
                ignored_calls: calls.count(),
            });
        }

        let text = reply.content.trim();
        if text.is_empty() {
            return Err(PilotError::ReasoningBackend(format!(
                "{} returned neither text nor a tool call",
                self.provider.name()
            )));
        }
        Ok(ReasoningStep::FinalAnswer { text: text.to_string() })
    }
}

/// Decode the JSON-encoded argument string. Undecodable text is passed on
/// verbatim so validation can report it to the model.
fn parse_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}
