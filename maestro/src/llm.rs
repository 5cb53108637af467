//! LLM client boundary.
//!
//! The engine never talks to a provider directly; it consumes the
//! [`ChatProvider`] trait. Messages follow the OpenAI-compatible chat
//! schema. A scripted [`MockProvider`] supports tests without network.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::error::{Error, Result};

/// One chat turn in OpenAI-compatible shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    /// `system`, `user`, `assistant`, or `tool`.
    pub role: String,
    /// Message body.
    pub content: String,
    /// Speaker attribution for multi-agent transcripts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tool calls attached to an assistant turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<LlmToolCall>>,
    /// Tool call this message responds to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl LlmMessage {
    /// Build a plain turn.
    #[must_use]
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// User turn.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    /// Assistant turn attributed to an agent.
    #[must_use]
    pub fn assistant_from(content: impl Into<String>, name: impl Into<String>) -> Self {
        let mut m = Self::new("assistant", content);
        m.name = Some(name.into());
        m
    }

    /// Tool-result turn.
    #[must_use]
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut m = Self::new("tool", content);
        m.tool_call_id = Some(tool_call_id.into());
        m
    }
}

/// A structured tool call returned by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmToolCall {
    /// Provider-assigned call id.
    pub id: String,
    /// Function name.
    pub function_name: String,
    /// Arguments as a JSON object (or string-encoded JSON).
    pub arguments: Value,
}

/// Response from one chat call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Text content, possibly empty when only tool calls were emitted.
    pub content: String,
    /// Model that produced the response.
    pub model: String,
    /// Provider tag.
    pub provider: String,
    /// Prompt tokens.
    pub tokens_in: u32,
    /// Completion tokens.
    pub tokens_out: u32,
    /// Wall-clock duration.
    pub duration_ms: u64,
    /// Finish reason (`stop`, `tool_calls`, `length`).
    pub finish_reason: String,
    /// Structured tool calls, if any.
    #[serde(default)]
    pub tool_calls: Vec<LlmToolCall>,
}

impl LlmResponse {
    /// Whether the model requested tool execution.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Parameters of one chat call.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Provider override.
    pub provider: Option<String>,
    /// Model override.
    pub model: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Response token cap.
    pub max_tokens: Option<u32>,
    /// System prompt placed before the messages.
    pub system_prompt: Option<String>,
    /// Tool schemas in OpenAI function-calling format.
    pub tools: Option<Vec<Value>>,
}

/// A chunk of a streamed chat response.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// Incremental text content.
    Delta(String),
    /// A complete structured tool call.
    ToolCall(LlmToolCall),
    /// Terminal chunk carrying the assembled response.
    Done(LlmResponse),
}

/// Boxed stream of chat chunks.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// The chat client the engine consumes.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// One blocking chat completion.
    async fn chat(&self, messages: &[LlmMessage], options: &ChatOptions) -> Result<LlmResponse>;

    /// Streaming chat completion.
    ///
    /// The default implementation degrades to a single [`StreamChunk::Done`].
    async fn chat_stream(
        &self,
        messages: &[LlmMessage],
        options: &ChatOptions,
    ) -> Result<ChatStream> {
        let response = self.chat(messages, options).await?;
        let content = response.content.clone();
        Ok(Box::pin(futures::stream::iter(vec![
            Ok(StreamChunk::Delta(content)),
            Ok(StreamChunk::Done(response)),
        ])))
    }
}

/// Shared handle bounding concurrent LLM calls with a global semaphore.
///
/// Implementations must never spawn unbounded concurrent provider calls;
/// every engine call path acquires a permit here first.
#[derive(Clone)]
pub struct LlmClient {
    provider: Arc<dyn ChatProvider>,
    permits: Arc<Semaphore>,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    /// Wrap a provider with a concurrency bound.
    #[must_use]
    pub fn new(provider: Arc<dyn ChatProvider>, concurrency: usize) -> Self {
        Self {
            provider,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Bounded chat call.
    pub async fn chat(
        &self,
        messages: &[LlmMessage],
        options: &ChatOptions,
    ) -> Result<LlmResponse> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| Error::llm(e.to_string()))?;
        self.provider.chat(messages, options).await
    }

    /// Bounded streaming chat call.
    ///
    /// The permit is held only for stream setup; provider back-pressure
    /// governs the stream itself.
    pub async fn chat_stream(
        &self,
        messages: &[LlmMessage],
        options: &ChatOptions,
    ) -> Result<ChatStream> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| Error::llm(e.to_string()))?;
        self.provider.chat_stream(messages, options).await
    }
}

/// One scripted reply for [`MockProvider`].
#[derive(Debug, Clone, Default)]
pub struct MockReply {
    /// Text content.
    pub content: String,
    /// Tool calls to attach.
    pub tool_calls: Vec<LlmToolCall>,
    /// Return this error instead of a response.
    pub error: Option<String>,
}

impl MockReply {
    /// A plain text reply.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// A reply carrying one tool call.
    #[must_use]
    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_calls: vec![LlmToolCall {
                id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                function_name: name.into(),
                arguments,
            }],
            ..Self::default()
        }
    }

    /// A transient failure reply.
    #[must_use]
    pub fn transient_error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// A scripted provider that returns predefined replies in sequence,
/// cycling when exhausted. Useful for tests without real API calls.
#[derive(Debug)]
pub struct MockProvider {
    replies: Vec<MockReply>,
    index: AtomicUsize,
}

impl MockProvider {
    /// Create a provider from a reply script.
    #[must_use]
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies,
            index: AtomicUsize::new(0),
        }
    }

    /// Create a provider that always answers with the same text.
    #[must_use]
    pub fn always(content: impl Into<String>) -> Self {
        Self::new(vec![MockReply::text(content)])
    }

    /// Number of chat calls served so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    async fn chat(&self, _messages: &[LlmMessage], options: &ChatOptions) -> Result<LlmResponse> {
        let index = self.index.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .replies
            .get(index % self.replies.len().max(1))
            .cloned()
            .unwrap_or_default();

        if let Some(message) = reply.error {
            return Err(Error::llm_transient(message));
        }

        let finish_reason = if reply.tool_calls.is_empty() {
            "stop"
        } else {
            "tool_calls"
        };
        Ok(LlmResponse {
            content: reply.content,
            model: options.model.clone().unwrap_or_else(|| "mock".to_owned()),
            provider: "mock".to_owned(),
            tokens_in: 10,
            tokens_out: 10,
            duration_ms: 1,
            finish_reason: finish_reason.to_owned(),
            tool_calls: reply.tool_calls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_provider_cycles_replies() {
        let provider = MockProvider::new(vec![MockReply::text("first"), MockReply::text("second")]);
        let options = ChatOptions::default();

        let r1 = provider.chat(&[], &options).await.unwrap();
        assert_eq!(r1.content, "first");
        let r2 = provider.chat(&[], &options).await.unwrap();
        assert_eq!(r2.content, "second");
        let r3 = provider.chat(&[], &options).await.unwrap();
        assert_eq!(r3.content, "first");
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn mock_provider_scripts_errors() {
        let provider = MockProvider::new(vec![MockReply::transient_error("rate limited")]);
        let err = provider.chat(&[], &ChatOptions::default()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn client_bounds_concurrency() {
        let provider = Arc::new(MockProvider::always("ok"));
        let client = LlmClient::new(provider, 2);
        let r = client.chat(&[], &ChatOptions::default()).await.unwrap();
        assert_eq!(r.content, "ok");
    }
}
