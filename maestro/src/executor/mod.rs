//! Agent runtime — one agent turn through the LLM tool-calling loop.
//!
//! The [`Executor`] builds the system prompt, assembles message history,
//! and drives the model until it answers without tool calls or the round
//! cap is hit. Tool calls pass through guardrails, execute sequentially
//! in model order, and feed their results back into the conversation.
//!
//! Role-based filtering means an agent only ever sees the tool schemas
//! its bucket allows. After a `deep_search` call the catalog is withdrawn
//! to force synthesis; the penultimate round does the same with a system
//! nudge.

pub mod context;
pub mod history;
pub mod parse;
pub mod prompt;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use futures::{Stream, StreamExt as _};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{Instrument as _, debug, info_span, warn};

use crate::config::{
    ARTIFACT_CONTENT_BUDGET, EngineConfig, MAX_TOOL_ROUNDS, TOOL_RESULT_HISTORY_BUDGET,
    TOOL_RESULT_SUMMARY_BUDGET,
};
use crate::error::Error;
use crate::guard::{GuardrailDecision, Guardrails};
use crate::llm::{ChatOptions, LlmClient, LlmMessage, LlmResponse, LlmToolCall, StreamChunk};
use crate::message::{Artifact, ExecutionResult, ToolCallRecord};
use crate::sandbox::Sandbox;
use crate::store::{MemoryStore, SessionStore};
use crate::tool::{ToolContext, ToolRegistry, role_tools};
use crate::util::truncate;

pub use context::{ExecutionContext, ToolCallHook};

/// Events yielded by the streaming run.
#[derive(Debug)]
pub enum ExecutorEvent {
    /// Visible text chunk (provider artifacts already filtered).
    Delta(String),
    /// Heartbeat while the model is inside a reasoning block.
    Thinking,
    /// Terminal event carrying the finished result.
    Result(Box<ExecutionResult>),
}

/// Boxed stream of executor events.
pub type ExecutorStream = Pin<Box<dyn Stream<Item = ExecutorEvent> + Send>>;

/// Stateless-per-turn agent runtime. Cheap to clone.
#[derive(Clone)]
pub struct Executor {
    llm: LlmClient,
    registry: Arc<ToolRegistry>,
    guardrails: Arc<Guardrails>,
    sandbox: Arc<Sandbox>,
    sessions: Option<Arc<dyn SessionStore>>,
    memory: Option<Arc<dyn MemoryStore>>,
    config: EngineConfig,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("tools", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Build an executor.
    #[must_use]
    pub fn new(
        llm: LlmClient,
        registry: Arc<ToolRegistry>,
        guardrails: Arc<Guardrails>,
        sandbox: Arc<Sandbox>,
        config: EngineConfig,
    ) -> Self {
        Self {
            llm,
            registry,
            guardrails,
            sandbox,
            sessions: None,
            memory: None,
            config,
        }
    }

    /// Wire the session store (artifact recording).
    #[must_use]
    pub fn with_sessions(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Wire the memory store (memory tools).
    #[must_use]
    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Run one agent turn to completion.
    ///
    /// Never fails: LLM errors come back as an [`ExecutionResult`] with
    /// `error` set and `content = "Error: <msg>"`.
    pub async fn run(&self, ctx: ExecutionContext, user_message: String) -> ExecutionResult {
        let span = info_span!(
            "agent_turn",
            agent.id = %ctx.agent.id,
            agent.role = %ctx.agent.role,
            session = %ctx.session_id,
        );
        self.run_inner(ctx, user_message, None).instrument(span).await
    }

    /// Run one agent turn, streaming visible deltas as they arrive.
    ///
    /// The final item is always [`ExecutorEvent::Result`]. On stream setup
    /// failure the loop falls back to the non-streaming path internally.
    #[must_use]
    pub fn run_streaming(&self, ctx: ExecutionContext, user_message: String) -> ExecutorStream {
        let executor = self.clone();
        let (tx, rx) = mpsc::channel::<ExecutorEvent>(64);
        tokio::spawn(async move {
            let result = executor.run_inner(ctx, user_message, Some(tx.clone())).await;
            let _ = tx.send(ExecutorEvent::Result(Box::new(result))).await;
        });
        Box::pin(tokio_stream_from(rx))
    }

    async fn run_inner(
        &self,
        ctx: ExecutionContext,
        user_message: String,
        sink: Option<mpsc::Sender<ExecutorEvent>>,
    ) -> ExecutionResult {
        let started = Instant::now();
        let agent = ctx.agent.clone();

        let system_prompt = prompt::build_system_prompt(&ctx);
        let mut messages = assemble_messages(&ctx, &user_message);

        let allowed = role_tools(agent.role_bucket());
        let schemas = self.registry.schemas(Some(&allowed));

        let mut result = ExecutionResult {
            agent_id: agent.id.clone(),
            model: agent.model.clone(),
            provider: agent.provider.clone(),
            ..ExecutionResult::default()
        };

        let tool_ctx = ToolContext {
            session_id: ctx.session_id.clone(),
            agent_id: agent.id.clone(),
            project_id: ctx.project_id.clone(),
            workspace: ctx.project_path.clone(),
            sandbox: Arc::clone(&self.sandbox),
            memory: self.memory.clone(),
        };

        let mut tools_active = ctx.tools_enabled && !schemas.is_empty();
        let mut content = String::new();

        for round in 0..MAX_TOOL_ROUNDS {
            let last_round = round + 1 == MAX_TOOL_ROUNDS;
            // Penultimate round: withdraw tools and demand a final answer.
            if round + 2 == MAX_TOOL_ROUNDS && tools_active {
                tools_active = false;
                messages.push(LlmMessage::new(
                    "system",
                    "Stop calling tools. Synthesize your findings and respond now.",
                ));
            }

            let options = ChatOptions {
                provider: some_nonempty(&agent.provider),
                model: some_nonempty(&agent.model),
                temperature: Some(agent.temperature),
                max_tokens: Some(agent.max_tokens),
                system_prompt: Some(system_prompt.clone()),
                // Schemas ride along on the first round only.
                tools: (tools_active && round == 0).then(|| schemas.clone()),
            };

            let response = match self.call_llm(&messages, &options, sink.as_ref()).await {
                Ok(response) => response,
                Err(e) => {
                    result.error = Some(e.to_string());
                    result.content = format!("Error: {e}");
                    result.duration_ms = started.elapsed().as_millis() as u64;
                    return result;
                }
            };

            result.tokens_in += response.tokens_in;
            result.tokens_out += response.tokens_out;
            if result.model.is_empty() {
                result.model = response.model.clone();
            }
            if result.provider.is_empty() {
                result.provider = response.provider.clone();
            }

            // Some providers emit tool calls as XML text instead of the
            // structured channel; lift them.
            let mut tool_calls = response.tool_calls.clone();
            if tool_calls.is_empty() && tools_active {
                tool_calls = parse::lift_xml_tool_calls(&response.content);
            }

            if tool_calls.is_empty() || !tools_active {
                content = response.content;
                break;
            }

            // Record the assistant turn that requested the calls.
            let mut assistant = LlmMessage::assistant_from(response.content.clone(), &agent.id);
            assistant.tool_calls = Some(tool_calls.clone());
            messages.push(assistant);

            for call in &tool_calls {
                let output = self
                    .execute_tool(call, &tool_ctx, ctx.on_tool_call.as_ref(), &mut result)
                    .await;
                messages.push(LlmMessage::tool_result(
                    call.id.clone(),
                    truncate(&output, TOOL_RESULT_HISTORY_BUDGET),
                ));
                if call.function_name == "deep_search" {
                    // Force synthesis after a broad search.
                    tools_active = false;
                }
            }

            if last_round {
                content = "(Max tool rounds reached)".to_owned();
            }
        }

        if content.is_empty() && result.error.is_none() && !result.tool_calls.is_empty() {
            content = "(Max tool rounds reached)".to_owned();
        }

        result.content = parse::strip_artifacts(&content);
        result.delegations = parse::parse_delegations(&result.content);
        result.duration_ms = started.elapsed().as_millis() as u64;
        result
    }

    /// One LLM call, streamed through the sink when present.
    async fn call_llm(
        &self,
        messages: &[LlmMessage],
        options: &ChatOptions,
        sink: Option<&mpsc::Sender<ExecutorEvent>>,
    ) -> crate::Result<LlmResponse> {
        let timeout = self.config.llm_timeout;

        if let Some(sink) = sink {
            match self.llm.chat_stream(messages, options).await {
                Ok(mut stream) => {
                    let mut filter = StreamFilter::default();
                    let mut text = String::new();
                    let mut tool_calls: Vec<LlmToolCall> = Vec::new();
                    let mut done: Option<LlmResponse> = None;

                    let consumed = tokio::time::timeout(timeout, async {
                        while let Some(chunk) = stream.next().await {
                            match chunk? {
                                StreamChunk::Delta(delta) => {
                                    text.push_str(&delta);
                                    for event in filter.push(&delta) {
                                        let _ = sink.send(event).await;
                                    }
                                }
                                StreamChunk::ToolCall(call) => tool_calls.push(call),
                                StreamChunk::Done(response) => done = Some(response),
                            }
                        }
                        Ok::<(), Error>(())
                    })
                    .await;

                    match consumed {
                        Ok(Ok(())) => {
                            let mut response = done.unwrap_or_default();
                            if response.content.is_empty() {
                                response.content = text;
                            }
                            if response.tool_calls.is_empty() {
                                response.tool_calls = tool_calls;
                            }
                            return Ok(response);
                        }
                        Ok(Err(e)) => {
                            warn!(error = %e, "stream failed, falling back to blocking call");
                        }
                        Err(_) => return Err(Error::Timeout(timeout.as_secs())),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "stream setup failed, falling back to blocking call");
                }
            }
        }

        match tokio::time::timeout(timeout, self.llm.chat(messages, options)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(timeout.as_secs())),
        }
    }

    /// Execute one tool call: guardrails, dispatch, record, artifact, hook.
    async fn execute_tool(
        &self,
        call: &LlmToolCall,
        tool_ctx: &ToolContext,
        hook: Option<&ToolCallHook>,
        result: &mut ExecutionResult,
    ) -> String {
        let name = call.function_name.as_str();
        let args = normalize_args(&call.arguments);

        let output = match self
            .guardrails
            .check(&tool_ctx.session_id, &tool_ctx.agent_id, name, &args)
            .await
        {
            GuardrailDecision::Block { message, .. } => message,
            GuardrailDecision::Allow => match self.registry.get(name) {
                None => format!("Error: unknown tool '{name}'"),
                Some(tool) => match tool.execute(args.clone(), tool_ctx).await {
                    Ok(output) => output,
                    Err(e) => format!("Tool '{name}' error: {e}"),
                },
            },
        };

        debug!(tool = name, output_len = output.len(), "tool executed");

        result.tool_calls.push(ToolCallRecord {
            name: name.to_owned(),
            args: args.clone(),
            result_snippet: truncate(&output, TOOL_RESULT_SUMMARY_BUDGET),
        });

        // File writes become artifacts on the session.
        if matches!(name, "code_write" | "code_edit")
            && let Some(sessions) = &self.sessions
            && let Some(path) = args.get("path").and_then(Value::as_str)
        {
            let content = args.get("content").and_then(Value::as_str).unwrap_or_default();
            let artifact = Artifact::file(
                &tool_ctx.session_id,
                path,
                content,
                &tool_ctx.agent_id,
                ARTIFACT_CONTENT_BUDGET,
            );
            if let Err(e) = sessions.add_artifact(&artifact).await {
                warn!(error = %e, path, "artifact recording failed");
            }
        }

        if let Some(hook) = hook {
            hook(name, &args, &output);
        }

        output
    }
}

fn some_nonempty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_owned())
}

/// Parse string-encoded JSON arguments into an object.
fn normalize_args(args: &Value) -> Value {
    match args {
        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| args.clone()),
        other => other.clone(),
    }
}

/// Map session history into chat turns and append the new user message.
fn assemble_messages(ctx: &ExecutionContext, user_message: &str) -> Vec<LlmMessage> {
    let mut messages: Vec<LlmMessage> = ctx
        .history
        .iter()
        .map(|m| {
            if m.from_agent == "user" {
                LlmMessage::user(m.content.clone())
            } else {
                LlmMessage::assistant_from(m.content.clone(), m.from_agent.clone())
            }
        })
        .collect();
    messages.push(LlmMessage::user(user_message.to_owned()));
    messages
}

/// Streaming filter: strips `<think>` blocks and raw provider tokens that
/// may split across chunk boundaries, and emits a [`ExecutorEvent::Thinking`]
/// heartbeat every 20 chunks spent inside a reasoning block.
#[derive(Default)]
struct StreamFilter {
    buffer: String,
    in_think: bool,
    think_chunks: usize,
}

impl StreamFilter {
    fn push(&mut self, chunk: &str) -> Vec<ExecutorEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();
        let mut visible = String::new();

        loop {
            if self.in_think {
                if let Some(end) = self.buffer.find("</think>") {
                    self.buffer.drain(..end + "</think>".len());
                    self.in_think = false;
                    self.think_chunks = 0;
                } else {
                    self.think_chunks += 1;
                    if self.think_chunks.is_multiple_of(20) {
                        events.push(ExecutorEvent::Thinking);
                    }
                    // Discard thinking content but keep a tail in case the
                    // closing tag is split across chunks.
                    let mut keep = self.buffer.len().saturating_sub(8);
                    while keep > 0 && !self.buffer.is_char_boundary(keep) {
                        keep -= 1;
                    }
                    self.buffer.drain(..keep);
                    break;
                }
            } else if let Some(start) = self.buffer.find("<think>") {
                visible.push_str(&self.buffer[..start]);
                self.buffer.drain(..start + "<think>".len());
                self.in_think = true;
            } else {
                // Hold back a trailing partial tag; emit the rest.
                let hold = self
                    .buffer
                    .rfind('<')
                    .filter(|&i| self.buffer.len() - i < 24 && !self.buffer[i..].contains('>'))
                    .unwrap_or(self.buffer.len());
                visible.push_str(&self.buffer[..hold]);
                self.buffer.drain(..hold);
                break;
            }
        }

        let cleaned = crate::executor::parse::strip_artifacts(&visible);
        if !cleaned.is_empty() {
            events.push(ExecutorEvent::Delta(cleaned));
        }
        events
    }
}

fn tokio_stream_from(mut rx: mpsc::Receiver<ExecutorEvent>) -> impl Stream<Item = ExecutorEvent> {
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield event;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockProvider, MockReply};
    use crate::model::AgentDef;
    use serde_json::json;

    fn executor_with(replies: Vec<MockReply>) -> Executor {
        let mut registry = ToolRegistry::new();
        crate::tool::register_builtins(&mut registry);
        Executor::new(
            LlmClient::new(Arc::new(MockProvider::new(replies)), 4),
            Arc::new(registry),
            Arc::new(Guardrails::default()),
            Arc::new(Sandbox::default()),
            EngineConfig::default(),
        )
    }

    fn dev_ctx(workspace: &std::path::Path) -> ExecutionContext {
        let agent = AgentDef::new("dev-1", "Devon", "Backend Dev").with_rank(60);
        ExecutionContext::new(agent, "s1")
            .with_project("p1", Some(workspace.to_path_buf()))
            .with_tools(true)
    }

    #[tokio::test]
    async fn plain_answer_passes_through() {
        let executor = executor_with(vec![MockReply::text("All reviewed, looks good.")]);
        let dir = tempfile::tempdir().unwrap();
        let result = executor.run(dev_ctx(dir.path()), "review this".into()).await;
        assert_eq!(result.content, "All reviewed, looks good.");
        assert!(result.error.is_none());
        assert!(result.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn tool_loop_executes_and_feeds_back() {
        let executor = executor_with(vec![
            MockReply::tool_call("code_write", json!({"path": "src/a.rs", "content": "fn a() {}"})),
            MockReply::text("Done. [PR] Add a() — created src/a.rs"),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let result = executor.run(dev_ctx(dir.path()), "create a()".into()).await;
        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(result.tool_calls[0].name, "code_write");
        assert!(result.content.starts_with("Done."));
        assert!(dir.path().join("src/a.rs").exists());
    }

    #[tokio::test]
    async fn unknown_tool_returns_error_string() {
        let executor = executor_with(vec![
            MockReply::tool_call("teleport", json!({"to": "prod"})),
            MockReply::text("Understood, no teleport tool."),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let result = executor.run(dev_ctx(dir.path()), "go".into()).await;
        assert_eq!(result.tool_calls[0].result_snippet, "Error: unknown tool 'teleport'");
    }

    #[tokio::test]
    async fn llm_error_surfaces_in_result() {
        let executor = executor_with(vec![MockReply::transient_error("rate limited")]);
        let dir = tempfile::tempdir().unwrap();
        let result = executor.run(dev_ctx(dir.path()), "hello".into()).await;
        assert!(result.error.is_some());
        assert!(result.content.starts_with("Error:"));
    }

    #[tokio::test]
    async fn max_rounds_yields_sentinel() {
        // The model calls a tool forever; the loop must cut it off.
        let executor = executor_with(vec![MockReply::tool_call(
            "list_files",
            json!({}),
        )]);
        let dir = tempfile::tempdir().unwrap();
        let result = executor.run(dev_ctx(dir.path()), "loop forever".into()).await;
        assert_eq!(result.content, "(Max tool rounds reached)");
        // Penultimate round withdraws tools, so the model gets two fewer
        // tool rounds than the cap.
        assert!(result.tool_calls.len() <= MAX_TOOL_ROUNDS);
    }

    #[tokio::test]
    async fn guardrail_block_reaches_model_not_shell() {
        let executor = executor_with(vec![
            MockReply::tool_call("build", json!({"command": "rm -rf / --force"})),
            MockReply::text("Acknowledged, not running that."),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let result = executor.run(dev_ctx(dir.path()), "clean up".into()).await;
        assert!(result.tool_calls[0].result_snippet.contains("Guardrail"));
    }

    #[tokio::test]
    async fn delegations_are_parsed() {
        let executor = executor_with(vec![MockReply::text(
            "Plan drafted.\n[DELEGATE:qa-1] validate the login flow",
        )]);
        let dir = tempfile::tempdir().unwrap();
        let result = executor.run(dev_ctx(dir.path()), "plan".into()).await;
        assert_eq!(result.delegations.len(), 1);
        assert_eq!(result.delegations[0].to_agent, "qa-1");
    }

    #[tokio::test]
    async fn streaming_yields_deltas_then_result() {
        let executor = executor_with(vec![MockReply::text("chunked answer")]);
        let dir = tempfile::tempdir().unwrap();
        let mut stream = executor.run_streaming(dev_ctx(dir.path()), "hi".into());

        let mut saw_delta = false;
        let mut saw_result = false;
        while let Some(event) = stream.next().await {
            match event {
                ExecutorEvent::Delta(d) => {
                    assert!(!d.is_empty());
                    saw_delta = true;
                }
                ExecutorEvent::Result(r) => {
                    assert_eq!(r.content, "chunked answer");
                    saw_result = true;
                }
                ExecutorEvent::Thinking => {}
            }
        }
        assert!(saw_delta && saw_result);
    }

    #[test]
    fn stream_filter_strips_think_across_chunks() {
        let mut filter = StreamFilter::default();
        let mut visible = String::new();
        for chunk in ["Hello <thi", "nk>secret", " plan</think> wor", "ld"] {
            for event in filter.push(chunk) {
                if let ExecutorEvent::Delta(d) = event {
                    visible.push_str(&d);
                }
            }
        }
        assert!(visible.contains("Hello"));
        assert!(visible.contains("world") || visible.contains("wor"));
        assert!(!visible.contains("secret"));
    }
}
