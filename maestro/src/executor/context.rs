//! Per-turn execution context handed to the executor.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::message::Message;
use crate::model::AgentDef;

/// Callback fired after each tool call: `(name, args, result)`.
pub type ToolCallHook = Arc<dyn Fn(&str, &Value, &str) + Send + Sync>;

/// Everything one agent turn needs.
#[derive(Clone)]
pub struct ExecutionContext {
    /// The agent being executed.
    pub agent: AgentDef,
    /// Owning session.
    pub session_id: String,
    /// Owning project (empty outside project scope).
    pub project_id: String,
    /// Workspace filesystem path, if the phase has one.
    pub project_path: Option<PathBuf>,
    /// Recent session history (newest last).
    pub history: Vec<Message>,
    /// Project memory snippet for the prompt.
    pub project_memory: String,
    /// Product vision snippet.
    pub vision: String,
    /// Project description / context snippet.
    pub project_context: String,
    /// Expanded skill blocks.
    pub skills: Vec<String>,
    /// Whether the tool catalog is offered to the model.
    pub tools_enabled: bool,
    /// Tool call observer.
    pub on_tool_call: Option<ToolCallHook>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("agent", &self.agent.id)
            .field("session_id", &self.session_id)
            .field("tools_enabled", &self.tools_enabled)
            .field("history_len", &self.history.len())
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    /// Minimal context for an agent on a session.
    #[must_use]
    pub fn new(agent: AgentDef, session_id: impl Into<String>) -> Self {
        Self {
            agent,
            session_id: session_id.into(),
            project_id: String::new(),
            project_path: None,
            history: Vec::new(),
            project_memory: String::new(),
            vision: String::new(),
            project_context: String::new(),
            skills: Vec::new(),
            tools_enabled: false,
            on_tool_call: None,
        }
    }

    /// Scope to a project and workspace.
    #[must_use]
    pub fn with_project(mut self, project_id: impl Into<String>, path: Option<PathBuf>) -> Self {
        self.project_id = project_id.into();
        self.project_path = path;
        self
    }

    /// Enable or disable the tool catalog.
    #[must_use]
    pub const fn with_tools(mut self, enabled: bool) -> Self {
        self.tools_enabled = enabled;
        self
    }

    /// Attach recent history.
    #[must_use]
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }
}
