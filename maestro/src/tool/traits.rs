//! Core tool trait and execution context.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::Result;
use crate::sandbox::Sandbox;
use crate::store::MemoryStore;

/// Everything a tool may touch during execution.
///
/// Relative paths in file tools resolve against the workspace; tools that
/// need a working directory default to it as well.
#[derive(Clone)]
pub struct ToolContext {
    /// Owning session.
    pub session_id: String,
    /// Calling agent.
    pub agent_id: String,
    /// Owning project, empty outside project scope.
    pub project_id: String,
    /// Workspace root, if the phase has one.
    pub workspace: Option<PathBuf>,
    /// Subprocess sandbox.
    pub sandbox: Arc<Sandbox>,
    /// Project/global memory, if wired.
    pub memory: Option<Arc<dyn MemoryStore>>,
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("session_id", &self.session_id)
            .field("agent_id", &self.agent_id)
            .field("workspace", &self.workspace)
            .finish_non_exhaustive()
    }
}

impl ToolContext {
    /// Resolve a possibly-relative path against the workspace.
    #[must_use]
    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            return p.to_path_buf();
        }
        match &self.workspace {
            Some(ws) => ws.join(p),
            None => p.to_path_buf(),
        }
    }

    /// The working directory for command tools.
    #[must_use]
    pub fn cwd(&self) -> PathBuf {
        self.workspace
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// An LLM-callable tool: a descriptor plus an async execute function.
///
/// Both arguments and result are JSON/string shaped since they are the
/// output and input of the model respectively. Execution failures are
/// usually returned as `Ok(error text)` so the model can recover; `Err`
/// is reserved for engine-level faults.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name.
    fn name(&self) -> &'static str;

    /// One-line description shown to the model.
    fn description(&self) -> &'static str;

    /// JSON Schema of the arguments object.
    fn parameters(&self) -> Value;

    /// Execute with parsed arguments.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String>;

    /// OpenAI function-calling schema for this tool.
    fn schema(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": self.description(),
                "parameters": self.parameters(),
            }
        })
    }
}

/// Shared handle to a dynamic tool.
pub type BoxedTool = Arc<dyn Tool>;
