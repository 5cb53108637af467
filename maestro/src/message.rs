//! Session messages and agent execution results.
//!
//! A [`Message`] is one logical utterance on a session; the store appends
//! them and never mutates. An [`ExecutionResult`] is the outcome of one
//! agent turn, including tool-call records and parsed delegations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Logical kind of a session message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain agent or user text.
    Text,
    /// Explicit approval decision.
    Approve,
    /// Explicit veto decision.
    Veto,
    /// Engine/system announcement.
    System,
    /// Delegation hand-off.
    Delegate,
    /// Human checkpoint marker.
    Checkpoint,
}

/// One logical utterance on a session. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id.
    pub id: String,
    /// Owning session.
    pub session_id: String,
    /// Sender: agent id, `"system"`, or `"user"`.
    pub from_agent: String,
    /// Recipient: agent id, `"all"`, or a comma list.
    pub to_agent: String,
    /// Message kind.
    pub kind: MessageKind,
    /// Message body.
    pub content: String,
    /// Provider/model/tokens/pattern context.
    #[serde(default)]
    pub metadata: Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build a message with a fresh id and the current timestamp.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        kind: MessageKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            kind,
            content: content.into(),
            metadata: Value::Null,
            created_at: Utc::now(),
        }
    }

    /// System message addressed to everyone on the session.
    #[must_use]
    pub fn system(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(session_id, "system", "all", MessageKind::System, content)
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Record of one tool invocation inside an agent turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Tool name.
    pub name: String,
    /// Arguments the model supplied.
    pub args: Value,
    /// Truncated result preview.
    pub result_snippet: String,
}

/// A structured delegation parsed from `[DELEGATE:agent_id] task` lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    /// Target agent id.
    pub to_agent: String,
    /// Task description.
    pub task: String,
}

/// A `[PR] title — description` deliverable parsed from agent output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deliverable {
    /// Short title.
    pub title: String,
    /// Description, possibly empty.
    pub description: String,
}

/// Output of one agent invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Final text content.
    pub content: String,
    /// Producing agent.
    pub agent_id: String,
    /// Model used.
    pub model: String,
    /// Provider used.
    pub provider: String,
    /// Prompt tokens.
    pub tokens_in: u32,
    /// Completion tokens.
    pub tokens_out: u32,
    /// Wall-clock duration of the turn.
    pub duration_ms: u64,
    /// Tool calls executed, in order.
    pub tool_calls: Vec<ToolCallRecord>,
    /// Parsed delegations.
    pub delegations: Vec<Delegation>,
    /// Error message, if the turn failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Whether any write tool ran during the turn.
    #[must_use]
    pub fn used_write_tool(&self) -> bool {
        self.tool_calls.iter().any(|tc| {
            matches!(
                tc.name.as_str(),
                "code_write" | "code_edit" | "git_commit" | "docker_build"
            )
        })
    }
}

/// A file artifact recorded when an agent writes code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique artifact id.
    pub id: String,
    /// Owning session.
    pub session_id: String,
    /// Artifact type tag ("file").
    pub artifact_type: String,
    /// Workspace-relative path.
    pub path: String,
    /// Guessed language from the extension.
    pub language: String,
    /// Truncated content preview.
    pub content: String,
    /// Producing agent id.
    pub created_by: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Build a file artifact with a fresh id, truncating content to `budget`.
    #[must_use]
    pub fn file(
        session_id: impl Into<String>,
        path: impl Into<String>,
        content: &str,
        created_by: impl Into<String>,
        budget: usize,
    ) -> Self {
        let path = path.into();
        let language = language_for_path(&path).to_owned();
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            artifact_type: "file".to_owned(),
            path,
            language,
            content: crate::util::truncate(content, budget),
            created_by: created_by.into(),
            created_at: Utc::now(),
        }
    }
}

fn language_for_path(path: &str) -> &'static str {
    match path.rsplit('.').next().unwrap_or_default() {
        "rs" => "rust",
        "py" => "python",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" => "javascript",
        "kt" | "kts" => "kotlin",
        "swift" => "swift",
        "go" => "go",
        "java" => "java",
        "html" => "html",
        "css" => "css",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "md" => "markdown",
        "sh" => "shell",
        _ => "text",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_tool_detection() {
        let mut result = ExecutionResult::default();
        assert!(!result.used_write_tool());
        result.tool_calls.push(ToolCallRecord {
            name: "code_write".into(),
            args: Value::Null,
            result_snippet: "ok".into(),
        });
        assert!(result.used_write_tool());
    }

    #[test]
    fn artifact_language_guess() {
        let a = Artifact::file("s1", "src/app/login.ts", "export {}", "dev-1", 2000);
        assert_eq!(a.language, "typescript");
        assert_eq!(a.artifact_type, "file");
    }
}
