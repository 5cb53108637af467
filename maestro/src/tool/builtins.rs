//! Built-in tools: workspace files, git, builds, and memory.
//!
//! Execution failures come back as `Ok(error text)` — the model is
//! expected to read the error and recover with a different call.

use std::path::Path;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::fs;

use super::registry::ToolRegistry;
use super::traits::{Tool, ToolContext};
use crate::error::Result;
use crate::store::MemoryEntry;

const READ_BUDGET: usize = 8000;
const SEARCH_MATCH_CAP: usize = 50;
const LIST_CAP: usize = 200;
const SKIP_DIRS: [&str; 4] = [".git", "node_modules", "target", "__pycache__"];

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn missing(key: &str) -> String {
    format!("Error: missing required argument '{key}'")
}

// ── Filesystem ──────────────────────────────────────────────────────────

/// Recursive workspace listing, bounded.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListFiles;

#[async_trait]
impl Tool for ListFiles {
    fn name(&self) -> &'static str {
        "list_files"
    }
    fn description(&self) -> &'static str {
        "List files in the workspace (recursive, relative paths)."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Subdirectory to list (default: workspace root)" }
            }
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        let root = ctx.resolve(str_arg(&args, "path").unwrap_or(""));
        let mut entries = Vec::new();
        collect_files(&root, &root, &mut entries).await;
        entries.sort();
        let total = entries.len();
        entries.truncate(LIST_CAP);
        let mut out = entries.join("\n");
        if total > LIST_CAP {
            out.push_str(&format!("\n... ({total} files total)"));
        }
        if out.is_empty() {
            out = "(empty)".to_owned();
        }
        Ok(out)
    }
}

fn collect_files<'a>(
    root: &'a Path,
    dir: &'a Path,
    entries: &'a mut Vec<String>,
) -> std::pin::Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
        let Ok(mut read_dir) = fs::read_dir(dir).await else {
            return;
        };
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if path.is_dir() {
                if !SKIP_DIRS.contains(&name.as_str()) {
                    collect_files(root, &path, entries).await;
                }
            } else if let Ok(rel) = path.strip_prefix(root) {
                entries.push(rel.display().to_string());
            }
        }
    })
}

/// Read one file.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeRead;

#[async_trait]
impl Tool for CodeRead {
    fn name(&self) -> &'static str {
        "code_read"
    }
    fn description(&self) -> &'static str {
        "Read a file from the workspace."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        let Some(path) = str_arg(&args, "path") else {
            return Ok(missing("path"));
        };
        match fs::read_to_string(ctx.resolve(path)).await {
            Ok(content) => Ok(crate::util::truncate_ellipsis(&content, READ_BUDGET)),
            Err(e) => Ok(format!("Error reading {path}: {e}")),
        }
    }
}

/// Write a new file (or overwrite), creating parent directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeWrite;

#[async_trait]
impl Tool for CodeWrite {
    fn name(&self) -> &'static str {
        "code_write"
    }
    fn description(&self) -> &'static str {
        "Write a file in the workspace with full content."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        let Some(path) = str_arg(&args, "path") else {
            return Ok(missing("path"));
        };
        let Some(content) = str_arg(&args, "content") else {
            return Ok(missing("content"));
        };
        let target = ctx.resolve(path);
        if let Some(parent) = target.parent()
            && let Err(e) = fs::create_dir_all(parent).await
        {
            return Ok(format!("Error creating {}: {e}", parent.display()));
        }
        match fs::write(&target, content).await {
            Ok(()) => Ok(format!("Wrote {} ({} bytes)", path, content.len())),
            Err(e) => Ok(format!("Error writing {path}: {e}")),
        }
    }
}

/// Exact-match single edit.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeEdit;

#[async_trait]
impl Tool for CodeEdit {
    fn name(&self) -> &'static str {
        "code_edit"
    }
    fn description(&self) -> &'static str {
        "Edit a file by replacing an exact old_str with new_str."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "old_str": { "type": "string" },
                "new_str": { "type": "string" }
            },
            "required": ["path", "old_str", "new_str"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        let Some(path) = str_arg(&args, "path") else {
            return Ok(missing("path"));
        };
        let (Some(old_str), Some(new_str)) = (str_arg(&args, "old_str"), str_arg(&args, "new_str"))
        else {
            return Ok(missing("old_str/new_str"));
        };
        let target = ctx.resolve(path);
        let content = match fs::read_to_string(&target).await {
            Ok(c) => c,
            Err(e) => return Ok(format!("Error reading {path}: {e}")),
        };
        if !content.contains(old_str) {
            return Ok(format!("Error: old_str not found in {path}"));
        }
        let updated = content.replacen(old_str, new_str, 1);
        match fs::write(&target, &updated).await {
            Ok(()) => Ok(format!("Edited {path}")),
            Err(e) => Ok(format!("Error writing {path}: {e}")),
        }
    }
}

/// Substring search across workspace files.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeSearch;

#[async_trait]
impl Tool for CodeSearch {
    fn name(&self) -> &'static str {
        "code_search"
    }
    fn description(&self) -> &'static str {
        "Search workspace files for a substring; returns file:line matches."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "path": { "type": "string", "description": "Subdirectory to search" }
            },
            "required": ["query"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        let Some(query) = str_arg(&args, "query") else {
            return Ok(missing("query"));
        };
        let root = ctx.resolve(str_arg(&args, "path").unwrap_or(""));
        let mut files = Vec::new();
        collect_files(&root, &root, &mut files).await;

        let mut matches = Vec::new();
        'outer: for rel in files {
            let Ok(content) = fs::read_to_string(root.join(&rel)).await else {
                continue;
            };
            for (i, line) in content.lines().enumerate() {
                if line.contains(query) {
                    matches.push(format!("{rel}:{}: {}", i + 1, crate::util::truncate(line.trim(), 160)));
                    if matches.len() >= SEARCH_MATCH_CAP {
                        break 'outer;
                    }
                }
            }
        }
        if matches.is_empty() {
            Ok(format!("No matches for '{query}'"))
        } else {
            Ok(matches.join("\n"))
        }
    }
}

// ── Commands ────────────────────────────────────────────────────────────

/// Run a build/shell command in the sandbox.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildTool;

#[async_trait]
impl Tool for BuildTool {
    fn name(&self) -> &'static str {
        "build"
    }
    fn description(&self) -> &'static str {
        "Run a build or shell command in the workspace sandbox."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "command": { "type": "string" } },
            "required": ["command"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        let Some(command) = str_arg(&args, "command") else {
            return Ok(missing("command"));
        };
        run_in_sandbox(ctx, command).await
    }
}

/// Run the project test suite in the sandbox.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestTool;

#[async_trait]
impl Tool for TestTool {
    fn name(&self) -> &'static str {
        "test"
    }
    fn description(&self) -> &'static str {
        "Run a test command in the workspace sandbox."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "command": { "type": "string" } },
            "required": ["command"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        let Some(command) = str_arg(&args, "command") else {
            return Ok(missing("command"));
        };
        run_in_sandbox(ctx, command).await
    }
}

async fn run_in_sandbox(ctx: &ToolContext, command: &str) -> Result<String> {
    let cwd = ctx.cwd();
    let out = ctx
        .sandbox
        .run(
            command,
            &cwd,
            &std::collections::HashMap::new(),
            ctx.sandbox.default_timeout(),
            Some(&ctx.agent_id),
        )
        .await;
    Ok(format!(
        "rc={}\n{}{}",
        out.rc,
        out.stdout,
        if out.stderr.is_empty() {
            String::new()
        } else {
            format!("\n[stderr]\n{}", out.stderr)
        }
    ))
}

macro_rules! git_tool {
    ($ty:ident, $name:literal, $desc:literal, $cmd:expr) => {
        /// Git helper tool.
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $ty;

        #[async_trait]
        impl Tool for $ty {
            fn name(&self) -> &'static str {
                $name
            }
            fn description(&self) -> &'static str {
                $desc
            }
            fn parameters(&self) -> Value {
                json!({ "type": "object", "properties": {} })
            }
            async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<String> {
                run_in_sandbox(ctx, $cmd).await
            }
        }
    };
}

git_tool!(GitStatus, "git_status", "Show git working tree status.", "git status --short");
git_tool!(GitLog, "git_log", "Show recent git history.", "git log --oneline -15");
git_tool!(GitDiff, "git_diff", "Show uncommitted changes.", "git diff --stat && git diff | head -200");

/// Stage everything and commit with a message.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitCommit;

#[async_trait]
impl Tool for GitCommit {
    fn name(&self) -> &'static str {
        "git_commit"
    }
    fn description(&self) -> &'static str {
        "Stage all changes and commit with the given message."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "message": { "type": "string" } },
            "required": ["message"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        let Some(message) = str_arg(&args, "message") else {
            return Ok(missing("message"));
        };
        let sanitized = message.replace('\'', "'\\''");
        run_in_sandbox(ctx, &format!("git add -A && git commit -m '{sanitized}'")).await
    }
}

// ── Memory ──────────────────────────────────────────────────────────────

fn render_entries(entries: &[MemoryEntry]) -> String {
    if entries.is_empty() {
        return "No memory entries found.".to_owned();
    }
    entries
        .iter()
        .map(|e| format!("[{}] {}: {}", e.category, e.key, crate::util::truncate(&e.value, 300)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Search project memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemorySearch;

#[async_trait]
impl Tool for MemorySearch {
    fn name(&self) -> &'static str {
        "memory_search"
    }
    fn description(&self) -> &'static str {
        "Search project memory for past decisions and context."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        let Some(query) = str_arg(&args, "query") else {
            return Ok(missing("query"));
        };
        let Some(memory) = &ctx.memory else {
            return Ok("Memory is not available in this context.".to_owned());
        };
        let entries = memory.project_search(&ctx.project_id, query, 8).await?;
        Ok(render_entries(&entries))
    }
}

/// Store a project memory entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStoreTool;

#[async_trait]
impl Tool for MemoryStoreTool {
    fn name(&self) -> &'static str {
        "memory_store"
    }
    fn description(&self) -> &'static str {
        "Store a key decision or fact in project memory."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": { "type": "string" },
                "value": { "type": "string" },
                "category": { "type": "string" }
            },
            "required": ["key", "value"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        let (Some(key), Some(value)) = (str_arg(&args, "key"), str_arg(&args, "value")) else {
            return Ok(missing("key/value"));
        };
        let Some(memory) = &ctx.memory else {
            return Ok("Memory is not available in this context.".to_owned());
        };
        let entry = MemoryEntry {
            project_id: ctx.project_id.clone(),
            key: key.to_owned(),
            value: value.to_owned(),
            category: str_arg(&args, "category").unwrap_or("general").to_owned(),
            source: format!("agent:{}", ctx.agent_id),
            created_at: chrono::Utc::now(),
        };
        memory.project_store(&entry).await?;
        Ok(format!("Stored '{key}'"))
    }
}

/// Deep search across project and global memory.
///
/// The executor disables further tool calls after this one to force the
/// model into synthesis.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeepSearch;

#[async_trait]
impl Tool for DeepSearch {
    fn name(&self) -> &'static str {
        "deep_search"
    }
    fn description(&self) -> &'static str {
        "Broad search across project and global memory; use once, then synthesize."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        let Some(query) = str_arg(&args, "query") else {
            return Ok(missing("query"));
        };
        let Some(memory) = &ctx.memory else {
            return Ok("Memory is not available in this context.".to_owned());
        };
        let mut entries = memory.project_search(&ctx.project_id, query, 10).await?;
        entries.extend(memory.global_search(query, 5).await?);
        Ok(render_entries(&entries))
    }
}

/// Register every built-in tool.
pub fn register_builtins(registry: &mut ToolRegistry) {
    registry.register(ListFiles);
    registry.register(CodeRead);
    registry.register(CodeWrite);
    registry.register(CodeEdit);
    registry.register(CodeSearch);
    registry.register(BuildTool);
    registry.register(TestTool);
    registry.register(GitStatus);
    registry.register(GitLog);
    registry.register(GitDiff);
    registry.register(GitCommit);
    registry.register(MemorySearch);
    registry.register(MemoryStoreTool);
    registry.register(DeepSearch);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ctx(workspace: &Path) -> ToolContext {
        ToolContext {
            session_id: "s1".into(),
            agent_id: "dev-1".into(),
            project_id: "p1".into(),
            workspace: Some(workspace.to_path_buf()),
            sandbox: Arc::new(crate::sandbox::Sandbox::default()),
            memory: None,
        }
    }

    #[tokio::test]
    async fn write_read_edit_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());

        let out = CodeWrite
            .execute(json!({"path": "src/app.rs", "content": "fn main() {}"}), &ctx)
            .await
            .unwrap();
        assert!(out.starts_with("Wrote"));

        let read = CodeRead
            .execute(json!({"path": "src/app.rs"}), &ctx)
            .await
            .unwrap();
        assert_eq!(read, "fn main() {}");

        let edited = CodeEdit
            .execute(
                json!({"path": "src/app.rs", "old_str": "main", "new_str": "start"}),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(edited, "Edited src/app.rs");

        let read = CodeRead
            .execute(json!({"path": "src/app.rs"}), &ctx)
            .await
            .unwrap();
        assert!(read.contains("fn start"));
    }

    #[tokio::test]
    async fn edit_reports_missing_anchor() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        CodeWrite
            .execute(json!({"path": "a.txt", "content": "hello"}), &ctx)
            .await
            .unwrap();
        let out = CodeEdit
            .execute(json!({"path": "a.txt", "old_str": "absent", "new_str": "x"}), &ctx)
            .await
            .unwrap();
        assert!(out.starts_with("Error: old_str not found"));
    }

    #[tokio::test]
    async fn list_and_search_skip_git_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        CodeWrite
            .execute(json!({"path": "src/lib.rs", "content": "pub fn alpha() {}"}), &ctx)
            .await
            .unwrap();
        CodeWrite
            .execute(json!({"path": ".git/config", "content": "alpha"}), &ctx)
            .await
            .unwrap();

        let listing = ListFiles.execute(json!({}), &ctx).await.unwrap();
        assert!(listing.contains("src/lib.rs"));
        assert!(!listing.contains(".git"));

        let found = CodeSearch
            .execute(json!({"query": "alpha"}), &ctx)
            .await
            .unwrap();
        assert!(found.contains("src/lib.rs:1"));
        assert!(!found.contains(".git"));
    }
}
