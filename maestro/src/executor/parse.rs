//! Output sanitation and marker parsing.
//!
//! Providers leak raw artifacts into text: MiniMax-style section tokens,
//! `<think>` reasoning blocks, and XML `<invoke>` tool-call markup. All
//! of it is stripped before content reaches session history. Structured
//! markers (`[DELEGATE:..]`, `[PR]`, `[SUBTASK N]:`, `[ROUTE: ..]`) are
//! parsed into typed records.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::llm::LlmToolCall;
use crate::message::{Delegation, Deliverable};

static RAW_TOKENS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"<\|(?:tool_calls_section_begin|tool_calls_section_end|tool_call_begin|tool_call_end|tool_call_argument_begin|tool_call_argument_end|tool_sep|im_end|im_start)\|>",
    )
    .expect("raw token pattern")
});

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("think pattern"));

static INVOKE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<invoke\b.*?</invoke>").expect("invoke pattern"));

static INVOKE_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<invoke\s+name="([^"]+)"\s*>(.*?)</invoke>"#).expect("invoke call pattern")
});

static INVOKE_PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<parameter\s+name="([^"]+)"\s*>(.*?)</parameter>"#)
        .expect("invoke param pattern")
});

static DELEGATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*\[DELEGATE:([A-Za-z0-9_.-]+)\]\s*(.+)$").expect("delegate pattern")
});

static PR_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*-?\s*\[PR\]\s*([^—\n-]+?)(?:\s*[—-]\s*(.+))?$").expect("pr pattern")
});

static SUBTASK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*\[SUBTASK\s*(\d+)\]\s*:\s*(.+)$").expect("subtask pattern")
});

static ROUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[ROUTE:\s*([A-Za-z0-9_.-]+)\s*\]").expect("route pattern"));

/// Strip raw provider tokens, `<think>` blocks, and `<invoke>` markup.
#[must_use]
pub fn strip_artifacts(content: &str) -> String {
    let content = RAW_TOKENS.replace_all(content, "");
    let content = THINK_BLOCK.replace_all(&content, "");
    let content = INVOKE_BLOCK.replace_all(&content, "");
    content.trim().to_owned()
}

/// Lift XML `<invoke name="..">` blocks into structured tool calls.
///
/// Some providers emit tool calls as text instead of the structured
/// channel; the executor parses them so the loop keeps working.
#[must_use]
pub fn lift_xml_tool_calls(content: &str) -> Vec<LlmToolCall> {
    INVOKE_CALL
        .captures_iter(content)
        .enumerate()
        .map(|(i, cap)| {
            let mut args = serde_json::Map::new();
            for param in INVOKE_PARAM.captures_iter(&cap[2]) {
                args.insert(param[1].to_owned(), Value::String(param[2].trim().to_owned()));
            }
            LlmToolCall {
                id: format!("xml_{i}"),
                function_name: cap[1].to_owned(),
                arguments: Value::Object(args),
            }
        })
        .collect()
}

/// Parse `[DELEGATE:agent_id] task` lines.
#[must_use]
pub fn parse_delegations(content: &str) -> Vec<Delegation> {
    DELEGATE
        .captures_iter(content)
        .map(|cap| Delegation {
            to_agent: cap[1].to_owned(),
            task: cap[2].trim().to_owned(),
        })
        .collect()
}

/// Parse `[PR] title — description` deliverable lines.
#[must_use]
pub fn parse_deliverables(content: &str) -> Vec<Deliverable> {
    PR_LINE
        .captures_iter(content)
        .map(|cap| Deliverable {
            title: cap[1].trim().to_owned(),
            description: cap.get(2).map(|m| m.as_str().trim().to_owned()).unwrap_or_default(),
        })
        .collect()
}

/// Parse `[SUBTASK N]: description` lines, ordered by N.
#[must_use]
pub fn parse_subtasks(content: &str) -> Vec<(usize, String)> {
    let mut subtasks: Vec<(usize, String)> = SUBTASK
        .captures_iter(content)
        .filter_map(|cap| {
            let n = cap[1].parse().ok()?;
            Some((n, cap[2].trim().to_owned()))
        })
        .collect();
    subtasks.sort_by_key(|(n, _)| *n);
    subtasks
}

/// Parse the first `[ROUTE: node_id]` marker.
#[must_use]
pub fn parse_route(content: &str) -> Option<String> {
    ROUTE.captures(content).map(|cap| cap[1].to_owned())
}

/// Format a delegation back to its line form (round-trip with
/// [`parse_delegations`]).
#[must_use]
pub fn format_delegation(delegation: &Delegation) -> String {
    format!("[DELEGATE:{}] {}", delegation.to_agent, delegation.task)
}

/// Format a subtask back to its line form (round-trip with
/// [`parse_subtasks`]).
#[must_use]
pub fn format_subtask(n: usize, description: &str) -> String {
    format!("[SUBTASK {n}]: {description}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_raw_tokens_and_think() {
        let raw = "<|im_start|><think>internal musing</think>The answer is 4.<|im_end|>";
        assert_eq!(strip_artifacts(raw), "The answer is 4.");
    }

    #[test]
    fn strips_invoke_blocks_from_text() {
        let raw = "Calling now.\n<invoke name=\"code_read\"><parameter name=\"path\">a.rs</parameter></invoke>\nDone.";
        let clean = strip_artifacts(raw);
        assert!(!clean.contains("invoke"));
        assert!(clean.contains("Calling now."));
        assert!(clean.contains("Done."));
    }

    #[test]
    fn lifts_xml_tool_calls() {
        let raw = "<invoke name=\"code_write\"><parameter name=\"path\">src/a.rs</parameter><parameter name=\"content\">fn a() {}</parameter></invoke>";
        let calls = lift_xml_tool_calls(raw);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function_name, "code_write");
        assert_eq!(calls[0].arguments["path"], "src/a.rs");
        assert_eq!(calls[0].arguments["content"], "fn a() {}");
    }

    #[test]
    fn delegation_roundtrip() {
        let original = Delegation {
            to_agent: "qa-1".into(),
            task: "validate the login flow".into(),
        };
        let line = format_delegation(&original);
        let parsed = parse_delegations(&line);
        assert_eq!(parsed, vec![original]);
    }

    #[test]
    fn subtask_roundtrip_and_ordering() {
        let text = format!(
            "{}\nsome prose\n{}",
            format_subtask(2, "write tests"),
            format_subtask(1, "implement login"),
        );
        let parsed = parse_subtasks(&text);
        assert_eq!(parsed, vec![
            (1, "implement login".to_owned()),
            (2, "write tests".to_owned()),
        ]);
    }

    #[test]
    fn parses_pr_lines() {
        let text = "Work done.\n- [PR] Update deps — bump tokio to 1.44\n[PR] Fix login";
        let prs = parse_deliverables(text);
        assert_eq!(prs.len(), 2);
        assert_eq!(prs[0].title, "Update deps");
        assert_eq!(prs[0].description, "bump tokio to 1.44");
        assert_eq!(prs[1].title, "Fix login");
        assert!(prs[1].description.is_empty());
    }

    #[test]
    fn parses_route_marker() {
        assert_eq!(parse_route("[ROUTE: backend-dev] go"), Some("backend-dev".into()));
        assert_eq!(parse_route("no route here"), None);
    }
}
