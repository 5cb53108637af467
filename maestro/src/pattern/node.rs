//! Per-node execution: task composition, streaming, decision detection,
//! validation, persistence, and memory capture.

use futures::StreamExt as _;
use serde_json::json;
use tracing::{debug, warn};

use crate::bus::EventPayload;
use crate::executor::{ExecutionContext, ExecutorEvent};
use crate::guard::adversarial;
use crate::message::{ExecutionResult, Message, MessageKind};
use crate::model::{AgentDef, NodeStatus, RoleBucket};
use crate::store::MemoryEntry;

use super::{PatternEngine, RunMeta};

/// Explicit decision detected in agent output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// `[APPROVE]` / GO declaration.
    Approve,
    /// `[VETO]` / NOGO declaration.
    Veto,
}

/// Detect an explicit decision. Bracketed tags and STATUT/DECISION
/// declarations only; casual mentions do not count. Veto wins ties.
#[must_use]
pub fn detect_decision(content: &str) -> Option<Decision> {
    let upper = content.to_uppercase();
    let line_is = |word: &str| upper.lines().any(|l| l.trim() == word);

    let veto = upper.contains("[VETO]")
        || upper.contains("[NOGO]")
        || upper.contains("STATUT: NOGO")
        || upper.contains("STATUT : NOGO")
        || upper.contains("DÉCISION: NOGO")
        || upper.contains("DÉCISION : NOGO")
        || upper.contains("DECISION: NOGO")
        || upper.contains("DECISION : NOGO")
        || line_is("NOGO");
    if veto {
        return Some(Decision::Veto);
    }

    let approve = upper.contains("[APPROVE]")
        || upper.contains("STATUT: GO")
        || upper.contains("STATUT : GO")
        || upper.contains("DÉCISION: GO")
        || upper.contains("DÉCISION : GO")
        || upper.contains("DECISION: GO")
        || upper.contains("DECISION : GO");
    approve.then_some(Decision::Approve)
}

const PR_PROTOCOL: &str = "\
[IMPORTANT — Team Protocol]
You are part of a team working together. Address your colleague directly.
When you produce deliverables or action items, list them as:
- [PR] Short title — description
Each [PR] will be tracked in the project dashboard.";

const EXEC_PROTOCOL: &str = "\
[EXECUTION MODE — MANDATORY: You MUST produce REAL code changes]
You are a DEVELOPER, not a consultant. If your response contains no
code_write or code_edit calls, you have failed your task.
1. EXPLORE: list_files and code_read to understand the codebase
2. PLAN: identify exactly what files need to change
3. EXECUTE: code_edit or code_write — this is the main step
4. VERIFY: code_read to confirm your changes
5. REPORT: list each change as [PR] with the actual file path
Use relative paths; they resolve against the workspace.";

const QA_PROTOCOL: &str = "\
[VALIDATION MODE — Verify changes are correct]
1. READ the changed files (code_read)
2. SEARCH for regressions (code_search)
3. CHECK consistency of imports, types, configs
4. VERDICT — you MUST end with exactly one of:
   [APPROVE] if all changes are correct and complete
   [VETO] if ANY issue found — list specific problems
Be concrete: cite file names, line numbers, specific problems.";

const REVIEW_PROTOCOL: &str = "\
[REVIEW MODE — Quality gate]
1. READ the actual code changes; do not trust descriptions blindly
2. CHECK completeness: are all subtasks addressed?
3. VERDICT — you MUST end with exactly one of:
   [APPROVE] if all work is complete and verified
   [VETO] if ANY deliverable is missing or broken
4. SYNTHESIZE a consolidated status with file references.";

const RESEARCH_PROTOCOL: &str = "\
[DISCUSSION MODE]
You are an expert in a collaborative team discussion. Respond directly
with your analysis — do NOT use tools or write code. React to what
others have said, be concise (150-300 words), give concrete
recommendations, and challenge ideas constructively when you disagree.";

/// Outcome of one node execution, applied to the run by the caller.
#[derive(Debug)]
pub(crate) struct NodeOutcome {
    pub status: NodeStatus,
    pub output: String,
    pub result: ExecutionResult,
}

impl PatternEngine {
    /// Execute one agent node.
    ///
    /// `context_from` carries `(colleague name, compressed context)`;
    /// `to_agent` is who the produced message addresses.
    pub(crate) async fn run_node(
        &self,
        meta: &RunMeta,
        agent: &AgentDef,
        task: &str,
        context_from: Option<(&str, &str)>,
        to_agent: &str,
        roster: &str,
        flow_step: &str,
    ) -> NodeOutcome {
        self.bus.push(
            &meta.session_id,
            self.event(meta, EventPayload::AgentStatus {
                agent_id: agent.id.clone(),
                status: "thinking".to_owned(),
            }),
        );

        let ctx = self.node_context(meta, agent).await;
        let full_task = compose_task(meta, agent, task, context_from, roster);

        self.bus.push(
            &meta.session_id,
            self.event(meta, EventPayload::StreamStart {
                agent_id: agent.id.clone(),
            }),
        );

        // Consume the streaming iterator; the executor falls back to the
        // blocking path internally when stream setup fails.
        let mut stream = self.executor.run_streaming(ctx, full_task);
        let mut result: Option<ExecutionResult> = None;
        while let Some(event) = stream.next().await {
            match event {
                ExecutorEvent::Delta(delta) => {
                    self.bus.push(
                        &meta.session_id,
                        self.event(meta, EventPayload::StreamDelta {
                            agent_id: agent.id.clone(),
                            delta,
                        }),
                    );
                }
                ExecutorEvent::Thinking => {
                    self.bus.push(
                        &meta.session_id,
                        self.event(meta, EventPayload::StreamThinking {
                            agent_id: agent.id.clone(),
                        }),
                    );
                }
                ExecutorEvent::Result(r) => result = Some(*r),
            }
        }
        let result = result.unwrap_or_else(|| ExecutionResult {
            agent_id: agent.id.clone(),
            error: Some("executor stream ended without result".to_owned()),
            content: "Error: executor stream ended without result".to_owned(),
            ..ExecutionResult::default()
        });

        let content = result.content.clone();
        let bucket = agent.role_bucket();

        // Validation: L0 always; L1 on execution patterns when enabled.
        let mut rejected: Option<String> = None;
        if result.error.is_none() {
            let l0 = adversarial::check_l0(&content, bucket, &result.tool_calls);
            if l0.passed {
                if self.config.adversarial_l1_enabled && meta.pattern_type.is_execution() {
                    match adversarial::check_l1(&self.llm, &content, task, &agent.name, &result.tool_calls)
                        .await
                    {
                        Ok(verdict) if !verdict.passed => rejected = Some(verdict.summary()),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "L1 check failed, accepting output"),
                    }
                }
            } else {
                rejected = Some(l0.summary());
            }
        }

        let decision = detect_decision(&content);
        let status = if result.error.is_some() || rejected.is_some() {
            NodeStatus::Failed
        } else if decision == Some(Decision::Veto) {
            NodeStatus::Vetoed
        } else {
            NodeStatus::Completed
        };

        // The message is persisted even when validation rejected it, so
        // the transcript stays complete.
        let kind = match decision {
            Some(Decision::Veto) => MessageKind::Veto,
            Some(Decision::Approve) => MessageKind::Approve,
            None => MessageKind::Text,
        };
        let metadata = json!({
            "provider": result.provider,
            "model": result.model,
            "tokens_in": result.tokens_in,
            "tokens_out": result.tokens_out,
            "duration_ms": result.duration_ms,
            "tool_calls": result.tool_calls.iter().map(|tc| tc.name.clone()).collect::<Vec<_>>(),
            "pattern_type": meta.pattern_type,
            "flow_step": flow_step,
            "rejected": rejected,
        });
        let message = Message::new(&meta.session_id, &agent.id, to_agent, kind, content.clone())
            .with_metadata(metadata);
        if let Err(e) = self.sessions.add_message(&message).await {
            warn!(error = %e, "message persistence failed");
        }

        self.bus.push(
            &meta.session_id,
            self.event(meta, EventPayload::StreamEnd {
                agent_id: agent.id.clone(),
            }),
        );
        self.bus.push(
            &meta.session_id,
            self.event(meta, EventPayload::Message {
                from_agent: agent.id.clone(),
                kind: match kind {
                    MessageKind::Approve => "approve",
                    MessageKind::Veto => "veto",
                    _ => "text",
                }
                .to_owned(),
                content: content.clone(),
            }),
        );
        self.bus.push(
            &meta.session_id,
            self.event(meta, EventPayload::AgentStatus {
                agent_id: agent.id.clone(),
                status: "idle".to_owned(),
            }),
        );

        // Project memory capture of key insights.
        if !meta.project_id.is_empty()
            && result.error.is_none()
            && rejected.is_none()
            && let Some(memory) = &self.memory
        {
            let key = format!(
                "{}: {}",
                agent.name,
                if flow_step.is_empty() { "contribution" } else { flow_step }
            );
            let category = memory_category(bucket).to_owned();
            let entry = MemoryEntry {
                project_id: meta.project_id.clone(),
                key: key.clone(),
                value: summarize_for_memory(&content),
                category: category.clone(),
                source: format!("agent:{}", agent.id),
                created_at: chrono::Utc::now(),
            };
            match memory.project_store(&entry).await {
                Ok(()) => self.bus.push(
                    &meta.session_id,
                    self.event(meta, EventPayload::MemoryStored { key, category }),
                ),
                Err(e) => warn!(error = %e, "memory store failed"),
            }
        }

        debug!(agent = %agent.id, ?status, flow_step, "node finished");
        NodeOutcome {
            status,
            output: content,
            result,
        }
    }

    /// Build the execution context for a node's agent.
    async fn node_context(&self, meta: &RunMeta, agent: &AgentDef) -> ExecutionContext {
        let history = self
            .sessions
            .messages(&meta.session_id, self.config.history_window)
            .await
            .unwrap_or_default();

        let project_memory = if meta.project_id.is_empty() {
            String::new()
        } else if let Some(memory) = &self.memory {
            match memory.project_get(&meta.project_id, None, 10).await {
                Ok(entries) => entries
                    .iter()
                    .map(|e| format!("- [{}] {}: {}", e.category, e.key, crate::util::truncate(&e.value, 200)))
                    .collect::<Vec<_>>()
                    .join("\n"),
                Err(_) => String::new(),
            }
        } else {
            String::new()
        };

        // Workspace tools only for execution-capable roles inside a real
        // workspace.
        let tools_enabled = meta.project_path.is_some() && agent.is_execution_role();

        let mut ctx = ExecutionContext::new(agent.clone(), &meta.session_id)
            .with_project(&meta.project_id, meta.project_path.clone())
            .with_tools(tools_enabled)
            .with_history(history);
        ctx.project_memory = project_memory;
        ctx.vision = meta.vision.clone();
        ctx.project_context = meta.project_context.clone();
        ctx
    }
}

/// Compose the final task string: roster, colleague context, task, protocol.
fn compose_task(
    meta: &RunMeta,
    agent: &AgentDef,
    task: &str,
    context_from: Option<(&str, &str)>,
    roster: &str,
) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !roster.is_empty() {
        parts.push(roster.to_owned());
    }
    if let Some((from, context)) = context_from
        && !context.is_empty()
    {
        parts.push(format!("[Message from colleague {from}]\n{context}"));
    }
    parts.push(format!("[Your task]\n{task}"));
    parts.push(protocol_for(meta, agent).to_owned());
    parts.join("\n\n")
}

/// Pick the role protocol suffix.
fn protocol_for(meta: &RunMeta, agent: &AgentDef) -> String {
    if meta.project_id.is_empty() {
        return RESEARCH_PROTOCOL.to_owned();
    }
    let bucket = agent.role_bucket();
    let is_lead = agent.hierarchy_rank <= 20 || agent.role.to_lowercase().contains("lead");
    let main = if bucket == RoleBucket::Qa {
        QA_PROTOCOL
    } else if is_lead {
        REVIEW_PROTOCOL
    } else if agent.is_execution_role() && meta.project_path.is_some() {
        EXEC_PROTOCOL
    } else {
        ""
    };
    if main.is_empty() {
        PR_PROTOCOL.to_owned()
    } else {
        format!("{main}\n\n{PR_PROTOCOL}")
    }
}

/// Category a node's insight is filed under.
const fn memory_category(bucket: RoleBucket) -> &'static str {
    match bucket {
        RoleBucket::Architecture => "architecture",
        RoleBucket::Qa => "quality",
        RoleBucket::Dev => "development",
        RoleBucket::Security => "security",
        RoleBucket::Devops => "infrastructure",
        RoleBucket::Product => "product",
        RoleBucket::Ux | RoleBucket::Cdp => "decisions",
    }
}

/// Compress content to at most five decision bullets, or the first 300
/// chars when no bullets exist.
#[must_use]
pub fn summarize_for_memory(content: &str) -> String {
    let bullets: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("- ") || l.starts_with("* ") || l.starts_with("[PR]"))
        .take(5)
        .collect();
    if bullets.is_empty() {
        crate::util::truncate(content, 300)
    } else {
        bullets.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_tags_detected_case_insensitive() {
        assert_eq!(detect_decision("fine. [approve]"), Some(Decision::Approve));
        assert_eq!(detect_decision("[VETO] missing tests"), Some(Decision::Veto));
        assert_eq!(detect_decision("STATUT: GO"), Some(Decision::Approve));
        assert_eq!(detect_decision("Décision: NOGO"), Some(Decision::Veto));
        assert_eq!(detect_decision("ship it\nNOGO\nsorry"), Some(Decision::Veto));
        assert_eq!(detect_decision("NOGO"), Some(Decision::Veto));
    }

    #[test]
    fn casual_mentions_are_not_decisions() {
        assert_eq!(detect_decision("we should discuss the veto process"), None);
        assert_eq!(detect_decision("the go binary is in /usr/bin"), None);
        assert_eq!(detect_decision("NOGO territory is near"), None);
    }

    #[test]
    fn veto_wins_ties() {
        assert_eq!(
            detect_decision("[APPROVE] but actually [VETO] on second thought"),
            Some(Decision::Veto)
        );
    }

    #[test]
    fn memory_summary_prefers_bullets() {
        let content = "Long analysis.\n- decision one\n- decision two\nmore prose";
        assert_eq!(summarize_for_memory(content), "- decision one\n- decision two");

        let prose = "p".repeat(500);
        assert_eq!(summarize_for_memory(&prose).len(), 300);
    }
}
