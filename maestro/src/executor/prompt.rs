//! System prompt assembly.
//!
//! One multi-section string, truncated per section so a verbose project
//! cannot crowd out the agent's own instructions.

use crate::util::truncate_ellipsis;

use super::context::ExecutionContext;

const SKILL_BUDGET: usize = 1500;
const MAX_SKILLS: usize = 5;
const VISION_BUDGET: usize = 3000;
const CONTEXT_BUDGET: usize = 2000;
const MEMORY_BUDGET: usize = 4000;

const TOOL_DIRECTIVE: &str = "\
You have tools available. Use them to inspect and change the workspace \
instead of describing what you would do. Tool results are real; claims \
without tool evidence will be rejected.";

const MEMORY_PROTOCOL: &str = "\
[Memory protocol — mandatory]
Before starting, search project memory (memory_search) for prior \
decisions relevant to your task. After finishing, store your key \
decision or finding (memory_store) so the team can build on it.";

/// Assemble the full system prompt for one agent turn.
#[must_use]
pub fn build_system_prompt(ctx: &ExecutionContext) -> String {
    let agent = &ctx.agent;
    let mut sections: Vec<String> = Vec::new();

    if !agent.system_prompt.is_empty() {
        sections.push(agent.system_prompt.clone());
    }
    if !agent.persona.is_empty() {
        sections.push(agent.persona.clone());
    }
    sections.push(format!("You are {}, role: {}.", agent.name, agent.role));

    if ctx.tools_enabled {
        sections.push(TOOL_DIRECTIVE.to_owned());
    }
    sections.push(MEMORY_PROTOCOL.to_owned());

    for skill in ctx.skills.iter().take(MAX_SKILLS) {
        sections.push(truncate_ellipsis(skill, SKILL_BUDGET));
    }

    if !ctx.vision.is_empty() {
        sections.push(format!(
            "[Product vision]\n{}",
            truncate_ellipsis(&ctx.vision, VISION_BUDGET)
        ));
    }
    if !ctx.project_context.is_empty() {
        sections.push(format!(
            "[Project context]\n{}",
            truncate_ellipsis(&ctx.project_context, CONTEXT_BUDGET)
        ));
    }
    if !ctx.project_memory.is_empty() {
        sections.push(format!(
            "[Project memory]\n{}",
            truncate_ellipsis(&ctx.project_memory, MEMORY_BUDGET)
        ));
    }
    if let Some(path) = &ctx.project_path {
        sections.push(format!("[Workspace] {}", path.display()));
    }

    let mut notes = Vec::new();
    if agent.permissions.can_delegate {
        notes.push("you may delegate with [DELEGATE:agent_id] task");
    }
    if agent.permissions.can_veto {
        notes.push("you may veto with [VETO]");
    }
    if agent.permissions.can_approve {
        notes.push("you may approve with [APPROVE]");
    }
    if !notes.is_empty() {
        sections.push(format!("[Permissions] {}", notes.join("; ")));
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AgentDef;

    #[test]
    fn prompt_orders_sections() {
        let agent = AgentDef::new("dev-1", "Devon", "Backend Dev")
            .with_system_prompt("Write production-grade code.");
        let mut ctx = ExecutionContext::new(agent, "s1").with_tools(true);
        ctx.vision = "Ship the best todo app.".into();
        ctx.skills = vec!["Rust expertise".into()];

        let prompt = build_system_prompt(&ctx);
        let sys = prompt.find("production-grade").unwrap();
        let identity = prompt.find("You are Devon").unwrap();
        let tools = prompt.find("tools available").unwrap();
        let memory = prompt.find("Memory protocol").unwrap();
        let vision = prompt.find("Product vision").unwrap();
        assert!(sys < identity && identity < tools && tools < memory && memory < vision);
    }

    #[test]
    fn oversized_sections_are_truncated() {
        let agent = AgentDef::new("a", "A", "Dev");
        let mut ctx = ExecutionContext::new(agent, "s1");
        ctx.project_memory = "m".repeat(10_000);
        let prompt = build_system_prompt(&ctx);
        let memory_section = prompt.split("[Project memory]\n").nth(1).unwrap();
        assert!(memory_section.len() <= 4003 + 1);
    }

    #[test]
    fn permission_notes_follow_flags() {
        let mut agent = AgentDef::new("qa", "Quinn", "QA");
        agent.permissions.can_veto = true;
        let ctx = ExecutionContext::new(agent, "s1");
        let prompt = build_system_prompt(&ctx);
        assert!(prompt.contains("[VETO]"));
        assert!(!prompt.contains("[DELEGATE"));
    }
}
