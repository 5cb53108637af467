//! Agent definitions and role classification.

use serde::{Deserialize, Serialize};

/// Capability flags granted to an agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    /// May hand subtasks to other agents.
    pub can_delegate: bool,
    /// May block a phase with a veto.
    pub can_veto: bool,
    /// May approve deliverables.
    pub can_approve: bool,
}

/// Identity and configuration of one agent.
///
/// Immutable during a pattern run; admin updates invalidate executor caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDef {
    /// Globally unique, stable identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-form role tag ("Lead Dev", "QA Engineer", ...).
    pub role: String,
    /// Seniority rank in `[0, 100]`; lower is more senior.
    pub hierarchy_rank: u8,
    /// Base system prompt.
    pub system_prompt: String,
    /// Persona flavor appended after the system prompt.
    #[serde(default)]
    pub persona: String,
    /// Human-facing description.
    #[serde(default)]
    pub description: String,
    /// Ordered skill identifiers expanded into the prompt.
    #[serde(default)]
    pub skills: Vec<String>,
    /// Capability flags.
    #[serde(default)]
    pub permissions: Permissions,
    /// LLM provider tag.
    #[serde(default)]
    pub provider: String,
    /// LLM model identifier.
    #[serde(default)]
    pub model: String,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: f32,
    /// Response token cap.
    #[serde(default)]
    pub max_tokens: u32,
    /// Avatar asset reference.
    #[serde(default)]
    pub avatar: String,
    /// One-line tagline.
    #[serde(default)]
    pub tagline: String,
}

impl AgentDef {
    /// Minimal agent for composition and tests.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: role.into(),
            hierarchy_rank: 50,
            system_prompt: String::new(),
            persona: String::new(),
            description: String::new(),
            skills: Vec::new(),
            permissions: Permissions::default(),
            provider: String::new(),
            model: String::new(),
            temperature: 0.7,
            max_tokens: 4096,
            avatar: String::new(),
            tagline: String::new(),
        }
    }

    /// Set the hierarchy rank.
    #[must_use]
    pub const fn with_rank(mut self, rank: u8) -> Self {
        self.hierarchy_rank = rank;
        self
    }

    /// Set the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Classify into a tool-mapping role bucket from role + name substrings.
    #[must_use]
    pub fn role_bucket(&self) -> RoleBucket {
        let combined = format!(
            "{} {}",
            self.role.to_lowercase(),
            self.name.to_lowercase()
        );
        let has = |keys: &[&str]| keys.iter().any(|k| combined.contains(k));

        if has(&["product", "business", "analyste", "ba ", "fonctionnel"]) {
            RoleBucket::Product
        } else if has(&["archi", "architect"]) {
            RoleBucket::Architecture
        } else if has(&["ux", "ui", "design", "ergon"]) {
            RoleBucket::Ux
        } else if has(&["qa", "test", "qualit"]) {
            RoleBucket::Qa
        } else if has(&["devops", "sre", "pipeline", "infra", "deploy"]) {
            RoleBucket::Devops
        } else if has(&["secur", "secu", "cyber"]) {
            RoleBucket::Security
        } else if has(&["programme", "projet", "cdp", "scrum", "coach", "pm "]) {
            RoleBucket::Cdp
        } else {
            // dev/lead/engineer/backend/frontend/fullstack and everything else
            RoleBucket::Dev
        }
    }

    /// Whether this agent gets workspace tools inside a phase.
    ///
    /// Execution-capable agents: junior ranks or explicitly operational roles.
    #[must_use]
    pub fn is_execution_role(&self) -> bool {
        let role = self.role.to_lowercase();
        self.hierarchy_rank >= 40
            || ["dev", "qa", "test", "devops", "sre", "security"]
                .iter()
                .any(|k| role.contains(k))
    }
}

/// Tool-allowlist bucket an agent maps into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleBucket {
    /// Product / business analysis.
    Product,
    /// Architecture.
    Architecture,
    /// UX / UI design.
    Ux,
    /// Development (default, most permissive).
    Dev,
    /// Quality assurance.
    Qa,
    /// DevOps / SRE.
    Devops,
    /// Security.
    Security,
    /// Project direction (CDP / scrum).
    Cdp,
}

impl RoleBucket {
    /// Stable string tag, used for length floors and memory categories.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Architecture => "architecture",
            Self::Ux => "ux",
            Self::Dev => "dev",
            Self::Qa => "qa",
            Self::Devops => "devops",
            Self::Security => "security",
            Self::Cdp => "cdp",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_classification() {
        assert_eq!(
            AgentDef::new("a", "Sam", "Software Architect").role_bucket(),
            RoleBucket::Architecture
        );
        assert_eq!(
            AgentDef::new("a", "Quinn", "QA Engineer").role_bucket(),
            RoleBucket::Qa
        );
        assert_eq!(
            AgentDef::new("a", "Devon", "Backend Engineer").role_bucket(),
            RoleBucket::Dev
        );
        assert_eq!(
            AgentDef::new("a", "Petra", "Product Owner").role_bucket(),
            RoleBucket::Product
        );
        // Unknown roles default to the dev bucket.
        assert_eq!(
            AgentDef::new("a", "Misc", "Generalist").role_bucket(),
            RoleBucket::Dev
        );
    }

    #[test]
    fn execution_role_gating() {
        let lead = AgentDef::new("l", "Lena", "Lead Architect").with_rank(10);
        assert!(!lead.is_execution_role());
        let dev = AgentDef::new("d", "Devon", "Fullstack Dev").with_rank(60);
        assert!(dev.is_execution_role());
        let qa = AgentDef::new("q", "Quinn", "QA").with_rank(30);
        assert!(qa.is_execution_role());
    }
}
