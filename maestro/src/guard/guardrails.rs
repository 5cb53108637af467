//! Guardrails — critical tool-call interception and audit.
//!
//! Tool calls are checked against a rule table keyed by tool name before
//! execution. Matches are audited; CRITICAL matches always block, HIGH
//! matches block and count against a per-session budget (once exceeded,
//! every further HIGH call blocks unconditionally), MEDIUM matches are
//! audit-only.
//!
//! Configuration comes from a [`SettingsSource`] and is cached for 60 s.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::Result;

/// Severity of a matched guardrail rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Audit only.
    Medium,
    /// Block when destructive blocking is enabled; budget-tracked.
    High,
    /// Always block.
    Critical,
}

impl Severity {
    /// Stable tag for audit rows.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

/// One interception rule.
#[derive(Debug, Clone)]
pub struct GuardrailRule {
    /// Tool the rule applies to.
    pub tool: &'static str,
    /// Argument key inspected.
    pub argument_key: &'static str,
    /// Pattern matched against the argument value.
    pub pattern: Regex,
    /// Pattern that exempts the match (e.g. `WHERE` on a `DELETE FROM`).
    pub unless: Option<Regex>,
    /// Severity of a match.
    pub severity: Severity,
    /// Stable label for audit rows.
    pub label: &'static str,
}

fn ci(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|e| panic!("invalid guardrail pattern {pattern}: {e}"))
}

static RULES: LazyLock<Vec<GuardrailRule>> = LazyLock::new(|| {
    let rule = |tool, argument_key, pattern: &str, severity, label| GuardrailRule {
        tool,
        argument_key,
        pattern: ci(pattern),
        unless: None,
        severity,
        label,
    };
    vec![
        rule(
            "git_commit",
            "message",
            r"--amend|--force|rebase|--hard",
            Severity::High,
            "destructive_git",
        ),
        rule(
            "build",
            "command",
            r"rm\s+-rf|mkfs|dd\s+if=|wipefs",
            Severity::Critical,
            "destructive_fs",
        ),
        rule(
            "build",
            "command",
            r"git\s+(reset\s+--hard|push\s+--force|push\s+-f\b|rebase|clean\s+-fd)",
            Severity::High,
            "destructive_git",
        ),
        rule(
            "build",
            "command",
            r"docker\s+(rm|rmi|system\s+prune|volume\s+rm)",
            Severity::High,
            "destructive_infra",
        ),
        rule(
            "build",
            "command",
            r"DROP\s+TABLE|TRUNCATE",
            Severity::Critical,
            "destructive_db",
        ),
        GuardrailRule {
            tool: "build",
            argument_key: "command",
            pattern: ci(r"DELETE\s+FROM"),
            unless: Some(ci(r"\bWHERE\b")),
            severity: Severity::Critical,
            label: "destructive_db",
        },
        rule(
            "code_write",
            "path",
            r"\.(env|pem|key|p12|pfx|jks)$|id_rsa|id_ed25519",
            Severity::High,
            "sensitive_data",
        ),
        rule(
            "code_write",
            "path",
            r"(/etc/|/etc$|/usr/bin/|/usr/local/bin/|/var/|/sys/|/proc/)",
            Severity::Critical,
            "system_path",
        ),
        rule(
            "code_write",
            "path",
            r"(production|prod)\.(?:env|json|yaml|yml|conf|config)$",
            Severity::High,
            "prod_config",
        ),
        rule(
            "code_edit",
            "path",
            r"\.(env|pem|key|p12|pfx|jks)$|id_rsa|id_ed25519",
            Severity::High,
            "sensitive_data",
        ),
        rule(
            "code_edit",
            "path",
            r"(production|prod)\.(?:env|json|yaml|yml|conf|config)$",
            Severity::High,
            "prod_config",
        ),
        rule(
            "code_read",
            "path",
            r"id_rsa$|id_ed25519$|\.pem$",
            Severity::Medium,
            "sensitive_key",
        ),
    ]
});

/// Guardrail configuration, refreshed from settings with a 60 s TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailConfig {
    /// Master switch.
    pub enabled: bool,
    /// Block CRITICAL matches.
    pub block_critical: bool,
    /// Block HIGH matches.
    pub block_high: bool,
    /// Block MEDIUM matches (default: audit only).
    pub block_medium: bool,
    /// HIGH blocks tolerated per session before unconditional blocking.
    pub max_high_per_session: u32,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            block_critical: true,
            block_high: true,
            block_medium: false,
            max_high_per_session: 5,
        }
    }
}

/// Process-wide settings the guardrails poll.
pub trait SettingsSource: Send + Sync {
    /// Current guardrail configuration.
    fn guardrail_config(&self) -> GuardrailConfig;
}

/// Append-only audit sink for guardrail decisions.
#[async_trait::async_trait]
pub trait AuditLog: Send + Sync {
    /// Append one record. Must be durable before returning.
    async fn append(&self, record: AuditRecord) -> Result<()>;
}

/// One audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Event type (`guardrail_block` / `guardrail_warn`).
    pub event_type: String,
    /// Acting agent id.
    pub actor_id: String,
    /// Always `"tool_call"`.
    pub target_type: String,
    /// Tool name.
    pub target_id: String,
    /// Structured details: label, severity, action, args preview, session.
    pub details: Value,
    /// Timestamp.
    pub ts: DateTime<Utc>,
}

/// Decision for one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardrailDecision {
    /// Execute the tool.
    Allow,
    /// Do not execute; the message is returned as the tool result.
    Block {
        /// Rule label.
        label: String,
        /// Message fed back to the LLM.
        message: String,
    },
}

const CONFIG_TTL: Duration = Duration::from_secs(60);

struct ConfigCache {
    config: GuardrailConfig,
    loaded_at: Instant,
}

/// Tool-call interceptor with per-session HIGH budgets.
pub struct Guardrails {
    settings: Option<Arc<dyn SettingsSource>>,
    audit: Option<Arc<dyn AuditLog>>,
    cache: Mutex<ConfigCache>,
    high_counts: Mutex<HashMap<String, u32>>,
}

impl std::fmt::Debug for Guardrails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guardrails").finish_non_exhaustive()
    }
}

impl Default for Guardrails {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl Guardrails {
    /// Build with optional settings and audit backends.
    #[must_use]
    pub fn new(settings: Option<Arc<dyn SettingsSource>>, audit: Option<Arc<dyn AuditLog>>) -> Self {
        let config = settings
            .as_ref()
            .map_or_else(GuardrailConfig::default, |s| s.guardrail_config());
        Self {
            settings,
            audit,
            cache: Mutex::new(ConfigCache {
                config,
                loaded_at: Instant::now(),
            }),
            high_counts: Mutex::new(HashMap::new()),
        }
    }

    fn config(&self) -> GuardrailConfig {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if cache.loaded_at.elapsed() >= CONFIG_TTL
            && let Some(settings) = &self.settings
        {
            cache.config = settings.guardrail_config();
            cache.loaded_at = Instant::now();
        }
        cache.config.clone()
    }

    /// Check one tool call. Audits every match and returns the decision.
    pub async fn check(
        &self,
        session_id: &str,
        actor_id: &str,
        tool_name: &str,
        args: &Value,
    ) -> GuardrailDecision {
        let config = self.config();
        if !config.enabled {
            return GuardrailDecision::Allow;
        }

        let mut decisive: Option<&GuardrailRule> = None;
        for rule in RULES.iter().filter(|r| r.tool == tool_name) {
            let Some(value) = args.get(rule.argument_key).and_then(Value::as_str) else {
                continue;
            };
            if !rule.pattern.is_match(value) {
                continue;
            }
            if let Some(unless) = &rule.unless
                && unless.is_match(value)
            {
                continue;
            }
            if decisive.is_none_or(|d| rule.severity > d.severity) {
                decisive = Some(rule);
            }
        }

        let Some(rule) = decisive else {
            return GuardrailDecision::Allow;
        };

        let mut blocked = match rule.severity {
            Severity::Critical => config.block_critical,
            Severity::High => config.block_high,
            Severity::Medium => config.block_medium,
        };

        // A session past its HIGH budget blocks unconditionally.
        if rule.severity == Severity::High {
            let mut counts = self.high_counts.lock().unwrap_or_else(|e| e.into_inner());
            let count = counts.entry(session_id.to_owned()).or_insert(0);
            if *count >= config.max_high_per_session {
                blocked = true;
            }
            if blocked {
                *count += 1;
            }
        }

        let action = if blocked { "BLOCKED" } else { "WARNED" };
        self.audit_decision(session_id, actor_id, tool_name, rule, action, args)
            .await;

        if blocked {
            warn!(
                tool = tool_name,
                label = rule.label,
                severity = rule.severity.as_str(),
                session_id,
                "guardrail blocked tool call"
            );
            GuardrailDecision::Block {
                label: rule.label.to_owned(),
                message: format!(
                    "Guardrail [{}] blocked this call: {} pattern matched on '{}'. \
                     This action is not permitted.",
                    rule.label,
                    rule.severity.as_str(),
                    rule.argument_key
                ),
            }
        } else {
            info!(tool = tool_name, label = rule.label, "guardrail warning (audit only)");
            GuardrailDecision::Allow
        }
    }

    async fn audit_decision(
        &self,
        session_id: &str,
        actor_id: &str,
        tool_name: &str,
        rule: &GuardrailRule,
        action: &str,
        args: &Value,
    ) {
        let Some(audit) = &self.audit else { return };
        let preview = crate::util::truncate(&args.to_string(), 300);
        let record = AuditRecord {
            event_type: if action == "BLOCKED" {
                "guardrail_block".to_owned()
            } else {
                "guardrail_warn".to_owned()
            },
            actor_id: actor_id.to_owned(),
            target_type: "tool_call".to_owned(),
            target_id: tool_name.to_owned(),
            details: serde_json::json!({
                "label": rule.label,
                "severity": rule.severity.as_str(),
                "action": action,
                "args_preview": preview,
                "session_id": session_id,
            }),
            ts: Utc::now(),
        };
        if let Err(e) = audit.append(record).await {
            warn!(error = %e, "audit append failed");
        }
    }

    /// Current HIGH block count for a session.
    #[must_use]
    pub fn high_count(&self, session_id: &str) -> u32 {
        self.high_counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct MemoryAudit {
        records: StdMutex<Vec<AuditRecord>>,
    }

    #[async_trait::async_trait]
    impl AuditLog for MemoryAudit {
        async fn append(&self, record: AuditRecord) -> Result<()> {
            self.records.lock().unwrap().push(record);
            Ok(())
        }
    }

    fn args(key: &str, value: &str) -> Value {
        serde_json::json!({ key: value })
    }

    #[tokio::test]
    async fn critical_always_blocks_and_audits() {
        let audit = Arc::new(MemoryAudit::default());
        let guard = Guardrails::new(None, Some(audit.clone()));

        let decision = guard
            .check("s1", "dev-1", "build", &args("command", "rm -rf / --no-preserve-root"))
            .await;
        assert!(matches!(decision, GuardrailDecision::Block { ref label, .. } if label == "destructive_fs"));

        let records = audit.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, "guardrail_block");
        assert_eq!(records[0].target_id, "build");
        assert_eq!(records[0].details["action"], "BLOCKED");
    }

    #[tokio::test]
    async fn high_blocks_destructive_git_push() {
        let guard = Guardrails::default();
        let decision = guard
            .check("s1", "dev-1", "build", &args("command", "git push --force origin main"))
            .await;
        assert!(matches!(decision, GuardrailDecision::Block { ref label, .. } if label == "destructive_git"));
    }

    #[tokio::test]
    async fn delete_with_where_is_exempt() {
        let guard = Guardrails::default();
        let ok = guard
            .check("s1", "dev-1", "build", &args("command", "psql -c 'DELETE FROM runs WHERE id = 3'"))
            .await;
        assert_eq!(ok, GuardrailDecision::Allow);

        let bad = guard
            .check("s1", "dev-1", "build", &args("command", "psql -c 'DELETE FROM runs'"))
            .await;
        assert!(matches!(bad, GuardrailDecision::Block { .. }));
    }

    #[tokio::test]
    async fn medium_audits_without_blocking() {
        let audit = Arc::new(MemoryAudit::default());
        let guard = Guardrails::new(None, Some(audit.clone()));

        let decision = guard
            .check("s1", "qa-1", "code_read", &args("path", "/home/user/.ssh/id_rsa"))
            .await;
        assert_eq!(decision, GuardrailDecision::Allow);

        let records = audit.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, "guardrail_warn");
        assert_eq!(records[0].details["action"], "WARNED");
    }

    #[tokio::test]
    async fn session_high_budget_escalates() {
        struct Lenient;
        impl SettingsSource for Lenient {
            fn guardrail_config(&self) -> GuardrailConfig {
                GuardrailConfig {
                    block_high: false,
                    max_high_per_session: 2,
                    ..GuardrailConfig::default()
                }
            }
        }
        let guard = Guardrails::new(Some(Arc::new(Lenient)), None);
        let cmd = args("command", "git push --force origin main");

        // Under budget with block_high=false: warned, not blocked.
        for _ in 0..2 {
            let d = guard.check("s1", "dev-1", "build", &cmd).await;
            assert_eq!(d, GuardrailDecision::Allow);
        }
        // The budget only counts blocks; with blocking disabled it never
        // fills, so the call stays allowed.
        assert_eq!(guard.high_count("s1"), 0);
    }

    #[tokio::test]
    async fn high_budget_blocks_after_cap() {
        let guard = Guardrails::default();
        let cmd = args("command", "git reset --hard HEAD~5");
        for _ in 0..6 {
            let _ = guard.check("s2", "dev-1", "build", &cmd).await;
        }
        assert!(guard.high_count("s2") >= 5);
        let d = guard.check("s2", "dev-1", "build", &cmd).await;
        assert!(matches!(d, GuardrailDecision::Block { .. }));
    }

    #[tokio::test]
    async fn unknown_tool_allows() {
        let guard = Guardrails::default();
        let d = guard.check("s1", "dev-1", "memory_search", &args("query", "rm -rf /")).await;
        assert_eq!(d, GuardrailDecision::Allow);
    }
}
