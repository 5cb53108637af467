//! Output validation and tool-call interception.
//!
//! Two complementary filters guard agent activity:
//!
//! - [`adversarial`] validates *text output* after an agent responds
//!   (slop, mock, hallucination, lies).
//! - [`guardrails`] intercepts *tool calls* before they execute
//!   (destructive git/fs/db/infra operations, sensitive paths).

pub mod adversarial;
pub mod guardrails;

pub use adversarial::{GuardVerdict, check_l0, check_l1};
pub use guardrails::{
    AuditLog, AuditRecord, GuardrailConfig, GuardrailDecision, Guardrails, SettingsSource, Severity,
};
