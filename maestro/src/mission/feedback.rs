//! Feedback hooks — external triggers fired by phase outcomes.
//!
//! The orchestrator calls into this trait when deploy or fix phases
//! settle; implementations may create follow-up missions or activate
//! monitoring. Recurring TMA incidents escalate into root-cause debt
//! missions after three occurrences of the same key.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;

/// Hooks the orchestrator fires on notable phase outcomes.
#[async_trait]
pub trait FeedbackHooks: Send + Sync {
    /// A deploy phase completed successfully.
    async fn on_deploy_completed(&self, project_id: &str, mission_id: &str) -> Result<()>;

    /// A deploy phase failed.
    async fn on_deploy_failed(&self, project_id: &str, mission_id: &str, error: &str) -> Result<()>;

    /// A fix/validate phase of a bug or program mission settled.
    async fn on_tma_incident_fixed(&self, project_id: &str, incident_key: &str) -> Result<()>;

    /// A security alert was raised (may create a bug mission).
    async fn on_security_alert(&self, project_id: &str, severity: u8, summary: &str) -> Result<()>;
}

/// Occurrences of one incident key before escalation.
pub const TMA_ESCALATION_THRESHOLD: u32 = 3;

/// No-op hooks with incident recurrence tracking.
///
/// Counts incident keys and reports (via [`RecurrenceTracker::should_escalate`])
/// when the same key has been fixed [`TMA_ESCALATION_THRESHOLD`] times,
/// which callers turn into a root-cause debt mission.
#[derive(Debug, Default)]
pub struct RecurrenceTracker {
    counts: Mutex<HashMap<String, u32>>,
}

impl RecurrenceTracker {
    /// Fresh tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence and return the new count.
    pub fn record(&self, incident_key: &str) -> u32 {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let count = counts.entry(incident_key.to_owned()).or_insert(0);
        *count += 1;
        *count
    }

    /// Whether this key has recurred enough to warrant a debt mission.
    #[must_use]
    pub fn should_escalate(&self, incident_key: &str) -> bool {
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(incident_key)
            .is_some_and(|c| *c >= TMA_ESCALATION_THRESHOLD)
    }
}

/// Hooks that only log and track recurrence; the default wiring.
#[derive(Debug, Default)]
pub struct LoggingHooks {
    tracker: RecurrenceTracker,
}

impl LoggingHooks {
    /// Fresh logging hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Access the recurrence tracker.
    #[must_use]
    pub const fn tracker(&self) -> &RecurrenceTracker {
        &self.tracker
    }
}

#[async_trait]
impl FeedbackHooks for LoggingHooks {
    async fn on_deploy_completed(&self, project_id: &str, mission_id: &str) -> Result<()> {
        info!(project_id, mission_id, "deploy completed, TMA monitoring should activate");
        Ok(())
    }

    async fn on_deploy_failed(&self, project_id: &str, mission_id: &str, error: &str) -> Result<()> {
        info!(project_id, mission_id, error, "deploy failed");
        Ok(())
    }

    async fn on_tma_incident_fixed(&self, project_id: &str, incident_key: &str) -> Result<()> {
        let count = self.tracker.record(incident_key);
        info!(project_id, incident_key, count, "TMA incident fixed");
        if self.tracker.should_escalate(incident_key) {
            info!(incident_key, "incident recurrence threshold reached, root-cause mission warranted");
        }
        Ok(())
    }

    async fn on_security_alert(&self, project_id: &str, severity: u8, summary: &str) -> Result<()> {
        info!(project_id, severity, summary, "security alert received");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recurrence_escalates_at_threshold() {
        let tracker = RecurrenceTracker::new();
        assert_eq!(tracker.record("login-500"), 1);
        assert!(!tracker.should_escalate("login-500"));
        tracker.record("login-500");
        assert!(!tracker.should_escalate("login-500"));
        tracker.record("login-500");
        assert!(tracker.should_escalate("login-500"));
        assert!(!tracker.should_escalate("other"));
    }
}
