//! Missions, phases, and sprints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of a mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    /// Created, not started.
    Pending,
    /// Workflow being resolved.
    Planning,
    /// Phases executing.
    Running,
    /// Suspended; candidate for auto-resume.
    Paused,
    /// Blocked on a human checkpoint.
    WaitingValidation,
    /// Finished with at least one phase done.
    Completed,
    /// Finished with nothing delivered.
    Failed,
    /// Given up by the user or the watchdog.
    Abandoned,
}

/// Lifecycle of one phase inside a mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseStatus {
    /// Not yet started.
    Pending,
    /// Pattern run in flight.
    Running,
    /// Completed successfully.
    Done,
    /// Completed but a non-blocking gate failed.
    DoneWithIssues,
    /// Waiting on human validation.
    WaitingValidation,
    /// Failed terminally.
    Failed,
    /// Skipped by the orchestrator.
    Skipped,
}

impl PhaseStatus {
    /// Whether the orchestrator should advance past this phase.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Done | Self::DoneWithIssues | Self::Skipped)
    }
}

/// Runtime state of one workflow step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseState {
    /// Workflow phase id.
    pub phase_id: String,
    /// Current status.
    pub status: PhaseStatus,
    /// Start timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Completion timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of agents that took part.
    pub agent_count: usize,
    /// Compressed phase summary for downstream prompts.
    #[serde(default)]
    pub summary: String,
}

impl PhaseState {
    /// Pending state for a workflow phase.
    #[must_use]
    pub fn pending(phase_id: impl Into<String>) -> Self {
        Self {
            phase_id: phase_id.into(),
            status: PhaseStatus::Pending,
            started_at: None,
            completed_at: None,
            agent_count: 0,
            summary: String::new(),
        }
    }

    /// Reset to pending, clearing summary and timestamps (used on reloop).
    pub fn reset(&mut self) {
        self.status = PhaseStatus::Pending;
        self.started_at = None;
        self.completed_at = None;
        self.summary.clear();
    }
}

/// The outer unit of work: a goal executed through one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionDef {
    /// Stable identifier.
    pub id: String,
    /// Owning project id.
    pub project_id: String,
    /// Display name.
    pub name: String,
    /// Free-text goal.
    pub brief: String,
    /// Current status.
    pub status: MissionStatus,
    /// Workflow template id.
    pub workflow_id: String,
    /// Phase states, one per workflow phase, fixed order.
    pub phases: Vec<PhaseState>,
    /// Index of the phase currently in flight.
    pub current_phase: usize,
    /// Workspace filesystem path, exclusive while running.
    #[serde(default)]
    pub workspace_path: String,
    /// Auto-resume attempts consumed.
    #[serde(default)]
    pub resume_attempts: u32,
    /// Timestamp of the last resume attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_resume_at: Option<DateTime<Utc>>,
    /// Blocked on human input; exempt from auto-resume.
    #[serde(default)]
    pub human_input_required: bool,
    /// Free-form configuration.
    #[serde(default)]
    pub config: Value,
    /// Mission type tag ("feature", "bug", "program", ...).
    #[serde(default)]
    pub mission_type: String,
    /// Category tag.
    #[serde(default)]
    pub category: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp (watchdog stall detection input).
    pub updated_at: DateTime<Utc>,
}

impl MissionDef {
    /// Count phases in a given status.
    #[must_use]
    pub fn count_phases(&self, status: PhaseStatus) -> usize {
        self.phases.iter().filter(|p| p.status == status).count()
    }
}

/// One iteration of a dev-type phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SprintDef {
    /// Stable identifier.
    pub id: String,
    /// Owning mission id.
    pub mission_id: String,
    /// Phase this sprint belongs to.
    pub phase_id: String,
    /// 1-based sprint number within the phase.
    pub number: usize,
    /// Sprint goal text.
    pub goal: String,
    /// Start timestamp.
    pub started_at: DateTime<Utc>,
    /// Retrospective summary, if recorded.
    #[serde(default)]
    pub retrospective: String,
    /// Files changed vs the previous commit, if measured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_status_settled() {
        assert!(PhaseStatus::Done.is_settled());
        assert!(PhaseStatus::DoneWithIssues.is_settled());
        assert!(PhaseStatus::Skipped.is_settled());
        assert!(!PhaseStatus::Failed.is_settled());
        assert!(!PhaseStatus::Pending.is_settled());
    }

    #[test]
    fn phase_reset_clears_state() {
        let mut p = PhaseState::pending("dev");
        p.status = PhaseStatus::Failed;
        p.started_at = Some(Utc::now());
        p.summary = "went badly".into();
        p.reset();
        assert_eq!(p.status, PhaseStatus::Pending);
        assert!(p.started_at.is_none());
        assert!(p.summary.is_empty());
    }
}
