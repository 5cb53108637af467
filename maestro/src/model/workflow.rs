//! Workflow templates: ordered phases binding patterns to agent teams.

use serde::{Deserialize, Serialize};

use crate::mission::evidence::Criterion;

/// Gate policy deciding whether a failed phase blocks the mission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePolicy {
    /// Continue regardless of the outcome.
    #[default]
    Always,
    /// Block if any agent vetoed.
    NoVeto,
    /// Block unless every reviewer approved.
    AllApproved,
}

impl GatePolicy {
    /// Whether a failed phase under this gate blocks the mission.
    #[must_use]
    pub const fn is_blocking(self) -> bool {
        matches!(self, Self::NoVeto | Self::AllApproved)
    }
}

/// Team/pattern configuration of one workflow phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseConfig {
    /// Agents taking part, in order.
    pub agent_ids: Vec<String>,
    /// Leader agent (manager / dispatcher / judge), if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader: Option<String>,
    /// Gate policy for the phase outcome.
    #[serde(default)]
    pub gate: GatePolicy,
    /// Sprint cap for dev-type phases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,
    /// Evidence gate criteria, if the phase is gated on artifacts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acceptance_criteria: Vec<Criterion>,
}

/// One step of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowPhase {
    /// Stable phase id ("plan", "dev-sprint", "qa", "deploy-prod", ...).
    pub phase_id: String,
    /// Display name.
    pub name: String,
    /// Pattern to execute ("sequential", "hierarchical", "human-in-the-loop", ...).
    pub pattern_id: String,
    /// Team and gating configuration.
    pub config: PhaseConfig,
}

impl WorkflowPhase {
    /// Dev-type phases iterate as sprints and run the evidence gate.
    #[must_use]
    pub fn is_dev_phase(&self) -> bool {
        let name = self.name.to_lowercase();
        ["sprint", "dev", "features", "test"]
            .iter()
            .any(|k| name.contains(k))
    }
}

/// An ordered list of phases forming a reusable template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDef {
    /// Stable identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Ordered phases.
    pub phases: Vec<WorkflowPhase>,
}

impl WorkflowDef {
    /// Index of the first dev phase, the reloop target.
    #[must_use]
    pub fn first_dev_phase(&self) -> Option<usize> {
        self.phases.iter().position(WorkflowPhase::is_dev_phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_phase_detection() {
        let phase = WorkflowPhase {
            phase_id: "dev-sprint".into(),
            name: "Dev Sprint 1".into(),
            pattern_id: "hierarchical".into(),
            config: PhaseConfig::default(),
        };
        assert!(phase.is_dev_phase());

        let plan = WorkflowPhase {
            phase_id: "plan".into(),
            name: "Planning".into(),
            pattern_id: "sequential".into(),
            config: PhaseConfig::default(),
        };
        assert!(!plan.is_dev_phase());
    }

    #[test]
    fn gate_blocking() {
        assert!(!GatePolicy::Always.is_blocking());
        assert!(GatePolicy::NoVeto.is_blocking());
        assert!(GatePolicy::AllApproved.is_blocking());
    }
}
