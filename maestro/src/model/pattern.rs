//! Pattern graphs and node runtime state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::agent::AgentDef;
use crate::message::ExecutionResult;

/// The collaboration topology a pattern executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternType {
    /// Single agent.
    Solo,
    /// Chain of agents with accumulated context.
    Sequential,
    /// Dispatcher, parallel workers, optional aggregator.
    Parallel,
    /// Producer/reviewer iteration until approval.
    Loop,
    /// Manager decomposition, worker fan-out, QA validation.
    Hierarchical,
    /// Judge-moderated debate rounds.
    Network,
    /// Classifier routes to one specialist.
    Router,
    /// Contributors consolidated by an aggregator.
    Aggregator,
    /// Dependency waves executed in parallel per wave.
    Wave,
    /// Pattern containing human checkpoint slots.
    #[serde(rename = "human-in-the-loop")]
    HumanInTheLoop,
}

impl PatternType {
    /// Parse a pattern id string ("sequential", "human-in-the-loop", ...).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "solo" => Some(Self::Solo),
            "sequential" => Some(Self::Sequential),
            "parallel" => Some(Self::Parallel),
            "loop" => Some(Self::Loop),
            "hierarchical" => Some(Self::Hierarchical),
            "network" => Some(Self::Network),
            "router" => Some(Self::Router),
            "aggregator" => Some(Self::Aggregator),
            "wave" => Some(Self::Wave),
            "human-in-the-loop" => Some(Self::HumanInTheLoop),
            _ => None,
        }
    }

    /// Execution patterns are eligible for the semantic adversarial check.
    #[must_use]
    pub const fn is_execution(self) -> bool {
        matches!(
            self,
            Self::Sequential | Self::Hierarchical | Self::Parallel | Self::Loop | Self::Aggregator
        )
    }
}

/// Kinds of edges connecting pattern nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Order dependency in a chain.
    Sequential,
    /// Fan-out dependency.
    Parallel,
    /// Manager-to-worker assignment.
    Delegate,
    /// Worker-to-manager report.
    Report,
    /// Peer discussion channel.
    Bidirectional,
    /// Review loop back-edge.
    Feedback,
    /// Human validation gate.
    Checkpoint,
    /// Inbound edge of an aggregator node.
    Aggregate,
    /// Router dispatch edge.
    Route,
}

/// One edge of a pattern graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDef {
    /// Source node id.
    pub from: String,
    /// Target node id.
    pub to: String,
    /// Edge semantics.
    #[serde(rename = "type")]
    pub kind: EdgeKind,
}

impl EdgeDef {
    /// Build an edge.
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>, kind: EdgeKind) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind,
        }
    }
}

/// One agent slot in a pattern graph.
///
/// A `None` agent id marks a human checkpoint slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSlot {
    /// Graph-local node id.
    pub node_id: String,
    /// Agent assigned to this slot, if any.
    pub agent_id: Option<String>,
}

/// Pattern-level configuration knobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternConfig {
    /// Producer/reviewer or sprint iterations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,
    /// Debate rounds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<usize>,
    /// Message shown at a human checkpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_message: Option<String>,
}

/// A pattern graph: typed topology over agent slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternDef {
    /// Stable identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Topology variant.
    #[serde(rename = "type")]
    pub pattern_type: PatternType,
    /// Ordered agent slots.
    pub agents: Vec<PatternSlot>,
    /// Graph edges.
    #[serde(default)]
    pub edges: Vec<EdgeDef>,
    /// Pattern configuration.
    #[serde(default)]
    pub config: PatternConfig,
}

impl PatternDef {
    /// Validate structural invariants: unique node ids, edges reference nodes,
    /// agent slots only empty for human-in-the-loop patterns.
    pub fn validate(&self) -> crate::Result<()> {
        let mut seen = std::collections::HashSet::new();
        for slot in &self.agents {
            if !seen.insert(slot.node_id.as_str()) {
                return Err(crate::Error::configuration(format!(
                    "duplicate node id '{}' in pattern '{}'",
                    slot.node_id, self.id
                )));
            }
            if slot.agent_id.is_none() && self.pattern_type != PatternType::HumanInTheLoop {
                return Err(crate::Error::configuration(format!(
                    "node '{}' has no agent in non-HITL pattern '{}'",
                    slot.node_id, self.id
                )));
            }
        }
        for edge in &self.edges {
            if !seen.contains(edge.from.as_str()) || !seen.contains(edge.to.as_str()) {
                return Err(crate::Error::configuration(format!(
                    "edge {} -> {} references unknown node in pattern '{}'",
                    edge.from, edge.to, self.id
                )));
            }
        }
        Ok(())
    }
}

/// Terminal and transient states of a pattern node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    /// Not yet executed.
    Pending,
    /// Currently executing.
    Running,
    /// Finished without a veto.
    Completed,
    /// Finished with an explicit veto.
    Vetoed,
    /// Finished with an error or rejected output.
    Failed,
}

/// Runtime state of one agent slot inside a pattern run.
#[derive(Debug, Clone)]
pub struct NodeState {
    /// Graph-local node id.
    pub node_id: String,
    /// Agent id assigned to the slot, if any.
    pub agent_id: Option<String>,
    /// Resolved agent definition, if any.
    pub agent: Option<AgentDef>,
    /// Current status.
    pub status: NodeStatus,
    /// Result of the last invocation.
    pub result: Option<ExecutionResult>,
    /// Final text output.
    pub output: String,
}

impl NodeState {
    /// Fresh pending state for a slot.
    #[must_use]
    pub fn new(slot: &PatternSlot, agent: Option<AgentDef>) -> Self {
        Self {
            node_id: slot.node_id.clone(),
            agent_id: slot.agent_id.clone(),
            agent,
            status: NodeStatus::Pending,
            result: None,
            output: String::new(),
        }
    }

    /// Reset to pending for another iteration.
    pub fn reset(&mut self) {
        self.status = NodeStatus::Pending;
        self.result = None;
        self.output.clear();
    }
}

/// Map of node id to its runtime state.
pub type NodeStates = HashMap<String, NodeState>;

#[cfg(test)]
mod tests {
    use super::*;

    fn two_node_pattern() -> PatternDef {
        PatternDef {
            id: "p1".into(),
            name: "review".into(),
            pattern_type: PatternType::Sequential,
            agents: vec![
                PatternSlot {
                    node_id: "n1".into(),
                    agent_id: Some("alice".into()),
                },
                PatternSlot {
                    node_id: "n2".into(),
                    agent_id: Some("bob".into()),
                },
            ],
            edges: vec![EdgeDef::new("n1", "n2", EdgeKind::Sequential)],
            config: PatternConfig::default(),
        }
    }

    #[test]
    fn validate_accepts_wellformed() {
        assert!(two_node_pattern().validate().is_ok());
    }

    #[test]
    fn validate_rejects_duplicate_nodes() {
        let mut p = two_node_pattern();
        p.agents[1].node_id = "n1".into();
        assert!(p.validate().is_err());
    }

    #[test]
    fn validate_rejects_dangling_edges() {
        let mut p = two_node_pattern();
        p.edges.push(EdgeDef::new("n1", "ghost", EdgeKind::Report));
        assert!(p.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_slot_outside_hitl() {
        let mut p = two_node_pattern();
        p.agents[0].agent_id = None;
        assert!(p.validate().is_err());
        p.pattern_type = PatternType::HumanInTheLoop;
        assert!(p.validate().is_ok());
    }
}
