//! Core data model: agents, patterns, missions, workflows.

pub mod agent;
pub mod mission;
pub mod pattern;
pub mod workflow;

pub use agent::{AgentDef, Permissions, RoleBucket};
pub use mission::{MissionDef, MissionStatus, PhaseState, PhaseStatus, SprintDef};
pub use pattern::{
    EdgeDef, EdgeKind, NodeState, NodeStates, NodeStatus, PatternConfig, PatternDef, PatternSlot,
    PatternType,
};
pub use workflow::{GatePolicy, PhaseConfig, WorkflowDef, WorkflowPhase};
