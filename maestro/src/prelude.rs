//! Commonly used types, importable in one line.

pub use crate::bus::{EventBus, EventPayload, SessionEvent};
pub use crate::config::{EngineConfig, WatchdogConfig};
pub use crate::error::{Error, Result};
pub use crate::executor::{ExecutionContext, Executor, ExecutorEvent};
pub use crate::guard::{GuardrailDecision, Guardrails};
pub use crate::llm::{ChatOptions, ChatProvider, LlmClient, LlmMessage, LlmResponse, MockProvider};
pub use crate::message::{ExecutionResult, Message, MessageKind};
pub use crate::mission::{
    Criterion, FeedbackHooks, LoggingHooks, Orchestrator, OrchestratorParts, build_edges,
};
pub use crate::model::{
    AgentDef, EdgeDef, EdgeKind, MissionDef, MissionStatus, NodeStatus, PatternDef, PatternSlot,
    PatternType, PhaseState, PhaseStatus, WorkflowDef, WorkflowPhase,
};
pub use crate::pattern::{PatternEngine, PatternRequest, PatternRun};
pub use crate::sandbox::Sandbox;
pub use crate::store::{
    AgentStore, MemoryStore, MissionStore, ProjectStore, SessionStore, SqliteStore,
};
pub use crate::tool::{Tool, ToolContext, ToolRegistry, register_builtins};
pub use crate::watchdog::{MissionResumer, Watchdog};
