//! Pattern execution engine.
//!
//! A pattern run drives a graph of agent nodes through one collaboration
//! topology (solo, sequential, parallel, loop, hierarchical, network,
//! router, aggregator, wave, human-in-the-loop), compressing accumulated
//! context between nodes and emitting session events throughout.
//!
//! The run is successful iff every node ended in `COMPLETED` or stayed
//! `PENDING` (short-circuit) and no node was `VETOED`, unless a runner
//! recorded an explicit failure (hierarchical exhaustion, engine error).

pub mod compress;
pub mod node;
pub mod runners;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::bus::{EventBus, EventPayload, SessionEvent};
use crate::config::EngineConfig;
use crate::executor::Executor;
use crate::llm::LlmClient;
use crate::model::{NodeState, NodeStates, NodeStatus, PatternDef, PatternType};
use crate::store::{AgentStore, MemoryStore, SessionStore};

pub use node::{Decision, detect_decision};

/// Immutable context shared by every node of one run.
#[derive(Debug, Clone)]
pub struct RunMeta {
    /// Owning session.
    pub session_id: String,
    /// Owning project (empty outside project scope).
    pub project_id: String,
    /// Workspace path, if any.
    pub project_path: Option<PathBuf>,
    /// Phase the run belongs to (injected into events).
    pub phase_id: String,
    /// Topology being executed.
    pub pattern_type: PatternType,
    /// Project description snippet for prompts.
    pub project_context: String,
    /// Product vision snippet for prompts.
    pub vision: String,
}

/// Ephemeral execution state of one pattern run.
#[derive(Debug)]
pub struct PatternRun {
    /// The pattern being executed.
    pub pattern: PatternDef,
    /// Shared node context.
    pub meta: RunMeta,
    /// Node runtime states.
    pub nodes: NodeStates,
    /// Loop/outer iteration counter.
    pub iteration: usize,
    /// Iteration cap for looping patterns.
    pub max_iterations: usize,
    /// Set when the run has ended.
    pub finished: bool,
    /// Overall outcome.
    pub success: bool,
    /// Engine-level error, if any.
    pub error: Option<String>,
    /// Human-readable label of the current stage.
    pub flow_step: String,
}

impl PatternRun {
    /// Node ids in declaration order.
    #[must_use]
    pub fn node_order(&self) -> Vec<String> {
        self.pattern
            .agents
            .iter()
            .map(|s| s.node_id.clone())
            .collect()
    }

    /// Count nodes in a status.
    #[must_use]
    pub fn count(&self, status: NodeStatus) -> usize {
        self.nodes.values().filter(|n| n.status == status).count()
    }

    /// Apply a node outcome.
    pub(crate) fn apply(&mut self, node_id: &str, outcome: node::NodeOutcome) {
        if let Some(state) = self.nodes.get_mut(node_id) {
            state.status = outcome.status;
            state.output = outcome.output;
            state.result = Some(outcome.result);
        }
    }

    /// Reset every node to pending (loop/hierarchical restarts).
    pub(crate) fn reset_nodes(&mut self) {
        for state in self.nodes.values_mut() {
            state.reset();
        }
    }
}

/// A request to execute one pattern.
#[derive(Debug, Clone)]
pub struct PatternRequest {
    /// The pattern graph.
    pub pattern: PatternDef,
    /// Session the run lives on.
    pub session_id: String,
    /// Project scope (empty for research discussions).
    pub project_id: String,
    /// Workspace path.
    pub project_path: Option<PathBuf>,
    /// Phase id for event routing.
    pub phase_id: String,
    /// Project description snippet.
    pub project_context: String,
    /// Product vision snippet.
    pub vision: String,
    /// The task to execute.
    pub task: String,
}

impl PatternRequest {
    /// Minimal request for a pattern and task.
    #[must_use]
    pub fn new(pattern: PatternDef, session_id: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            pattern,
            session_id: session_id.into(),
            project_id: String::new(),
            project_path: None,
            phase_id: String::new(),
            project_context: String::new(),
            vision: String::new(),
            task: task.into(),
        }
    }
}

/// The pattern execution engine.
#[derive(Clone)]
pub struct PatternEngine {
    pub(crate) executor: Executor,
    pub(crate) llm: LlmClient,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) sessions: Arc<dyn SessionStore>,
    pub(crate) memory: Option<Arc<dyn MemoryStore>>,
    pub(crate) agents: Arc<dyn AgentStore>,
    pub(crate) config: EngineConfig,
}

impl std::fmt::Debug for PatternEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternEngine").finish_non_exhaustive()
    }
}

impl PatternEngine {
    /// Build an engine.
    #[must_use]
    pub fn new(
        executor: Executor,
        llm: LlmClient,
        bus: Arc<EventBus>,
        sessions: Arc<dyn SessionStore>,
        agents: Arc<dyn AgentStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            executor,
            llm,
            bus,
            sessions,
            memory: None,
            agents,
            config,
        }
    }

    /// Wire the project memory store.
    #[must_use]
    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Wrap a payload with the run's phase id.
    pub(crate) fn event(&self, meta: &RunMeta, payload: EventPayload) -> SessionEvent {
        let event = SessionEvent::new(payload);
        if meta.phase_id.is_empty() {
            event
        } else {
            event.with_phase(&meta.phase_id)
        }
    }

    /// Execute one pattern run to completion.
    ///
    /// Engine-level faults never propagate as `Err`: the run comes back
    /// `finished` with `success = false` and `error` set, and a
    /// `pattern_end` event has been emitted.
    pub async fn run_pattern(&self, request: PatternRequest) -> PatternRun {
        let meta = RunMeta {
            session_id: request.session_id.clone(),
            project_id: request.project_id.clone(),
            project_path: request.project_path.clone(),
            phase_id: request.phase_id.clone(),
            pattern_type: request.pattern.pattern_type,
            project_context: request.project_context.clone(),
            vision: request.vision.clone(),
        };

        let max_iterations = request
            .pattern
            .config
            .max_iterations
            .unwrap_or(self.config.loop_max_iterations);

        let mut run = PatternRun {
            meta,
            nodes: NodeStates::new(),
            iteration: 0,
            max_iterations,
            finished: false,
            success: true,
            error: None,
            flow_step: String::new(),
            pattern: request.pattern,
        };

        // A pattern with zero agents returns immediately: success, no
        // messages, no events beyond start/end.
        if run.pattern.agents.is_empty() {
            run.finished = true;
            return run;
        }

        if let Err(e) = run.pattern.validate() {
            run.finished = true;
            run.success = false;
            run.error = Some(e.to_string());
            return run;
        }

        // Resolve agents into node states.
        for slot in &run.pattern.agents.clone() {
            let agent = match &slot.agent_id {
                None => None,
                Some(agent_id) => match self.agents.get_agent(agent_id).await {
                    Ok(Some(agent)) => Some(agent),
                    Ok(None) => {
                        run.finished = true;
                        run.success = false;
                        run.error = Some(format!("unknown agent '{agent_id}'"));
                        return run;
                    }
                    Err(e) => {
                        run.finished = true;
                        run.success = false;
                        run.error = Some(e.to_string());
                        return run;
                    }
                },
            };
            run.nodes
                .insert(slot.node_id.clone(), NodeState::new(slot, agent));
        }

        self.bus.push(
            &run.meta.session_id,
            self.event(&run.meta, EventPayload::PatternStart {
                pattern_id: run.pattern.id.clone(),
                pattern_type: pattern_type_tag(run.pattern.pattern_type).to_owned(),
            }),
        );

        info!(
            pattern = %run.pattern.id,
            pattern_type = pattern_type_tag(run.pattern.pattern_type),
            agents = run.pattern.agents.len(),
            session = %run.meta.session_id,
            "pattern run started",
        );

        // A single-node pattern reduces to solo regardless of type.
        let effective = if run.pattern.agents.len() == 1 {
            PatternType::Solo
        } else {
            run.pattern.pattern_type
        };

        let outcome = match effective {
            PatternType::Solo => self.run_solo(&mut run, &request.task).await,
            PatternType::Sequential => self.run_sequential(&mut run, &request.task).await,
            PatternType::Parallel => self.run_parallel(&mut run, &request.task).await,
            PatternType::Loop => self.run_loop(&mut run, &request.task).await,
            PatternType::Hierarchical => self.run_hierarchical(&mut run, &request.task).await,
            PatternType::Network => self.run_network(&mut run, &request.task).await,
            PatternType::Router => self.run_router(&mut run, &request.task).await,
            PatternType::Aggregator => self.run_aggregator(&mut run, &request.task).await,
            PatternType::Wave => self.run_wave(&mut run, &request.task).await,
            PatternType::HumanInTheLoop => self.run_hitl(&mut run, &request.task).await,
        };

        if let Err(e) = outcome {
            warn!(error = %e, pattern = %run.pattern.id, "pattern run errored");
            run.success = false;
            run.error = Some(e.to_string());
        }

        // Success law: every node completed or untouched, nobody vetoed.
        let nodes_ok = run
            .nodes
            .values()
            .all(|n| matches!(n.status, NodeStatus::Completed | NodeStatus::Pending));
        run.success = run.success && nodes_ok;
        run.finished = true;

        self.bus.push(
            &run.meta.session_id,
            self.event(&run.meta, EventPayload::PatternEnd {
                success: run.success,
                error: run.error.clone(),
            }),
        );

        info!(
            pattern = %run.pattern.id,
            success = run.success,
            iterations = run.iteration,
            "pattern run finished",
        );
        run
    }
}

const fn pattern_type_tag(pattern_type: PatternType) -> &'static str {
    match pattern_type {
        PatternType::Solo => "solo",
        PatternType::Sequential => "sequential",
        PatternType::Parallel => "parallel",
        PatternType::Loop => "loop",
        PatternType::Hierarchical => "hierarchical",
        PatternType::Network => "network",
        PatternType::Router => "router",
        PatternType::Aggregator => "aggregator",
        PatternType::Wave => "wave",
        PatternType::HumanInTheLoop => "human-in-the-loop",
    }
}
