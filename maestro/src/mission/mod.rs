//! Mission orchestrator.
//!
//! Drives a mission through its workflow phases: sprint iteration for
//! dev phases, per-phase retries on transient LLM failures, evidence
//! gates on dev sprints, reloop back to the first dev phase on gated
//! failures, human-validation waits, and feedback hooks on deploy/fix
//! phases. All mission state lives in the store; the orchestrator can
//! be killed and resumed at any phase boundary.

pub mod edges;
pub mod evidence;
pub mod feedback;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use crate::bus::{EventBus, EventPayload, SessionEvent};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::llm::{ChatOptions, LlmClient, LlmMessage};
use crate::message::Message;
use crate::model::{
    AgentDef, MissionDef, MissionStatus, PatternConfig, PatternDef, PatternSlot, PatternType,
    PhaseStatus, SprintDef, WorkflowDef, WorkflowPhase,
};
use crate::pattern::{PatternEngine, PatternRequest, PatternRun};
use crate::sandbox::Sandbox;
use crate::store::{AgentStore, MemoryEntry, MemoryStore, MissionStore, ProjectStore, SessionStore};

pub use edges::build_edges;
pub use evidence::{CheckKind, Criterion, EvidenceReport};
pub use feedback::{FeedbackHooks, LoggingHooks, RecurrenceTracker};

/// Phase ids that trigger a reloop back to the first dev phase on failure.
const RELOOPABLE: [&str; 7] = ["qa", "deploy", "tma", "sprint", "dev", "cicd", "pipeline"];

/// Phase ids treated as deploy phases for feedback hooks.
const DEPLOY_PHASES: [&str; 2] = ["deploy-prod", "deploy"];

/// Phase ids treated as fix phases for TMA feedback.
const FIX_PHASES: [&str; 3] = ["fix", "tma-fix", "validate"];

/// The mission orchestrator.
#[derive(Clone)]
pub struct Orchestrator {
    engine: PatternEngine,
    llm: LlmClient,
    bus: Arc<EventBus>,
    sessions: Arc<dyn SessionStore>,
    missions: Arc<dyn MissionStore>,
    projects: Arc<dyn ProjectStore>,
    agents: Arc<dyn AgentStore>,
    memory: Option<Arc<dyn MemoryStore>>,
    sandbox: Arc<Sandbox>,
    hooks: Arc<dyn FeedbackHooks>,
    config: EngineConfig,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").finish_non_exhaustive()
    }
}

/// Dependencies for building an [`Orchestrator`].
pub struct OrchestratorParts {
    /// Pattern engine.
    pub engine: PatternEngine,
    /// LLM client for summaries and retrospectives.
    pub llm: LlmClient,
    /// Event bus.
    pub bus: Arc<EventBus>,
    /// Session store.
    pub sessions: Arc<dyn SessionStore>,
    /// Mission store.
    pub missions: Arc<dyn MissionStore>,
    /// Project store.
    pub projects: Arc<dyn ProjectStore>,
    /// Agent registry.
    pub agents: Arc<dyn AgentStore>,
    /// Memory store.
    pub memory: Option<Arc<dyn MemoryStore>>,
    /// Subprocess sandbox.
    pub sandbox: Arc<Sandbox>,
    /// Feedback hooks.
    pub hooks: Arc<dyn FeedbackHooks>,
    /// Engine configuration.
    pub config: EngineConfig,
}

impl Orchestrator {
    /// Build an orchestrator from its parts.
    #[must_use]
    pub fn new(parts: OrchestratorParts) -> Self {
        Self {
            engine: parts.engine,
            llm: parts.llm,
            bus: parts.bus,
            sessions: parts.sessions,
            missions: parts.missions,
            projects: parts.projects,
            agents: parts.agents,
            memory: parts.memory,
            sandbox: parts.sandbox,
            hooks: parts.hooks,
            config: parts.config,
        }
    }

    /// Drive a mission through its workflow to a terminal status.
    ///
    /// Only one `run_phases` loop may run per mission at a time; phase
    /// transitions are serialized through the store.
    pub async fn run_phases(
        &self,
        mission_id: &str,
        workflow: &WorkflowDef,
        session_id: &str,
    ) -> Result<MissionDef> {
        let mut mission = self
            .missions
            .get_mission(mission_id)
            .await?
            .ok_or_else(|| Error::mission(format!("unknown mission '{mission_id}'")))?;

        if mission.phases.len() != workflow.phases.len() {
            return Err(Error::mission(format!(
                "mission has {} phases, workflow '{}' has {}",
                mission.phases.len(),
                workflow.id,
                workflow.phases.len()
            )));
        }

        mission.status = MissionStatus::Running;
        self.missions.update_mission(&mission).await?;

        let project = self.projects.get_project(&mission.project_id).await?;
        let (project_context, vision) = project
            .as_ref()
            .map(|p| (p.description.clone(), p.vision.clone()))
            .unwrap_or_default();

        let mut phase_summaries: Vec<String> = Vec::new();
        let mut prev_context = String::new();
        let mut reloop_count: usize = 0;
        let mut i = 0;

        while i < mission.phases.len() {
            // Cancellation check at the phase boundary.
            if let Some(current) = self.missions.get_mission(mission_id).await?
                && current.status == MissionStatus::Abandoned
            {
                mission.status = MissionStatus::Abandoned;
                self.missions.update_mission(&mission).await?;
                self.emit(session_id, &workflow.phases[i].phase_id, EventPayload::MissionFailed {
                    error: "mission abandoned".to_owned(),
                });
                return Ok(mission);
            }

            if mission.phases[i].status.is_settled() {
                i += 1;
                continue;
            }

            let wf_phase = &workflow.phases[i];
            let phase_id = wf_phase.phase_id.clone();
            mission.current_phase = i;

            self.announce(session_id, &format!(
                "Phase {}/{} — {} starting.",
                i + 1,
                workflow.phases.len(),
                wf_phase.name
            ))
            .await;
            self.emit(session_id, &phase_id, EventPayload::PhaseStarted {
                name: wf_phase.name.clone(),
            });

            let is_dev_phase = wf_phase.is_dev_phase();
            let max_sprints = if is_dev_phase {
                wf_phase.config.max_iterations.unwrap_or(1).max(1)
            } else {
                1
            };

            mission.phases[i].status = PhaseStatus::Running;
            mission.phases[i].started_at = Some(Utc::now());
            mission.phases[i].agent_count = wf_phase.config.agent_ids.len();
            self.missions.update_mission(&mission).await?;

            let (phase_success, phase_error) = self
                .run_phase_sprints(
                    &mission,
                    wf_phase,
                    session_id,
                    &phase_summaries,
                    &mut prev_context,
                    max_sprints,
                    is_dev_phase,
                    &project_context,
                    &vision,
                )
                .await?;

            // Human-in-the-loop phases wait for out-of-band validation.
            let phase_success = if wf_phase.pattern_id == "human-in-the-loop" {
                match self
                    .wait_for_validation(&mut mission, mission_id, i, session_id, &phase_id)
                    .await?
                {
                    Some(success) => success,
                    None => {
                        // Mission failed terminally during validation.
                        return Ok(mission);
                    }
                }
            } else {
                mission.phases[i].status = if phase_success {
                    PhaseStatus::Done
                } else {
                    PhaseStatus::Failed
                };
                phase_success
            };

            if phase_success {
                let summary = self.summarize_phase(session_id, &wf_phase.name).await;
                mission.phases[i].summary = summary.clone();
                phase_summaries.push(format!("{}: {summary}", wf_phase.name));
                self.store_memory(
                    &mission.project_id,
                    &format!("phase: {}", wf_phase.name),
                    &summary,
                    "phase-summary",
                )
                .await;
            } else {
                let err = phase_error.clone().unwrap_or_else(|| "unknown".to_owned());
                mission.phases[i].summary =
                    format!("Phase échouée — {}", crate::util::truncate(&err, 200));
            }
            mission.phases[i].completed_at = Some(Utc::now());
            self.missions.update_mission(&mission).await?;

            self.emit(session_id, &phase_id, EventPayload::PhaseCompleted {
                status: format!("{:?}", mission.phases[i].status),
                summary: mission.phases[i].summary.clone(),
            });

            self.fire_feedback(&mission, &phase_id, phase_success, phase_error.as_deref())
                .await;

            if !phase_success {
                let gate = wf_phase.config.gate;
                let is_blocking = gate.is_blocking() || is_dev_phase;
                // Terminal failure only when a human explicitly withheld
                // sign-off: an all_approved gate on a human-in-the-loop
                // phase. Agent-gated phases fall through to the reloop.
                let is_hitl_gate = gate == crate::model::GatePolicy::AllApproved
                    && wf_phase.pattern_id == "human-in-the-loop";

                if is_blocking && is_hitl_gate {
                    mission.status = MissionStatus::Failed;
                    self.missions.update_mission(&mission).await?;
                    self.emit(session_id, &phase_id, EventPayload::MissionFailed {
                        error: phase_error.unwrap_or_else(|| "blocking phase failed".to_owned()),
                    });
                    self.announce(session_id, "Mission failed on a blocking phase.").await;
                    return Ok(mission);
                }

                if !is_blocking {
                    // Non-blocking failure: downgrade and move on.
                    mission.phases[i].status = PhaseStatus::DoneWithIssues;
                    mission.phases[i].summary = format!(
                        "Completed with issues — {}",
                        crate::util::truncate(
                            phase_error.as_deref().unwrap_or("gate not satisfied"),
                            120
                        )
                    );
                    self.missions.update_mission(&mission).await?;
                    i += 1;
                    continue;
                }

                // Error reloop: gated failures roll the workflow back to
                // the first dev phase, bounded by max_reloops.
                if reloop_count < self.config.max_reloops
                    && RELOOPABLE.iter().any(|k| phase_id.contains(k))
                    && let Some(dev_idx) = workflow.first_dev_phase()
                    && dev_idx <= i
                {
                    reloop_count += 1;
                    for phase in &mut mission.phases[dev_idx..] {
                        phase.reset();
                    }
                    prev_context.push_str(&format!(
                        "\n[Previous failure in {}]: {}",
                        phase_id,
                        crate::util::truncate(
                            phase_error.as_deref().unwrap_or("unknown"),
                            500
                        )
                    ));
                    self.missions.update_mission(&mission).await?;
                    self.emit(session_id, &phase_id, EventPayload::Reloop {
                        target_phase: dev_idx,
                        count: reloop_count,
                    });
                    self.announce(session_id, &format!(
                        "Relooping to phase {} after failure in {} (reloop {}/{}).",
                        dev_idx + 1,
                        phase_id,
                        reloop_count,
                        self.config.max_reloops
                    ))
                    .await;
                    i = dev_idx;
                    continue;
                }
            }

            i += 1;
        }

        // Final status.
        let done = mission.count_phases(PhaseStatus::Done);
        let with_issues = mission.count_phases(PhaseStatus::DoneWithIssues);
        let failed = mission.count_phases(PhaseStatus::Failed);
        mission.status = if failed == 0 && with_issues == 0 {
            MissionStatus::Completed
        } else if done > 0 {
            MissionStatus::Completed
        } else {
            MissionStatus::Failed
        };
        mission.updated_at = Utc::now();
        self.missions.update_mission(&mission).await?;

        self.announce(session_id, &format!(
            "Mission '{}' finished: {done} done, {with_issues} with issues, {failed} failed.",
            mission.name
        ))
        .await;
        self.auto_retrospective(&mission, &phase_summaries).await;
        self.bus
            .push(session_id, SessionEvent::new(EventPayload::KanbanRefresh));
        if mission.status == MissionStatus::Failed {
            self.emit(session_id, "", EventPayload::MissionFailed {
                error: "no phase completed".to_owned(),
            });
        }

        info!(mission = %mission.id, status = ?mission.status, "mission finished");
        Ok(mission)
    }

    /// Sprint loop for one phase. Returns `(success, error)`.
    #[allow(clippy::too_many_arguments)]
    async fn run_phase_sprints(
        &self,
        mission: &MissionDef,
        wf_phase: &WorkflowPhase,
        session_id: &str,
        phase_summaries: &[String],
        prev_context: &mut String,
        max_sprints: usize,
        is_dev_phase: bool,
        project_context: &str,
        vision: &str,
    ) -> Result<(bool, Option<String>)> {
        let phase_id = &wf_phase.phase_id;
        let mut phase_success = false;
        let mut phase_error: Option<String> = None;

        for sprint_num in 1..=max_sprints {
            let sprint = SprintDef {
                id: format!("{}-{}-s{}", mission.id, phase_id, sprint_num),
                mission_id: mission.id.clone(),
                phase_id: phase_id.clone(),
                number: sprint_num,
                goal: wf_phase.name.clone(),
                started_at: Utc::now(),
                retrospective: String::new(),
                velocity: None,
            };
            if is_dev_phase {
                if let Err(e) = self.missions.create_sprint(&sprint).await {
                    warn!(error = %e, "sprint recording failed");
                }
            }

            let pattern = self.build_pattern(wf_phase).await?;
            let task = self
                .build_phase_task(
                    mission,
                    wf_phase,
                    phase_summaries,
                    prev_context,
                    sprint_num,
                    max_sprints,
                )
                .await;

            let request = PatternRequest {
                pattern,
                session_id: session_id.to_owned(),
                project_id: mission.project_id.clone(),
                project_path: (!mission.workspace_path.is_empty())
                    .then(|| mission.workspace_path.clone().into()),
                phase_id: phase_id.clone(),
                project_context: project_context.to_owned(),
                vision: vision.to_owned(),
                task,
            };

            let run = self.run_with_retries(request, session_id, phase_id).await;
            phase_success = run.success;
            phase_error = run.error.clone();

            if is_dev_phase {
                let mut sprint = sprint;
                sprint.retrospective = self.sprint_retrospective(session_id).await;
                sprint.velocity = self.measure_velocity(&mission.workspace_path).await;
                if let Err(e) = self.missions.update_sprint(&sprint).await {
                    warn!(error = %e, "sprint update failed");
                }
            }

            if !phase_success && sprint_num < max_sprints {
                prev_context.push_str(&format!(
                    "\n[REJET itération {sprint_num}]: {}",
                    crate::util::truncate(phase_error.as_deref().unwrap_or("pattern failed"), 500)
                ));
                continue;
            }

            // Evidence gate on successful dev sprints.
            if phase_success && is_dev_phase {
                let mut criteria = wf_phase.config.acceptance_criteria.clone();
                if criteria.is_empty() {
                    criteria = evidence::default_criteria(&mission.workflow_id);
                }
                if !criteria.is_empty() && !mission.workspace_path.is_empty() {
                    for c in &mut criteria {
                        c.reset();
                    }
                    let report = evidence::run_checks(
                        std::path::Path::new(&mission.workspace_path),
                        criteria,
                        &self.sandbox,
                    )
                    .await;
                    self.emit(session_id, phase_id, EventPayload::EvidenceGate {
                        all_passed: report.all_passed,
                        report: serde_json::to_value(&report.criteria).unwrap_or(Value::Null),
                    });

                    if !report.all_passed {
                        if sprint_num < max_sprints {
                            prev_context.push_str("\n");
                            prev_context.push_str(&report.render());
                            continue;
                        }
                        phase_success = false;
                        phase_error = Some(report.render());
                    }
                }
            }
            break;
        }

        Ok((phase_success, phase_error))
    }

    /// Run a pattern with the phase timeout and transient-error retries.
    async fn run_with_retries(
        &self,
        request: PatternRequest,
        session_id: &str,
        phase_id: &str,
    ) -> PatternRun {
        let mut last_run: Option<PatternRun> = None;
        for attempt in 1..=self.config.max_llm_retries {
            let run = match tokio::time::timeout(
                self.config.phase_timeout,
                self.engine.run_pattern(request.clone()),
            )
            .await
            {
                Ok(run) => run,
                Err(_) => {
                    warn!(phase_id, attempt, "phase timed out");
                    self.emit(session_id, phase_id, EventPayload::PhaseFailed {
                        error: format!("timeout after {}s", self.config.phase_timeout.as_secs()),
                    });
                    if attempt < self.config.max_llm_retries {
                        tokio::time::sleep(self.config.llm_retry_delay).await;
                    }
                    continue;
                }
            };

            let transient = run.error.as_deref().is_some_and(|e| {
                let lower = e.to_lowercase();
                lower.contains("rate") || lower.contains("429") || lower.contains("timed out")
            });
            if !run.success && transient && attempt < self.config.max_llm_retries {
                warn!(phase_id, attempt, error = ?run.error, "transient phase failure, retrying");
                last_run = Some(run);
                tokio::time::sleep(self.config.llm_retry_delay).await;
                continue;
            }
            return run;
        }
        // Every attempt timed out: synthesize a failed run.
        last_run.unwrap_or_else(|| PatternRun {
            meta: crate::pattern::RunMeta {
                session_id: request.session_id.clone(),
                project_id: request.project_id.clone(),
                project_path: request.project_path.clone(),
                phase_id: request.phase_id.clone(),
                pattern_type: request.pattern.pattern_type,
                project_context: String::new(),
                vision: String::new(),
            },
            nodes: crate::model::NodeStates::new(),
            iteration: 0,
            max_iterations: 0,
            finished: true,
            success: false,
            error: Some(format!(
                "phase timeout after {} attempts",
                self.config.max_llm_retries
            )),
            flow_step: String::new(),
            pattern: request.pattern,
        })
    }

    /// Build the pattern for a workflow phase from its team config.
    async fn build_pattern(&self, wf_phase: &WorkflowPhase) -> Result<PatternDef> {
        let pattern_type = PatternType::parse(&wf_phase.pattern_id).ok_or_else(|| {
            Error::configuration(format!("unknown pattern type '{}'", wf_phase.pattern_id))
        })?;

        let mut ranks = Vec::with_capacity(wf_phase.config.agent_ids.len());
        for agent_id in &wf_phase.config.agent_ids {
            let rank = self
                .agents
                .get_agent(agent_id)
                .await?
                .as_ref()
                .map_or(50, |a: &AgentDef| a.hierarchy_rank);
            ranks.push(rank);
        }

        let edges = build_edges(
            pattern_type,
            &wf_phase.config.agent_ids,
            wf_phase.config.leader.as_deref(),
            &ranks,
        );

        Ok(PatternDef {
            id: format!("{}-{}", wf_phase.phase_id, wf_phase.pattern_id),
            name: wf_phase.name.clone(),
            pattern_type,
            agents: wf_phase
                .config
                .agent_ids
                .iter()
                .map(|id| PatternSlot {
                    node_id: id.clone(),
                    agent_id: Some(id.clone()),
                })
                .collect(),
            edges,
            config: PatternConfig {
                max_iterations: wf_phase.config.max_iterations,
                max_rounds: None,
                checkpoint_message: None,
            },
        })
    }

    /// Build the task prompt for one phase sprint.
    async fn build_phase_task(
        &self,
        mission: &MissionDef,
        wf_phase: &WorkflowPhase,
        phase_summaries: &[String],
        prev_context: &str,
        sprint_num: usize,
        max_sprints: usize,
    ) -> String {
        let mut parts = vec![format!(
            "[Phase: {}]\nMission: {}\nGoal: {}",
            wf_phase.name, mission.name, mission.brief
        )];

        if !phase_summaries.is_empty() {
            let recent: Vec<&String> = phase_summaries.iter().rev().take(5).rev().collect();
            parts.push(format!(
                "[Previous phases]\n{}",
                recent
                    .iter()
                    .map(|s| format!("- {s}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            ));
        }

        if max_sprints > 1 {
            parts.push(format!("[Sprint {sprint_num}/{max_sprints}]"));
        }

        if let Some(memory) = &self.memory {
            if let Ok(backlog) = memory
                .project_get(&mission.project_id, Some("product"), 5)
                .await
                && !backlog.is_empty()
            {
                parts.push(format!(
                    "[Backlog]\n{}",
                    backlog
                        .iter()
                        .map(|e| format!("- {}", crate::util::truncate(&e.value, 200)))
                        .collect::<Vec<_>>()
                        .join("\n")
                ));
            }
            if let Ok(notes) = memory
                .project_get(&mission.project_id, Some("architecture"), 5)
                .await
                && !notes.is_empty()
            {
                parts.push(format!(
                    "[Architecture notes]\n{}",
                    notes
                        .iter()
                        .map(|e| format!("- {}", crate::util::truncate(&e.value, 200)))
                        .collect::<Vec<_>>()
                        .join("\n")
                ));
            }
            if sprint_num > 1
                && let Ok(retros) = memory
                    .project_get(&mission.project_id, Some("retrospective"), 3)
                    .await
                && !retros.is_empty()
            {
                parts.push(format!(
                    "[Learnings from previous sprints]\n{}",
                    retros
                        .iter()
                        .map(|e| format!("- {}", crate::util::truncate(&e.value, 200)))
                        .collect::<Vec<_>>()
                        .join("\n")
                ));
            }
        }

        if !prev_context.is_empty() {
            parts.push(format!("[Feedback]\n{prev_context}"));
        }

        parts.join("\n\n")
    }

    /// Wait for out-of-band validation of a human-in-the-loop phase.
    ///
    /// Returns `Some(success)` once settled, or `None` when the mission
    /// failed terminally (already persisted and announced).
    async fn wait_for_validation(
        &self,
        mission: &mut MissionDef,
        mission_id: &str,
        phase_idx: usize,
        session_id: &str,
        phase_id: &str,
    ) -> Result<Option<bool>> {
        mission.phases[phase_idx].status = PhaseStatus::WaitingValidation;
        mission.status = MissionStatus::WaitingValidation;
        self.missions.update_mission(mission).await?;

        let deadline = tokio::time::Instant::now() + self.config.phase_timeout;
        let poll = Duration::from_secs(5).min(self.config.phase_timeout / 10).max(Duration::from_millis(50));
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(poll).await;
            let Some(current) = self.missions.get_mission(mission_id).await? else {
                break;
            };
            match current.phases.get(phase_idx).map(|p| p.status) {
                Some(PhaseStatus::WaitingValidation) => {}
                Some(PhaseStatus::Failed) => {
                    mission.phases[phase_idx].status = PhaseStatus::Failed;
                    mission.status = MissionStatus::Failed;
                    self.missions.update_mission(mission).await?;
                    self.emit(session_id, phase_id, EventPayload::MissionFailed {
                        error: "human validation rejected".to_owned(),
                    });
                    self.announce(session_id, "Human validation rejected the phase.").await;
                    return Ok(None);
                }
                Some(status) => {
                    mission.phases[phase_idx].status = status;
                    mission.status = MissionStatus::Running;
                    return Ok(Some(true));
                }
                None => break,
            }
        }

        // No answer: default to done.
        mission.phases[phase_idx].status = PhaseStatus::Done;
        mission.status = MissionStatus::Running;
        self.missions.update_mission(mission).await?;
        Ok(Some(true))
    }

    async fn fire_feedback(
        &self,
        mission: &MissionDef,
        phase_id: &str,
        success: bool,
        error: Option<&str>,
    ) {
        if DEPLOY_PHASES.contains(&phase_id) {
            let result = if success {
                self.hooks
                    .on_deploy_completed(&mission.project_id, &mission.id)
                    .await
            } else {
                self.hooks
                    .on_deploy_failed(&mission.project_id, &mission.id, error.unwrap_or("unknown"))
                    .await
            };
            if let Err(e) = result {
                warn!(error = %e, "deploy feedback hook failed");
            }
        }
        if FIX_PHASES.contains(&phase_id)
            && matches!(mission.mission_type.as_str(), "bug" | "program")
        {
            let incident_key = mission
                .config
                .get("incident_key")
                .and_then(Value::as_str)
                .unwrap_or(&mission.id)
                .to_owned();
            if let Err(e) = self
                .hooks
                .on_tma_incident_fixed(&mission.project_id, &incident_key)
                .await
            {
                warn!(error = %e, "TMA feedback hook failed");
            }
        }
    }

    /// LLM summary of the recent phase discussion (200 chars, 45 s cap).
    async fn summarize_phase(&self, session_id: &str, phase_name: &str) -> String {
        let messages = self.sessions.messages(session_id, 10).await.unwrap_or_default();
        let transcript: String = crate::util::truncate(
            &messages
                .iter()
                .map(|m| format!("{}: {}", m.from_agent, m.content))
                .collect::<Vec<_>>()
                .join("\n"),
            2000,
        );
        if transcript.is_empty() {
            return format!("{phase_name} completed.");
        }

        let prompt = format!(
            "Summarize this phase discussion in at most 200 characters, \
             keeping concrete decisions:\n{transcript}"
        );
        let options = ChatOptions {
            temperature: Some(0.2),
            max_tokens: Some(120),
            ..ChatOptions::default()
        };
        let summary = tokio::time::timeout(
            Duration::from_secs(45),
            self.llm.chat(&[LlmMessage::user(prompt)], &options),
        )
        .await;
        match summary {
            Ok(Ok(response)) if !response.content.trim().is_empty() => {
                crate::util::truncate(response.content.trim(), 200)
            }
            _ => crate::util::truncate(&transcript, 200),
        }
    }

    /// LLM sprint retrospective (300 chars, 30 s cap).
    async fn sprint_retrospective(&self, session_id: &str) -> String {
        let messages = self.sessions.messages(session_id, 10).await.unwrap_or_default();
        let transcript: String = crate::util::truncate(
            &messages
                .iter()
                .map(|m| format!("{}: {}", m.from_agent, m.content))
                .collect::<Vec<_>>()
                .join("\n"),
            2000,
        );
        if transcript.is_empty() {
            return String::new();
        }
        let prompt = format!(
            "Write a sprint retrospective in at most 300 characters: what \
             worked, what to improve next sprint.\n{transcript}"
        );
        let options = ChatOptions {
            temperature: Some(0.3),
            max_tokens: Some(150),
            ..ChatOptions::default()
        };
        match tokio::time::timeout(
            Duration::from_secs(30),
            self.llm.chat(&[LlmMessage::user(prompt)], &options),
        )
        .await
        {
            Ok(Ok(response)) => crate::util::truncate(response.content.trim(), 300),
            _ => String::new(),
        }
    }

    /// Files changed vs HEAD~1, when the workspace is a git repository.
    async fn measure_velocity(&self, workspace_path: &str) -> Option<u32> {
        if workspace_path.is_empty() {
            return None;
        }
        let workspace = std::path::Path::new(workspace_path);
        let out = self
            .sandbox
            .run(
                "git diff --name-only HEAD~1 2>/dev/null | wc -l",
                workspace,
                &std::collections::HashMap::new(),
                Duration::from_secs(30),
                None,
            )
            .await;
        if out.rc != 0 {
            return None;
        }
        out.stdout.trim().parse().ok()
    }

    /// Store the mission retrospective in project memory.
    async fn auto_retrospective(&self, mission: &MissionDef, phase_summaries: &[String]) {
        if phase_summaries.is_empty() {
            return;
        }
        self.store_memory(
            &mission.project_id,
            &format!("mission: {}", mission.name),
            &crate::util::truncate(&phase_summaries.join("\n"), 1000),
            "retrospective",
        )
        .await;
    }

    async fn store_memory(&self, project_id: &str, key: &str, value: &str, category: &str) {
        let Some(memory) = &self.memory else { return };
        if project_id.is_empty() || value.is_empty() {
            return;
        }
        let entry = MemoryEntry {
            project_id: project_id.to_owned(),
            key: key.to_owned(),
            value: value.to_owned(),
            category: category.to_owned(),
            source: "orchestrator".to_owned(),
            created_at: Utc::now(),
        };
        if let Err(e) = memory.project_store(&entry).await {
            warn!(error = %e, "memory store failed");
        }
    }

    async fn announce(&self, session_id: &str, text: &str) {
        let message = Message::system(session_id, text);
        if let Err(e) = self.sessions.add_message(&message).await {
            warn!(error = %e, "announcement persistence failed");
        }
    }

    fn emit(&self, session_id: &str, phase_id: &str, payload: EventPayload) {
        let event = SessionEvent::new(payload);
        let event = if phase_id.is_empty() {
            event
        } else {
            event.with_phase(phase_id)
        };
        self.bus.push(session_id, event);
    }
}
