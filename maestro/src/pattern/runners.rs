//! The ten pattern runners.
//!
//! Every runner mutates the [`PatternRun`] node map and leaves overall
//! success to the engine's final check; only explicit failures (QA
//! exhaustion) flip `run.success` directly. Worker fan-out is a bounded
//! fork-join: sibling failures never cancel each other.

use futures::future::join_all;

use crate::bus::EventPayload;
use crate::message::{Message, MessageKind};
use crate::model::{AgentDef, EdgeKind, NodeStatus, PatternDef, RoleBucket};

use super::compress;
use super::node::NodeOutcome;
use super::{PatternEngine, PatternRun};

/// Node ids in topological order over sequential/parallel edges.
#[must_use]
pub fn ordered_nodes(pattern: &PatternDef) -> Vec<String> {
    let node_ids: Vec<&str> = pattern.agents.iter().map(|s| s.node_id.as_str()).collect();
    let mut incoming: std::collections::HashMap<&str, Vec<&str>> =
        node_ids.iter().map(|id| (*id, Vec::new())).collect();
    for edge in &pattern.edges {
        if matches!(edge.kind, EdgeKind::Sequential | EdgeKind::Parallel)
            && incoming.contains_key(edge.from.as_str())
            && let Some(deps) = incoming.get_mut(edge.to.as_str())
        {
            deps.push(edge.from.as_str());
        }
    }

    let mut ordered: Vec<String> = Vec::new();
    let mut remaining: Vec<&str> = node_ids.clone();
    while !remaining.is_empty() {
        let mut ready: Vec<&str> = remaining
            .iter()
            .filter(|id| {
                incoming[*id]
                    .iter()
                    .all(|dep| ordered.iter().any(|o| o == dep))
            })
            .copied()
            .collect();
        if ready.is_empty() {
            // Cycle: append the rest in declaration order.
            ordered.extend(remaining.iter().map(|s| (*s).to_owned()));
            break;
        }
        ready.sort_by_key(|id| node_ids.iter().position(|n| n == id));
        for id in &ready {
            ordered.push((*id).to_owned());
        }
        remaining.retain(|id| !ready.contains(id));
    }
    ordered
}

/// Group nodes into dependency waves; nodes within a wave run in parallel.
#[must_use]
pub fn compute_waves(pattern: &PatternDef) -> Vec<Vec<String>> {
    let node_ids: Vec<&str> = pattern.agents.iter().map(|s| s.node_id.as_str()).collect();
    if node_ids.is_empty() {
        return Vec::new();
    }
    let mut incoming: std::collections::HashMap<&str, std::collections::HashSet<&str>> =
        node_ids.iter().map(|id| (*id, std::collections::HashSet::new())).collect();
    for edge in &pattern.edges {
        if incoming.contains_key(edge.from.as_str())
            && let Some(deps) = incoming.get_mut(edge.to.as_str())
        {
            deps.insert(edge.from.as_str());
        }
    }

    let mut waves: Vec<Vec<String>> = Vec::new();
    let mut done: std::collections::HashSet<&str> = std::collections::HashSet::new();
    let mut remaining: Vec<&str> = node_ids.clone();
    while !remaining.is_empty() {
        let mut wave: Vec<&str> = remaining
            .iter()
            .filter(|id| incoming[*id].is_subset(&done))
            .copied()
            .collect();
        if wave.is_empty() {
            // Cycle: one final wave with whatever is left.
            let mut rest: Vec<String> = remaining.iter().map(|s| (*s).to_owned()).collect();
            rest.sort();
            waves.push(rest);
            break;
        }
        wave.sort();
        done.extend(wave.iter().copied());
        remaining.retain(|id| !wave.contains(id));
        waves.push(wave.into_iter().map(str::to_owned).collect());
    }
    waves
}

/// Team roster block shown to every node.
fn roster(run: &PatternRun) -> String {
    let members: Vec<String> = run
        .pattern
        .agents
        .iter()
        .filter_map(|slot| {
            let state = run.nodes.get(&slot.node_id)?;
            state
                .agent
                .as_ref()
                .map(|a| format!("- {} ({})", a.name, a.role))
        })
        .collect();
    if members.is_empty() {
        String::new()
    } else {
        format!("[Team]\n{}", members.join("\n"))
    }
}

fn agent_of(run: &PatternRun, node_id: &str) -> Option<AgentDef> {
    run.nodes.get(node_id).and_then(|n| n.agent.clone())
}

fn agent_name(run: &PatternRun, node_id: &str) -> String {
    agent_of(run, node_id).map_or_else(|| node_id.to_owned(), |a| a.name)
}

fn agent_id_of(run: &PatternRun, node_id: &str) -> String {
    agent_of(run, node_id).map_or_else(|| node_id.to_owned(), |a| a.id)
}

fn set_running(run: &mut PatternRun, node_id: &str) {
    if let Some(state) = run.nodes.get_mut(node_id) {
        state.status = NodeStatus::Running;
    }
}

impl PatternEngine {
    /// Execute a batch of `(node_id, task, context)` concurrently.
    ///
    /// Errors of one worker never cancel siblings; a missing agent slot is
    /// skipped.
    async fn fan_out(
        &self,
        run: &mut PatternRun,
        batch: Vec<(String, String, Option<(String, String)>)>,
        to_agent: &str,
        flow_step: &str,
    ) {
        let meta = run.meta.clone();
        let team = roster(run);
        let mut jobs = Vec::new();
        for (node_id, task, context) in batch {
            let Some(agent) = agent_of(run, &node_id) else {
                continue;
            };
            set_running(run, &node_id);
            jobs.push((node_id, agent, task, context));
        }

        let futures = jobs.iter().map(|(node_id, agent, task, context)| {
            let meta = meta.clone();
            let team = team.clone();
            let to = to_agent.to_owned();
            let flow = flow_step.to_owned();
            async move {
                let ctx = context.as_ref().map(|(f, c)| (f.as_str(), c.as_str()));
                let outcome = self.run_node(&meta, agent, task, ctx, &to, &team, &flow).await;
                (node_id.clone(), outcome)
            }
        });

        let outcomes: Vec<(String, NodeOutcome)> = join_all(futures).await;
        for (node_id, outcome) in outcomes {
            run.apply(&node_id, outcome);
        }
    }

    /// Execute one node and apply the outcome.
    async fn step(
        &self,
        run: &mut PatternRun,
        node_id: &str,
        task: &str,
        context: Option<(&str, &str)>,
        to_agent: &str,
        flow_step: &str,
    ) -> String {
        run.flow_step = flow_step.to_owned();
        let Some(agent) = agent_of(run, node_id) else {
            return String::new();
        };
        set_running(run, node_id);
        let meta = run.meta.clone();
        let team = roster(run);
        let outcome = self
            .run_node(&meta, &agent, task, context, to_agent, &team, flow_step)
            .await;
        let output = outcome.output.clone();
        run.apply(node_id, outcome);
        output
    }

    /// Single-node execution.
    pub(crate) async fn run_solo(&self, run: &mut PatternRun, task: &str) -> crate::Result<()> {
        let node_id = run.node_order().remove(0);
        self.step(run, &node_id, task, None, "all", "Solo").await;
        Ok(())
    }

    /// Chain with accumulated compressed context; the last node addresses
    /// the first (round trip).
    pub(crate) async fn run_sequential(&self, run: &mut PatternRun, task: &str) -> crate::Result<()> {
        let order = ordered_nodes(&run.pattern);
        let mut accumulated: Vec<String> = Vec::new();
        let mut prev_name: Option<String> = None;

        for (i, node_id) in order.iter().enumerate() {
            let to_agent = if i + 1 < order.len() {
                agent_id_of(run, &order[i + 1])
            } else {
                agent_id_of(run, &order[0])
            };
            let context_text = compress::build_context(&accumulated);
            let context = prev_name
                .as_deref()
                .filter(|_| !context_text.is_empty())
                .map(|from| (from, context_text.as_str()));

            let flow = format!("Step {}/{}", i + 1, order.len());
            let output = self.step(run, node_id, task, context, &to_agent, &flow).await;

            let name = agent_name(run, node_id);
            accumulated.push(compress::entry(&name, &output));
            prev_name = Some(name);
        }
        Ok(())
    }

    /// Dispatcher fans work to parallel workers; an optional aggregator
    /// consolidates and reports back to the dispatcher.
    pub(crate) async fn run_parallel(&self, run: &mut PatternRun, task: &str) -> crate::Result<()> {
        let order = run.node_order();
        let dispatcher = order[0].clone();

        let mut workers: Vec<String> = run
            .pattern
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::Parallel && e.from == dispatcher)
            .map(|e| e.to.clone())
            .collect();
        if workers.is_empty() {
            workers = order.iter().skip(1).cloned().collect();
        }
        let aggregator = order
            .iter()
            .skip(1)
            .find(|id| !workers.contains(id))
            .cloned();
        if let Some(agg) = &aggregator {
            workers.retain(|w| w != agg);
        }

        let dispatch = self
            .step(run, &dispatcher, task, None, "all", "Dispatch")
            .await;
        let dispatcher_name = agent_name(run, &dispatcher);
        let dispatcher_id = agent_id_of(run, &dispatcher);

        let batch: Vec<(String, String, Option<(String, String)>)> = workers
            .iter()
            .map(|w| {
                (
                    w.clone(),
                    task.to_owned(),
                    Some((dispatcher_name.clone(), dispatch.clone())),
                )
            })
            .collect();
        self.fan_out(run, batch, &dispatcher_id, "Parallel work").await;

        if let Some(agg) = aggregator {
            let accumulated: Vec<String> = workers
                .iter()
                .filter_map(|w| run.nodes.get(w))
                .filter(|n| !n.output.is_empty())
                .map(|n| {
                    compress::entry(
                        &n.agent.as_ref().map_or_else(|| n.node_id.clone(), |a| a.name.clone()),
                        &n.output,
                    )
                })
                .collect();
            let context_text = compress::build_context(&accumulated);
            self.step(
                run,
                &agg,
                "Consolidate your team's outputs into one coherent result.",
                Some(("the team", context_text.as_str())),
                &dispatcher_id,
                "Consolidation",
            )
            .await;
        }
        Ok(())
    }

    /// Producer/reviewer iteration until the reviewer stops vetoing.
    pub(crate) async fn run_loop(&self, run: &mut PatternRun, task: &str) -> crate::Result<()> {
        let order = run.node_order();
        let producer = order[0].clone();
        let reviewer = order[1].clone();
        let reviewer_name = agent_name(run, &reviewer);
        let producer_name = agent_name(run, &producer);
        let reviewer_id = agent_id_of(run, &reviewer);
        let producer_id = agent_id_of(run, &producer);

        let mut feedback: Option<String> = None;
        for iteration in 1..=run.max_iterations {
            run.iteration = iteration;

            let produce_ctx = feedback
                .as_deref()
                .map(|f| (reviewer_name.as_str(), f));
            let produced = self
                .step(
                    run,
                    &producer,
                    task,
                    produce_ctx,
                    &reviewer_id,
                    &format!("Iteration {iteration}: produce"),
                )
                .await;

            self.step(
                run,
                &reviewer,
                "Review your colleague's work against the task. End with [APPROVE] or [VETO].",
                Some((producer_name.as_str(), &crate::util::truncate(&produced, 6000))),
                &producer_id,
                &format!("Iteration {iteration}: review"),
            )
            .await;

            let vetoed = run
                .nodes
                .get(&reviewer)
                .is_some_and(|n| n.status == NodeStatus::Vetoed);
            if !vetoed {
                break;
            }
            if iteration < run.max_iterations {
                feedback = run.nodes.get(&reviewer).map(|n| n.output.clone());
                run.reset_nodes();
            }
        }
        Ok(())
    }

    /// Manager decomposition, worker fan-out, manager completeness review,
    /// QA validation; vetoes restart the outer loop with feedback.
    pub(crate) async fn run_hierarchical(&self, run: &mut PatternRun, task: &str) -> crate::Result<()> {
        let order = run.node_order();

        let manager = order
            .iter()
            .find(|id| {
                agent_of(run, id).is_some_and(|a| {
                    a.hierarchy_rank <= 20 || a.role.to_lowercase().contains("lead")
                })
            })
            .cloned()
            .unwrap_or_else(|| order[0].clone());
        let qa_nodes: Vec<String> = order
            .iter()
            .filter(|id| **id != manager)
            .filter(|id| agent_of(run, id).is_some_and(|a| a.role_bucket() == RoleBucket::Qa))
            .cloned()
            .collect();
        let workers: Vec<String> = order
            .iter()
            .filter(|id| **id != manager && !qa_nodes.contains(id))
            .filter(|id| {
                agent_of(run, id).is_some_and(|a| {
                    a.hierarchy_rank >= 40 || a.role_bucket() == RoleBucket::Dev
                })
            })
            .cloned()
            .collect();
        let workers = if workers.is_empty() {
            order
                .iter()
                .filter(|id| **id != manager && !qa_nodes.contains(id))
                .cloned()
                .collect::<Vec<_>>()
        } else {
            workers
        };
        if workers.is_empty() {
            return Err(crate::Error::pattern("hierarchical pattern has no workers"));
        }

        let manager_name = agent_name(run, &manager);
        let manager_id = agent_id_of(run, &manager);
        let mut qa_feedback: Option<String> = None;

        for outer in 1..=self.config.hierarchical_max_outer {
            run.iteration = outer;

            let decompose_task = match &qa_feedback {
                None => format!(
                    "{task}\n\nDecompose this work into subtasks for your team, \
                     one line each as [SUBTASK N]: description."
                ),
                Some(feedback) => format!(
                    "{task}\n\nQA rejected the previous delivery:\n{feedback}\n\n\
                     Re-decompose the remaining work as [SUBTASK N]: description lines."
                ),
            };
            let decomposition = self
                .step(
                    run,
                    &manager,
                    &decompose_task,
                    None,
                    "all",
                    &format!("Decomposition (iteration {outer})"),
                )
                .await;

            let mut subtasks: Vec<String> =
                crate::executor::parse::parse_subtasks(&decomposition)
                    .into_iter()
                    .map(|(_, text)| text)
                    .collect();
            if subtasks.is_empty() {
                subtasks = vec![task.to_owned()];
            }

            // Inner loop: execute and let the manager judge completeness.
            for inner in 1..=self.config.hierarchical_max_inner {
                let batch: Vec<(String, String, Option<(String, String)>)> = subtasks
                    .iter()
                    .enumerate()
                    .map(|(i, subtask)| {
                        let worker = workers[i % workers.len()].clone();
                        (
                            worker,
                            subtask.clone(),
                            Some((manager_name.clone(), decomposition.clone())),
                        )
                    })
                    .collect();
                self.fan_out(
                    run,
                    batch,
                    &manager_id,
                    &format!("Execution (iteration {outer}.{inner})"),
                )
                .await;

                let worker_report = self.collect_outputs(run, &workers);
                let review = self
                    .step(
                        run,
                        &manager,
                        "Review your team's delivery for completeness. \
                         Answer with [COMPLETE] or [INCOMPLETE] plus any \
                         re-issued [SUBTASK N]: lines.",
                        Some(("the team", &worker_report)),
                        "all",
                        &format!("Completeness review (iteration {outer}.{inner})"),
                    )
                    .await;

                if review.to_uppercase().contains("[COMPLETE]")
                    || inner == self.config.hierarchical_max_inner
                {
                    break;
                }
                let reissued: Vec<String> = crate::executor::parse::parse_subtasks(&review)
                    .into_iter()
                    .map(|(_, text)| text)
                    .collect();
                if !reissued.is_empty() {
                    subtasks = reissued;
                }
            }

            // QA validation round.
            if qa_nodes.is_empty() {
                return Ok(());
            }
            let delivery = self.collect_outputs(run, &workers);
            let qa_batch: Vec<(String, String, Option<(String, String)>)> = qa_nodes
                .iter()
                .map(|qa| {
                    (
                        qa.clone(),
                        "Validate the delivered work. End with [APPROVE] or [VETO].".to_owned(),
                        Some((manager_name.clone(), delivery.clone())),
                    )
                })
                .collect();
            self.fan_out(
                run,
                qa_batch,
                &manager_id,
                &format!("QA validation (iteration {outer})"),
            )
            .await;

            let vetoes: Vec<String> = qa_nodes
                .iter()
                .filter_map(|qa| run.nodes.get(qa))
                .filter(|n| n.status == NodeStatus::Vetoed)
                .map(|n| n.output.clone())
                .collect();
            if vetoes.is_empty() {
                return Ok(());
            }
            if outer == self.config.hierarchical_max_outer {
                run.success = false;
                run.error = Some(format!(
                    "unresolved QA vetoes after {outer} iterations"
                ));
                return Ok(());
            }
            qa_feedback = Some(vetoes.join("\n\n"));
            run.reset_nodes();
        }
        Ok(())
    }

    /// Judge-moderated debate.
    pub(crate) async fn run_network(&self, run: &mut PatternRun, task: &str) -> crate::Result<()> {
        let order = run.node_order();
        let judge = order[0].clone();
        let debaters: Vec<String> = order.iter().skip(1).cloned().collect();
        let judge_name = agent_name(run, &judge);
        let judge_id = agent_id_of(run, &judge);
        let max_rounds = run
            .pattern
            .config
            .max_rounds
            .unwrap_or(self.config.network_max_rounds);

        let brief = self
            .step(
                run,
                &judge,
                &format!("{task}\n\nBrief your panel: frame the question and what a good answer covers."),
                None,
                "all",
                "Brief",
            )
            .await;

        let mut previous_round = brief;
        let mut previous_from = judge_name.clone();
        for round in 0..max_rounds {
            let flow = if round == 0 {
                "Analysis".to_owned()
            } else {
                format!("Debate round {}", round + 1)
            };
            let batch: Vec<(String, String, Option<(String, String)>)> = debaters
                .iter()
                .map(|d| {
                    (
                        d.clone(),
                        task.to_owned(),
                        Some((previous_from.clone(), previous_round.clone())),
                    )
                })
                .collect();
            self.fan_out(run, batch, &judge_id, &flow).await;
            run.iteration = round + 1;

            previous_round = self.collect_outputs(run, &debaters);
            previous_from = "the panel".to_owned();
        }

        self.step(
            run,
            &judge,
            "Synthesize the debate into a final recommendation.",
            Some(("the panel", &previous_round)),
            "all",
            "Synthesis",
        )
        .await;
        Ok(())
    }

    /// Classifier routes to one specialist who reports back.
    pub(crate) async fn run_router(&self, run: &mut PatternRun, task: &str) -> crate::Result<()> {
        let order = run.node_order();
        let router = order[0].clone();
        let specialists: Vec<String> = order.iter().skip(1).cloned().collect();

        let specialist_list = specialists
            .iter()
            .map(|s| format!("- {} ({})", s, agent_name(run, s)))
            .collect::<Vec<_>>()
            .join("\n");
        let routing = self
            .step(
                run,
                &router,
                &format!(
                    "{task}\n\nClassify this request and pick ONE specialist. \
                     Answer with [ROUTE: node_id].\nSpecialists:\n{specialist_list}"
                ),
                None,
                "all",
                "Routing",
            )
            .await;

        let chosen = crate::executor::parse::parse_route(&routing)
            .filter(|id| specialists.contains(id))
            .unwrap_or_else(|| specialists[0].clone());

        let router_name = agent_name(run, &router);
        let router_id = agent_id_of(run, &router);
        self.step(
            run,
            &chosen,
            task,
            Some((router_name.as_str(), &routing)),
            &router_id,
            &format!("Execution ({chosen})"),
        )
        .await;
        Ok(())
    }

    /// Contributors in parallel, one aggregator consolidates.
    pub(crate) async fn run_aggregator(&self, run: &mut PatternRun, task: &str) -> crate::Result<()> {
        let order = run.node_order();
        let aggregator = run
            .pattern
            .edges
            .iter()
            .find(|e| e.kind == EdgeKind::Aggregate)
            .map(|e| e.to.clone())
            .unwrap_or_else(|| order[order.len() - 1].clone());
        let contributors: Vec<String> = order
            .iter()
            .filter(|id| **id != aggregator)
            .cloned()
            .collect();

        let aggregator_id = agent_id_of(run, &aggregator);
        let batch: Vec<(String, String, Option<(String, String)>)> = contributors
            .iter()
            .map(|c| (c.clone(), task.to_owned(), None))
            .collect();
        self.fan_out(run, batch, &aggregator_id, "Contribution").await;

        let contributions = self.collect_outputs(run, &contributors);
        self.step(
            run,
            &aggregator,
            "Consolidate the contributions into one coherent deliverable.",
            Some(("the team", &contributions)),
            "all",
            "Consolidation",
        )
        .await;
        Ok(())
    }

    /// Dependency waves: parallel inside a wave, sequential across waves.
    pub(crate) async fn run_wave(&self, run: &mut PatternRun, task: &str) -> crate::Result<()> {
        let waves = compute_waves(&run.pattern);
        let mut accumulated: Vec<String> = Vec::new();

        for (i, wave) in waves.iter().enumerate() {
            let context_text = compress::build_context(&accumulated);
            let context = (!context_text.is_empty())
                .then(|| ("previous waves".to_owned(), context_text.clone()));

            let batch: Vec<(String, String, Option<(String, String)>)> = wave
                .iter()
                .map(|node_id| (node_id.clone(), task.to_owned(), context.clone()))
                .collect();
            self.fan_out(run, batch, "all", &format!("Wave {}/{}", i + 1, waves.len()))
                .await;

            for node_id in wave {
                if let Some(state) = run.nodes.get(node_id)
                    && !state.output.is_empty()
                {
                    let name = state
                        .agent
                        .as_ref()
                        .map_or_else(|| node_id.clone(), |a| a.name.clone());
                    accumulated.push(compress::entry(&name, &state.output));
                }
            }
        }
        Ok(())
    }

    /// Sequential flow with non-blocking human checkpoints.
    pub(crate) async fn run_hitl(&self, run: &mut PatternRun, task: &str) -> crate::Result<()> {
        let order = run.node_order();
        let mut accumulated: Vec<String> = Vec::new();
        let mut prev_name: Option<String> = None;

        for (i, node_id) in order.iter().enumerate() {
            let is_human = run
                .nodes
                .get(node_id)
                .is_some_and(|n| n.agent.is_none());

            if is_human {
                run.flow_step = "Human checkpoint".to_owned();
                let message = run
                    .pattern
                    .config
                    .checkpoint_message
                    .clone()
                    .unwrap_or_else(|| "Human validation requested.".to_owned());
                self.bus.push(
                    &run.meta.session_id,
                    self.event(&run.meta, EventPayload::Checkpoint {
                        message: message.clone(),
                        requires_input: true,
                    }),
                );
                let checkpoint = Message::new(
                    &run.meta.session_id,
                    "system",
                    "all",
                    MessageKind::Checkpoint,
                    message,
                );
                if let Err(e) = self.sessions.add_message(&checkpoint).await {
                    tracing::warn!(error = %e, "checkpoint persistence failed");
                }
                // The engine does not block; validation is handled by the
                // orchestrator out-of-band.
                if let Some(state) = run.nodes.get_mut(node_id) {
                    state.status = NodeStatus::Completed;
                }
                continue;
            }

            let context_text = compress::build_context(&accumulated);
            let context = prev_name
                .as_deref()
                .filter(|_| !context_text.is_empty())
                .map(|from| (from, context_text.as_str()));
            let flow = format!("Step {}/{}", i + 1, order.len());
            let output = self.step(run, node_id, task, context, "all", &flow).await;
            let name = agent_name(run, node_id);
            accumulated.push(compress::entry(&name, &output));
            prev_name = Some(name);
        }
        Ok(())
    }

    /// Concatenate the outputs of a node set as compressed entries.
    fn collect_outputs(&self, run: &PatternRun, node_ids: &[String]) -> String {
        let entries: Vec<String> = node_ids
            .iter()
            .filter_map(|id| run.nodes.get(id))
            .filter(|n| !n.output.is_empty())
            .map(|n| {
                compress::entry(
                    &n.agent.as_ref().map_or_else(|| n.node_id.clone(), |a| a.name.clone()),
                    &n.output,
                )
            })
            .collect();
        compress::build_context(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EdgeDef, PatternConfig, PatternSlot, PatternType};

    fn pattern(nodes: &[&str], edges: Vec<EdgeDef>) -> PatternDef {
        PatternDef {
            id: "p".into(),
            name: "p".into(),
            pattern_type: PatternType::Wave,
            agents: nodes
                .iter()
                .map(|n| PatternSlot {
                    node_id: (*n).to_owned(),
                    agent_id: Some((*n).to_owned()),
                })
                .collect(),
            edges,
            config: PatternConfig::default(),
        }
    }

    #[test]
    fn ordered_nodes_follows_edges() {
        let p = pattern(&["b", "a"], vec![EdgeDef::new("a", "b", EdgeKind::Sequential)]);
        assert_eq!(ordered_nodes(&p), vec!["a", "b"]);
    }

    #[test]
    fn ordered_nodes_survives_cycles() {
        let p = pattern(
            &["a", "b"],
            vec![
                EdgeDef::new("a", "b", EdgeKind::Sequential),
                EdgeDef::new("b", "a", EdgeKind::Sequential),
            ],
        );
        let order = ordered_nodes(&p);
        assert_eq!(order.len(), 2);
    }

    #[test]
    fn waves_group_by_dependency_depth() {
        let p = pattern(
            &["a", "b", "c", "d"],
            vec![
                EdgeDef::new("a", "c", EdgeKind::Sequential),
                EdgeDef::new("b", "c", EdgeKind::Sequential),
                EdgeDef::new("c", "d", EdgeKind::Sequential),
            ],
        );
        assert_eq!(compute_waves(&p), vec![
            vec!["a".to_owned(), "b".to_owned()],
            vec!["c".to_owned()],
            vec!["d".to_owned()],
        ]);
    }

    #[test]
    fn waves_handle_independent_nodes() {
        let p = pattern(&["x", "y"], vec![]);
        assert_eq!(compute_waves(&p), vec![vec!["x".to_owned(), "y".to_owned()]]);
    }
}
