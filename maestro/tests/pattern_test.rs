//! Pattern engine integration tests with a scripted provider.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;

use maestro::llm::{LlmClient, MockProvider, MockReply};
use maestro::model::{PatternConfig, PatternDef, PatternSlot, PatternType};
use maestro::prelude::*;

fn agent(id: &str, name: &str, role: &str, rank: u8) -> AgentDef {
    AgentDef::new(id, name, role).with_rank(rank)
}

struct Harness {
    engine: PatternEngine,
    store: Arc<SqliteStore>,
    bus: Arc<EventBus>,
    provider: Arc<MockProvider>,
}

async fn harness(replies: Vec<MockReply>, agents: Vec<AgentDef>) -> Harness {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    for a in &agents {
        store.upsert_agent(a).await.unwrap();
    }
    store
        .create_session(&maestro::store::SessionDef::new("s1", "p1"))
        .await
        .unwrap();

    let provider = Arc::new(MockProvider::new(replies));
    let llm = LlmClient::new(Arc::clone(&provider) as Arc<dyn ChatProvider>, 8);
    let mut registry = ToolRegistry::new();
    register_builtins(&mut registry);
    let executor = Executor::new(
        llm.clone(),
        Arc::new(registry),
        Arc::new(Guardrails::default()),
        Arc::new(Sandbox::default()),
        EngineConfig::default(),
    )
    .with_sessions(Arc::clone(&store) as Arc<dyn SessionStore>);

    let bus = Arc::new(EventBus::default());
    let engine = PatternEngine::new(
        executor,
        llm,
        Arc::clone(&bus),
        Arc::clone(&store) as Arc<dyn SessionStore>,
        Arc::clone(&store) as Arc<dyn AgentStore>,
        EngineConfig::default(),
    )
    .with_memory(Arc::clone(&store) as Arc<dyn MemoryStore>);

    Harness {
        engine,
        store,
        bus,
        provider,
    }
}

fn pattern(pattern_type: PatternType, agent_ids: &[&str]) -> PatternDef {
    let ids: Vec<String> = agent_ids.iter().map(|s| (*s).to_owned()).collect();
    let ranks = vec![50u8; ids.len()];
    PatternDef {
        id: "test-pattern".into(),
        name: "test".into(),
        pattern_type,
        agents: ids
            .iter()
            .map(|id| PatternSlot {
                node_id: id.clone(),
                agent_id: Some(id.clone()),
            })
            .collect(),
        edges: build_edges(pattern_type, &ids, None, &ranks),
        config: PatternConfig::default(),
    }
}

/// Sequential review with approve: both nodes complete, both messages
/// are approvals, the run succeeds.
#[tokio::test]
async fn sequential_review_with_approve() {
    let h = harness(
        vec![
            MockReply::text(
                "Reviewed the specification end to end; scope and interfaces \
                 are coherent and the error cases are covered. STATUT: GO",
            ),
            MockReply::text("[APPROVE] Good coverage of the edge cases."),
        ],
        vec![
            agent("alice", "Alice", "Product Owner", 30),
            agent("bob", "Bob", "Product Owner", 30),
        ],
    )
    .await;

    let run = h
        .engine
        .run_pattern(PatternRequest::new(
            pattern(PatternType::Sequential, &["alice", "bob"]),
            "s1",
            "Review spec X.",
        ))
        .await;

    assert!(run.success, "error: {:?}", run.error);
    assert_eq!(run.nodes["alice"].status, NodeStatus::Completed);
    assert_eq!(run.nodes["bob"].status, NodeStatus::Completed);

    let messages = h.store.messages("s1", 20).await.unwrap();
    let approvals = messages
        .iter()
        .filter(|m| m.kind == MessageKind::Approve)
        .count();
    assert_eq!(approvals, 2);
    assert_eq!(h.provider.calls(), 2);
}

/// Adversarial loop with one veto: producer and reviewer both execute
/// twice, final statuses are completed, iteration is 2.
#[tokio::test]
async fn loop_with_one_veto() {
    let code = format!(
        "Implemented the login endpoint with session issuance and password \
         hashing. {}\n- [PR] Add login endpoint — src/auth/login.rs",
        "The handler validates the payload shape and returns typed errors. ".repeat(4)
    );
    let h = harness(
        vec![
            MockReply::text(code.as_str()),
            MockReply::text("[VETO] Missing input validation on the email field."),
            MockReply::text(format!("{code}\nAdded strict input validation for email.")),
            MockReply::text("[APPROVE] Validation is in place."),
        ],
        vec![
            agent("dev", "Devon", "Backend Dev", 60),
            agent("qa", "Quinn", "QA Engineer", 40),
        ],
    )
    .await;

    let mut def = pattern(PatternType::Loop, &["dev", "qa"]);
    def.config.max_iterations = Some(3);
    let run = h
        .engine
        .run_pattern(PatternRequest::new(def, "s1", "Implement login."))
        .await;

    assert!(run.success, "error: {:?}", run.error);
    assert_eq!(run.iteration, 2);
    assert_eq!(run.nodes["dev"].status, NodeStatus::Completed);
    assert_eq!(run.nodes["qa"].status, NodeStatus::Completed);
    assert_eq!(h.provider.calls(), 4);
}

/// Hierarchical reloop on QA veto: the second outer iteration clears the
/// veto and the run succeeds.
#[tokio::test]
async fn hierarchical_reloop_on_qa_veto() {
    let work = format!(
        "Delivered the assigned subtask with the agreed interfaces. {}\n\
         - [PR] Implement subtask — src/feature.rs",
        "All call sites compile against the new signatures. ".repeat(4)
    );
    let h = harness(
        vec![
            // Outer 1
            MockReply::text("[SUBTASK 1]: implement the feature core\n[SUBTASK 2]: wire the API"),
            MockReply::text(work.as_str()),
            MockReply::text(work.as_str()),
            MockReply::text("[COMPLETE] Both subtasks are delivered."),
            MockReply::text("[VETO] Missing tests for the API layer."),
            // Outer 2
            MockReply::text("[SUBTASK 1]: add API tests\n[SUBTASK 2]: harden error paths"),
            MockReply::text(work.as_str()),
            MockReply::text(work.as_str()),
            MockReply::text("[COMPLETE] Tests added and passing review."),
            MockReply::text("[APPROVE] Coverage is adequate now."),
        ],
        vec![
            agent("lead", "Lena", "Lead Dev", 10),
            agent("dev1", "Devon", "Backend Dev", 60),
            agent("dev2", "Dana", "Frontend Dev", 60),
            agent("qa", "Quinn", "QA Engineer", 40),
        ],
    )
    .await;

    let run = h
        .engine
        .run_pattern(PatternRequest::new(
            pattern(PatternType::Hierarchical, &["lead", "dev1", "dev2", "qa"]),
            "s1",
            "Build the feature.",
        ))
        .await;

    assert!(run.success, "error: {:?}", run.error);
    assert_eq!(run.iteration, 2);
    for node in ["lead", "dev1", "dev2", "qa"] {
        assert_eq!(run.nodes[node].status, NodeStatus::Completed, "{node}");
    }
    assert_eq!(h.provider.calls(), 10);
}

/// Exhausted QA vetoes fail the run with the veto recorded.
#[tokio::test]
async fn hierarchical_exhaustion_fails() {
    let work = format!(
        "Delivered the subtask as specified. {}",
        "The implementation follows the agreed design. ".repeat(5)
    );
    // Every outer iteration: decompose, worker, review, veto.
    let h = harness(
        vec![
            MockReply::text("[SUBTASK 1]: do the work"),
            MockReply::text(work.as_str()),
            MockReply::text("[COMPLETE]"),
            MockReply::text("[VETO] Still not good enough."),
        ],
        vec![
            agent("lead", "Lena", "Lead Dev", 10),
            agent("dev1", "Devon", "Backend Dev", 60),
            agent("qa", "Quinn", "QA Engineer", 40),
        ],
    )
    .await;

    let run = h
        .engine
        .run_pattern(PatternRequest::new(
            pattern(PatternType::Hierarchical, &["lead", "dev1", "qa"]),
            "s1",
            "Build it.",
        ))
        .await;

    assert!(!run.success);
    assert!(run.error.as_deref().unwrap().contains("unresolved QA vetoes"));
    assert_eq!(run.nodes["qa"].status, NodeStatus::Vetoed);
}

/// A pattern with zero agents returns immediately: success, no messages.
#[tokio::test]
async fn empty_pattern_succeeds_immediately() {
    let h = harness(vec![MockReply::text("never called")], vec![]).await;
    let def = PatternDef {
        id: "empty".into(),
        name: "empty".into(),
        pattern_type: PatternType::Sequential,
        agents: vec![],
        edges: vec![],
        config: PatternConfig::default(),
    };
    let run = h
        .engine
        .run_pattern(PatternRequest::new(def, "s1", "nothing"))
        .await;
    assert!(run.success);
    assert!(run.finished);
    assert_eq!(h.provider.calls(), 0);
    assert!(h.store.messages("s1", 10).await.unwrap().is_empty());
}

/// A single-node pattern behaves as solo regardless of declared type.
#[tokio::test]
async fn single_node_reduces_to_solo() {
    for pattern_type in [
        PatternType::Parallel,
        PatternType::Hierarchical,
        PatternType::Network,
    ] {
        let h = harness(
            vec![MockReply::text(
                "Analysis of the request with a concrete recommendation: \
                 proceed with the proposed architecture as outlined, the \
                 tradeoffs have been weighed and documented.",
            )],
            vec![agent("solo", "Sol", "Architect", 20)],
        )
        .await;
        let run = h
            .engine
            .run_pattern(PatternRequest::new(
                pattern(pattern_type, &["solo"]),
                "s1",
                "Assess.",
            ))
            .await;
        assert!(run.success, "{pattern_type:?}: {:?}", run.error);
        assert_eq!(run.nodes["solo"].status, NodeStatus::Completed);
        assert_eq!(h.provider.calls(), 1, "{pattern_type:?}");
    }
}

/// Pattern events carry the phase id and end with pattern_end.
#[tokio::test]
async fn pattern_emits_start_and_end_events() {
    use futures::StreamExt as _;

    let h = harness(
        vec![MockReply::text(
            "Completed the assessment with a documented recommendation \
             covering rollout, risks, and the fallback plan in detail.",
        )],
        vec![agent("solo", "Sol", "Architect", 20)],
    )
    .await;

    let mut events = Box::pin(h.bus.subscribe("s1"));
    let mut request = PatternRequest::new(pattern(PatternType::Solo, &["solo"]), "s1", "Go.");
    request.phase_id = "plan".into();
    let run = h.engine.run_pattern(request).await;
    assert!(run.success);

    let mut saw_start = false;
    let mut saw_end = false;
    while let Some(event) = events.next().await {
        match event.payload {
            EventPayload::PatternStart { .. } => {
                assert_eq!(event.phase_id.as_deref(), Some("plan"));
                saw_start = true;
            }
            EventPayload::PatternEnd { success, .. } => {
                assert!(success);
                saw_end = true;
                break;
            }
            _ => {}
        }
    }
    assert!(saw_start && saw_end);
}
