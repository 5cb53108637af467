//! Watchdog and auto-resume integration tests.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use maestro::config::WatchdogConfig;
use maestro::model::{MissionDef, MissionStatus, PhaseState};
use maestro::store::{MissionStore, SessionDef, SessionStatus, SessionStore, SqliteStore};
use maestro::watchdog::{MissionResumer, Watchdog};

/// A resumer that always fails and counts invocations.
#[derive(Default)]
struct FailingResumer {
    resumes: AtomicUsize,
    retries: AtomicUsize,
}

#[async_trait::async_trait]
impl MissionResumer for FailingResumer {
    async fn resume(&self, _mission_id: &str) -> maestro::Result<()> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        Err(maestro::Error::mission("resume blew up"))
    }

    async fn retry_stalled(&self, _mission_id: &str) -> maestro::Result<()> {
        self.retries.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn paused_mission(id: &str) -> MissionDef {
    let now = Utc::now();
    MissionDef {
        id: id.to_owned(),
        project_id: "p1".into(),
        name: "M".into(),
        brief: "b".into(),
        status: MissionStatus::Paused,
        workflow_id: "w".into(),
        phases: vec![PhaseState::pending("dev")],
        current_phase: 0,
        workspace_path: String::new(),
        resume_attempts: 0,
        last_resume_at: None,
        human_input_required: false,
        config: serde_json::json!({"session_id": "s1"}),
        mission_type: "feature".into(),
        category: "core".into(),
        created_at: now,
        updated_at: now,
    }
}

fn watchdog(store: &Arc<SqliteStore>, resumer: Arc<FailingResumer>) -> Watchdog {
    Watchdog::new(
        Arc::clone(store) as Arc<dyn MissionStore>,
        Arc::clone(store) as Arc<dyn SessionStore>,
        Arc::clone(store) as Arc<dyn maestro::store::MetricsSink>,
        resumer,
        WatchdogConfig::default(),
    )
}

async fn settle() {
    // Let detached resume tasks finish.
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// The resume/backoff/abandon ladder: a failing resume reverts the run
/// to paused, backoff gates the next attempt, and exhaustion abandons.
#[tokio::test]
async fn resume_backoff_and_abandon_ladder() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let resumer = Arc::new(FailingResumer::default());
    let dog = watchdog(&store, Arc::clone(&resumer));

    store.create_mission(&paused_mission("m1")).await.unwrap();

    // First pass: attempts 0 -> 1, resume fails, revert to paused.
    dog.resume_pass().await.unwrap();
    settle().await;
    let m = store.get_mission("m1").await.unwrap().unwrap();
    assert_eq!(m.resume_attempts, 1);
    assert!(m.last_resume_at.is_some());
    assert_eq!(m.status, MissionStatus::Paused);
    assert_eq!(resumer.resumes.load(Ordering::SeqCst), 1);

    // Immediately after: backoff (5 min for attempt 1) not elapsed.
    dog.resume_pass().await.unwrap();
    settle().await;
    let m = store.get_mission("m1").await.unwrap().unwrap();
    assert_eq!(m.resume_attempts, 1);

    // Rewind last_resume_at past the backoff: eligible again.
    let mut m = m;
    m.last_resume_at = Some(Utc::now() - chrono::Duration::minutes(6));
    store.update_mission(&m).await.unwrap();
    dog.resume_pass().await.unwrap();
    settle().await;
    let m = store.get_mission("m1").await.unwrap().unwrap();
    assert_eq!(m.resume_attempts, 2);
    assert_eq!(m.status, MissionStatus::Paused);

    // At the attempt cap the run is not retried and gets abandoned.
    let mut m = m;
    m.resume_attempts = 5;
    m.last_resume_at = Some(Utc::now() - chrono::Duration::hours(2));
    store.update_mission(&m).await.unwrap();
    dog.resume_pass().await.unwrap();
    settle().await;
    let m = store.get_mission("m1").await.unwrap().unwrap();
    assert_eq!(m.resume_attempts, 5);
    assert_eq!(m.status, MissionStatus::Abandoned);
    assert_eq!(resumer.resumes.load(Ordering::SeqCst), 2);
}

/// Runs waiting on human input are never auto-resumed or abandoned.
#[tokio::test]
async fn human_input_blocks_resume() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let resumer = Arc::new(FailingResumer::default());
    let dog = watchdog(&store, Arc::clone(&resumer));

    let mut m = paused_mission("m1");
    m.human_input_required = true;
    m.resume_attempts = 5;
    store.create_mission(&m).await.unwrap();

    dog.resume_pass().await.unwrap();
    settle().await;
    let m = store.get_mission("m1").await.unwrap().unwrap();
    assert_eq!(m.status, MissionStatus::Paused);
    assert_eq!(resumer.resumes.load(Ordering::SeqCst), 0);
}

/// Stalled running missions get a bounded number of retries per cycle.
#[tokio::test]
async fn stalled_missions_are_retried() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let resumer = Arc::new(FailingResumer::default());
    let dog = watchdog(&store, Arc::clone(&resumer));

    for i in 0..5 {
        let mut m = paused_mission(&format!("m{i}"));
        m.status = MissionStatus::Running;
        m.updated_at = Utc::now() - chrono::Duration::seconds(1000);
        store.create_mission(&m).await.unwrap();
    }

    dog.tick().await.unwrap();
    // Max three retries per cycle.
    assert_eq!(resumer.retries.load(Ordering::SeqCst), 3);
}

/// Zombie cleanup fails long-stale running runs and abandons old paused
/// ones.
#[tokio::test]
async fn zombie_cleanup_transitions_stale_runs() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let resumer = Arc::new(FailingResumer::default());
    let dog = watchdog(&store, resumer);

    let mut running = paused_mission("running-zombie");
    running.status = MissionStatus::Running;
    running.updated_at = Utc::now() - chrono::Duration::hours(7);
    store.create_mission(&running).await.unwrap();

    let mut paused = paused_mission("paused-zombie");
    paused.updated_at = Utc::now() - chrono::Duration::hours(25);
    store.create_mission(&paused).await.unwrap();

    let mut fresh = paused_mission("fresh");
    fresh.status = MissionStatus::Running;
    store.create_mission(&fresh).await.unwrap();

    dog.zombie_tick().await.unwrap();

    let running = store.get_mission("running-zombie").await.unwrap().unwrap();
    assert_eq!(running.status, MissionStatus::Failed);
    assert_eq!(running.config["zombie"], "stale for >6h");

    let paused = store.get_mission("paused-zombie").await.unwrap().unwrap();
    assert_eq!(paused.status, MissionStatus::Abandoned);

    let fresh = store.get_mission("fresh").await.unwrap().unwrap();
    assert_eq!(fresh.status, MissionStatus::Running);
}

/// Stale active sessions are interrupted and their running mission
/// paused.
#[tokio::test]
async fn stale_session_recovery() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let resumer = Arc::new(FailingResumer::default());
    let dog = watchdog(&store, resumer);

    let mut session = SessionDef::new("s1", "p1");
    session.updated_at = Utc::now() - chrono::Duration::hours(1);
    session.created_at = session.updated_at;
    store.create_session(&session).await.unwrap();

    let mut m = paused_mission("m1");
    m.status = MissionStatus::Running;
    store.create_mission(&m).await.unwrap();

    // Stale recovery runs on even cycles.
    dog.tick().await.unwrap();
    dog.tick().await.unwrap();

    let session = store.get_session("s1").await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Interrupted);
    let m = store.get_mission("m1").await.unwrap().unwrap();
    assert_eq!(m.status, MissionStatus::Paused);
}
