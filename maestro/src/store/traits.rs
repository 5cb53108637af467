//! Repository traits the engine consumes.
//!
//! The engine never touches a database directly; it talks to these
//! narrow interfaces. The bundled implementation is
//! [`SqliteStore`](super::sqlite::SqliteStore); tests may substitute
//! in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::message::{Artifact, Message};
use crate::model::{AgentDef, MissionDef, MissionStatus, SprintDef};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Accepting messages.
    Active,
    /// Recovered by the watchdog after going stale.
    Interrupted,
    /// Suspended with its run.
    Paused,
    /// Terminally failed.
    Failed,
    /// Finished normally.
    Completed,
}

/// One conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDef {
    /// Stable identifier.
    pub id: String,
    /// Owning project.
    pub project_id: String,
    /// Current status.
    pub status: SessionStatus,
    /// Free-form configuration (cached history summary lives here).
    #[serde(default)]
    pub config: Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last activity timestamp.
    pub updated_at: DateTime<Utc>,
}

impl SessionDef {
    /// Fresh active session.
    #[must_use]
    pub fn new(id: impl Into<String>, project_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            project_id: project_id.into(),
            status: SessionStatus::Active,
            config: Value::Null,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A project owning missions and a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDef {
    /// Stable identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Description fed into agent prompts.
    #[serde(default)]
    pub description: String,
    /// Product vision fed into agent prompts.
    #[serde(default)]
    pub vision: String,
    /// Workspace filesystem path.
    #[serde(default)]
    pub workspace_path: String,
    /// Whether TMA incident monitoring is active.
    #[serde(default)]
    pub tma_monitoring: bool,
}

/// One project-memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Owning project (empty for global memory).
    pub project_id: String,
    /// Entry key; storing again with the same key replaces the value.
    pub key: String,
    /// Entry value.
    pub value: String,
    /// Category ("architecture", "decisions", "phase-summary", ...).
    pub category: String,
    /// Producer ("agent:<id>", "orchestrator", ...).
    pub source: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Append-only session and message store.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a session.
    async fn get_session(&self, session_id: &str) -> Result<Option<SessionDef>>;
    /// Create a session.
    async fn create_session(&self, session: &SessionDef) -> Result<()>;
    /// Append a message. Durable before returning.
    async fn add_message(&self, message: &Message) -> Result<()>;
    /// Most recent `limit` messages in chronological order.
    async fn messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>>;
    /// Update session status and touch `updated_at`.
    async fn update_session_status(&self, session_id: &str, status: SessionStatus) -> Result<()>;
    /// Record a file artifact.
    async fn add_artifact(&self, artifact: &Artifact) -> Result<()>;
    /// Sessions in a status whose most recent message is older than `cutoff`.
    async fn sessions_stale_since(
        &self,
        status: SessionStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SessionDef>>;
}

/// Mission and sprint persistence.
#[async_trait]
pub trait MissionStore: Send + Sync {
    /// Fetch a mission.
    async fn get_mission(&self, mission_id: &str) -> Result<Option<MissionDef>>;
    /// Create a mission.
    async fn create_mission(&self, mission: &MissionDef) -> Result<()>;
    /// Persist the full mission state and touch `updated_at`.
    async fn update_mission(&self, mission: &MissionDef) -> Result<()>;
    /// Missions currently in `status`.
    async fn missions_in_status(&self, status: MissionStatus) -> Result<Vec<MissionDef>>;
    /// Missions in `status` untouched since `cutoff`.
    async fn missions_stale_since(
        &self,
        status: MissionStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MissionDef>>;
    /// Record a sprint.
    async fn create_sprint(&self, sprint: &SprintDef) -> Result<()>;
    /// Update a sprint's retrospective and velocity.
    async fn update_sprint(&self, sprint: &SprintDef) -> Result<()>;
}

/// Project registry.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Fetch a project.
    async fn get_project(&self, project_id: &str) -> Result<Option<ProjectDef>>;
    /// All projects.
    async fn list_projects(&self) -> Result<Vec<ProjectDef>>;
    /// Update a project.
    async fn update_project(&self, project: &ProjectDef) -> Result<()>;
}

/// Agent registry, read-mostly.
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Fetch an agent definition.
    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentDef>>;
    /// All agents.
    async fn list_agents(&self) -> Result<Vec<AgentDef>>;
}

/// Key-value project/global memory.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Append or replace a project entry by key.
    async fn project_store(&self, entry: &MemoryEntry) -> Result<()>;
    /// Recent project entries, optionally filtered by category.
    async fn project_get(
        &self,
        project_id: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>>;
    /// Substring search within a project's memory.
    async fn project_search(
        &self,
        project_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>>;
    /// Substring search across all memory.
    async fn global_search(&self, query: &str, limit: usize) -> Result<Vec<MemoryEntry>>;
}

/// Watchdog metrics sink (`endurance_metrics` rows).
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Record one metric observation.
    async fn record_metric(&self, metric: &str, value: f64, detail: &str) -> Result<()>;
}
