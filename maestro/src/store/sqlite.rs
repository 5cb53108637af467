//! SQLite-backed stores.
//!
//! One [`SqliteStore`] implements every repository trait the engine
//! consumes. Uses [`rusqlite`] behind `Arc<Mutex<Connection>>`, bridged
//! to async via [`tokio::task::spawn_blocking`]; WAL journal mode and
//! per-table indexes keep concurrent reads cheap. Schema is auto-created
//! and versioned through `schema_version`.
//!
//! Missions persist as scalar columns (the watchdog queries status and
//! `updated_at`) plus a JSON document for the rest; phases are
//! first-class rows in the `phases` table.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension as _, params};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::guard::{AuditLog, AuditRecord};
use crate::message::{Artifact, Message, MessageKind};
use crate::model::{AgentDef, MissionDef, MissionStatus, PhaseState, PhaseStatus, SprintDef};

use super::traits::{
    AgentStore, MemoryEntry, MemoryStore, MetricsSink, MissionStore, ProjectDef, ProjectStore,
    SessionDef, SessionStatus, SessionStore,
};

const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS agents (
    id   TEXT PRIMARY KEY,
    data TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS projects (
    id   TEXT PRIMARY KEY,
    data TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS missions (
    id                   TEXT PRIMARY KEY,
    project_id           TEXT NOT NULL,
    status               TEXT NOT NULL,
    resume_attempts      INTEGER NOT NULL DEFAULT 0,
    last_resume_at       TEXT,
    human_input_required INTEGER NOT NULL DEFAULT 0,
    workspace_path       TEXT NOT NULL DEFAULT '',
    data                 TEXT NOT NULL,
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_missions_status ON missions (status, updated_at);

CREATE TABLE IF NOT EXISTS phases (
    mission_id   TEXT NOT NULL REFERENCES missions(id) ON DELETE CASCADE,
    idx          INTEGER NOT NULL,
    phase_id     TEXT NOT NULL,
    status       TEXT NOT NULL,
    started_at   TEXT,
    completed_at TEXT,
    agent_count  INTEGER NOT NULL DEFAULT 0,
    summary      TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (mission_id, idx)
);

CREATE TABLE IF NOT EXISTS sessions (
    id         TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    status     TEXT NOT NULL,
    config     TEXT NOT NULL DEFAULT 'null',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions (status);

CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    from_agent TEXT NOT NULL,
    to_agent   TEXT NOT NULL,
    kind       TEXT NOT NULL,
    content    TEXT NOT NULL,
    metadata   TEXT NOT NULL DEFAULT 'null',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_session ON messages (session_id, created_at);

CREATE TABLE IF NOT EXISTS artifacts (
    id            TEXT PRIMARY KEY,
    session_id    TEXT NOT NULL,
    artifact_type TEXT NOT NULL,
    path          TEXT NOT NULL,
    language      TEXT NOT NULL,
    content       TEXT NOT NULL,
    created_by    TEXT NOT NULL,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sprints (
    id            TEXT PRIMARY KEY,
    mission_id    TEXT NOT NULL,
    phase_id      TEXT NOT NULL,
    number        INTEGER NOT NULL,
    goal          TEXT NOT NULL,
    started_at    TEXT NOT NULL,
    retrospective TEXT NOT NULL DEFAULT '',
    velocity      INTEGER
);

CREATE TABLE IF NOT EXISTS admin_audit_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    event_type  TEXT NOT NULL,
    actor_id    TEXT NOT NULL,
    target_type TEXT NOT NULL,
    target_id   TEXT NOT NULL,
    details     TEXT NOT NULL,
    ts          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS endurance_metrics (
    id     INTEGER PRIMARY KEY AUTOINCREMENT,
    ts     TEXT NOT NULL,
    metric TEXT NOT NULL,
    value  REAL NOT NULL,
    detail TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS memory_project (
    project_id TEXT NOT NULL,
    key        TEXT NOT NULL,
    value      TEXT NOT NULL,
    category   TEXT NOT NULL,
    source     TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (project_id, key)
);
CREATE INDEX IF NOT EXISTS idx_memory_category ON memory_project (project_id, category, created_at);

CREATE TABLE IF NOT EXISTS memory_global (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    category   TEXT NOT NULL,
    source     TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Written by external collaborators (backlog CRUD, incident intake,
-- usage accounting); the engine only guarantees their presence.
CREATE TABLE IF NOT EXISTS tool_calls (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    agent_id   TEXT NOT NULL,
    tool_name  TEXT NOT NULL,
    args       TEXT NOT NULL,
    result     TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS features (
    id         TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    data       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_stories (
    id         TEXT PRIMARY KEY,
    feature_id TEXT NOT NULL,
    data       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS platform_incidents (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id TEXT NOT NULL,
    incident_key TEXT NOT NULL,
    severity   TEXT NOT NULL,
    detail     TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS llm_usage (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    provider   TEXT NOT NULL,
    model      TEXT NOT NULL,
    tokens_in  INTEGER NOT NULL,
    tokens_out INTEGER NOT NULL,
    duration_ms INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
";

/// SQLite-backed implementation of every engine store.
///
/// Cloneable; clones share one connection. All blocking I/O runs on the
/// tokio blocking pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database at `path` and initialize the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path.as_ref())?)
    }

    /// Ephemeral in-memory database (data lost on drop).
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap an existing connection, applying pragmas and schema setup.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;\
             PRAGMA foreign_keys = ON;\
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute_batch(SCHEMA)?;
        let versions: i64 =
            conn.query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))?;
        if versions == 0 {
            conn.execute("INSERT INTO schema_version (version) VALUES (?1)", params![
                SCHEMA_VERSION
            ])?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Bridge a synchronous closure onto the tokio blocking thread pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|e| Error::store(e.to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| Error::store(e.to_string()))?
    }

    /// Insert or replace an agent definition (bootstrap/admin path).
    pub async fn upsert_agent(&self, agent: &AgentDef) -> Result<()> {
        let id = agent.id.clone();
        let data = serde_json::to_string(agent)?;
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO agents (id, data) VALUES (?1, ?2) \
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data",
                params![id, data],
            )?;
            Ok(())
        })
        .await
    }

    /// Insert or replace a project (bootstrap/admin path).
    pub async fn upsert_project(&self, project: &ProjectDef) -> Result<()> {
        let id = project.id.clone();
        let data = serde_json::to_string(project)?;
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO projects (id, data) VALUES (?1, ?2) \
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data",
                params![id, data],
            )?;
            Ok(())
        })
        .await
    }

    /// Recorded audit rows, newest first (test/inspection path).
    pub async fn audit_entries(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT event_type, actor_id, target_type, target_id, details, ts \
                 FROM admin_audit_log ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(event_type, actor_id, target_type, target_id, details, ts)| {
                    Ok(AuditRecord {
                        event_type,
                        actor_id,
                        target_type,
                        target_id,
                        details: serde_json::from_str(&details)?,
                        ts: parse_ts(&ts)?,
                    })
                })
                .collect()
        })
        .await
    }
}

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn opt_ts(dt: Option<&DateTime<Utc>>) -> Option<String> {
    dt.map(ts)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::store(format!("bad timestamp '{s}': {e}")))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(&s)).transpose()
}

fn status_tag<T: serde::Serialize>(status: &T) -> Result<String> {
    match serde_json::to_value(status)? {
        Value::String(s) => Ok(s),
        other => Err(Error::store(format!("non-string status tag: {other}"))),
    }
}

fn parse_status<T: for<'de> serde::Deserialize<'de>>(tag: &str) -> Result<T> {
    serde_json::from_value(Value::String(tag.to_owned()))
        .map_err(|e| Error::store(format!("bad status tag '{tag}': {e}")))
}

/// Mission fields persisted in the JSON document column.
#[derive(serde::Serialize, serde::Deserialize)]
struct MissionDoc {
    name: String,
    brief: String,
    workflow_id: String,
    current_phase: usize,
    config: Value,
    mission_type: String,
    category: String,
}

fn read_mission(conn: &Connection, mission_id: &str) -> Result<Option<MissionDef>> {
    let row = conn
        .query_row(
            "SELECT id, project_id, status, resume_attempts, last_resume_at, \
                    human_input_required, workspace_path, data, created_at, updated_at \
             FROM missions WHERE id = ?1",
            params![mission_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                ))
            },
        )
        .optional()?;
    let Some((
        id,
        project_id,
        status,
        resume_attempts,
        last_resume_at,
        human_input_required,
        workspace_path,
        data,
        created_at,
        updated_at,
    )) = row
    else {
        return Ok(None);
    };

    let doc: MissionDoc = serde_json::from_str(&data)?;
    let mut stmt = conn.prepare(
        "SELECT phase_id, status, started_at, completed_at, agent_count, summary \
         FROM phases WHERE mission_id = ?1 ORDER BY idx ASC",
    )?;
    let phases = stmt
        .query_map(params![id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?
        .into_iter()
        .map(|(phase_id, status, started_at, completed_at, agent_count, summary)| {
            Ok(PhaseState {
                phase_id,
                status: parse_status::<PhaseStatus>(&status)?,
                started_at: parse_opt_ts(started_at)?,
                completed_at: parse_opt_ts(completed_at)?,
                agent_count: agent_count as usize,
                summary,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(MissionDef {
        id,
        project_id,
        name: doc.name,
        brief: doc.brief,
        status: parse_status::<MissionStatus>(&status)?,
        workflow_id: doc.workflow_id,
        phases,
        current_phase: doc.current_phase,
        workspace_path,
        resume_attempts: resume_attempts as u32,
        last_resume_at: parse_opt_ts(last_resume_at)?,
        human_input_required: human_input_required != 0,
        config: doc.config,
        mission_type: doc.mission_type,
        category: doc.category,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    }))
}

fn write_phases(conn: &Connection, mission: &MissionDef) -> Result<()> {
    conn.execute("DELETE FROM phases WHERE mission_id = ?1", params![mission.id])?;
    let mut stmt = conn.prepare(
        "INSERT INTO phases (mission_id, idx, phase_id, status, started_at, completed_at, agent_count, summary) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for (idx, phase) in mission.phases.iter().enumerate() {
        stmt.execute(params![
            mission.id,
            idx as i64,
            phase.phase_id,
            status_tag(&phase.status)?,
            opt_ts(phase.started_at.as_ref()),
            opt_ts(phase.completed_at.as_ref()),
            phase.agent_count as i64,
            phase.summary,
        ])?;
    }
    Ok(())
}

fn mission_doc(mission: &MissionDef) -> Result<String> {
    Ok(serde_json::to_string(&MissionDoc {
        name: mission.name.clone(),
        brief: mission.brief.clone(),
        workflow_id: mission.workflow_id.clone(),
        current_phase: mission.current_phase,
        config: mission.config.clone(),
        mission_type: mission.mission_type.clone(),
        category: mission.category.clone(),
    })?)
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn get_session(&self, session_id: &str) -> Result<Option<SessionDef>> {
        let session_id = session_id.to_owned();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT id, project_id, status, config, created_at, updated_at \
                 FROM sessions WHERE id = ?1",
                params![session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?
            .map(|(id, project_id, status, config, created_at, updated_at)| {
                Ok(SessionDef {
                    id,
                    project_id,
                    status: parse_status::<SessionStatus>(&status)?,
                    config: serde_json::from_str(&config)?,
                    created_at: parse_ts(&created_at)?,
                    updated_at: parse_ts(&updated_at)?,
                })
            })
            .transpose()
        })
        .await
    }

    async fn create_session(&self, session: &SessionDef) -> Result<()> {
        let session = session.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, project_id, status, config, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session.id,
                    session.project_id,
                    status_tag(&session.status)?,
                    serde_json::to_string(&session.config)?,
                    ts(&session.created_at),
                    ts(&session.updated_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn add_message(&self, message: &Message) -> Result<()> {
        let message = message.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO messages (id, session_id, from_agent, to_agent, kind, content, metadata, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    message.id,
                    message.session_id,
                    message.from_agent,
                    message.to_agent,
                    status_tag(&message.kind)?,
                    message.content,
                    serde_json::to_string(&message.metadata)?,
                    ts(&message.created_at),
                ],
            )?;
            conn.execute(
                "UPDATE sessions SET updated_at = ?2 WHERE id = ?1",
                params![message.session_id, ts(&Utc::now())],
            )?;
            Ok(())
        })
        .await
    }

    async fn messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>> {
        let session_id = session_id.to_owned();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, from_agent, to_agent, kind, content, metadata, created_at \
                 FROM messages WHERE session_id = ?1 \
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            )?;
            let mut messages = stmt
                .query_map(params![session_id, limit as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?
                .into_iter()
                .map(|(id, session_id, from_agent, to_agent, kind, content, metadata, created_at)| {
                    Ok(Message {
                        id,
                        session_id,
                        from_agent,
                        to_agent,
                        kind: parse_status::<MessageKind>(&kind)?,
                        content,
                        metadata: serde_json::from_str(&metadata)?,
                        created_at: parse_ts(&created_at)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            messages.reverse();
            Ok(messages)
        })
        .await
    }

    async fn update_session_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        let session_id = session_id.to_owned();
        self.blocking(move |conn| {
            conn.execute(
                "UPDATE sessions SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![session_id, status_tag(&status)?, ts(&Utc::now())],
            )?;
            Ok(())
        })
        .await
    }

    async fn add_artifact(&self, artifact: &Artifact) -> Result<()> {
        let artifact = artifact.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO artifacts (id, session_id, artifact_type, path, language, content, created_by, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    artifact.id,
                    artifact.session_id,
                    artifact.artifact_type,
                    artifact.path,
                    artifact.language,
                    artifact.content,
                    artifact.created_by,
                    ts(&artifact.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn sessions_stale_since(
        &self,
        status: SessionStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SessionDef>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.project_id, s.status, s.config, s.created_at, s.updated_at \
                 FROM sessions s \
                 WHERE s.status = ?1 \
                   AND COALESCE((SELECT MAX(m.created_at) FROM messages m WHERE m.session_id = s.id), s.updated_at) < ?2",
            )?;
            stmt.query_map(params![status_tag(&status)?, ts(&cutoff)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(id, project_id, status, config, created_at, updated_at)| {
                Ok(SessionDef {
                    id,
                    project_id,
                    status: parse_status::<SessionStatus>(&status)?,
                    config: serde_json::from_str(&config)?,
                    created_at: parse_ts(&created_at)?,
                    updated_at: parse_ts(&updated_at)?,
                })
            })
            .collect()
        })
        .await
    }
}

#[async_trait]
impl MissionStore for SqliteStore {
    async fn get_mission(&self, mission_id: &str) -> Result<Option<MissionDef>> {
        let mission_id = mission_id.to_owned();
        self.blocking(move |conn| read_mission(conn, &mission_id)).await
    }

    async fn create_mission(&self, mission: &MissionDef) -> Result<()> {
        let mission = mission.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO missions (id, project_id, status, resume_attempts, last_resume_at, \
                                       human_input_required, workspace_path, data, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    mission.id,
                    mission.project_id,
                    status_tag(&mission.status)?,
                    i64::from(mission.resume_attempts),
                    opt_ts(mission.last_resume_at.as_ref()),
                    i64::from(mission.human_input_required),
                    mission.workspace_path,
                    mission_doc(&mission)?,
                    ts(&mission.created_at),
                    ts(&mission.updated_at),
                ],
            )?;
            write_phases(conn, &mission)?;
            Ok(())
        })
        .await
    }

    async fn update_mission(&self, mission: &MissionDef) -> Result<()> {
        let mission = mission.clone();
        self.blocking(move |conn| {
            conn.execute(
                "UPDATE missions SET project_id = ?2, status = ?3, resume_attempts = ?4, \
                        last_resume_at = ?5, human_input_required = ?6, workspace_path = ?7, \
                        data = ?8, updated_at = ?9 \
                 WHERE id = ?1",
                params![
                    mission.id,
                    mission.project_id,
                    status_tag(&mission.status)?,
                    i64::from(mission.resume_attempts),
                    opt_ts(mission.last_resume_at.as_ref()),
                    i64::from(mission.human_input_required),
                    mission.workspace_path,
                    mission_doc(&mission)?,
                    ts(&Utc::now()),
                ],
            )?;
            write_phases(conn, &mission)?;
            Ok(())
        })
        .await
    }

    async fn missions_in_status(&self, status: MissionStatus) -> Result<Vec<MissionDef>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare("SELECT id FROM missions WHERE status = ?1")?;
            let ids = stmt
                .query_map(params![status_tag(&status)?], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids.iter()
                .filter_map(|id| read_mission(conn, id).transpose())
                .collect()
        })
        .await
    }

    async fn missions_stale_since(
        &self,
        status: MissionStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MissionDef>> {
        self.blocking(move |conn| {
            let mut stmt =
                conn.prepare("SELECT id FROM missions WHERE status = ?1 AND updated_at < ?2")?;
            let ids = stmt
                .query_map(params![status_tag(&status)?, ts(&cutoff)], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids.iter()
                .filter_map(|id| read_mission(conn, id).transpose())
                .collect()
        })
        .await
    }

    async fn create_sprint(&self, sprint: &SprintDef) -> Result<()> {
        let sprint = sprint.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO sprints (id, mission_id, phase_id, number, goal, started_at, retrospective, velocity) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    sprint.id,
                    sprint.mission_id,
                    sprint.phase_id,
                    sprint.number as i64,
                    sprint.goal,
                    ts(&sprint.started_at),
                    sprint.retrospective,
                    sprint.velocity.map(i64::from),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_sprint(&self, sprint: &SprintDef) -> Result<()> {
        let sprint = sprint.clone();
        self.blocking(move |conn| {
            conn.execute(
                "UPDATE sprints SET retrospective = ?2, velocity = ?3 WHERE id = ?1",
                params![sprint.id, sprint.retrospective, sprint.velocity.map(i64::from)],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ProjectStore for SqliteStore {
    async fn get_project(&self, project_id: &str) -> Result<Option<ProjectDef>> {
        let project_id = project_id.to_owned();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT data FROM projects WHERE id = ?1",
                params![project_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(|data| Ok(serde_json::from_str(&data)?))
            .transpose()
        })
        .await
    }

    async fn list_projects(&self) -> Result<Vec<ProjectDef>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare("SELECT data FROM projects ORDER BY id")?;
            stmt.query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?
                .iter()
                .map(|data| Ok(serde_json::from_str(data)?))
                .collect()
        })
        .await
    }

    async fn update_project(&self, project: &ProjectDef) -> Result<()> {
        self.upsert_project(project).await
    }
}

#[async_trait]
impl AgentStore for SqliteStore {
    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentDef>> {
        let agent_id = agent_id.to_owned();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT data FROM agents WHERE id = ?1",
                params![agent_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(|data| Ok(serde_json::from_str(&data)?))
            .transpose()
        })
        .await
    }

    async fn list_agents(&self) -> Result<Vec<AgentDef>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare("SELECT data FROM agents ORDER BY id")?;
            stmt.query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?
                .iter()
                .map(|data| Ok(serde_json::from_str(data)?))
                .collect()
        })
        .await
    }
}

#[async_trait]
impl MemoryStore for SqliteStore {
    async fn project_store(&self, entry: &MemoryEntry) -> Result<()> {
        let entry = entry.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO memory_project (project_id, key, value, category, source, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT(project_id, key) DO UPDATE SET \
                     value = excluded.value, category = excluded.category, \
                     source = excluded.source, created_at = excluded.created_at",
                params![
                    entry.project_id,
                    entry.key,
                    entry.value,
                    entry.category,
                    entry.source,
                    ts(&entry.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn project_get(
        &self,
        project_id: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        let project_id = project_id.to_owned();
        let category = category.map(str::to_owned);
        self.blocking(move |conn| {
            let (sql, binds): (&str, Vec<String>) = match &category {
                Some(cat) => (
                    "SELECT project_id, key, value, category, source, created_at \
                     FROM memory_project WHERE project_id = ?1 AND category = ?2 \
                     ORDER BY created_at DESC LIMIT ?3",
                    vec![project_id.clone(), cat.clone()],
                ),
                None => (
                    "SELECT project_id, key, value, category, source, created_at \
                     FROM memory_project WHERE project_id = ?1 \
                     ORDER BY created_at DESC LIMIT ?2",
                    vec![project_id.clone()],
                ),
            };
            let mut stmt = conn.prepare(sql)?;
            let map_row = |row: &rusqlite::Row<'_>| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            };
            let rows = if binds.len() == 2 {
                stmt.query_map(params![binds[0], binds[1], limit as i64], map_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            } else {
                stmt.query_map(params![binds[0], limit as i64], map_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };
            rows.into_iter().map(row_to_entry).collect()
        })
        .await
    }

    async fn project_search(
        &self,
        project_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        let project_id = project_id.to_owned();
        let like = format!("%{query}%");
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT project_id, key, value, category, source, created_at \
                 FROM memory_project \
                 WHERE project_id = ?1 AND (key LIKE ?2 OR value LIKE ?2) \
                 ORDER BY created_at DESC LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![project_id, like, limit as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(row_to_entry).collect()
        })
        .await
    }

    async fn global_search(&self, query: &str, limit: usize) -> Result<Vec<MemoryEntry>> {
        let like = format!("%{query}%");
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT '', key, value, category, source, created_at \
                 FROM memory_global WHERE key LIKE ?1 OR value LIKE ?1 \
                 ORDER BY created_at DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![like, limit as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(row_to_entry).collect()
        })
        .await
    }
}

fn row_to_entry(
    (project_id, key, value, category, source, created_at): (
        String,
        String,
        String,
        String,
        String,
        String,
    ),
) -> Result<MemoryEntry> {
    Ok(MemoryEntry {
        project_id,
        key,
        value,
        category,
        source,
        created_at: parse_ts(&created_at)?,
    })
}

#[async_trait]
impl MetricsSink for SqliteStore {
    async fn record_metric(&self, metric: &str, value: f64, detail: &str) -> Result<()> {
        let metric = metric.to_owned();
        let detail = detail.to_owned();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO endurance_metrics (ts, metric, value, detail) VALUES (?1, ?2, ?3, ?4)",
                params![ts(&Utc::now()), metric, value, detail],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl AuditLog for SqliteStore {
    async fn append(&self, record: AuditRecord) -> Result<()> {
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO admin_audit_log (event_type, actor_id, target_type, target_id, details, ts) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.event_type,
                    record.actor_id,
                    record.target_type,
                    record.target_id,
                    serde_json::to_string(&record.details)?,
                    ts(&record.ts),
                ],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PhaseState;

    fn mission(id: &str) -> MissionDef {
        let now = Utc::now();
        MissionDef {
            id: id.to_owned(),
            project_id: "p1".into(),
            name: "Test mission".into(),
            brief: "Do the thing".into(),
            status: MissionStatus::Pending,
            workflow_id: "backend-api".into(),
            phases: vec![PhaseState::pending("plan"), PhaseState::pending("dev-sprint")],
            current_phase: 0,
            workspace_path: String::new(),
            resume_attempts: 0,
            last_resume_at: None,
            human_input_required: false,
            config: serde_json::json!({"incident_key": "login-500"}),
            mission_type: "feature".into(),
            category: "core".into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn mission_roundtrip_with_phases() {
        let store = SqliteStore::in_memory().unwrap();
        store.create_mission(&mission("m1")).await.unwrap();

        let mut loaded = store.get_mission("m1").await.unwrap().unwrap();
        assert_eq!(loaded.phases.len(), 2);
        assert_eq!(loaded.phases[1].phase_id, "dev-sprint");

        loaded.phases[0].status = PhaseStatus::Done;
        loaded.phases[0].summary = "planned".into();
        loaded.status = MissionStatus::Running;
        store.update_mission(&loaded).await.unwrap();

        let again = store.get_mission("m1").await.unwrap().unwrap();
        assert_eq!(again.status, MissionStatus::Running);
        assert_eq!(again.phases[0].status, PhaseStatus::Done);
        assert_eq!(again.phases[0].summary, "planned");
    }

    #[tokio::test]
    async fn messages_ordered_and_limited() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .create_session(&SessionDef::new("s1", "p1"))
            .await
            .unwrap();
        for i in 0..5 {
            let mut m = Message::new("s1", "a", "all", MessageKind::Text, format!("m{i}"));
            m.created_at = Utc::now() + chrono::Duration::milliseconds(i);
            store.add_message(&m).await.unwrap();
        }
        let messages = store.messages("s1", 3).await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "m2");
        assert_eq!(messages[2].content, "m4");
    }

    #[tokio::test]
    async fn memory_upsert_replaces_by_key() {
        let store = SqliteStore::in_memory().unwrap();
        let mut entry = MemoryEntry {
            project_id: "p1".into(),
            key: "stack".into(),
            value: "postgres".into(),
            category: "architecture".into(),
            source: "agent:a1".into(),
            created_at: Utc::now(),
        };
        store.project_store(&entry).await.unwrap();
        entry.value = "sqlite".into();
        store.project_store(&entry).await.unwrap();

        let entries = store.project_get("p1", Some("architecture"), 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value, "sqlite");

        let found = store.project_search("p1", "sqlite", 10).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn stale_mission_query_filters_by_updated_at() {
        let store = SqliteStore::in_memory().unwrap();
        let mut m = mission("m1");
        m.status = MissionStatus::Running;
        store.create_mission(&m).await.unwrap();

        // updated_at is now; a cutoff in the past finds nothing.
        let past = Utc::now() - chrono::Duration::hours(1);
        assert!(store
            .missions_stale_since(MissionStatus::Running, past)
            .await
            .unwrap()
            .is_empty());

        // A future cutoff finds the mission.
        let future = Utc::now() + chrono::Duration::hours(1);
        let stale = store
            .missions_stale_since(MissionStatus::Running, future)
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, "m1");
    }

    #[tokio::test]
    async fn agents_and_projects_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        let agent = AgentDef::new("dev-1", "Devon", "Backend Dev");
        store.upsert_agent(&agent).await.unwrap();
        let loaded = store.get_agent("dev-1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "Devon");
        assert!(store.get_agent("missing").await.unwrap().is_none());

        let project = ProjectDef {
            id: "p1".into(),
            name: "Proj".into(),
            description: "A project".into(),
            vision: String::new(),
            workspace_path: "/tmp/ws".into(),
            tma_monitoring: false,
        };
        store.upsert_project(&project).await.unwrap();
        assert_eq!(store.list_projects().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn audit_log_appends() {
        let store = SqliteStore::in_memory().unwrap();
        let record = AuditRecord {
            event_type: "guardrail_block".into(),
            actor_id: "dev-1".into(),
            target_type: "tool_call".into(),
            target_id: "build".into(),
            details: serde_json::json!({"label": "destructive_git"}),
            ts: Utc::now(),
        };
        store.append(record).await.unwrap();
        let entries = store.audit_entries(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].target_id, "build");
    }
}
