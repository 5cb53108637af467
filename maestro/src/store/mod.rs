//! Persistence: repository traits and the SQLite implementation.

pub mod sqlite;
pub mod traits;

pub use sqlite::SqliteStore;
pub use traits::{
    AgentStore, MemoryEntry, MemoryStore, MetricsSink, MissionStore, ProjectDef, ProjectStore,
    SessionDef, SessionStatus, SessionStore,
};
