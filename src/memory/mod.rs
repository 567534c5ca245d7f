//! Long-term and episodic memory: sessions, per-turn episodic log, and the
//! semantic memory store with supersession chains.

pub mod types;
pub mod writer;

use anyhow::{bail, Result};
use rusqlite::{params, Connection};

use types::{MemoryKind, SemanticMemory, Session, TurnRole};

/// Create a new session row and return it.
pub fn create_session(conn: &Connection) -> Result<Session> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute("INSERT INTO sessions(id) VALUES (?1)", params![id])?;
    let session = conn.query_row(
        "SELECT id, created_at, summary FROM sessions WHERE id = ?1",
        params![id],
        |row| {
            Ok(Session {
                id: row.get(0)?,
                created_at: row.get(1)?,
                summary: row.get(2)?,
            })
        },
    )?;
    Ok(session)
}

/// Append one utterance to the episodic log. Called unconditionally for every
/// user and assistant turn.
pub fn add_episodic_turn(
    conn: &Connection,
    session_id: &str,
    role: TurnRole,
    text: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO episodic_turns(session_id, role, text) VALUES (?1, ?2, ?3)",
        params![session_id, role.as_str(), text],
    )?;
    Ok(())
}

/// Fields for a new semantic memory.
#[derive(Debug, Clone)]
pub struct NewMemory<'a> {
    pub text: &'a str,
    pub kind: MemoryKind,
    pub importance: f64,
    pub confidence: f64,
    pub embedding_id: i64,
    pub supersedes_id: Option<i64>,
}

/// Insert a semantic memory. Importance and confidence outside `[0, 1]` are
/// rejected before anything touches the database.
pub fn insert_semantic_memory(conn: &Connection, memory: &NewMemory<'_>) -> Result<i64> {
    if !(0.0..=1.0).contains(&memory.importance) {
        bail!("importance {} out of range [0, 1]", memory.importance);
    }
    if !(0.0..=1.0).contains(&memory.confidence) {
        bail!("confidence {} out of range [0, 1]", memory.confidence);
    }
    conn.execute(
        "INSERT INTO semantic_memories(text, kind, importance, confidence, supersedes_id, embedding_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            memory.text,
            memory.kind.as_str(),
            memory.importance,
            memory.confidence,
            memory.supersedes_id,
            memory.embedding_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Most recently created memories, newest first.
pub fn list_recent_memories(conn: &Connection, limit: usize) -> Result<Vec<SemanticMemory>> {
    let mut stmt = conn.prepare(
        "SELECT id, text, kind, importance, confidence, created_at, supersedes_id, embedding_id \
         FROM semantic_memories ORDER BY created_at DESC, id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], |row| {
        Ok(SemanticMemory {
            id: row.get(0)?,
            text: row.get(1)?,
            kind: row.get(2)?,
            importance: row.get(3)?,
            confidence: row.get(4)?,
            created_at: row.get(5)?,
            supersedes_id: row.get(6)?,
            embedding_id: row.get(7)?,
        })
    })?;
    Ok(rows.collect::<std::result::Result<_, _>>()?)
}
