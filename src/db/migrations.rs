//! Forward-only schema migrations.
//!
//! Every migration is a `(version, name, sql)` triple in `MIGRATIONS`.
//! Applied versions are tracked in `schema_migrations`; pending migrations run
//! inside a single transaction.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "init",
        sql: "
            CREATE TABLE IF NOT EXISTS schema_migrations(
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
        ",
    },
    Migration {
        version: 2,
        name: "core_tables",
        sql: "
            CREATE TABLE IF NOT EXISTS documents(
                id INTEGER PRIMARY KEY,
                path TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                hash TEXT NOT NULL,
                added_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS document_texts(
                document_id INTEGER PRIMARY KEY REFERENCES documents(id) ON DELETE CASCADE,
                text TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunk_sets(
                id INTEGER PRIMARY KEY,
                chunk_size INTEGER NOT NULL,
                overlap INTEGER NOT NULL,
                embed_model TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(chunk_size, overlap, embed_model)
            );

            CREATE TABLE IF NOT EXISTS embeddings(
                id INTEGER PRIMARY KEY,
                dims INTEGER NOT NULL,
                vector_blob BLOB NOT NULL,
                model TEXT NOT NULL,
                hash TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS chunks(
                id INTEGER PRIMARY KEY,
                chunk_set_id INTEGER NOT NULL REFERENCES chunk_sets(id) ON DELETE CASCADE,
                document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                chunk_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                token_count INTEGER NOT NULL,
                embedding_id INTEGER NOT NULL REFERENCES embeddings(id) ON DELETE RESTRICT,
                UNIQUE(chunk_set_id, document_id, chunk_index)
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_chunk_set ON chunks(chunk_set_id);
            CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
            CREATE INDEX IF NOT EXISTS idx_chunks_embedding ON chunks(embedding_id);

            CREATE TABLE IF NOT EXISTS sessions(
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                summary TEXT
            );

            CREATE TABLE IF NOT EXISTS episodic_turns(
                id INTEGER PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                role TEXT NOT NULL CHECK(role IN ('user','assistant','system')),
                text TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_episodic_session ON episodic_turns(session_id);

            CREATE TABLE IF NOT EXISTS semantic_memories(
                id INTEGER PRIMARY KEY,
                text TEXT NOT NULL,
                kind TEXT NOT NULL CHECK(kind IN ('preference','decision','fact','insight','todo')),
                importance REAL NOT NULL,
                confidence REAL NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                supersedes_id INTEGER REFERENCES semantic_memories(id),
                embedding_id INTEGER NOT NULL REFERENCES embeddings(id) ON DELETE RESTRICT
            );

            CREATE INDEX IF NOT EXISTS idx_semantic_embedding ON semantic_memories(embedding_id);
            CREATE INDEX IF NOT EXISTS idx_semantic_kind ON semantic_memories(kind);

            CREATE TABLE IF NOT EXISTS llm_cache(
                key TEXT PRIMARY KEY,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                request_json TEXT NOT NULL,
                response_json TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
        ",
    },
];

/// Run any pending migrations. Safe to call on every open.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    // Bootstrap: the tracking table itself is migration 1.
    let has_tracking: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations'",
        [],
        |row| row.get(0),
    )?;
    if !has_tracking {
        let first = &MIGRATIONS[0];
        conn.execute_batch(first.sql)
            .with_context(|| format!("migration {} ({}) failed", first.version, first.name))?;
        conn.execute(
            "INSERT INTO schema_migrations(version, name) VALUES (?1, ?2)",
            params![first.version, first.name],
        )?;
    }

    let applied: Vec<u32> = {
        let mut stmt =
            conn.prepare("SELECT version FROM schema_migrations ORDER BY version ASC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<std::result::Result<_, _>>()?
    };

    let pending: Vec<&Migration> = MIGRATIONS
        .iter()
        .filter(|m| !applied.contains(&m.version))
        .collect();
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for m in pending {
        tracing::info!(version = m.version, name = m.name, "applying migration");
        tx.execute_batch(m.sql)
            .with_context(|| format!("migration {} ({}) failed", m.version, m.name))?;
        tx.execute(
            "INSERT INTO schema_migrations(version, name) VALUES (?1, ?2)",
            params![m.version, m.name],
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Highest applied schema version.
pub fn schema_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_apply_on_fresh_db() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 2);

        for table in [
            "documents",
            "chunk_sets",
            "embeddings",
            "chunks",
            "sessions",
            "episodic_turns",
            "semantic_memories",
            "llm_cache",
        ] {
            let found: bool = conn
                .query_row(
                    "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name = ?1",
                    params![table],
                    |row| row.get(0),
                )
                .unwrap();
            assert!(found, "missing table {table}");
        }
    }

    #[test]
    fn migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 2);
    }

    #[test]
    fn memory_kind_check_constraint_enforced() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO embeddings(dims, vector_blob, model, hash) VALUES (1, x'00000000', 'm', 'h')",
            [],
        )
        .unwrap();
        let res = conn.execute(
            "INSERT INTO semantic_memories(text, kind, importance, confidence, embedding_id) \
             VALUES ('x', 'bogus', 0.5, 0.5, 1)",
            [],
        );
        assert!(res.is_err());
    }
}
