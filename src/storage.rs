//! Document and chunk persistence.
//!
//! Re-ingest is hash-driven: an unchanged document keeps its rows, a changed
//! one gets its text and chunks replaced in place. Old embeddings stay in the
//! content-addressed store regardless.

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// Outcome of a document upsert.
pub struct UpsertedDocument {
    pub document_id: i64,
    /// True when the document is new or its content hash changed, meaning
    /// chunks must be (re)built.
    pub changed: bool,
}

/// Insert or refresh one document row plus its full text.
pub fn upsert_document(
    conn: &Connection,
    file_path: &str,
    hash: &str,
    text: &str,
) -> Result<UpsertedDocument> {
    let title = Path::new(file_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_path.to_string());

    let existing: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, hash FROM documents WHERE path = ?1 LIMIT 1",
            params![file_path],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((document_id, existing_hash)) = existing else {
        conn.execute(
            "INSERT INTO documents(path, title, hash) VALUES (?1, ?2, ?3)",
            params![file_path, title, hash],
        )?;
        let document_id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO document_texts(document_id, text) VALUES (?1, ?2)",
            params![document_id, text],
        )?;
        return Ok(UpsertedDocument { document_id, changed: true });
    };

    if existing_hash == hash {
        // Backfill the text row if an earlier run never wrote it
        let has_text: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM document_texts WHERE document_id = ?1",
                params![document_id],
                |row| row.get(0),
            )?;
        if !has_text {
            conn.execute(
                "INSERT INTO document_texts(document_id, text) VALUES (?1, ?2)",
                params![document_id, text],
            )?;
            return Ok(UpsertedDocument { document_id, changed: true });
        }
        return Ok(UpsertedDocument { document_id, changed: false });
    }

    conn.execute(
        "UPDATE documents SET hash = ?1, title = ?2, updated_at = datetime('now') WHERE id = ?3",
        params![hash, title, document_id],
    )?;
    conn.execute(
        "INSERT INTO document_texts(document_id, text) VALUES (?1, ?2) \
         ON CONFLICT(document_id) DO UPDATE SET text = excluded.text",
        params![document_id, text],
    )?;
    Ok(UpsertedDocument { document_id, changed: true })
}

/// Resolve or create the chunk set for a (chunk size, overlap, model) key.
pub fn get_or_create_chunk_set(
    conn: &Connection,
    chunk_size: u32,
    overlap: u32,
    embed_model: &str,
) -> Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM chunk_sets WHERE chunk_size = ?1 AND overlap = ?2 AND embed_model = ?3 LIMIT 1",
            params![chunk_size, overlap, embed_model],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO chunk_sets(chunk_size, overlap, embed_model) VALUES (?1, ?2, ?3)",
        params![chunk_size, overlap, embed_model],
    )?;
    Ok(conn.last_insert_rowid())
}

/// One chunk row ready for insertion.
pub struct ChunkInsert {
    pub chunk_index: i64,
    pub text: String,
    pub token_count: i64,
    pub embedding_id: i64,
}

/// Replace every chunk for one document within one chunk set, atomically.
pub fn replace_chunks_for_document(
    conn: &mut Connection,
    chunk_set_id: i64,
    document_id: i64,
    chunks: &[ChunkInsert],
) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM chunks WHERE chunk_set_id = ?1 AND document_id = ?2",
        params![chunk_set_id, document_id],
    )?;
    for chunk in chunks {
        tx.execute(
            "INSERT INTO chunks(chunk_set_id, document_id, chunk_index, text, token_count, embedding_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                chunk_set_id,
                document_id,
                chunk.chunk_index,
                chunk.text,
                chunk.token_count,
                chunk.embedding_id,
            ],
        )?;
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::vector::vector_to_bytes;

    fn insert_embedding(conn: &Connection, hash: &str) -> i64 {
        conn.execute(
            "INSERT INTO embeddings(dims, vector_blob, model, hash) VALUES (?1, ?2, ?3, ?4)",
            params![2i64, vector_to_bytes(&[1.0, 0.0]), "test-model", hash],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    #[test]
    fn new_document_is_changed() {
        let conn = open_memory_database().unwrap();
        let up = upsert_document(&conn, "notes/a.md", "h1", "hello world").unwrap();
        assert!(up.changed);

        let text: String = conn
            .query_row(
                "SELECT text FROM document_texts WHERE document_id = ?1",
                params![up.document_id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(text, "hello world");
    }

    #[test]
    fn unchanged_hash_is_not_changed() {
        let conn = open_memory_database().unwrap();
        let first = upsert_document(&conn, "notes/a.md", "h1", "hello").unwrap();
        let second = upsert_document(&conn, "notes/a.md", "h1", "hello").unwrap();
        assert_eq!(first.document_id, second.document_id);
        assert!(!second.changed);
    }

    #[test]
    fn changed_hash_replaces_text() {
        let conn = open_memory_database().unwrap();
        let first = upsert_document(&conn, "notes/a.md", "h1", "old text").unwrap();
        let second = upsert_document(&conn, "notes/a.md", "h2", "new text").unwrap();
        assert_eq!(first.document_id, second.document_id);
        assert!(second.changed);

        let text: String = conn
            .query_row(
                "SELECT text FROM document_texts WHERE document_id = ?1",
                params![second.document_id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(text, "new text");
    }

    #[test]
    fn chunk_set_is_reused_for_same_key() {
        let conn = open_memory_database().unwrap();
        let a = get_or_create_chunk_set(&conn, 800, 100, "m").unwrap();
        let b = get_or_create_chunk_set(&conn, 800, 100, "m").unwrap();
        let c = get_or_create_chunk_set(&conn, 400, 100, "m").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn replace_chunks_swaps_old_rows() {
        let mut conn = open_memory_database().unwrap();
        let set_id = get_or_create_chunk_set(&conn, 800, 100, "test-model").unwrap();
        let doc = upsert_document(&conn, "a.md", "h1", "text").unwrap();
        let e1 = insert_embedding(&conn, "e1");
        let e2 = insert_embedding(&conn, "e2");

        let first = vec![
            ChunkInsert { chunk_index: 0, text: "one".into(), token_count: 1, embedding_id: e1 },
            ChunkInsert { chunk_index: 1, text: "two".into(), token_count: 1, embedding_id: e2 },
        ];
        replace_chunks_for_document(&mut conn, set_id, doc.document_id, &first).unwrap();

        let second = vec![ChunkInsert {
            chunk_index: 0,
            text: "only".into(),
            token_count: 1,
            embedding_id: e1,
        }];
        replace_chunks_for_document(&mut conn, set_id, doc.document_id, &second).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
        let text: String = conn
            .query_row("SELECT text FROM chunks LIMIT 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(text, "only");
    }
}
