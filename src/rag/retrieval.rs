//! Top-K similarity retrieval over document chunks and semantic memories.
//!
//! Exhaustive linear scan with a bounded top-K set. Ties on score break
//! toward the lower row id so results are reproducible regardless of scan
//! order.
//!
//! Memory retrieval has one hard rule: every `preference` memory is included
//! unconditionally, sorted by descending importance, ahead of the
//! similarity-ranked rest. Preferences must shape every answer even when they
//! are topically unrelated to the query.

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::vector::{bytes_to_vector, cosine_similarity};

/// Raised when a query targets a (chunk size, overlap, embedding model)
/// combination that was never ingested. This is a caller problem, not an
/// internal one: ingest with matching settings first.
#[derive(Debug, Error)]
#[error(
    "no chunk set for chunk_size={chunk_size} overlap={overlap} embed_model={embed_model}; \
     run `memrag ingest` with matching settings first"
)]
pub struct ChunkSetNotFound {
    pub chunk_size: u32,
    pub overlap: u32,
    pub embed_model: String,
}

/// A chunk scored against the query vector.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk_id: i64,
    pub document_path: String,
    pub document_title: String,
    pub text: String,
    pub score: f64,
}

/// A semantic memory scored against the query vector.
#[derive(Debug, Clone)]
pub struct RetrievedMemory {
    pub memory_id: i64,
    pub kind: String,
    pub text: String,
    pub importance: f64,
    pub confidence: f64,
    pub supersedes_id: Option<i64>,
    pub score: f64,
}

/// Look up the chunk set for a retrieval compatibility key. `None` means the
/// corpus was never ingested with these settings.
pub fn get_chunk_set_id(
    conn: &Connection,
    chunk_size: u32,
    overlap: u32,
    embed_model: &str,
) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT id FROM chunk_sets WHERE chunk_size = ?1 AND overlap = ?2 AND embed_model = ?3 LIMIT 1",
            params![chunk_size, overlap, embed_model],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Top-K chunks from one chunk set by cosine similarity, best first.
pub fn retrieve_chunks(
    conn: &Connection,
    chunk_set_id: i64,
    query_vector: &[f32],
    top_k: usize,
) -> Result<Vec<RetrievedChunk>> {
    let k = top_k.max(1);
    let mut stmt = conn.prepare(
        "SELECT c.id, c.text, d.path, d.title, e.vector_blob \
         FROM chunks c \
         JOIN documents d ON d.id = c.document_id \
         JOIN embeddings e ON e.id = c.embedding_id \
         WHERE c.chunk_set_id = ?1",
    )?;

    let mut top: Vec<RetrievedChunk> = Vec::with_capacity(k);
    let mut rows = stmt.query(params![chunk_set_id])?;
    while let Some(row) = rows.next()? {
        let chunk_id: i64 = row.get(0)?;
        let text: String = row.get(1)?;
        let document_path: String = row.get(2)?;
        let document_title: String = row.get(3)?;
        let blob: Vec<u8> = row.get(4)?;

        let vector = bytes_to_vector(&blob)?;
        let score = cosine_similarity(query_vector, &vector)?;
        push_top_k(
            &mut top,
            k,
            RetrievedChunk { chunk_id, document_path, document_title, text, score },
            |c| (c.score, c.chunk_id),
        );
    }

    top.sort_by(|a, b| rank_desc((a.score, a.chunk_id), (b.score, b.chunk_id)));
    Ok(top)
}

/// Semantic memories for a query: all preferences (importance-descending)
/// followed by the top-K non-preferences by similarity, deduplicated by id.
pub fn retrieve_memories(
    conn: &Connection,
    query_vector: &[f32],
    top_k: usize,
) -> Result<Vec<RetrievedMemory>> {
    let k = top_k.max(1);
    let mut stmt = conn.prepare(
        "SELECT m.id, m.kind, m.text, m.importance, m.confidence, m.supersedes_id, e.vector_blob \
         FROM semantic_memories m \
         JOIN embeddings e ON e.id = m.embedding_id",
    )?;

    let mut preferences: Vec<RetrievedMemory> = Vec::new();
    let mut top: Vec<RetrievedMemory> = Vec::with_capacity(k);

    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let blob: Vec<u8> = row.get(6)?;
        let vector = bytes_to_vector(&blob)?;
        let score = cosine_similarity(query_vector, &vector)?;
        let memory = RetrievedMemory {
            memory_id: row.get(0)?,
            kind: row.get(1)?,
            text: row.get(2)?,
            importance: row.get(3)?,
            confidence: row.get(4)?,
            supersedes_id: row.get(5)?,
            score,
        };

        if memory.kind == "preference" {
            preferences.push(memory);
        } else {
            push_top_k(&mut top, k, memory, |m| (m.score, m.memory_id));
        }
    }

    preferences.sort_by(|a, b| rank_desc((a.importance, a.memory_id), (b.importance, b.memory_id)));
    top.sort_by(|a, b| rank_desc((a.score, a.memory_id), (b.score, b.memory_id)));

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(preferences.len() + top.len());
    for m in preferences.into_iter().chain(top) {
        if seen.insert(m.memory_id) {
            out.push(m);
        }
    }
    Ok(out)
}

/// Bounded top-K insert: replace the current weakest element when the new one
/// beats it. Weakest = lowest score, ties broken toward the higher id.
fn push_top_k<T, F>(top: &mut Vec<T>, k: usize, item: T, key: F)
where
    F: Fn(&T) -> (f64, i64),
{
    if top.len() < k {
        top.push(item);
        return;
    }
    let mut weakest = 0;
    for i in 1..top.len() {
        if rank_desc(key(&top[i]), key(&top[weakest])) == std::cmp::Ordering::Greater {
            weakest = i;
        }
    }
    if rank_desc(key(&item), key(&top[weakest])) == std::cmp::Ordering::Less {
        top[weakest] = item;
    }
}

/// Descending by score, then ascending by id. Total order for the ranking.
fn rank_desc(a: (f64, i64), b: (f64, i64)) -> std::cmp::Ordering {
    b.0.partial_cmp(&a.0)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then(a.1.cmp(&b.1))
}
