//! Corpus ingestion: discover files, chunk, embed, persist.
//!
//! Chunking is a sliding window over whitespace tokens. The window advances
//! by `chunk_size - overlap` tokens, so consecutive chunks share an overlap
//! region and no token is dropped. Documents whose content hash is unchanged
//! since the last run are skipped entirely.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::hash::sha256_hex;
use crate::providers::cached::Embedder;
use crate::storage::{
    get_or_create_chunk_set, replace_chunks_for_document, upsert_document, ChunkInsert,
};

/// A chunk of document text with its token count.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub token_count: usize,
}

pub struct IngestOptions {
    pub corpus_path: PathBuf,
    pub chunk_size_tokens: u32,
    pub overlap_tokens: u32,
}

#[derive(Debug, Default)]
pub struct IngestStats {
    pub files_found: usize,
    pub documents_upserted: usize,
    pub documents_skipped: usize,
    pub chunks_written: usize,
}

const INCLUDE_EXTS: [&str; 3] = ["md", "markdown", "txt"];

/// Ingest every matching file under the corpus root.
pub async fn ingest_corpus(
    db: &Arc<Mutex<Connection>>,
    embedder: &Embedder,
    opts: &IngestOptions,
) -> Result<IngestStats> {
    let files = discover_files(&opts.corpus_path)?;
    let mut stats = IngestStats { files_found: files.len(), ..Default::default() };

    let chunk_set_id = {
        let conn = db.lock().expect("db mutex poisoned");
        get_or_create_chunk_set(
            &conn,
            opts.chunk_size_tokens,
            opts.overlap_tokens,
            embedder.model(),
        )?
    };

    let bar = ProgressBar::new(files.len() as u64).with_style(
        ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len}")
            .expect("valid progress template"),
    );
    bar.set_message("ingesting");

    for file_path in files {
        bar.inc(1);
        let path_str = file_path.to_string_lossy().into_owned();

        let bytes = fs::read(&file_path)
            .with_context(|| format!("reading {}", file_path.display()))?;
        let file_hash = sha256_hex(&bytes);
        let text = normalize_text(&String::from_utf8_lossy(&bytes));

        let document_id = {
            let conn = db.lock().expect("db mutex poisoned");
            let up = upsert_document(&conn, &path_str, &file_hash, &text)?;

            let existing_chunks: i64 = conn.query_row(
                "SELECT COUNT(*) FROM chunks WHERE chunk_set_id = ?1 AND document_id = ?2",
                params![chunk_set_id, up.document_id],
                |row| row.get(0),
            )?;
            if !up.changed && existing_chunks > 0 {
                stats.documents_skipped += 1;
                continue;
            }
            up.document_id
        };

        let chunks = chunk_text(&text, opts.chunk_size_tokens, opts.overlap_tokens);
        if chunks.is_empty() {
            stats.documents_upserted += 1;
            continue;
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = embedder.get_or_create(&texts).await?;

        let inserts: Vec<ChunkInsert> = chunks
            .iter()
            .zip(&embeddings)
            .enumerate()
            .map(|(idx, (chunk, emb))| ChunkInsert {
                chunk_index: idx as i64,
                text: chunk.text.clone(),
                token_count: chunk.token_count as i64,
                embedding_id: emb.id,
            })
            .collect();
        {
            let mut conn = db.lock().expect("db mutex poisoned");
            replace_chunks_for_document(&mut conn, chunk_set_id, document_id, &inserts)?;
        }

        stats.documents_upserted += 1;
        stats.chunks_written += chunks.len();
    }
    bar.finish_and_clear();

    tracing::info!(
        files = stats.files_found,
        upserted = stats.documents_upserted,
        skipped = stats.documents_skipped,
        chunks = stats.chunks_written,
        "ingest complete"
    );
    Ok(stats)
}

/// Recursively collect ingestable files, sorted for stable processing order.
/// Dot-prefixed entries are skipped.
pub fn discover_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    walk(root, &mut out)?;
    out.sort();
    Ok(out)
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("reading directory {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(&path, out)?;
        } else if file_type.is_file() {
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if INCLUDE_EXTS.contains(&ext.as_str()) {
                out.push(path);
            }
        }
    }
    Ok(())
}

/// Split into whitespace tokens.
pub fn tokenize(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

/// Sliding-window chunker over whitespace tokens.
pub fn chunk_text(text: &str, chunk_size_tokens: u32, overlap_tokens: u32) -> Vec<Chunk> {
    let chunk_size = (chunk_size_tokens as usize).max(1);
    let overlap = overlap_tokens as usize;

    let cleaned = text.replace('\u{0}', "");
    let tokens = tokenize(&cleaned);
    if tokens.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + chunk_size).min(tokens.len());
        let slice = &tokens[start..end];
        out.push(Chunk { text: slice.join(" "), token_count: slice.len() });
        if end == tokens.len() {
            break;
        }
        let next = end.saturating_sub(overlap);
        // Overlap >= chunk size would stall; force forward progress
        start = if next > start { next } else { end };
    }
    out
}

fn normalize_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut blank_run = 0usize;
    for line in input.replace('\u{0}', "").lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}
