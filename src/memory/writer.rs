//! LLM-driven extraction of semantic memories from a finished turn.
//!
//! The extractor proposes up to 5 candidates; anything below the admission
//! floor (importance and confidence both at least 0.6) is dropped. Admitted
//! candidates are embedded and checked against the nearest stored memory:
//! similarity at or above 0.88 marks the old row as superseded by the new one.
//! Old rows are never deleted, supersession is a pointer on the new row.
//!
//! Extraction is best-effort. Unparsable or schema-invalid model output
//! stores nothing and reports zero proposals rather than failing the turn.

use anyhow::Result;
use rusqlite::Connection;
use serde::Deserialize;
use std::sync::{Arc, Mutex};

use crate::extract::extract_json_array;
use crate::providers::cached::Embedder;
use crate::providers::{ChatClient, ChatMessage, ChatRequest, Usage};
use crate::rag::retrieval::retrieve_memories;
use crate::rag::types::MemoryWriteStats;

use super::types::MemoryKind;
use super::{insert_semantic_memory, NewMemory};

const ADMISSION_FLOOR: f64 = 0.6;
const SUPERSEDE_SIMILARITY: f64 = 0.88;
const MAX_CANDIDATES: usize = 10;

#[derive(Debug, Deserialize)]
struct MemoryCandidate {
    text: String,
    kind: String,
    importance: f64,
    confidence: f64,
}

pub struct MemoryWriteOutcome {
    pub stats: MemoryWriteStats,
    pub usage: Option<Usage>,
}

pub struct MemoryWriteInput<'a> {
    pub db: &'a Arc<Mutex<Connection>>,
    pub chat: &'a dyn ChatClient,
    pub embedder: &'a Embedder,
    pub user_message: &'a str,
    pub assistant_answer: &'a str,
    /// (citation, text) pairs shown to the extractor for verification.
    pub retrieved_sources: &'a [(String, String)],
}

/// Extract and store semantic memories from one user/assistant exchange.
pub async fn write_semantic_memory_from_turn(
    input: MemoryWriteInput<'_>,
) -> Result<MemoryWriteOutcome> {
    let prompt = build_extraction_prompt(
        input.user_message,
        input.assistant_answer,
        input.retrieved_sources,
    );
    let res = input
        .chat
        .complete(ChatRequest {
            messages: vec![
                ChatMessage::system(
                    "You extract long-term semantic memories. Output ONLY valid JSON (an array). No markdown.",
                ),
                ChatMessage::user(prompt),
            ],
            temperature: Some(0.0),
            max_tokens: Some(600),
        })
        .await?;

    let candidates = parse_candidates(&res.text);
    let mut stats = MemoryWriteStats {
        proposed: candidates.len(),
        stored: 0,
        skipped_low_score: 0,
        superseded: 0,
    };

    for (candidate, kind) in candidates {
        if candidate.importance < ADMISSION_FLOOR || candidate.confidence < ADMISSION_FLOOR {
            stats.skipped_low_score += 1;
            continue;
        }

        let records = input.embedder.get_or_create(&[candidate.text.clone()]).await?;
        let Some(embedding) = records.first() else {
            continue;
        };

        let conn = input.db.lock().expect("db mutex poisoned");
        // The returned set always contains the best-scoring row, so max by
        // score is the true nearest neighbor
        let nearest = retrieve_memories(&conn, &embedding.vector, 1)?
            .into_iter()
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
            .filter(|m| m.score >= SUPERSEDE_SIMILARITY);
        let supersedes_id = nearest.map(|m| m.memory_id);
        if supersedes_id.is_some() {
            stats.superseded += 1;
        }

        insert_semantic_memory(
            &conn,
            &NewMemory {
                text: &candidate.text,
                kind,
                importance: candidate.importance,
                confidence: candidate.confidence,
                embedding_id: embedding.id,
                supersedes_id,
            },
        )?;
        stats.stored += 1;
    }

    if stats.stored > 0 || stats.skipped_low_score > 0 {
        tracing::debug!(
            proposed = stats.proposed,
            stored = stats.stored,
            skipped = stats.skipped_low_score,
            superseded = stats.superseded,
            "memory write"
        );
    }

    Ok(MemoryWriteOutcome { stats, usage: res.usage })
}

fn build_extraction_prompt(
    user_message: &str,
    assistant_answer: &str,
    retrieved_sources: &[(String, String)],
) -> String {
    let sources = retrieved_sources
        .iter()
        .take(8)
        .map(|(citation, text)| format!("{citation}: {}", truncate(text, 700)))
        .collect::<Vec<_>>()
        .join("\n\n");

    [
        "Extract up to 5 high-value long-term semantic memories to store.",
        "",
        "Rules:",
        "- Only store stable, reusable information: user preferences, decisions, verified facts, durable insights, or TODOs.",
        "- Do NOT store transient chat text, greetings, or one-off details.",
        "- If unsure, omit.",
        "- importance/confidence are 0..1.",
        "",
        "Output JSON array with objects:",
        r#"[{ "text": "...", "kind": "preference|decision|fact|insight|todo", "importance": 0.0, "confidence": 0.0 }]"#,
        "",
        "User message:",
        &truncate(user_message, 1200),
        "",
        "Assistant answer:",
        &truncate(assistant_answer, 1600),
        "",
        "Retrieved sources (for verification):",
        if sources.is_empty() { "(none)" } else { &sources },
    ]
    .join("\n")
}

/// Parse and validate the candidate array. One bad entry invalidates the
/// whole batch, the same as a parse failure.
fn parse_candidates(text: &str) -> Vec<(MemoryCandidate, MemoryKind)> {
    let Some(json_text) = extract_json_array(text) else {
        return Vec::new();
    };
    let Ok(candidates) = serde_json::from_str::<Vec<MemoryCandidate>>(json_text) else {
        return Vec::new();
    };
    if candidates.len() > MAX_CANDIDATES {
        return Vec::new();
    }

    let mut validated = Vec::with_capacity(candidates.len());
    for c in candidates {
        if c.text.is_empty()
            || !(0.0..=1.0).contains(&c.importance)
            || !(0.0..=1.0).contains(&c.confidence)
        {
            return Vec::new();
        }
        let Ok(kind) = c.kind.parse::<MemoryKind>() else {
            return Vec::new();
        };
        validated.push((c, kind));
    }
    validated
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::providers::{ChatCompletion, EmbeddingsClient};
    use async_trait::async_trait;

    struct FixedChat(String);

    #[async_trait]
    impl ChatClient for FixedChat {
        fn provider(&self) -> &str {
            "test"
        }

        fn model(&self) -> &str {
            "m"
        }

        async fn complete(&self, _request: ChatRequest) -> Result<ChatCompletion> {
            Ok(ChatCompletion {
                text: self.0.clone(),
                usage: None,
                raw: serde_json::Value::Null,
            })
        }
    }

    struct LengthEmbed;

    #[async_trait]
    impl EmbeddingsClient for LengthEmbed {
        fn provider(&self) -> &str {
            "test"
        }

        fn model(&self) -> &str {
            "embed-model"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            // Same text always maps to the same vector
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    fn setup() -> (Arc<Mutex<Connection>>, Embedder) {
        let db = Arc::new(Mutex::new(open_memory_database().unwrap()));
        let embedder = Embedder::new(db.clone(), Box::new(LengthEmbed));
        (db, embedder)
    }

    async fn run(db: &Arc<Mutex<Connection>>, embedder: &Embedder, reply: &str) -> MemoryWriteOutcome {
        let chat = FixedChat(reply.to_string());
        write_semantic_memory_from_turn(MemoryWriteInput {
            db,
            chat: &chat,
            embedder,
            user_message: "I prefer SQLite for this project",
            assistant_answer: "Noted.",
            retrieved_sources: &[],
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn admitted_candidate_is_stored() {
        let (db, embedder) = setup();
        let reply = r#"[{ "text": "User prefers SQLite", "kind": "preference", "importance": 0.9, "confidence": 0.8 }]"#;
        let out = run(&db, &embedder, reply).await;

        assert_eq!(out.stats.proposed, 1);
        assert_eq!(out.stats.stored, 1);
        assert_eq!(out.stats.skipped_low_score, 0);
        assert_eq!(out.stats.superseded, 0);

        let count: i64 = db
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM semantic_memories", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn low_importance_candidate_is_never_stored() {
        let (db, embedder) = setup();
        let reply = r#"[{ "text": "maybe useful", "kind": "fact", "importance": 0.5, "confidence": 0.9 }]"#;
        let out = run(&db, &embedder, reply).await;

        assert_eq!(out.stats.proposed, 1);
        assert_eq!(out.stats.stored, 0);
        assert_eq!(out.stats.skipped_low_score, 1);

        let count: i64 = db
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM semantic_memories", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn low_confidence_candidate_is_skipped() {
        let (db, embedder) = setup();
        let reply = r#"[{ "text": "shaky", "kind": "fact", "importance": 0.9, "confidence": 0.59 }]"#;
        let out = run(&db, &embedder, reply).await;
        assert_eq!(out.stats.skipped_low_score, 1);
        assert_eq!(out.stats.stored, 0);
    }

    #[tokio::test]
    async fn near_duplicate_supersedes_existing_memory() {
        let (db, embedder) = setup();

        // Identical text embeds to an identical vector, similarity 1.0
        let reply = r#"[{ "text": "Project database is SQLite", "kind": "decision", "importance": 0.8, "confidence": 0.9 }]"#;
        let first = run(&db, &embedder, reply).await;
        assert_eq!(first.stats.superseded, 0);

        let second = run(&db, &embedder, reply).await;
        assert_eq!(second.stats.stored, 1);
        assert_eq!(second.stats.superseded, 1);

        let conn = db.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM semantic_memories", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2, "old row is retained, not deleted");
        let chained: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM semantic_memories WHERE supersedes_id IS NOT NULL",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(chained, 1);
    }

    #[tokio::test]
    async fn garbage_output_stores_nothing() {
        let (db, embedder) = setup();
        let out = run(&db, &embedder, "I could not find any memories, sorry!").await;
        assert_eq!(out.stats.proposed, 0);
        assert_eq!(out.stats.stored, 0);
    }

    #[test]
    fn invalid_kind_rejects_whole_batch() {
        let reply = r#"[
            { "text": "good", "kind": "fact", "importance": 0.9, "confidence": 0.9 },
            { "text": "bad", "kind": "rumor", "importance": 0.9, "confidence": 0.9 }
        ]"#;
        assert!(parse_candidates(reply).is_empty());
    }

    #[test]
    fn out_of_range_scores_reject_whole_batch() {
        let reply = r#"[{ "text": "x", "kind": "fact", "importance": 1.4, "confidence": 0.9 }]"#;
        assert!(parse_candidates(reply).is_empty());
    }
}
