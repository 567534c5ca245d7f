//! Database-backed caching decorators over the provider traits.
//!
//! [`CachedChat`] stores raw completion responses keyed by the stable hash of
//! the canonicalized request (provider, model, messages, temperature,
//! maxTokens), so identical calls replay byte-identical results without
//! hitting the network. [`Embedder`] is the content-addressed embedding
//! store: one row per (model, text) hash, idempotent on re-ingest.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::hash::stable_json_hash;
use crate::vector::{bytes_to_vector, vector_to_bytes};

use super::{ChatClient, ChatCompletion, ChatRequest, EmbeddingsClient};

/// Chat decorator that serves repeated requests from the `llm_cache` table.
pub struct CachedChat {
    db: Arc<Mutex<Connection>>,
    inner: Box<dyn ChatClient>,
}

impl CachedChat {
    pub fn new(db: Arc<Mutex<Connection>>, inner: Box<dyn ChatClient>) -> Self {
        Self { db, inner }
    }

    fn cache_key(&self, request: &ChatRequest) -> String {
        stable_json_hash(&json!({
            "provider": self.inner.provider(),
            "model": self.inner.model(),
            "messages": request.messages,
            "temperature": request.temperature.unwrap_or(0.2),
            "maxTokens": request.max_tokens,
        }))
    }
}

#[async_trait]
impl ChatClient for CachedChat {
    fn provider(&self) -> &str {
        self.inner.provider()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion> {
        let key = self.cache_key(&request);

        let cached: Option<String> = {
            let conn = self.db.lock().expect("db mutex poisoned");
            conn.query_row(
                "SELECT response_json FROM llm_cache WHERE key = ?1 LIMIT 1",
                params![key],
                |row| row.get(0),
            )
            .optional()?
        };

        if let Some(response_json) = cached {
            let raw: serde_json::Value =
                serde_json::from_str(&response_json).context("corrupt llm_cache entry")?;
            tracing::debug!(key = %key, "llm cache hit");
            return Ok(super::openai::completion_from_raw(raw));
        }

        let request_json = serde_json::to_string(&json!({
            "model": self.inner.model(),
            "messages": request.messages,
            "temperature": request.temperature.unwrap_or(0.2),
            "maxTokens": request.max_tokens,
        }))?;

        let res = self.inner.complete(request).await?;

        {
            let conn = self.db.lock().expect("db mutex poisoned");
            conn.execute(
                "INSERT OR REPLACE INTO llm_cache(key, provider, model, request_json, response_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    key,
                    self.inner.provider(),
                    self.inner.model(),
                    request_json,
                    serde_json::to_string(&res.raw)?,
                ],
            )?;
        }

        Ok(res)
    }
}

/// A stored embedding: row id in the `embeddings` table plus the vector.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub id: i64,
    pub vector: Vec<f32>,
}

/// Content-addressed embedding store over an [`EmbeddingsClient`].
///
/// Identity is `hash({model, text})`; existing rows are reused, only missing
/// texts go to the backend. Concurrent writers racing on the same text
/// converge to the same row (`INSERT OR IGNORE` on the unique hash).
pub struct Embedder {
    db: Arc<Mutex<Connection>>,
    inner: Box<dyn EmbeddingsClient>,
}

impl Embedder {
    pub fn new(db: Arc<Mutex<Connection>>, inner: Box<dyn EmbeddingsClient>) -> Self {
        Self { db, inner }
    }

    pub fn model(&self) -> &str {
        self.inner.model()
    }

    /// Fetch-or-embed a batch, returning one record per input text in order.
    pub async fn get_or_create(&self, texts: &[String]) -> Result<Vec<EmbeddingRecord>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.inner.model().to_string();
        let hashes: Vec<String> = texts
            .iter()
            .map(|t| stable_json_hash(&json!({ "model": model, "text": t })))
            .collect();

        let mut by_hash: HashMap<String, EmbeddingRecord> = HashMap::new();
        {
            let conn = self.db.lock().expect("db mutex poisoned");
            let mut stmt = conn.prepare(
                "SELECT id, vector_blob FROM embeddings WHERE model = ?1 AND hash = ?2 LIMIT 1",
            )?;
            for h in &hashes {
                let row: Option<(i64, Vec<u8>)> = stmt
                    .query_row(params![model, h], |row| Ok((row.get(0)?, row.get(1)?)))
                    .optional()?;
                if let Some((id, blob)) = row {
                    by_hash.insert(h.clone(), EmbeddingRecord { id, vector: bytes_to_vector(&blob)? });
                }
            }
        }

        // Unique missing texts, first-occurrence order
        let mut missing: Vec<(String, String)> = Vec::new();
        for (text, h) in texts.iter().zip(&hashes) {
            if !by_hash.contains_key(h) && !missing.iter().any(|(mh, _)| mh == h) {
                missing.push((h.clone(), text.clone()));
            }
        }

        if !missing.is_empty() {
            let to_embed: Vec<String> = missing.iter().map(|(_, t)| t.clone()).collect();
            let vectors = self.inner.embed(&to_embed).await?;
            if vectors.len() != missing.len() {
                bail!(
                    "embeddings backend returned {} vectors for {} texts",
                    vectors.len(),
                    missing.len()
                );
            }

            let conn = self.db.lock().expect("db mutex poisoned");
            for ((h, _), vector) in missing.iter().zip(vectors) {
                conn.execute(
                    "INSERT OR IGNORE INTO embeddings(dims, vector_blob, model, hash) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![vector.len() as i64, vector_to_bytes(&vector), model, h],
                )?;
                let id: i64 = conn.query_row(
                    "SELECT id FROM embeddings WHERE hash = ?1",
                    params![h],
                    |row| row.get(0),
                )?;
                by_hash.insert(h.clone(), EmbeddingRecord { id, vector });
            }
        }

        hashes
            .iter()
            .map(|h| {
                by_hash
                    .get(h)
                    .cloned()
                    .with_context(|| format!("embedding for hash {h} missing after upsert"))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::providers::{ChatMessage, Usage};

    struct CountingChat {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl ChatClient for CountingChat {
        fn provider(&self) -> &str {
            "test"
        }

        fn model(&self) -> &str {
            "test-model"
        }

        async fn complete(&self, _request: ChatRequest) -> Result<ChatCompletion> {
            *self.calls.lock().unwrap() += 1;
            let raw = json!({
                "choices": [{ "message": { "content": "cached answer" } }],
                "usage": { "prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2 }
            });
            Ok(ChatCompletion {
                text: "cached answer".into(),
                usage: Some(Usage {
                    prompt_tokens: Some(1),
                    completion_tokens: Some(1),
                    total_tokens: Some(2),
                }),
                raw,
            })
        }
    }

    struct CountingEmbed {
        calls: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl EmbeddingsClient for CountingEmbed {
        fn provider(&self) -> &str {
            "test"
        }

        fn model(&self) -> &str {
            "embed-model"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.lock().unwrap().push(texts.len());
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    fn shared_db() -> Arc<Mutex<Connection>> {
        Arc::new(Mutex::new(open_memory_database().unwrap()))
    }

    #[tokio::test]
    async fn second_identical_completion_is_served_from_cache() {
        let db = shared_db();
        let chat = CachedChat::new(db.clone(), Box::new(CountingChat { calls: Mutex::new(0) }));

        let request = ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            temperature: Some(0.0),
            max_tokens: Some(10),
        };
        let first = chat.complete(request.clone()).await.unwrap();
        let second = chat.complete(request).await.unwrap();

        assert_eq!(first.text, "cached answer");
        assert_eq!(second.text, "cached answer");
        assert_eq!(second.usage.unwrap().total_tokens, Some(2));

        let rows: i64 = db
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM llm_cache", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn different_temperature_is_a_different_cache_key() {
        let db = shared_db();
        let chat = CachedChat::new(db.clone(), Box::new(CountingChat { calls: Mutex::new(0) }));

        let mut request = ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            temperature: Some(0.0),
            max_tokens: None,
        };
        chat.complete(request.clone()).await.unwrap();
        request.temperature = Some(0.7);
        chat.complete(request).await.unwrap();

        let rows: i64 = db
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM llm_cache", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 2);
    }

    #[tokio::test]
    async fn embedder_reuses_stored_vectors() {
        let db = shared_db();
        let embedder =
            Embedder::new(db.clone(), Box::new(CountingEmbed { calls: Mutex::new(vec![]) }));

        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let first = embedder.get_or_create(&texts).await.unwrap();
        assert_eq!(first.len(), 2);

        // Second call: both already stored, plus one new text
        let texts2 = vec!["alpha".to_string(), "gamma".to_string()];
        let second = embedder.get_or_create(&texts2).await.unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].id, first[0].id, "alpha must resolve to the same row");

        let rows: i64 = db
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM embeddings", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 3);
    }

    #[tokio::test]
    async fn embedder_deduplicates_batch_internally() {
        let db = shared_db();
        let counting = CountingEmbed { calls: Mutex::new(vec![]) };
        let embedder = Embedder::new(db.clone(), Box::new(counting));

        let texts = vec!["same".to_string(), "same".to_string(), "other".to_string()];
        let records = embedder.get_or_create(&texts).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].id, records[1].id);
        assert_ne!(records[0].id, records[2].id);
    }
}
