#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

use memrag::db::open_memory_database;
use memrag::providers::{
    ChatClient, ChatCompletion, ChatRequest, EmbeddingsClient, Usage,
};

/// Fresh in-memory database with the full schema, wrapped for sharing.
pub fn test_db() -> Arc<Mutex<Connection>> {
    Arc::new(Mutex::new(open_memory_database().unwrap()))
}

/// Deterministic keyword embeddings: dimension 0 responds to alpha/beta,
/// dimension 1 to gamma/delta, dimension 2 is a constant baseline so no
/// vector is ever zero. The same text always embeds identically.
pub struct KeywordEmbed;

#[async_trait]
impl EmbeddingsClient for KeywordEmbed {
    fn provider(&self) -> &str {
        "test"
    }

    fn model(&self) -> &str {
        "test-embed"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let count = |word: &str| lower.matches(word).count() as f32;
    vec![count("alpha") + count("beta"), count("gamma") + count("delta"), 0.1]
}

/// Always replies with the same text and a fixed usage record.
pub struct FixedChat {
    pub reply: String,
}

impl FixedChat {
    pub fn new(reply: impl Into<String>) -> Self {
        Self { reply: reply.into() }
    }
}

#[async_trait]
impl ChatClient for FixedChat {
    fn provider(&self) -> &str {
        "test"
    }

    fn model(&self) -> &str {
        "test-chat"
    }

    async fn complete(&self, _request: ChatRequest) -> Result<ChatCompletion> {
        Ok(ChatCompletion {
            text: self.reply.clone(),
            usage: Some(Usage {
                prompt_tokens: Some(10),
                completion_tokens: Some(5),
                total_tokens: Some(15),
            }),
            raw: serde_json::Value::Null,
        })
    }
}

/// Panics on any completion call. For asserting a path makes no model calls.
pub struct PanicChat;

#[async_trait]
impl ChatClient for PanicChat {
    fn provider(&self) -> &str {
        "test"
    }

    fn model(&self) -> &str {
        "never"
    }

    async fn complete(&self, _request: ChatRequest) -> Result<ChatCompletion> {
        panic!("this path must not call the model");
    }
}

/// Replies with a fixed text and records every request it sees.
pub struct RecordingChat {
    pub reply: String,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl RecordingChat {
    pub fn new(reply: impl Into<String>) -> Self {
        Self { reply: reply.into(), requests: Mutex::new(Vec::new()) }
    }

    pub fn last_user_content(&self) -> String {
        let requests = self.requests.lock().unwrap();
        let last = requests.last().expect("no requests recorded");
        last.messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, memrag::providers::Role::User))
            .map(|m| m.content.clone())
            .expect("no user message in last request")
    }
}

#[async_trait]
impl ChatClient for RecordingChat {
    fn provider(&self) -> &str {
        "test"
    }

    fn model(&self) -> &str {
        "test-chat"
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion> {
        self.requests.lock().unwrap().push(request);
        Ok(ChatCompletion {
            text: self.reply.clone(),
            usage: Some(Usage {
                prompt_tokens: Some(10),
                completion_tokens: Some(5),
                total_tokens: Some(15),
            }),
            raw: serde_json::Value::Null,
        })
    }
}
