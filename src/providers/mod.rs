//! Model-provider capability traits and shared wire types.
//!
//! [`ChatClient`] and [`EmbeddingsClient`] are the only seams to the outside
//! world. Everything above them (caching, the pipeline, eval, optimize) works
//! against these traits, so tests can substitute scripted clients and the
//! cache decorator composes over any backend.

pub mod cached;
pub mod openai;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Token usage reported by a provider. All fields optional; some backends
/// omit usage entirely.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(rename = "promptTokens", skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(rename = "completionTokens", skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(rename = "totalTokens", skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

/// Sum two optional usage records; absent fields count as zero once either
/// side reports anything.
pub fn add_usage(a: Option<Usage>, b: Option<Usage>) -> Option<Usage> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (Some(x), Some(y)) => Some(Usage {
            prompt_tokens: Some(x.prompt_tokens.unwrap_or(0) + y.prompt_tokens.unwrap_or(0)),
            completion_tokens: Some(
                x.completion_tokens.unwrap_or(0) + y.completion_tokens.unwrap_or(0),
            ),
            total_tokens: Some(x.total_tokens.unwrap_or(0) + y.total_tokens.unwrap_or(0)),
        }),
    }
}

/// Parameters for one completion call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

/// A completed chat call: extracted text, optional usage, and the raw
/// provider response (kept verbatim for the response cache).
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub text: String,
    pub usage: Option<Usage>,
    pub raw: serde_json::Value,
}

/// Chat capability: `complete(messages, temperature, maxTokens)`.
#[async_trait]
pub trait ChatClient: Send + Sync {
    fn provider(&self) -> &str;
    fn model(&self) -> &str;
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion>;
}

/// Embedding capability: batch texts to vectors.
#[async_trait]
pub trait EmbeddingsClient: Send + Sync {
    fn provider(&self) -> &str;
    fn model(&self) -> &str;
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_usage_handles_missing_sides() {
        assert!(add_usage(None, None).is_none());

        let u = Usage { prompt_tokens: Some(10), completion_tokens: Some(5), total_tokens: Some(15) };
        let sum = add_usage(Some(u), None).unwrap();
        assert_eq!(sum.total_tokens, Some(15));

        let v = Usage { prompt_tokens: Some(1), completion_tokens: None, total_tokens: Some(1) };
        let sum = add_usage(Some(u), Some(v)).unwrap();
        assert_eq!(sum.prompt_tokens, Some(11));
        assert_eq!(sum.completion_tokens, Some(5));
        assert_eq!(sum.total_tokens, Some(16));
    }

    #[test]
    fn message_roles_serialize_lowercase() {
        let msg = ChatMessage::system("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "system");
    }
}
