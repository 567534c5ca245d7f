//! Optional query rewrite: paraphrase the user question into a concise
//! search query before embedding. Disabled configs pass the question through
//! untouched.

use anyhow::Result;

use crate::providers::{ChatClient, ChatMessage, ChatRequest, Usage};

pub struct RewriteOutcome {
    pub query: String,
    pub usage: Option<Usage>,
}

/// Rewrite the question when enabled; otherwise return it unchanged. An empty
/// model response falls back to the original question.
pub async fn maybe_rewrite_query(
    chat: &dyn ChatClient,
    question: &str,
    enabled: bool,
) -> Result<RewriteOutcome> {
    if !enabled {
        return Ok(RewriteOutcome { query: question.to_string(), usage: None });
    }

    let res = chat
        .complete(ChatRequest {
            messages: vec![
                ChatMessage::system(
                    "Rewrite user questions into concise search queries. Output only the query text.",
                ),
                ChatMessage::user(question),
            ],
            temperature: Some(0.0),
            max_tokens: Some(80),
        })
        .await?;

    let query = res.text.trim();
    Ok(RewriteOutcome {
        query: if query.is_empty() { question.to_string() } else { query.to_string() },
        usage: res.usage,
    })
}
