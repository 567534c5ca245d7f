//! Optional LLM reranking of retrieved candidates.
//!
//! The model sees numbered snippets and must return a JSON array of indices,
//! best first. Any parse problem, out-of-range index, or duplicate falls back
//! toward the original retrieval order; reranking can only reorder, never
//! fail a turn.

use anyhow::Result;

use crate::extract::extract_json_array;
use crate::providers::{ChatClient, ChatMessage, ChatRequest, Usage};

pub struct RerankOutcome {
    /// Indices into the candidate slice, best first, already capped at `take`.
    pub order: Vec<usize>,
    pub usage: Option<Usage>,
}

/// Rerank candidate texts when enabled; otherwise keep the first `take` in
/// their given order.
pub async fn maybe_rerank(
    chat: &dyn ChatClient,
    question: &str,
    candidates: &[(String, String)], // (citation, text)
    enabled: bool,
    take: usize,
) -> Result<RerankOutcome> {
    let passthrough = || RerankOutcome {
        order: (0..candidates.len().min(take)).collect(),
        usage: None,
    };

    if !enabled || candidates.len() <= 1 {
        return Ok(passthrough());
    }

    let mut prompt_lines = vec![
        "You are reranking retrieved text chunks for relevance.".to_string(),
        "Return ONLY JSON: an array of indices in best-to-worst order.".to_string(),
        String::new(),
        "Question:".to_string(),
        question.to_string(),
        String::new(),
        "Candidates:".to_string(),
    ];
    for (i, (citation, text)) in candidates.iter().enumerate() {
        prompt_lines.push(format!("({i}) {citation}: {}", truncate(text, 500)));
    }

    let res = chat
        .complete(ChatRequest {
            messages: vec![
                ChatMessage::system("Output ONLY valid JSON. No markdown."),
                ChatMessage::user(prompt_lines.join("\n")),
            ],
            temperature: Some(0.0),
            max_tokens: Some(200),
        })
        .await?;

    let order = parse_order(&res.text, candidates.len(), take);
    let order = if order.is_empty() {
        (0..candidates.len().min(take)).collect()
    } else {
        order
    };
    Ok(RerankOutcome { order, usage: res.usage })
}

/// Parse the index array, dropping out-of-range and duplicate entries.
/// Unparsable output yields an empty order (caller falls back).
fn parse_order(text: &str, candidate_count: usize, take: usize) -> Vec<usize> {
    let Some(json_text) = extract_json_array(text) else {
        return Vec::new();
    };
    let Ok(indices) = serde_json::from_str::<Vec<i64>>(json_text) else {
        return Vec::new();
    };
    if indices.is_empty() || indices.len() > 100 {
        return Vec::new();
    }

    let mut seen = std::collections::HashSet::new();
    let mut order = Vec::new();
    for idx in indices {
        if idx < 0 || idx as usize >= candidate_count {
            continue;
        }
        let idx = idx as usize;
        if !seen.insert(idx) {
            continue;
        }
        order.push(idx);
        if order.len() >= take {
            break;
        }
    }
    order
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}…")
    }
}
