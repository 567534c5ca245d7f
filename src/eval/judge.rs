//! LLM-judge scoring of answers against the retrieval sources.
//!
//! Four integer axes on a 0-5 scale. The composite quality score weights
//! correctness and groundedness at 0.4 each and memory use at 0.2; clarity is
//! reported but unweighted. A judge that returns anything unparsable scores
//! the answer as `None` and the caller records the hole rather than guessing.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::extract::extract_json_object;
use crate::providers::{ChatClient, ChatMessage, ChatRequest, Usage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeScores {
    pub correctness: u8,
    pub groundedness: u8,
    #[serde(rename = "memoryUse")]
    pub memory_use: u8,
    pub clarity: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

pub struct JudgeOutcome {
    pub scores: JudgeScores,
    pub usage: Option<Usage>,
}

/// Composite quality: 0.4 correctness + 0.4 groundedness + 0.2 memory use.
pub fn weighted_score(scores: &JudgeScores) -> f64 {
    0.4 * scores.correctness as f64
        + 0.4 * scores.groundedness as f64
        + 0.2 * scores.memory_use as f64
}

/// Ask the judge model to grade one answer. `Ok(None)` means the judge output
/// could not be validated.
pub async fn judge_answer(
    chat: &dyn ChatClient,
    question: &str,
    answer: &str,
    sources: &[(String, String)],
) -> Result<Option<JudgeOutcome>> {
    let snippets = sources
        .iter()
        .take(6)
        .map(|(citation, text)| format!("[{citation}] {}", truncate(text, 700)))
        .collect::<Vec<_>>()
        .join("\n\n");

    let prompt = [
        "Grade the assistant answer using the rubric.",
        "",
        "Return ONLY valid JSON:",
        r#"{ "correctness": 0-5, "groundedness": 0-5, "memoryUse": 0-5, "clarity": 0-5, "notes": "optional" }"#,
        "",
        "Rubric:",
        "- correctness: factual/technical correctness relative to sources",
        "- groundedness: uses the provided sources; no unsupported claims",
        "- memoryUse: uses relevant preferences/decisions if present (if none, score 0-1 based on neutrality)",
        "- clarity: concise and clear",
        "",
        "Question:",
        question,
        "",
        "Answer:",
        answer,
        "",
        "Sources (snippets):",
        if snippets.is_empty() { "(none)" } else { &snippets },
    ]
    .join("\n");

    let res = chat
        .complete(ChatRequest {
            messages: vec![
                ChatMessage::system("You are a strict evaluator. Output ONLY JSON. No markdown."),
                ChatMessage::user(prompt),
            ],
            temperature: Some(0.0),
            max_tokens: Some(300),
        })
        .await?;

    Ok(parse_scores(&res.text).map(|scores| JudgeOutcome { scores, usage: res.usage }))
}

fn parse_scores(text: &str) -> Option<JudgeScores> {
    let json_text = extract_json_object(text)?;
    let scores: JudgeScores = serde_json::from_str(json_text).ok()?;
    for axis in [scores.correctness, scores.groundedness, scores.memory_use, scores.clarity] {
        if axis > 5 {
            return None;
        }
    }
    Some(scores)
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}…")
    }
}
