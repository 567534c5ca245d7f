//! Pipeline configuration and per-turn result types.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::hash::stable_json_hash;
use crate::providers::Usage;

/// Which stores feed the context block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryBlend {
    #[serde(rename = "docs_only")]
    DocsOnly,
    #[serde(rename = "docs+semantic")]
    DocsAndSemantic,
}

/// One point in the pipeline configuration space. Immutable; identity is the
/// content hash of its canonical JSON form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    pub chunk_size_tokens: u32,
    pub overlap_tokens: u32,
    pub top_k: u32,
    pub rewrite: bool,
    pub rerank: bool,
    pub context_budget_tokens: u32,
    pub memory_blend: MemoryBlend,
}

impl PipelineConfig {
    /// Reject degenerate values before the config reaches persistence or a
    /// model call.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size_tokens == 0 {
            bail!("chunkSizeTokens must be positive");
        }
        if self.top_k == 0 {
            bail!("topK must be positive");
        }
        if self.context_budget_tokens == 0 {
            bail!("contextBudgetTokens must be positive");
        }
        Ok(())
    }

    /// Content hash over the canonical key-sorted form. Structurally equal
    /// configs always hash identically.
    pub fn content_hash(&self) -> String {
        stable_json_hash(self)
    }
}

/// Wall-clock duration of one pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timing {
    pub label: String,
    pub ms: f64,
}

/// Accounting record for one model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCallRecord {
    pub label: String,
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// One retrieved source chunk, as cited in the answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Inline citation tag, e.g. `S1`.
    pub citation: String,
    pub chunk_id: i64,
    pub document_path: String,
    pub document_title: String,
    pub score: f64,
    pub text: String,
}

/// Counters from the per-turn memory write pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryWriteStats {
    pub proposed: usize,
    pub stored: usize,
    pub skipped_low_score: usize,
    pub superseded: usize,
}

/// Everything produced by one turn. Ephemeral; callers append what they need
/// to their own result logs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResult {
    pub answer: String,
    /// Only the sources that survived budget packing, safe to cite.
    pub sources: Vec<Source>,
    pub timings: Vec<Timing>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_total: Option<Usage>,
    pub llm_calls: Vec<LlmCallRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_write: Option<MemoryWriteStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewritten_query: Option<String>,
}
