//! Offline evaluation: run a question set through one pipeline configuration
//! and log per-question results with judge scores, latency, and cost.
//!
//! Memory writes are off by default so eval runs stay reproducible; the
//! memory store is treated as read-only input unless explicitly enabled.

pub mod judge;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::jsonl::{append_jsonl, read_jsonl};
use crate::pricing::PricingTable;
use crate::providers::cached::Embedder;
use crate::providers::{ChatClient, Usage};
use crate::rag::pipeline::{run_turn, TurnInput};
use crate::rag::types::{MemoryWriteStats, PipelineConfig, Timing};

use judge::{judge_answer, weighted_score, JudgeScores};

/// One question from the eval set, JSONL-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalQuestion {
    pub id: String,
    pub question: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected_sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Citation pointer persisted with each result row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedSourceRef {
    pub citation: String,
    pub document_path: String,
    pub chunk_id: i64,
}

/// One fully-scored question outcome, one JSONL line in `results.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalResult {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub config_hash: String,
    pub timings_ms: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub dollars: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judge_usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judge_dollars: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judge: Option<JudgeScores>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weighted_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recall_at_k: Option<u8>,
    pub retrieved_sources: Vec<RetrievedSourceRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewritten_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_write: Option<MemoryWriteStats>,
}

pub struct RunEvalOptions {
    pub questions_path: PathBuf,
    pub out_dir: PathBuf,
    pub limit: Option<usize>,
    pub enable_memory_writes: bool,
    pub cost_model_path: Option<PathBuf>,
    pub pricing_path: Option<PathBuf>,
}

pub struct EvalRun<'a> {
    pub db: &'a Arc<Mutex<Connection>>,
    pub embedder: &'a Embedder,
    pub answer_chat: &'a dyn ChatClient,
    pub support_chat: Option<&'a dyn ChatClient>,
    pub judge_chat: &'a dyn ChatClient,
    pub config: &'a PipelineConfig,
    pub session_id: &'a str,
}

pub struct EvalOutcome {
    pub results_path: PathBuf,
    pub count: usize,
}

/// Run the full question set, appending one result line per question.
pub async fn run_eval(run: EvalRun<'_>, opts: &RunEvalOptions) -> Result<EvalOutcome> {
    fs::create_dir_all(&opts.out_dir)
        .with_context(|| format!("creating {}", opts.out_dir.display()))?;

    let config_hash = run.config.content_hash();
    let pricing = opts
        .pricing_path
        .as_deref()
        .map(PricingTable::load)
        .unwrap_or_default();
    let mut cost_model = opts
        .cost_model_path
        .as_deref()
        .map(crate::rag::cost_model::load_cost_model);

    // Snapshot the configuration next to the results it produced
    fs::write(
        opts.out_dir.join("config.json"),
        serde_json::to_string_pretty(run.config)?,
    )?;

    let results_path = opts.out_dir.join("results.jsonl");
    if results_path.exists() {
        fs::remove_file(&results_path)?;
    }

    let questions: Vec<EvalQuestion> = read_jsonl(&opts.questions_path)?;
    let mut count = 0usize;

    for q in questions {
        if opts.limit.is_some_and(|limit| count >= limit) {
            break;
        }

        let turn = run_turn(TurnInput {
            db: run.db,
            embedder: run.embedder,
            answer_chat: run.answer_chat,
            support_chat: run.support_chat,
            config: run.config,
            session_id: run.session_id,
            question: &q.question,
            enable_memory_writes: opts.enable_memory_writes,
        })
        .await?;

        if let Some(model) = cost_model.as_mut() {
            model.update(&turn.timings);
        }

        let judge_sources: Vec<(String, String)> = turn
            .sources
            .iter()
            .map(|s| (s.citation.clone(), s.text.clone()))
            .collect();
        let judged = judge_answer(run.judge_chat, &q.question, &turn.answer, &judge_sources).await?;
        if judged.is_none() {
            tracing::warn!(id = %q.id, "judge output unusable, recording unscored result");
        }

        let dollars: f64 = turn
            .llm_calls
            .iter()
            .filter_map(|c| pricing.estimate_dollars(&c.provider, &c.model, c.usage.as_ref()))
            .sum();
        let judge_dollars = judged.as_ref().and_then(|j| {
            pricing.estimate_dollars(
                run.judge_chat.provider(),
                run.judge_chat.model(),
                j.usage.as_ref(),
            )
        });

        let result = EvalResult {
            id: q.id.clone(),
            question: q.question.clone(),
            answer: turn.answer.clone(),
            config_hash: config_hash.clone(),
            timings_ms: timings_map(&turn.timings),
            usage: turn.usage_total.clone(),
            dollars,
            judge_usage: judged.as_ref().and_then(|j| j.usage.clone()),
            judge_dollars,
            judge: judged.as_ref().map(|j| j.scores.clone()),
            weighted_score: judged.as_ref().map(|j| weighted_score(&j.scores)),
            recall_at_k: recall_at_k(&q.expected_sources, &turn.sources),
            retrieved_sources: turn
                .sources
                .iter()
                .map(|s| RetrievedSourceRef {
                    citation: s.citation.clone(),
                    document_path: s.document_path.clone(),
                    chunk_id: s.chunk_id,
                })
                .collect(),
            rewritten_query: turn.rewritten_query.clone(),
            memory_write: turn.memory_write,
        };
        append_jsonl(&results_path, &result)?;
        count += 1;
    }

    if let (Some(model), Some(path)) = (cost_model.as_ref(), opts.cost_model_path.as_deref()) {
        crate::rag::cost_model::save_cost_model(path, model)?;
        fs::write(
            opts.out_dir.join("cost_model.json"),
            serde_json::to_string_pretty(model)?,
        )?;
    }

    tracing::info!(count, path = %results_path.display(), "eval complete");
    Ok(EvalOutcome { results_path, count })
}

fn timings_map(timings: &[Timing]) -> BTreeMap<String, f64> {
    timings.iter().map(|t| (t.label.clone(), t.ms)).collect()
}

/// Binary recall: 1 when any expected source substring matches any retrieved
/// document path, absent when the question lists no expectations.
fn recall_at_k(expected: &[String], sources: &[crate::rag::types::Source]) -> Option<u8> {
    if expected.is_empty() {
        return None;
    }
    let hit = expected
        .iter()
        .any(|e| sources.iter().any(|s| s.document_path.contains(e.as_str())));
    Some(u8::from(hit))
}
