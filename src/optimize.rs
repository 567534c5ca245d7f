//! Two-stage offline configuration search.
//!
//! Stage A screens every sampled configuration on a small question slice;
//! the top N by average quality graduate to Stage B, which re-evaluates them
//! on the larger slice. Both stages run with memory writes disabled so no
//! configuration can poison the memory store for the ones after it.
//!
//! Artifacts land in the output directory: `configs.jsonl` (the sampled
//! candidates), `results.jsonl` (one summary per config per stage),
//! `pareto.json` (the non-dominated front over both stages), and
//! `cost_model.json` when a cost model path is configured.

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::eval::judge::{judge_answer, weighted_score};
use crate::eval::EvalQuestion;
use crate::jsonl::{append_jsonl, read_jsonl};
use crate::memory::create_session;
use crate::pricing::PricingTable;
use crate::providers::cached::Embedder;
use crate::providers::ChatClient;
use crate::rag::cost_model::{load_cost_model, save_cost_model, CostModel};
use crate::rag::explorer::{enumerate_config_space, sample_configs};
use crate::rag::pareto::{pareto_front, ParetoPoint};
use crate::rag::pipeline::{run_turn, TurnInput};
use crate::rag::types::PipelineConfig;

/// Which search stage produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    A,
    B,
}

/// Aggregate outcome for one configuration in one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSummary {
    pub config_hash: String,
    pub stage: Stage,
    pub n: usize,
    pub avg_score: f64,
    pub p95_latency_ms: f64,
    pub total_tokens: u64,
    pub dollars: f64,
}

#[derive(Debug, Clone)]
pub struct OptimizeOptions {
    pub questions_path: PathBuf,
    pub out_dir: PathBuf,
    pub seed: u64,
    pub warmup: usize,
    pub min_configs: usize,
    pub stage_a_questions: usize,
    pub stage_b_questions: usize,
    pub top_n: usize,
    pub cost_model_path: Option<PathBuf>,
    pub pricing_path: Option<PathBuf>,
}

pub struct OptimizeRun<'a> {
    pub db: &'a Arc<Mutex<Connection>>,
    pub embedder: &'a Embedder,
    pub answer_chat: &'a dyn ChatClient,
    pub support_chat: Option<&'a dyn ChatClient>,
    pub judge_chat: &'a dyn ChatClient,
}

pub struct OptimizeArtifacts {
    pub configs_path: PathBuf,
    pub results_path: PathBuf,
    pub pareto_path: PathBuf,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigLine<'a> {
    config_hash: String,
    config: &'a PipelineConfig,
}

struct PerQuestion {
    latency_ms: f64,
    total_tokens: u64,
    dollars: f64,
    weighted_score: Option<f64>,
}

/// Run the full two-stage search and write every artifact.
pub async fn run_optimize(
    run: OptimizeRun<'_>,
    opts: &OptimizeOptions,
) -> Result<OptimizeArtifacts> {
    fs::create_dir_all(&opts.out_dir)
        .with_context(|| format!("creating {}", opts.out_dir.display()))?;

    let configs_path = opts.out_dir.join("configs.jsonl");
    let results_path = opts.out_dir.join("results.jsonl");
    let pareto_path = opts.out_dir.join("pareto.json");
    for path in [&configs_path, &results_path, &pareto_path] {
        if path.exists() {
            fs::remove_file(path)?;
        }
    }

    let pricing = opts
        .pricing_path
        .as_deref()
        .map(PricingTable::load)
        .unwrap_or_default();
    let mut cost_model = opts.cost_model_path.as_deref().map(load_cost_model);

    let mut questions: Vec<EvalQuestion> = read_jsonl(&opts.questions_path)?;
    questions.truncate(opts.stage_a_questions.max(opts.stage_b_questions));
    if questions.is_empty() {
        bail!("no questions loaded from {}", opts.questions_path.display());
    }

    // Sampling failure aborts before any model call is spent
    let configs = sample_configs(
        &enumerate_config_space(),
        opts.seed,
        opts.warmup,
        opts.min_configs,
    )?;

    for config in &configs {
        append_jsonl(
            &configs_path,
            &ConfigLine { config_hash: config.content_hash(), config },
        )?;
    }

    tracing::info!(
        configs = configs.len(),
        questions = questions.len(),
        seed = opts.seed,
        "starting stage A"
    );

    let stage_a_slice = &questions[..opts.stage_a_questions.min(questions.len())];
    let mut stage_a: Vec<ConfigSummary> = Vec::with_capacity(configs.len());
    for config in &configs {
        let per = eval_config(&run, config, stage_a_slice, &pricing, cost_model.as_mut()).await?;
        let summary = summarize(config.content_hash(), Stage::A, &per);
        append_jsonl(&results_path, &summary)?;
        stage_a.push(summary);
    }

    stage_a.sort_by(|a, b| {
        b.avg_score
            .partial_cmp(&a.avg_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let finalists = &stage_a[..opts.top_n.max(1).min(stage_a.len())];

    tracing::info!(finalists = finalists.len(), "starting stage B");

    let stage_b_slice = &questions[..opts.stage_b_questions.min(questions.len())];
    let mut stage_b: Vec<ConfigSummary> = Vec::with_capacity(finalists.len());
    for summary in finalists {
        let Some(config) = configs.iter().find(|c| c.content_hash() == summary.config_hash)
        else {
            continue;
        };
        let per = eval_config(&run, config, stage_b_slice, &pricing, cost_model.as_mut()).await?;
        let summary = summarize(summary.config_hash.clone(), Stage::B, &per);
        append_jsonl(&results_path, &summary)?;
        stage_b.push(summary);
    }

    let points: Vec<ParetoPoint> = stage_a
        .iter()
        .chain(&stage_b)
        .map(|s| ParetoPoint {
            config_hash: s.config_hash.clone(),
            stage: s.stage,
            avg_score: s.avg_score,
            p95_latency_ms: s.p95_latency_ms,
            total_tokens: s.total_tokens,
            dollars: s.dollars,
        })
        .collect();
    fs::write(
        &pareto_path,
        serde_json::to_string_pretty(&pareto_front(&points))?,
    )?;

    if let (Some(model), Some(path)) = (cost_model.as_ref(), opts.cost_model_path.as_deref()) {
        save_cost_model(path, model)?;
        fs::write(
            opts.out_dir.join("cost_model.json"),
            serde_json::to_string_pretty(model)?,
        )?;
    }

    tracing::info!(out_dir = %opts.out_dir.display(), "optimize complete");
    Ok(OptimizeArtifacts { configs_path, results_path, pareto_path })
}

/// Evaluate one configuration over a question slice under a fresh session.
/// Memory writes stay off for the whole search.
async fn eval_config(
    run: &OptimizeRun<'_>,
    config: &PipelineConfig,
    questions: &[EvalQuestion],
    pricing: &PricingTable,
    mut cost_model: Option<&mut CostModel>,
) -> Result<Vec<PerQuestion>> {
    let session = {
        let conn = run.db.lock().expect("db mutex poisoned");
        create_session(&conn)?
    };

    let mut out = Vec::with_capacity(questions.len());
    for q in questions {
        let turn = run_turn(TurnInput {
            db: run.db,
            embedder: run.embedder,
            answer_chat: run.answer_chat,
            support_chat: run.support_chat,
            config,
            session_id: &session.id,
            question: &q.question,
            enable_memory_writes: false,
        })
        .await?;

        if let Some(model) = cost_model.as_deref_mut() {
            model.update(&turn.timings);
        }

        let sources: Vec<(String, String)> = turn
            .sources
            .iter()
            .map(|s| (s.citation.clone(), s.text.clone()))
            .collect();
        let judged = judge_answer(run.judge_chat, &q.question, &turn.answer, &sources).await?;

        let latency_ms = turn.timings.iter().map(|t| t.ms).sum();
        let total_tokens = turn
            .usage_total
            .as_ref()
            .and_then(|u| u.total_tokens)
            .unwrap_or(0)
            + judged
                .as_ref()
                .and_then(|j| j.usage.as_ref())
                .and_then(|u| u.total_tokens)
                .unwrap_or(0);
        let dollars: f64 = turn
            .llm_calls
            .iter()
            .filter_map(|c| pricing.estimate_dollars(&c.provider, &c.model, c.usage.as_ref()))
            .sum::<f64>()
            + judged
                .as_ref()
                .and_then(|j| {
                    pricing.estimate_dollars(
                        run.judge_chat.provider(),
                        run.judge_chat.model(),
                        j.usage.as_ref(),
                    )
                })
                .unwrap_or(0.0);

        out.push(PerQuestion {
            latency_ms,
            total_tokens,
            dollars,
            weighted_score: judged.as_ref().map(|j| weighted_score(&j.scores)),
        });
    }
    Ok(out)
}

/// Collapse per-question rows into one summary. Unscored questions are
/// excluded from the average; a config with no scored questions averages 0.
fn summarize(config_hash: String, stage: Stage, per: &[PerQuestion]) -> ConfigSummary {
    let scores: Vec<f64> = per.iter().filter_map(|p| p.weighted_score).collect();
    let avg_score = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    };

    let mut latencies: Vec<f64> = per.iter().map(|p| p.latency_ms).collect();
    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    ConfigSummary {
        config_hash,
        stage,
        n: per.len(),
        avg_score,
        p95_latency_ms: percentile(&latencies, 0.95),
        total_tokens: per.iter().map(|p| p.total_tokens).sum(),
        dollars: per.iter().map(|p| p.dollars).sum(),
    }
}

/// Nearest-rank percentile over an ascending-sorted slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((p * sorted.len() as f64).ceil() as isize - 1)
        .clamp(0, sorted.len() as isize - 1) as usize;
    sorted[idx]
}
