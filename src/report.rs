//! Post-run summarization of optimizer artifacts.
//!
//! Best-pick selection prefers Stage B rows when any exist, since those are
//! measured on the larger question slice; otherwise it falls back to the
//! whole result set.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::jsonl::read_jsonl;
use crate::optimize::{ConfigSummary, Stage};
use crate::rag::pareto::ParetoPoint;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeRunSummary {
    pub run_type: String,
    pub config_count: usize,
    pub stage_a_count: usize,
    pub stage_b_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_by_score: Option<ConfigSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_by_latency: Option<ConfigSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_by_dollars: Option<ConfigSummary>,
    pub pareto: Vec<ParetoPoint>,
}

/// Build the run summary from in-memory results and the Pareto front.
pub fn summarize_optimize_results(
    results: &[ConfigSummary],
    pareto: Vec<ParetoPoint>,
) -> OptimizeRunSummary {
    let unique_configs: HashSet<&str> =
        results.iter().map(|r| r.config_hash.as_str()).collect();
    let stage_a_count = results.iter().filter(|r| r.stage == Stage::A).count();
    let stage_b_count = results.iter().filter(|r| r.stage == Stage::B).count();

    let candidates: Vec<&ConfigSummary> = if stage_b_count > 0 {
        results.iter().filter(|r| r.stage == Stage::B).collect()
    } else {
        results.iter().collect()
    };

    OptimizeRunSummary {
        run_type: "optimize".to_string(),
        config_count: unique_configs.len(),
        stage_a_count,
        stage_b_count,
        best_by_score: pick_best(&candidates, |a, b| {
            b.avg_score
                .partial_cmp(&a.avg_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        }),
        best_by_latency: pick_best(&candidates, |a, b| {
            a.p95_latency_ms
                .partial_cmp(&b.p95_latency_ms)
                .unwrap_or(std::cmp::Ordering::Equal)
        }),
        best_by_dollars: pick_best(&candidates, |a, b| {
            a.dollars
                .partial_cmp(&b.dollars)
                .unwrap_or(std::cmp::Ordering::Equal)
        }),
        pareto,
    }
}

/// Read an optimize run's artifacts and write `summary.json` next to them.
pub fn write_optimize_summary(out_dir: &Path) -> Result<OptimizeRunSummary> {
    let results: Vec<ConfigSummary> = read_jsonl(out_dir.join("results.jsonl"))?;
    let pareto_raw = fs::read_to_string(out_dir.join("pareto.json"))
        .with_context(|| format!("reading pareto.json in {}", out_dir.display()))?;
    let pareto: Vec<ParetoPoint> = serde_json::from_str(&pareto_raw)?;

    let summary = summarize_optimize_results(&results, pareto);
    fs::write(
        out_dir.join("summary.json"),
        serde_json::to_string_pretty(&summary)?,
    )?;
    Ok(summary)
}

fn pick_best<F>(candidates: &[&ConfigSummary], cmp: F) -> Option<ConfigSummary>
where
    F: Fn(&ConfigSummary, &ConfigSummary) -> std::cmp::Ordering,
{
    candidates
        .iter()
        .min_by(|a, b| cmp(a, b))
        .map(|s| (*s).clone())
}
