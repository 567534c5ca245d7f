//! Pareto analysis over evaluated configurations.
//!
//! Four axes: quality up, p95 latency down, dollars down, total tokens down.
//! A point survives unless some other point is at least as good on every axis
//! and strictly better on one. Points that tie on all four axes do not
//! dominate each other, so both survive.

use serde::{Deserialize, Serialize};

use crate::optimize::Stage;

/// One evaluated configuration projected onto the tradeoff axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParetoPoint {
    pub config_hash: String,
    pub stage: Stage,
    pub avg_score: f64,
    pub p95_latency_ms: f64,
    pub total_tokens: u64,
    pub dollars: f64,
}

/// Non-dominated subset, sorted by descending quality.
pub fn pareto_front(points: &[ParetoPoint]) -> Vec<ParetoPoint> {
    let mut out: Vec<ParetoPoint> = points
        .iter()
        .enumerate()
        .filter(|(i, p)| {
            !points
                .iter()
                .enumerate()
                .any(|(j, q)| *i != j && dominates(q, p))
        })
        .map(|(_, p)| p.clone())
        .collect();
    out.sort_by(|a, b| {
        b.avg_score
            .partial_cmp(&a.avg_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    out
}

fn dominates(a: &ParetoPoint, b: &ParetoPoint) -> bool {
    let no_worse = a.avg_score >= b.avg_score
        && a.p95_latency_ms <= b.p95_latency_ms
        && a.dollars <= b.dollars
        && a.total_tokens <= b.total_tokens;
    let strictly_better = a.avg_score > b.avg_score
        || a.p95_latency_ms < b.p95_latency_ms
        || a.dollars < b.dollars
        || a.total_tokens < b.total_tokens;
    no_worse && strictly_better
}
