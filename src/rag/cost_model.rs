//! Persisted per-stage latency model.
//!
//! Each pipeline stage label accumulates a running mean over every observed
//! timing, updated incrementally so the file never stores raw samples. A
//! missing file or an unrecognized version starts a fresh model instead of
//! failing the run.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::types::Timing;

const COST_MODEL_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostNodeStats {
    pub count: u64,
    pub avg_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostModel {
    pub version: u32,
    pub updated_at: String,
    pub nodes: BTreeMap<String, CostNodeStats>,
}

impl CostModel {
    pub fn new() -> Self {
        Self {
            version: COST_MODEL_VERSION,
            updated_at: Utc::now().to_rfc3339(),
            nodes: BTreeMap::new(),
        }
    }

    /// Fold a batch of timings into the running means.
    pub fn update(&mut self, timings: &[Timing]) {
        for t in timings {
            let node = self.nodes.entry(t.label.clone()).or_default();
            node.count += 1;
            node.avg_ms += (t.ms - node.avg_ms) / node.count as f64;
        }
        self.updated_at = Utc::now().to_rfc3339();
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self::new()
    }
}

/// Load the model from disk. Missing file, unreadable JSON, or a version
/// mismatch all yield a fresh empty model.
pub fn load_cost_model(path: &Path) -> CostModel {
    let Ok(raw) = fs::read_to_string(path) else {
        return CostModel::new();
    };
    match serde_json::from_str::<CostModel>(&raw) {
        Ok(model) if model.version == COST_MODEL_VERSION => model,
        _ => {
            tracing::warn!(path = %path.display(), "ignoring unusable cost model file");
            CostModel::new()
        }
    }
}

pub fn save_cost_model(path: &Path, model: &CostModel) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(path, serde_json::to_string_pretty(model)?)
        .with_context(|| format!("writing cost model to {}", path.display()))?;
    Ok(())
}
