//! Per-model token pricing and dollar estimation.
//!
//! The pricing table is a user-maintained JSON file keyed by
//! `provider:model`, with a bare `model` fallback. No table, no key, or no
//! usage means no estimate, never a zero.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::providers::Usage;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPricing {
    #[serde(rename = "promptPer1M")]
    pub prompt_per_1m: f64,
    #[serde(rename = "completionPer1M")]
    pub completion_per_1m: f64,
}

#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    entries: HashMap<String, ModelPricing>,
}

impl PricingTable {
    /// Load from disk. A missing or unreadable file is an empty table.
    pub fn load(path: &Path) -> Self {
        let Ok(raw) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str::<HashMap<String, ModelPricing>>(&raw) {
            Ok(entries) => Self { entries },
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "ignoring unreadable pricing table");
                Self::default()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dollar cost of one call, when both a price and usage are known.
    pub fn estimate_dollars(
        &self,
        provider: &str,
        model: &str,
        usage: Option<&Usage>,
    ) -> Option<f64> {
        let usage = usage?;
        let price = self
            .entries
            .get(&format!("{provider}:{model}"))
            .or_else(|| self.entries.get(model))?;
        let prompt = usage.prompt_tokens.unwrap_or(0) as f64;
        let completion = usage.completion_tokens.unwrap_or(0) as f64;
        Some((prompt * price.prompt_per_1m + completion * price.completion_per_1m) / 1_000_000.0)
    }
}
