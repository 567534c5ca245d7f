//! Enumeration and seeded sampling of the pipeline configuration space.
//!
//! The full space is the cross product of the tuned axes, 216 configurations.
//! Sampling is driven by a seeded RNG so a given seed always produces the
//! same candidate set, and uniqueness is enforced on the content hash rather
//! than on draw position.

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

use super::types::{MemoryBlend, PipelineConfig};

const CHUNK_SIZE_TOKENS: [u32; 3] = [400, 800, 1200];
const OVERLAP_TOKENS: [u32; 2] = [50, 100];
const TOP_K: [u32; 3] = [5, 10, 20];
const CONTEXT_BUDGET_TOKENS: [u32; 3] = [3000, 6000, 12000];
const MEMORY_BLENDS: [MemoryBlend; 2] = [MemoryBlend::DocsOnly, MemoryBlend::DocsAndSemantic];

const MAX_SAMPLE_ATTEMPTS: usize = 1000;

/// The full configuration space, enumerated in a fixed axis order.
pub fn enumerate_config_space() -> Vec<PipelineConfig> {
    let mut out = Vec::new();
    for &chunk_size_tokens in &CHUNK_SIZE_TOKENS {
        for &overlap_tokens in &OVERLAP_TOKENS {
            for &top_k in &TOP_K {
                for &rewrite in &[false, true] {
                    for &rerank in &[false, true] {
                        for &context_budget_tokens in &CONTEXT_BUDGET_TOKENS {
                            for &memory_blend in &MEMORY_BLENDS {
                                out.push(PipelineConfig {
                                    chunk_size_tokens,
                                    overlap_tokens,
                                    top_k,
                                    rewrite,
                                    rerank,
                                    context_budget_tokens,
                                    memory_blend,
                                });
                            }
                        }
                    }
                }
            }
        }
    }
    out
}

/// Draw `max(min_configs, warmup)` unique configurations. Each draw retries
/// up to 1000 times before the run is declared infeasible.
pub fn sample_configs(
    all: &[PipelineConfig],
    seed: u64,
    warmup: usize,
    min_configs: usize,
) -> Result<Vec<PipelineConfig>> {
    if all.is_empty() {
        bail!("config space is empty");
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut chosen = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    let total = min_configs.max(warmup);
    for _ in 0..total {
        let mut picked = false;
        for _ in 0..MAX_SAMPLE_ATTEMPTS {
            let candidate = &all[rng.gen_range(0..all.len())];
            let hash = candidate.content_hash();
            if seen.insert(hash) {
                chosen.push(candidate.clone());
                picked = true;
                break;
            }
        }
        if !picked {
            bail!("failed to sample unique configs; config space too small?");
        }
    }
    Ok(chosen)
}
