//! Retrieval-augmented answering: per-turn pipeline, configuration space
//! exploration, and the supporting analysis models.

pub mod compose;
pub mod cost_model;
pub mod explorer;
pub mod pareto;
pub mod pipeline;
pub mod rerank;
pub mod retrieval;
pub mod rewrite;
pub mod types;
