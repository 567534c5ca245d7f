//! Personal research assistant: memory-augmented retrieval over a local
//! document corpus, with an offline optimizer that searches the pipeline
//! configuration space for quality/latency/cost tradeoffs.
//!
//! Everything is stored in one SQLite database: document chunks and their
//! embeddings, episodic conversation logs, long-term semantic memories, and
//! a response cache keyed by canonical request hashes. Retrieval is an
//! exhaustive cosine scan, which is the right call at personal-corpus scale.
//!
//! # Modules
//!
//! - [`config`] — Configuration loading from TOML files and environment variables
//! - [`db`] — SQLite database initialization, schema, and migrations
//! - [`providers`] — Chat/embeddings provider traits, OpenAI-compatible HTTP
//!   clients, and the database-backed caching decorators
//! - [`ingest`] — Corpus discovery, chunking, and embedding
//! - [`memory`] — Sessions, episodic turns, and the semantic memory store
//! - [`rag`] — The per-turn pipeline plus the config explorer, Pareto
//!   analysis, and the persisted cost model
//! - [`eval`] — Judge-scored evaluation runs over a question set
//! - [`optimize`] — Two-stage configuration search
//! - [`report`] — Run summaries built from optimizer artifacts

pub mod config;
pub mod db;
pub mod eval;
pub mod extract;
pub mod hash;
pub mod ingest;
pub mod jsonl;
pub mod memory;
pub mod optimize;
pub mod pricing;
pub mod providers;
pub mod rag;
pub mod report;
pub mod storage;
pub mod vector;
