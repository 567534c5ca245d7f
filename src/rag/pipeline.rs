//! The end-to-end question answering turn.
//!
//! Fixed stage order: episodic log, rewrite, query embed, chunk retrieval,
//! optional rerank, memory retrieval, context packing, generation, episodic
//! log, optional memory write. Every stage is timed under a stable label and
//! every model call is recorded with its token usage, so eval runs can
//! attribute latency and cost per stage.
//!
//! Zero retrieved chunks short-circuits to the literal refusal answer before
//! any generation call is made. An empty generation also maps to the refusal
//! answer, the model never gets the last word on whether the corpus covered
//! the question.

use anyhow::Result;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::memory::writer::{write_semantic_memory_from_turn, MemoryWriteInput};
use crate::memory::{add_episodic_turn, types::TurnRole};
use crate::providers::cached::Embedder;
use crate::providers::{add_usage, ChatClient, ChatMessage, ChatRequest, Usage};

use super::compose::{answer_system_prompt, build_context_block, MemoryLine, SourceBlock};
use super::rerank::maybe_rerank;
use super::retrieval::{
    get_chunk_set_id, retrieve_chunks, retrieve_memories, ChunkSetNotFound, RetrievedMemory,
};
use super::rewrite::maybe_rewrite_query;
use super::types::{
    LlmCallRecord, MemoryBlend, PipelineConfig, Source, Timing, TurnResult,
};

pub const NOT_FOUND_ANSWER: &str = "Not found in corpus.";

/// Semantic memories pulled per turn when the blend includes them.
const MEMORY_TOP_K: usize = 5;

pub struct TurnInput<'a> {
    pub db: &'a Arc<Mutex<Connection>>,
    pub embedder: &'a Embedder,
    pub answer_chat: &'a dyn ChatClient,
    /// Cheaper model for rewrite, rerank, and memory extraction. Falls back
    /// to the answer model when absent.
    pub support_chat: Option<&'a dyn ChatClient>,
    pub config: &'a PipelineConfig,
    pub session_id: &'a str,
    pub question: &'a str,
    pub enable_memory_writes: bool,
}

struct TurnState {
    timings: Vec<Timing>,
    llm_calls: Vec<LlmCallRecord>,
    usage_total: Option<Usage>,
}

impl TurnState {
    fn record_call(&mut self, label: &str, client: &dyn ChatClient, usage: Option<Usage>) {
        self.usage_total = add_usage(self.usage_total.clone(), usage.clone());
        self.llm_calls.push(LlmCallRecord {
            label: label.to_string(),
            provider: client.provider().to_string(),
            model: client.model().to_string(),
            usage,
        });
    }

    fn push_timing(&mut self, label: &str, started: Instant) {
        self.timings.push(Timing {
            label: label.to_string(),
            ms: started.elapsed().as_secs_f64() * 1000.0,
        });
    }
}

/// Run one question through the full pipeline.
pub async fn run_turn(input: TurnInput<'_>) -> Result<TurnResult> {
    let support_chat = input.support_chat.unwrap_or(input.answer_chat);
    let mut state = TurnState {
        timings: Vec::new(),
        llm_calls: Vec::new(),
        usage_total: None,
    };

    {
        let conn = input.db.lock().expect("db mutex poisoned");
        add_episodic_turn(&conn, input.session_id, TurnRole::User, input.question)?;
    }

    let started = Instant::now();
    let rewrite = maybe_rewrite_query(support_chat, input.question, input.config.rewrite).await?;
    state.push_timing("rewrite", started);
    state.record_call("rewrite", support_chat, rewrite.usage.clone());
    let rewritten_query = rewrite.query;

    let started = Instant::now();
    let embeddings = input
        .embedder
        .get_or_create(std::slice::from_ref(&rewritten_query))
        .await?;
    state.push_timing("embed.query", started);
    let query_embedding = &embeddings[0];

    let chunk_set_id = {
        let conn = input.db.lock().expect("db mutex poisoned");
        get_chunk_set_id(
            &conn,
            input.config.chunk_size_tokens,
            input.config.overlap_tokens,
            input.embedder.model(),
        )?
    };
    let Some(chunk_set_id) = chunk_set_id else {
        return Err(ChunkSetNotFound {
            chunk_size: input.config.chunk_size_tokens,
            overlap: input.config.overlap_tokens,
            embed_model: input.embedder.model().to_string(),
        }
        .into());
    };

    // Over-retrieve when reranking so the reranker has candidates to demote
    let top_k = input.config.top_k as usize;
    let base_k = if input.config.rerank { top_k * 3 } else { top_k };

    let started = Instant::now();
    let chunks = {
        let conn = input.db.lock().expect("db mutex poisoned");
        retrieve_chunks(&conn, chunk_set_id, &query_embedding.vector, base_k)?
    };
    state.push_timing("retrieve.docs", started);

    let sources: Vec<Source> = chunks
        .into_iter()
        .enumerate()
        .map(|(idx, c)| Source {
            citation: format!("S{}", idx + 1),
            chunk_id: c.chunk_id,
            document_path: c.document_path,
            document_title: c.document_title,
            score: c.score,
            text: c.text,
        })
        .collect();

    if sources.is_empty() {
        let answer = NOT_FOUND_ANSWER.to_string();
        let conn = input.db.lock().expect("db mutex poisoned");
        add_episodic_turn(&conn, input.session_id, TurnRole::Assistant, &answer)?;
        return Ok(TurnResult {
            answer,
            sources: Vec::new(),
            timings: state.timings,
            usage_total: state.usage_total,
            llm_calls: state.llm_calls,
            memory_write: None,
            rewritten_query: rewritten_if_changed(&rewritten_query, input.question),
        });
    }

    let started = Instant::now();
    let candidates: Vec<(String, String)> = sources
        .iter()
        .map(|s| (s.citation.clone(), s.text.clone()))
        .collect();
    let rerank = maybe_rerank(
        support_chat,
        &rewritten_query,
        &candidates,
        input.config.rerank,
        top_k,
    )
    .await?;
    state.push_timing("rerank", started);
    state.record_call("rerank", support_chat, rerank.usage.clone());

    let sources: Vec<Source> = rerank
        .order
        .into_iter()
        .filter_map(|i| sources.get(i).cloned())
        .collect();

    let started = Instant::now();
    let memories: Vec<RetrievedMemory> = if input.config.memory_blend == MemoryBlend::DocsAndSemantic
    {
        let conn = input.db.lock().expect("db mutex poisoned");
        retrieve_memories(&conn, &query_embedding.vector, MEMORY_TOP_K)?
    } else {
        Vec::new()
    };
    state.push_timing("retrieve.memory", started);

    let memory_lines: Vec<MemoryLine> = memories
        .iter()
        .map(|m| MemoryLine {
            memory_id: m.memory_id,
            kind: m.kind.clone(),
            text: m.text.clone(),
        })
        .collect();
    let source_blocks: Vec<SourceBlock> = sources
        .iter()
        .map(|s| SourceBlock {
            citation: s.citation.clone(),
            header: format!("{} ({}) chunk={}", s.document_title, s.document_path, s.chunk_id),
            text: s.text.clone(),
        })
        .collect();
    let context = build_context_block(
        &memory_lines,
        &source_blocks,
        input.config.context_budget_tokens,
    );

    let included: Vec<Source> = sources
        .into_iter()
        .filter(|s| context.included_sources.contains(&s.citation))
        .collect();

    let started = Instant::now();
    let generation = input
        .answer_chat
        .complete(ChatRequest {
            messages: vec![
                ChatMessage::system(answer_system_prompt()),
                ChatMessage::user(
                    [context.context_text.as_str(), "", "QUESTION:", input.question].join("\n"),
                ),
            ],
            temperature: Some(0.2),
            max_tokens: None,
        })
        .await?;
    state.push_timing("generate", started);
    state.record_call("generate", input.answer_chat, generation.usage.clone());

    let answer = {
        let trimmed = generation.text.trim();
        if trimmed.is_empty() {
            NOT_FOUND_ANSWER.to_string()
        } else {
            trimmed.to_string()
        }
    };
    {
        let conn = input.db.lock().expect("db mutex poisoned");
        add_episodic_turn(&conn, input.session_id, TurnRole::Assistant, &answer)?;
    }

    let memory_write = if input.enable_memory_writes {
        let retrieved_sources: Vec<(String, String)> = included
            .iter()
            .map(|s| (s.citation.clone(), s.text.clone()))
            .collect();
        let started = Instant::now();
        let write = write_semantic_memory_from_turn(MemoryWriteInput {
            db: input.db,
            chat: support_chat,
            embedder: input.embedder,
            user_message: input.question,
            assistant_answer: &answer,
            retrieved_sources: &retrieved_sources,
        })
        .await?;
        state.push_timing("memory.write", started);
        state.record_call("memory.write", support_chat, write.usage.clone());
        Some(write.stats)
    } else {
        None
    };

    Ok(TurnResult {
        answer,
        sources: included,
        timings: state.timings,
        usage_total: state.usage_total,
        llm_calls: state.llm_calls,
        memory_write,
        rewritten_query: rewritten_if_changed(&rewritten_query, input.question),
    })
}

fn rewritten_if_changed(rewritten: &str, question: &str) -> Option<String> {
    if rewritten != question {
        Some(rewritten.to_string())
    } else {
        None
    }
}
