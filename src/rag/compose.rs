//! Prompt construction and budget-greedy context packing.
//!
//! The memory block (at most 10 entries) is always fully included and its
//! coarse token cost reserved first. Sources are then appended in the order
//! given (they arrive already ranked) until the running whitespace-token
//! estimate would exceed the budget. The first overflowing source and
//! everything after it are dropped; no reordering, no partial truncation.

/// A memory line for the context block.
pub struct MemoryLine {
    pub memory_id: i64,
    pub kind: String,
    pub text: String,
}

/// A candidate source block.
pub struct SourceBlock {
    pub citation: String,
    pub header: String,
    pub text: String,
}

/// The assembled context and the citations that survived packing.
pub struct ComposedContext {
    pub context_text: String,
    pub included_sources: Vec<String>,
}

/// System prompt for the answer model.
pub fn answer_system_prompt() -> String {
    [
        "You are a personal research assistant. You answer using ONLY the provided SOURCES and MEMORY.",
        "",
        "Rules:",
        "- If the answer is not supported by SOURCES, say: \"Not found in corpus.\"",
        "- When you use a source, cite it inline using [S1], [S2], etc.",
        "- Do not invent citations.",
        "- Prefer concise, high-signal answers.",
        "- If MEMORY conflicts with SOURCES, prefer SOURCES and mention the conflict.",
    ]
    .join("\n")
}

/// Assemble the MEMORY + SOURCES context under `budget_tokens` (floored at
/// 500). Returns exactly which citations made it in, so the caller can limit
/// citations to supported sources.
pub fn build_context_block(
    memories: &[MemoryLine],
    sources: &[SourceBlock],
    budget_tokens: u32,
) -> ComposedContext {
    let mut lines: Vec<String> = Vec::new();
    lines.push("MEMORY:".to_string());
    if memories.is_empty() {
        lines.push("(none)".to_string());
    } else {
        for m in memories.iter().take(10) {
            lines.push(format!("[M{}] ({}) {}", m.memory_id, m.kind, m.text));
        }
    }

    lines.push(String::new());
    lines.push("SOURCES:".to_string());

    let budget = budget_tokens.max(500) as usize;
    let mut used = estimate_tokens(&lines.join("\n"));
    let mut included = Vec::new();

    for s in sources {
        let block = format!("[{}] {}\n{}\n", s.citation, s.header, s.text);
        let cost = estimate_tokens(&block);
        if used + cost > budget {
            break;
        }
        lines.push(format!("[{}] {}", s.citation, s.header));
        lines.push(s.text.clone());
        lines.push(String::new());
        used += cost;
        included.push(s.citation.clone());
    }

    ComposedContext {
        context_text: lines.join("\n").trim().to_string(),
        included_sources: included,
    }
}

/// Coarse token estimate: whitespace-separated word count.
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}
