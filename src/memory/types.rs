//! Core memory type definitions.
//!
//! Defines [`MemoryKind`] (the five long-term memory categories), [`Session`]
//! (one conversation), and [`SemanticMemory`] (a stored long-term memory row
//! with its supersession link).

use serde::{Deserialize, Serialize};

/// The five kinds of long-term semantic memory.
///
/// `Preference` is special: retrieval always surfaces every preference
/// regardless of topical similarity, because user preferences should shape
/// every answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// How the user likes things done; always retrieved.
    Preference,
    /// A choice that was made and should stick.
    Decision,
    /// A verified, durable piece of knowledge.
    Fact,
    /// A conclusion worth keeping beyond the current session.
    Insight,
    /// An open action item.
    Todo,
}

impl MemoryKind {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preference => "preference",
            Self::Decision => "decision",
            Self::Fact => "fact",
            Self::Insight => "insight",
            Self::Todo => "todo",
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preference" => Ok(Self::Preference),
            "decision" => Ok(Self::Decision),
            "fact" => Ok(Self::Fact),
            "insight" => Ok(Self::Insight),
            "todo" => Ok(Self::Todo),
            _ => Err(format!("unknown memory kind: {s}")),
        }
    }
}

/// Role of an episodic turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    System,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// A conversation session. Every episodic turn belongs to one.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub created_at: String,
    pub summary: Option<String>,
}

/// A stored long-term memory, matching the `semantic_memories` table.
#[derive(Debug, Clone, Serialize)]
pub struct SemanticMemory {
    pub id: i64,
    pub text: String,
    pub kind: String,
    /// How much this memory should influence answers, in `[0, 1]`.
    pub importance: f64,
    /// How certain the extractor was, in `[0, 1]`.
    pub confidence: f64,
    pub created_at: String,
    /// If set, this memory is a revision of the referenced older row. The old
    /// row is retained, never deleted.
    pub supersedes_id: Option<i64>,
    pub embedding_id: i64,
}
