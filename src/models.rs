//! Core data models used throughout askdoc.
//!
//! These types represent the chunks, search results, and conversation state
//! that flow through the indexing and answering pipeline.

use serde::Serialize;

/// A bounded-size contiguous unit of document text, the unit of retrieval.
///
/// Ids are dense 0-based positions assigned at chunk time, unique within one
/// index build and stable across save/load. `source_ref` is the originating
/// unit number (a page when the input had page structure, otherwise the
/// chunk's own index).
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: usize,
    pub text: String,
    pub source_ref: u32,
}

/// A single ranked hit returned from a vector search.
///
/// Distance is squared Euclidean: lower means more similar. Results are
/// produced per query and ordered ascending by distance.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: usize,
    pub distance: f32,
    pub text: String,
    pub source_ref: u32,
}

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Wire/display name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn of a conversation, appended in strict chronological order and
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Wall-clock timings for one answered turn.
///
/// One instance per turn; aggregation across turns is left to the caller.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TurnMetrics {
    /// Seconds spent embedding the question and searching the index.
    pub retrieval_time: f64,
    /// Seconds spent in answer generation; `0.0` when no generator ran.
    pub llm_time: f64,
}

/// The outcome of one [`ChatSession`](crate::session::ChatSession) turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    /// The text shown to the user: a model answer, the fixed apology, or
    /// the assembled context when no generator is configured.
    pub answer: String,
    /// True only when `answer` came back from the answer generator.
    pub generated: bool,
    pub metrics: TurnMetrics,
}
