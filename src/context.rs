//! Context assembly for answer generation.
//!
//! Merges retrieved chunk texts — most relevant first, separated by a blank
//! line — into the context block handed to the answer generator, optionally
//! framed with the conversation so far. Downstream models impose input-size
//! limits, so an over-budget assembly drops whole chunks from the tail
//! (least relevant first) rather than cutting a chunk mid-sentence.

use crate::models::{ConversationTurn, SearchResult};

/// Assemble retrieved results and prior turns into one prompt context.
///
/// The chunk block keeps the given order and joins texts with a blank line.
/// When `max_chars` is set and the naive concatenation would exceed it,
/// later chunks are dropped whole; at least one chunk is kept if any were
/// retrieved. When `history` is non-empty the chunk block is framed under a
/// `Context:` heading with the role-labelled turns after it, keeping
/// retrieved material distinguishable from conversation.
pub fn assemble(
    results: &[SearchResult],
    history: &[ConversationTurn],
    max_chars: Option<usize>,
) -> String {
    let context_block = join_within_budget(results, max_chars);

    if history.is_empty() {
        return context_block;
    }

    let mut out = String::from("Context:\n");
    out.push_str(&context_block);
    out.push_str("\n\nConversation so far:\n");
    for turn in history {
        out.push_str(turn.role.as_str());
        out.push_str(": ");
        out.push_str(&turn.content);
        out.push('\n');
    }
    out
}

/// Join chunk texts with blank lines, dropping whole chunks from the tail
/// once `max_chars` would be exceeded.
fn join_within_budget(results: &[SearchResult], max_chars: Option<usize>) -> String {
    let mut out = String::new();

    for result in results {
        let separator_len = if out.is_empty() { 0 } else { 2 };
        if let Some(max) = max_chars {
            if !out.is_empty() && out.len() + separator_len + result.text.len() > max {
                break;
            }
        }
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&result.text);
    }

    out
}
