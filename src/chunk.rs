//! Fixed-size text chunker.
//!
//! Splits extracted document text into contiguous, non-overlapping pieces of
//! at most `chunk_size` characters. Concatenating the pieces reproduces the
//! input exactly; only the final piece may be shorter. Splitting counts
//! Unicode scalar values, so a multi-byte character is never cut in half.
//!
//! [`chunk_pages`] and [`chunk_document`] wrap the splitter to produce
//! [`Chunk`]s with dense 0-based ids and a `source_ref` per piece (the
//! originating page, or the chunk's own index when the input has no page
//! structure).

use crate::error::{RagError, Result};
use crate::models::Chunk;

/// Split `text` into pieces of at most `chunk_size` characters.
///
/// # Guarantees
///
/// - Concatenating the returned pieces equals `text` exactly.
/// - Every piece holds at most `chunk_size` characters; only the last may
///   hold fewer.
/// - Empty input yields an empty vector.
///
/// # Errors
///
/// Returns [`RagError::InvalidArgument`] when `chunk_size` is zero.
pub fn split_text(text: &str, chunk_size: usize) -> Result<Vec<String>> {
    if chunk_size == 0 {
        return Err(RagError::InvalidArgument(
            "chunk_size must be greater than zero".to_string(),
        ));
    }

    if text.is_empty() {
        return Ok(Vec::new());
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    let mut count = 0;

    for (offset, _) in text.char_indices() {
        if count == chunk_size {
            pieces.push(text[start..offset].to_string());
            start = offset;
            count = 0;
        }
        count += 1;
    }
    pieces.push(text[start..].to_string());

    Ok(pieces)
}

/// Chunk a single body of text, numbering each piece with its own index as
/// the source reference.
pub fn chunk_document(text: &str, chunk_size: usize) -> Result<Vec<Chunk>> {
    let chunks = split_text(text, chunk_size)?
        .into_iter()
        .enumerate()
        .map(|(id, text)| Chunk { id, text, source_ref: id as u32 })
        .collect();
    Ok(chunks)
}

/// Chunk per-page text, carrying each page number through as the source
/// reference while keeping chunk ids dense across the whole document.
///
/// Pages are processed in the order given; an empty page contributes no
/// chunks.
pub fn chunk_pages(pages: &[(u32, String)], chunk_size: usize) -> Result<Vec<Chunk>> {
    let mut chunks = Vec::new();
    for (page, text) in pages {
        for piece in split_text(text, chunk_size)? {
            chunks.push(Chunk { id: chunks.len(), text: piece, source_ref: *page });
        }
    }
    Ok(chunks)
}
