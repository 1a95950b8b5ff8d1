//! Query-time retrieval: embed the question, search the index.
//!
//! Pure orchestration over [`EmbeddingProvider`] and [`VectorIndex`]. The
//! caller is responsible for supplying the same embedder the index was built
//! with — a mismatched embedder produces meaningless (but not erroring)
//! results, which is why [`VectorIndex`](crate::index::VectorIndex) records
//! the model name it was built with and the CLI warns on a mismatch.

use tracing::debug;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::index::VectorIndex;
use crate::models::SearchResult;

/// Return the `top_k` chunks most relevant to `query`.
///
/// Each call embeds the query independently; nothing is cached across calls.
///
/// # Errors
///
/// Propagates [`RagError::Embedding`](crate::error::RagError::Embedding)
/// from the provider and any search error from the index.
pub async fn retrieve(
    query: &str,
    top_k: usize,
    embedder: &dyn EmbeddingProvider,
    index: &VectorIndex,
) -> Result<Vec<SearchResult>> {
    let query_vector = embedder.embed(query).await?;
    let results = index.search(&query_vector, top_k)?;

    debug!(
        top_k,
        result_count = results.len(),
        best_distance = results.first().map(|r| r.distance),
        "retrieved chunks"
    );

    Ok(results)
}
