//! Brute-force vector index with paired-artifact persistence.
//!
//! [`VectorIndex`] owns the chunk vectors and the chunk texts together: every
//! id present in the vector store has a text entry and vice versa, and the
//! two are persisted and reloaded as a unit. Search is an exhaustive
//! squared-Euclidean scan — lower distance means more similar — ordered
//! ascending by distance with ties broken by ascending chunk id.
//!
//! # Persisted layout
//!
//! Two co-located artifacts share a base path:
//!
//! | Artifact | Contents |
//! |----------|----------|
//! | `<base>.vec` | binary header (magic, version, dims, count, build timestamp, model name, text checksum), per-chunk source refs, then `count × dims` little-endian `f32` values |
//! | `<base>.txt` | one escaped chunk text per line; line `i` corresponds to chunk id `i` |
//!
//! Texts are reversibly escaped (`\` → `\\`, newline → `\n`, CR → `\r`) so
//! the one-line-per-chunk layout survives arbitrary chunk content and a
//! load reproduces the pre-save texts byte for byte. The header records the
//! SHA-256 of the text artifact; a mismatched pair fails to load as corrupt
//! rather than silently producing wrong search results.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::info;

use crate::embedding::{blob_to_vec, vec_to_blob, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::models::{Chunk, SearchResult};

const MAGIC: &[u8; 4] = b"ADIX";
const VERSION: u32 = 1;

/// A searchable association between chunk ids and their embeddings.
///
/// Immutable once built: publication is by value, so no search can observe a
/// partially built index, and any number of sessions may share one index
/// behind an `Arc`.
pub struct VectorIndex {
    dims: usize,
    model: String,
    built_at: i64,
    vectors: Vec<Vec<f32>>,
    texts: Vec<String>,
    source_refs: Vec<u32>,
}

impl VectorIndex {
    /// Embed `chunks` and build a searchable index over them.
    ///
    /// Embedding runs in batches of `batch_size` through the provider; each
    /// returned vector is checked against the provider's declared
    /// dimensionality before it is accepted.
    ///
    /// # Errors
    ///
    /// - [`RagError::EmptyInput`] when `chunks` is empty.
    /// - [`RagError::InvalidArgument`] when `batch_size` is zero.
    /// - [`RagError::Embedding`] when the provider fails or returns vectors
    ///   of the wrong shape.
    pub async fn build(
        chunks: &[Chunk],
        embedder: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<VectorIndex> {
        if chunks.is_empty() {
            return Err(RagError::EmptyInput);
        }
        if batch_size == 0 {
            return Err(RagError::InvalidArgument(
                "batch_size must be greater than zero".to_string(),
            ));
        }

        let dims = embedder.dims();
        let mut vectors = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let batch_vectors = embedder.embed_batch(&texts).await?;

            if batch_vectors.len() != batch.len() {
                return Err(RagError::Embedding {
                    provider: embedder.model_name().to_string(),
                    message: format!(
                        "expected {} vectors, got {}",
                        batch.len(),
                        batch_vectors.len()
                    ),
                });
            }

            for vector in batch_vectors {
                if vector.len() != dims {
                    return Err(RagError::Embedding {
                        provider: embedder.model_name().to_string(),
                        message: format!(
                            "provider declared {} dims but returned a {}-dim vector",
                            dims,
                            vector.len()
                        ),
                    });
                }
                vectors.push(vector);
            }
        }

        let index = VectorIndex {
            dims,
            model: embedder.model_name().to_string(),
            built_at: chrono::Utc::now().timestamp(),
            vectors,
            texts: chunks.iter().map(|c| c.text.clone()).collect(),
            source_refs: chunks.iter().map(|c| c.source_ref).collect(),
        };

        info!(
            chunk_count = index.len(),
            dims,
            model = %index.model,
            "built vector index"
        );

        Ok(index)
    }

    /// Number of chunks held by the index (always at least 1).
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Always false for a successfully built or loaded index.
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Dimensionality of the stored vectors.
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Model name of the embedder the index was built with.
    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// Unix timestamp of the build.
    pub fn built_at(&self) -> i64 {
        self.built_at
    }

    /// Return the `top_k` nearest chunks to `query_vector`.
    ///
    /// Results are ordered ascending by squared Euclidean distance, ties
    /// broken by ascending chunk id. At most `top_k` results are returned —
    /// exactly `len()` when `top_k` exceeds the index size.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidArgument`] when `top_k` is zero.
    /// - [`RagError::DimensionMismatch`] when the query dimensionality
    ///   disagrees with the stored vectors.
    pub fn search(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        if top_k == 0 {
            return Err(RagError::InvalidArgument(
                "top_k must be greater than zero".to_string(),
            ));
        }
        if query_vector.len() != self.dims {
            return Err(RagError::DimensionMismatch {
                expected: self.dims,
                actual: query_vector.len(),
            });
        }

        let mut results: Vec<SearchResult> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(id, vector)| SearchResult {
                chunk_id: id,
                distance: squared_l2(query_vector, vector),
                text: self.texts[id].clone(),
                source_ref: self.source_refs[id],
            })
            .collect();

        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk_id.cmp(&b.chunk_id))
        });
        results.truncate(top_k);

        Ok(results)
    }

    /// Persist the index as `<base>.vec` + `<base>.txt`.
    ///
    /// Both artifacts are written to temporary files first and renamed into
    /// place only after both writes succeed, so a crash mid-save never
    /// leaves a readable-but-mismatched pair.
    pub fn save(&self, base: &Path) -> Result<()> {
        let (vec_path, txt_path) = artifact_paths(base);

        if let Some(parent) = vec_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let txt_content = self.encode_texts();
        let vec_content = self.encode_vectors(&txt_content);

        let vec_tmp = tmp_path(&vec_path);
        let txt_tmp = tmp_path(&txt_path);
        std::fs::write(&vec_tmp, &vec_content)?;
        std::fs::write(&txt_tmp, txt_content.as_bytes())?;
        std::fs::rename(&vec_tmp, &vec_path)?;
        std::fs::rename(&txt_tmp, &txt_path)?;

        info!(
            chunk_count = self.len(),
            vec = %vec_path.display(),
            txt = %txt_path.display(),
            "saved vector index"
        );

        Ok(())
    }

    /// Restore an index persisted by [`save`](VectorIndex::save).
    ///
    /// # Errors
    ///
    /// - [`RagError::NotFound`] when either artifact is missing.
    /// - [`RagError::Corrupt`] when the header is unrecognized, the blob is
    ///   truncated, the chunk counts disagree, or the text artifact does not
    ///   match the checksum recorded at save time.
    pub fn load(base: &Path) -> Result<VectorIndex> {
        let (vec_path, txt_path) = artifact_paths(base);

        if !vec_path.exists() {
            return Err(RagError::NotFound(vec_path));
        }
        if !txt_path.exists() {
            return Err(RagError::NotFound(txt_path));
        }

        let vec_bytes = std::fs::read(&vec_path)?;
        let txt_bytes = std::fs::read(&txt_path)?;

        let index = decode_index(&vec_bytes, &txt_bytes)?;

        info!(
            chunk_count = index.len(),
            dims = index.dims,
            model = %index.model,
            "loaded vector index"
        );

        Ok(index)
    }

    /// Render the `.txt` artifact: one escaped chunk text per line.
    fn encode_texts(&self) -> String {
        let mut out = String::new();
        for text in &self.texts {
            out.push_str(&escape_line(text));
            out.push('\n');
        }
        out
    }

    /// Render the `.vec` artifact header + source refs + vector data.
    fn encode_vectors(&self, txt_content: &str) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(txt_content.as_bytes());
        let checksum = hasher.finalize();

        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dims as u32).to_le_bytes());
        out.extend_from_slice(&(self.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.built_at.to_le_bytes());
        out.extend_from_slice(&(self.model.len() as u32).to_le_bytes());
        out.extend_from_slice(self.model.as_bytes());
        out.extend_from_slice(checksum.as_slice());
        for source_ref in &self.source_refs {
            out.extend_from_slice(&source_ref.to_le_bytes());
        }
        for vector in &self.vectors {
            out.extend_from_slice(&vec_to_blob(vector));
        }
        out
    }
}

/// Derive the two artifact paths from a base path by appending extensions.
fn artifact_paths(base: &Path) -> (PathBuf, PathBuf) {
    let mut vec_path = base.as_os_str().to_os_string();
    vec_path.push(".vec");
    let mut txt_path = base.as_os_str().to_os_string();
    txt_path.push(".txt");
    (PathBuf::from(vec_path), PathBuf::from(txt_path))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Squared Euclidean distance between two equal-length vectors.
fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    let mut sum = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        let d = x - y;
        sum += d * d;
    }
    sum
}

/// Escape a chunk text onto a single line (`\` → `\\`, LF → `\n`, CR → `\r`).
fn escape_line(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

/// Reverse [`escape_line`]. Fails on a dangling or unknown escape.
fn unescape_line(line: &str) -> Result<String> {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => {
                return Err(RagError::Corrupt(format!(
                    "unknown escape sequence '\\{}' in text artifact",
                    other
                )))
            }
            None => {
                return Err(RagError::Corrupt(
                    "dangling escape at end of text artifact line".to_string(),
                ))
            }
        }
    }
    Ok(out)
}

/// A bounds-checked cursor over the `.vec` artifact bytes.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(RagError::Corrupt("vector artifact is truncated".to_string()));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

fn decode_index(vec_bytes: &[u8], txt_bytes: &[u8]) -> Result<VectorIndex> {
    let mut reader = Reader::new(vec_bytes);

    let magic = reader.take(4)?;
    if magic != MAGIC {
        return Err(RagError::Corrupt("bad magic in vector artifact".to_string()));
    }

    let version = reader.read_u32()?;
    if version != VERSION {
        return Err(RagError::Corrupt(format!(
            "unsupported vector artifact version {}",
            version
        )));
    }

    let dims = reader.read_u32()? as usize;
    let count = reader.read_u32()? as usize;
    let built_at = reader.read_i64()?;

    if count == 0 {
        return Err(RagError::Corrupt("vector artifact holds zero chunks".to_string()));
    }
    if dims == 0 {
        return Err(RagError::Corrupt("vector artifact declares zero dims".to_string()));
    }

    let model_len = reader.read_u32()? as usize;
    let model = String::from_utf8(reader.take(model_len)?.to_vec())
        .map_err(|_| RagError::Corrupt("model name is not valid UTF-8".to_string()))?;

    let stored_checksum = reader.take(32)?.to_vec();
    let mut hasher = Sha256::new();
    hasher.update(txt_bytes);
    let actual_checksum = hasher.finalize();
    if stored_checksum != actual_checksum.as_slice() {
        return Err(RagError::Corrupt(
            "text artifact does not match the checksum recorded at save time".to_string(),
        ));
    }

    let mut source_refs = Vec::with_capacity(count);
    for _ in 0..count {
        source_refs.push(reader.read_u32()?);
    }

    let mut vectors = Vec::with_capacity(count);
    for _ in 0..count {
        let blob = reader.take(dims * 4)?;
        vectors.push(blob_to_vec(blob));
    }

    if reader.remaining() != 0 {
        return Err(RagError::Corrupt(format!(
            "{} unexpected trailing bytes in vector artifact",
            reader.remaining()
        )));
    }

    let txt_content = std::str::from_utf8(txt_bytes)
        .map_err(|_| RagError::Corrupt("text artifact is not valid UTF-8".to_string()))?;
    let mut texts = Vec::with_capacity(count);
    for line in txt_content.lines() {
        texts.push(unescape_line(line)?);
    }

    if texts.len() != count {
        return Err(RagError::Corrupt(format!(
            "vector artifact holds {} chunks but text artifact holds {}",
            count,
            texts.len()
        )));
    }

    Ok(VectorIndex { dims, model, built_at, vectors, texts, source_refs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Deterministic test embedder: the vector is
    /// `[char_count, ascii_lowercase_count]`.
    struct CountingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting-test"
        }

        fn dims(&self) -> usize {
            2
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    vec![
                        t.chars().count() as f32,
                        t.chars().filter(|c| c.is_ascii_lowercase()).count() as f32,
                    ]
                })
                .collect())
        }
    }

    fn chunk(id: usize, text: &str) -> Chunk {
        Chunk { id, text: text.to_string(), source_ref: id as u32 }
    }

    #[tokio::test]
    async fn test_build_empty_rejected() {
        let result = VectorIndex::build(&[], &CountingEmbedder, 8).await;
        assert!(matches!(result, Err(RagError::EmptyInput)));
    }

    #[tokio::test]
    async fn test_build_and_search_ordering() {
        let chunks = vec![chunk(0, "aaaa"), chunk(1, "aa"), chunk(2, "aaaaaaaa")];
        let index = VectorIndex::build(&chunks, &CountingEmbedder, 2).await.unwrap();
        assert_eq!(index.len(), 3);

        // Query vector near "aaaa" = [4, 4].
        let results = index.search(&[4.0, 4.0], 3).unwrap();
        let ids: Vec<usize> = results.iter().map(|r| r.chunk_id).collect();
        assert_eq!(ids[0], 0);
        for pair in results.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[tokio::test]
    async fn test_search_top_k_bounded_by_len() {
        let chunks = vec![chunk(0, "ab"), chunk(1, "cd")];
        let index = VectorIndex::build(&chunks, &CountingEmbedder, 8).await.unwrap();
        let results = index.search(&[1.0, 1.0], 10).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_search_ties_broken_by_id() {
        // Identical texts embed identically, so distances tie exactly.
        let chunks = vec![chunk(0, "same"), chunk(1, "same"), chunk(2, "same")];
        let index = VectorIndex::build(&chunks, &CountingEmbedder, 8).await.unwrap();
        let results = index.search(&[0.0, 0.0], 3).unwrap();
        let ids: Vec<usize> = results.iter().map(|r| r.chunk_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_search_dimension_mismatch() {
        let chunks = vec![chunk(0, "ab")];
        let index = VectorIndex::build(&chunks, &CountingEmbedder, 8).await.unwrap();
        let result = index.search(&[1.0, 2.0, 3.0], 1);
        assert!(matches!(
            result,
            Err(RagError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[tokio::test]
    async fn test_search_zero_top_k() {
        let chunks = vec![chunk(0, "ab")];
        let index = VectorIndex::build(&chunks, &CountingEmbedder, 8).await.unwrap();
        assert!(matches!(
            index.search(&[1.0, 1.0], 0),
            Err(RagError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_search_deterministic() {
        let chunks = vec![chunk(0, "abc"), chunk(1, "defg"), chunk(2, "hi")];
        let index = VectorIndex::build(&chunks, &CountingEmbedder, 8).await.unwrap();
        let first = index.search(&[3.0, 3.0], 3).unwrap();
        for _ in 0..5 {
            let again = index.search(&[3.0, 3.0], 3).unwrap();
            let a: Vec<usize> = first.iter().map(|r| r.chunk_id).collect();
            let b: Vec<usize> = again.iter().map(|r| r.chunk_id).collect();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_squared_l2() {
        assert_eq!(squared_l2(&[0.0, 0.0], &[3.0, 4.0]), 25.0);
        assert_eq!(squared_l2(&[1.0, 1.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_escape_roundtrip() {
        let cases = [
            "plain text",
            "line\nbreak",
            "back\\slash",
            "cr\r\nlf",
            "\\n literal",
            "",
        ];
        for case in cases {
            let escaped = escape_line(case);
            assert!(!escaped.contains('\n'));
            assert!(!escaped.contains('\r'));
            assert_eq!(unescape_line(&escaped).unwrap(), case);
        }
    }

    #[test]
    fn test_unescape_rejects_unknown_escape() {
        assert!(matches!(unescape_line("bad\\x"), Err(RagError::Corrupt(_))));
        assert!(matches!(unescape_line("dangling\\"), Err(RagError::Corrupt(_))));
    }
}
