//! End-to-end tests over the library with deterministic mock capabilities.
//!
//! A vocabulary-count embedder stands in for the real embedding provider so
//! retrieval behavior is exactly reproducible, and scripted generators stand
//! in for the chat model.

use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use askdoc::chunk::{chunk_document, split_text};
use askdoc::context::assemble;
use askdoc::embedding::EmbeddingProvider;
use askdoc::error::{RagError, Result};
use askdoc::index::VectorIndex;
use askdoc::llm::AnswerGenerator;
use askdoc::models::{Chunk, Role};
use askdoc::retrieve::retrieve;
use askdoc::session::{ChatSession, GENERATION_APOLOGY};

const VOCABULARY: &[&str] = &["small", "cat", "dog", "large", "weather", "pet", "today"];

/// Embeds text as per-word counts over a tiny fixed vocabulary.
struct VocabEmbedder;

#[async_trait]
impl EmbeddingProvider for VocabEmbedder {
    fn model_name(&self) -> &str {
        "vocab-count-test"
    }

    fn dims(&self) -> usize {
        VOCABULARY.len()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let words: Vec<String> = text
                    .to_lowercase()
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|w| !w.is_empty())
                    .map(|w| w.to_string())
                    .collect();
                VOCABULARY
                    .iter()
                    .map(|term| words.iter().filter(|w| w == term).count() as f32)
                    .collect()
            })
            .collect())
    }
}

/// Always answers with a fixed string.
struct ScriptedGenerator(&'static str);

#[async_trait]
impl AnswerGenerator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted-test"
    }

    async fn generate(&self, _system: &str, _context: &str, _question: &str) -> Result<String> {
        Ok(self.0.to_string())
    }
}

/// Always fails.
struct BrokenGenerator;

#[async_trait]
impl AnswerGenerator for BrokenGenerator {
    fn model_name(&self) -> &str {
        "broken-test"
    }

    async fn generate(&self, _system: &str, _context: &str, _question: &str) -> Result<String> {
        Err(RagError::Generation {
            provider: "broken-test".to_string(),
            message: "synthetic outage".to_string(),
        })
    }
}

fn pet_chunks() -> Vec<Chunk> {
    ["A small cat.", "A large dog.", "The weather today."]
        .iter()
        .enumerate()
        .map(|(id, text)| Chunk { id, text: text.to_string(), source_ref: id as u32 })
        .collect()
}

async fn pet_index() -> VectorIndex {
    VectorIndex::build(&pet_chunks(), &VocabEmbedder, 2).await.unwrap()
}

// ============ Chunking ============

#[test]
fn chunker_concatenation_is_lossless() {
    let inputs = [
        "".to_string(),
        "short".to_string(),
        "exactly ten chars!".repeat(7),
        "日本語テキストと English mixed。".repeat(13),
        "line\nbreaks\nand\ttabs".to_string(),
    ];
    for input in &inputs {
        for chunk_size in [1, 3, 10, 300] {
            let pieces = split_text(input, chunk_size).unwrap();
            assert_eq!(&pieces.concat(), input);
            for (i, piece) in pieces.iter().enumerate() {
                let len = piece.chars().count();
                assert!(len <= chunk_size);
                if i + 1 < pieces.len() {
                    assert_eq!(len, chunk_size, "only the last piece may be shorter");
                }
            }
        }
    }
}

#[test]
fn chunker_rejects_zero_size() {
    assert!(matches!(
        split_text("text", 0),
        Err(RagError::InvalidArgument(_))
    ));
}

// ============ Retrieval ============

#[tokio::test]
async fn scenario_small_pet_ranks_cat_first() {
    let index = pet_index().await;

    let results = retrieve("What pet is small?", 1, &VocabEmbedder, &index).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].text, "A small cat.");

    // top_k beyond the corpus size returns exactly the corpus.
    let results = retrieve("What pet is small?", 5, &VocabEmbedder, &index).await.unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].text, "A small cat.");
    for pair in results.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
}

#[tokio::test]
async fn repeated_searches_are_identical() {
    let index = pet_index().await;
    let query = VocabEmbedder.embed("small pet").await.unwrap();

    let first = index.search(&query, 3).unwrap();
    for _ in 0..10 {
        let again = index.search(&query, 3).unwrap();
        let a: Vec<(usize, f32)> = first.iter().map(|r| (r.chunk_id, r.distance)).collect();
        let b: Vec<(usize, f32)> = again.iter().map(|r| (r.chunk_id, r.distance)).collect();
        assert_eq!(a, b);
    }
}

// ============ Persistence ============

#[tokio::test]
async fn save_load_search_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let base = tmp.path().join("doc_index");

    // Chunk texts exercise the escaping path through a real document split.
    let text = "First passage about cats.\nWith a line break.\n\nSecond passage about dogs. \
                And a back\\slash. Third passage about the weather today."
        .to_string();
    let chunks = chunk_document(&text, 40).unwrap();
    let index = VectorIndex::build(&chunks, &VocabEmbedder, 8).await.unwrap();

    let query = VocabEmbedder.embed("cat weather").await.unwrap();
    let before = index.search(&query, chunks.len()).unwrap();

    index.save(&base).unwrap();
    let loaded = VectorIndex::load(&base).unwrap();

    assert_eq!(loaded.len(), index.len());
    assert_eq!(loaded.dims(), index.dims());
    assert_eq!(loaded.model_name(), index.model_name());

    let after = loaded.search(&query, chunks.len()).unwrap();
    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(after.iter()) {
        assert_eq!(b.chunk_id, a.chunk_id);
        assert_eq!(b.distance, a.distance);
        assert_eq!(b.text, a.text);
        assert_eq!(b.source_ref, a.source_ref);
    }
}

#[tokio::test]
async fn load_missing_artifacts_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let base = tmp.path().join("absent");
    assert!(matches!(VectorIndex::load(&base), Err(RagError::NotFound(_))));

    // One artifact alone is still not a loadable index.
    let index = pet_index().await;
    index.save(&base).unwrap();
    std::fs::remove_file(tmp.path().join("absent.txt")).unwrap();
    assert!(matches!(VectorIndex::load(&base), Err(RagError::NotFound(_))));
}

#[tokio::test]
async fn load_tampered_text_artifact_is_corrupt() {
    let tmp = TempDir::new().unwrap();
    let base = tmp.path().join("tampered");

    let index = pet_index().await;
    index.save(&base).unwrap();

    let txt_path = tmp.path().join("tampered.txt");
    let mut content = std::fs::read_to_string(&txt_path).unwrap();
    content = content.replacen("cat", "rat", 1);
    std::fs::write(&txt_path, content).unwrap();

    assert!(matches!(VectorIndex::load(&base), Err(RagError::Corrupt(_))));
}

#[tokio::test]
async fn load_truncated_vector_artifact_is_corrupt() {
    let tmp = TempDir::new().unwrap();
    let base = tmp.path().join("truncated");

    let index = pet_index().await;
    index.save(&base).unwrap();

    let vec_path = tmp.path().join("truncated.vec");
    let bytes = std::fs::read(&vec_path).unwrap();
    std::fs::write(&vec_path, &bytes[..bytes.len() - 5]).unwrap();

    assert!(matches!(VectorIndex::load(&base), Err(RagError::Corrupt(_))));
}

// ============ Sessions ============

#[tokio::test]
async fn session_without_generator_returns_context_verbatim() {
    let index = Arc::new(pet_index().await);
    let mut session =
        ChatSession::new(index.clone(), Arc::new(VocabEmbedder), None, 3, None).unwrap();

    let outcome = session.ask("What pet is small?").await.unwrap();

    // The answer is exactly what the assembler produces for these results.
    let results = retrieve("What pet is small?", 3, &VocabEmbedder, &index).await.unwrap();
    assert_eq!(outcome.answer, assemble(&results, &[], None));
    assert!(outcome.answer.starts_with("A small cat."));
    assert!(!outcome.generated);
    assert_eq!(outcome.metrics.llm_time, 0.0);
    assert!(outcome.metrics.retrieval_time >= 0.0);
}

#[tokio::test]
async fn session_with_generator_builds_history() {
    let index = Arc::new(pet_index().await);
    let generator = Box::new(ScriptedGenerator("It is the cat."));
    let mut session =
        ChatSession::new(index, Arc::new(VocabEmbedder), Some(generator), 2, None).unwrap();

    let outcome = session.ask("What pet is small?").await.unwrap();
    assert!(outcome.generated);
    assert_eq!(outcome.answer, "It is the cat.");

    let outcome = session.ask("And the large one?").await.unwrap();
    assert!(outcome.generated);

    let roles: Vec<Role> = session.history().iter().map(|t| t.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
    assert_eq!(session.history()[0].content, "What pet is small?");
}

#[tokio::test]
async fn generation_outage_never_ends_the_session() {
    let index = Arc::new(pet_index().await);
    let generator = Box::new(BrokenGenerator);
    let mut session =
        ChatSession::new(index, Arc::new(VocabEmbedder), Some(generator), 2, None).unwrap();

    let first = session.ask("What pet is small?").await.unwrap();
    assert!(!first.generated);
    assert_eq!(first.answer, GENERATION_APOLOGY);

    // History shows the apology, never a fabricated model answer.
    assert_eq!(session.history().len(), 2);
    assert_eq!(session.history()[1].role, Role::Assistant);
    assert_eq!(session.history()[1].content, GENERATION_APOLOGY);

    // The next turn still runs the full cycle.
    let second = session.ask("What about the dog?").await.unwrap();
    assert_eq!(second.answer, GENERATION_APOLOGY);
    assert_eq!(session.history().len(), 4);
}

#[tokio::test]
async fn context_budget_drops_whole_chunks() {
    let index = Arc::new(pet_index().await);
    // Budget fits only the single best chunk ("A small cat." is 12 chars).
    let mut session =
        ChatSession::new(index, Arc::new(VocabEmbedder), None, 3, Some(14)).unwrap();

    let outcome = session.ask("What pet is small?").await.unwrap();
    assert_eq!(outcome.answer, "A small cat.");
}
