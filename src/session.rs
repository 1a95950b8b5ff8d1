//! Multi-turn question-answering sessions.
//!
//! [`ChatSession`] owns the conversation history and drives one
//! retrieve → assemble → generate cycle per question. Turns are strictly
//! sequential: [`ask`](ChatSession::ask) takes `&mut self`, so a session can
//! never have two turns in flight. The underlying index is shared read-only
//! (`Arc`), so independent sessions over one index run freely in parallel.
//!
//! The answer generator is optional. Without one the session answers with
//! the assembled context itself (`generated = false`, `llm_time = 0`); with
//! one, a generation failure is absorbed into a fixed apology rather than
//! ending the session, and the history records exactly what the user saw.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};
use uuid::Uuid;

use crate::context::assemble;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::VectorIndex;
use crate::llm::{AnswerGenerator, DEFAULT_SYSTEM_INSTRUCTION};
use crate::models::{ConversationTurn, TurnMetrics, TurnOutcome};
use crate::retrieve::retrieve;

/// Shown in place of an answer when generation fails mid-turn.
pub const GENERATION_APOLOGY: &str = "Sorry, I encountered an error generating a response.";

/// A stateful conversation over one document index.
pub struct ChatSession {
    id: Uuid,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Option<Box<dyn AnswerGenerator>>,
    top_k: usize,
    max_context_chars: Option<usize>,
    history: Vec<ConversationTurn>,
}

impl ChatSession {
    /// Create a session over a built index.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] when `top_k` is zero.
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Option<Box<dyn AnswerGenerator>>,
        top_k: usize,
        max_context_chars: Option<usize>,
    ) -> Result<Self> {
        if top_k == 0 {
            return Err(RagError::InvalidArgument(
                "top_k must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            index,
            embedder,
            generator,
            top_k,
            max_context_chars,
            history: Vec::new(),
        })
    }

    /// Session identifier, used for log correlation.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The conversation so far, oldest turn first.
    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    /// Whether an answer generator is configured.
    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    /// Answer one question, advancing the session by exactly one turn.
    ///
    /// The turn runs retrieval, context assembly, and — when a generator is
    /// configured — answer generation, timing the retrieval and generation
    /// phases separately. Retrieval failures are fatal to the turn and
    /// propagate; generation failures are absorbed into
    /// [`GENERATION_APOLOGY`] and the session stays usable.
    ///
    /// Without a generator the assembled context is returned verbatim and
    /// only the user turn is recorded (see DESIGN.md for the history
    /// policy).
    pub async fn ask(&mut self, question: &str) -> Result<TurnOutcome> {
        let start = Instant::now();
        let results =
            retrieve(question, self.top_k, self.embedder.as_ref(), &self.index).await?;
        let retrieval_time = start.elapsed().as_secs_f64();

        // History enters the context before this turn's question is appended.
        let context = assemble(&results, &self.history, self.max_context_chars);

        let Some(generator) = &self.generator else {
            self.history.push(ConversationTurn::user(question));
            info!(
                session = %self.id,
                retrieval_time,
                generated = false,
                "answered turn from retrieved context"
            );
            return Ok(TurnOutcome {
                answer: context,
                generated: false,
                metrics: TurnMetrics { retrieval_time, llm_time: 0.0 },
            });
        };

        self.history.push(ConversationTurn::user(question));

        let llm_start = Instant::now();
        let generated = generator
            .generate(DEFAULT_SYSTEM_INSTRUCTION, &context, question)
            .await;
        let llm_time = llm_start.elapsed().as_secs_f64();

        let outcome = match generated {
            Ok(answer) => {
                self.history.push(ConversationTurn::assistant(answer.clone()));
                TurnOutcome {
                    answer,
                    generated: true,
                    metrics: TurnMetrics { retrieval_time, llm_time },
                }
            }
            Err(e) => {
                // The apology is what the user sees, so it is what history records.
                warn!(session = %self.id, error = %e, "generation failed; answering with apology");
                self.history
                    .push(ConversationTurn::assistant(GENERATION_APOLOGY));
                TurnOutcome {
                    answer: GENERATION_APOLOGY.to_string(),
                    generated: false,
                    metrics: TurnMetrics { retrieval_time, llm_time },
                }
            }
        };

        info!(
            session = %self.id,
            retrieval_time,
            llm_time,
            generated = outcome.generated,
            "answered turn"
        );

        Ok(outcome)
    }
}
