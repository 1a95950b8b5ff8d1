//! Answer generation over an external chat-completion capability.
//!
//! Defines the [`AnswerGenerator`] trait and concrete implementations:
//! - **[`OpenAiGenerator`]** — calls the OpenAI chat completions API.
//! - **[`OllamaGenerator`]** — calls a local Ollama instance's `/api/chat` endpoint.
//!
//! The capability is optional: [`create_generator`] returns `None`
//! when the provider is disabled or its credential is absent, and the
//! session falls back to answering with the retrieved context itself.
//! Provider failures surface as
//! [`RagError::Generation`](crate::error::RagError::Generation) — including
//! request timeouts — and are recovered by the session, never fatal to it.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::config::LlmConfig;
use crate::error::{RagError, Result};

/// Instruction given to the model ahead of the retrieved context.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str =
    "Answer the question based on the provided context.";

/// A capability that turns assembled context plus a question into an answer.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o"`).
    fn model_name(&self) -> &str;

    /// Generate an answer to `question` grounded in `context`.
    ///
    /// Re-invoking with the same inputs is safe; the internal retry uses
    /// exactly that property.
    async fn generate(&self, system: &str, context: &str, question: &str) -> Result<String>;
}

fn generation_err(provider: &str, message: impl Into<String>) -> RagError {
    RagError::Generation { provider: provider.to_string(), message: message.into() }
}

/// Render the user-facing message that carries context and question.
fn user_message(context: &str, question: &str) -> String {
    format!("Context:\n{}\n\nQuestion: {}", context, question)
}

// ============ OpenAI Provider ============

/// Answer generator using the OpenAI chat completions API.
///
/// Calls `POST /v1/chat/completions` with the configured model. Requires
/// the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAiGenerator {
    model: String,
    api_key: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl OpenAiGenerator {
    /// Create a new OpenAI generator from configuration.
    ///
    /// # Errors
    ///
    /// Fails when `model` is not set in config or when `OPENAI_API_KEY` is
    /// not in the environment. (Use [`create_generator`] to treat a missing
    /// key as the capability being absent instead.)
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| generation_err("openai", "llm.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| generation_err("openai", "OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| generation_err("openai", e.to_string()))?;

        Ok(Self { model, api_key, client, max_retries: config.max_retries })
    }
}

#[async_trait]
impl AnswerGenerator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, system: &str, context: &str, question: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user_message(context, question)},
            ],
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/chat/completions")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| generation_err("openai", e.to_string()))?;
                        return parse_openai_chat_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(generation_err(
                            "openai",
                            format!("API error {}: {}", status, body_text),
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    return Err(generation_err(
                        "openai",
                        format!("API error {}: {}", status, body_text),
                    ));
                }
                Err(e) => {
                    // Covers network failures and the client timeout alike.
                    last_err = Some(generation_err("openai", e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| generation_err("openai", "generation failed after retries")))
    }
}

/// Extract `choices[0].message.content` from a chat completions response.
fn parse_openai_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| generation_err("openai", "invalid response: missing message content"))
}

// ============ Ollama Provider ============

/// Answer generator using a local Ollama instance.
///
/// Calls `POST /api/chat` (non-streaming) on the configured URL
/// (default: `http://localhost:11434`).
pub struct OllamaGenerator {
    model: String,
    url: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl OllamaGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| generation_err("ollama", "llm.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| generation_err("ollama", e.to_string()))?;

        Ok(Self { model, url, client, max_retries: config.max_retries })
    }
}

#[async_trait]
impl AnswerGenerator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, system: &str, context: &str, question: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user_message(context, question)},
            ],
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/api/chat", self.url))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| generation_err("ollama", e.to_string()))?;
                        return parse_ollama_chat_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(generation_err(
                            "ollama",
                            format!("API error {}: {}", status, body_text),
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    return Err(generation_err(
                        "ollama",
                        format!("API error {}: {}", status, body_text),
                    ));
                }
                Err(e) => {
                    last_err = Some(generation_err(
                        "ollama",
                        format!("connection error (is Ollama running at {}?): {}", self.url, e),
                    ));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| generation_err("ollama", "generation failed after retries")))
    }
}

fn parse_ollama_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| generation_err("ollama", "invalid response: missing message content"))
}

/// Create an [`AnswerGenerator`] from configuration, or `None` when the
/// capability is absent.
///
/// `None` is returned when the provider is `"disabled"` or when the OpenAI
/// provider is selected but `OPENAI_API_KEY` is not set — sessions then run
/// in context-only mode rather than failing.
///
/// # Errors
///
/// Returns [`RagError::InvalidArgument`] for unknown provider names and the
/// provider's own error for incomplete configuration.
pub fn create_generator(config: &LlmConfig) -> Result<Option<Box<dyn AnswerGenerator>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => {
            if std::env::var("OPENAI_API_KEY").is_err() {
                warn!("OPENAI_API_KEY not set; answering with retrieved context only");
                return Ok(None);
            }
            Ok(Some(Box::new(OpenAiGenerator::new(config)?)))
        }
        "ollama" => Ok(Some(Box::new(OllamaGenerator::new(config)?))),
        other => Err(RagError::InvalidArgument(format!(
            "unknown llm provider: '{}' (use disabled, openai, or ollama)",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_shape() {
        let msg = user_message("some context", "a question?");
        assert_eq!(msg, "Context:\nsome context\n\nQuestion: a question?");
    }

    #[test]
    fn test_parse_openai_chat_response() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "  the answer \n"}}]
        });
        assert_eq!(parse_openai_chat_response(&json).unwrap(), "the answer");
    }

    #[test]
    fn test_parse_openai_chat_response_empty_choices() {
        let json = serde_json::json!({"choices": []});
        assert!(parse_openai_chat_response(&json).is_err());
    }

    #[test]
    fn test_parse_ollama_chat_response() {
        let json = serde_json::json!({"message": {"role": "assistant", "content": "hi"}});
        assert_eq!(parse_ollama_chat_response(&json).unwrap(), "hi");
    }

    #[test]
    fn test_create_generator_disabled() {
        let config = LlmConfig::default();
        assert!(create_generator(&config).unwrap().is_none());
    }

    #[test]
    fn test_create_generator_unknown() {
        let config = LlmConfig { provider: "mystery".to_string(), ..LlmConfig::default() };
        assert!(matches!(
            create_generator(&config),
            Err(RagError::InvalidArgument(_))
        ));
    }
}
