//! Model-provider clients.
//!
//! ARCHITECTURAL RULE: no other module may call a hosted model API directly.
//! The evaluation pipeline sees only `dyn CompletionClient`; the concrete
//! backend (Groq or Gemini) is chosen once at startup from config.
//!
//! Each client retries transient failures (transport errors, 429, 5xx) with
//! exponential backoff up to a ceiling, then reports `ProviderError::Unavailable`.
//! Well-formed rejections (4xx) are never retried: resending a malformed
//! prompt burns quota without changing the outcome.

pub mod gemini;
pub mod groq;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::config::{Config, ProviderConfig, ProviderKind};

/// Generation knobs shared by every provider.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        // Deterministic scoring output; 1024 tokens is plenty for feedback text.
        Self {
            max_tokens: 1024,
            temperature: 0.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Retry ceiling exhausted. Carries the last underlying error.
    #[error("provider {provider} unavailable after {attempts} attempts: {last_error}")]
    Unavailable {
        provider: &'static str,
        attempts: u32,
        last_error: String,
    },

    /// The provider understood the request and refused it. Not retryable.
    #[error("provider {provider} rejected the request (status {status}): {message}")]
    Rejected {
        provider: &'static str,
        status: u16,
        message: String,
    },
}

/// The generation capability. Both providers implement the identical contract.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn provider(&self) -> &'static str;

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, ProviderError>;
}

/// Retry schedule for transient failures: base delay doubling per attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base, 2×base, 4×base, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * (1u32 << attempt.saturating_sub(1).min(16))
    }
}

/// Builds the concrete client for a configured provider.
pub fn build_client(
    provider: &ProviderConfig,
    timeout: Duration,
    retry: RetryPolicy,
) -> Arc<dyn CompletionClient> {
    match provider.kind {
        ProviderKind::Groq => Arc::new(groq::GroqClient::new(provider, timeout, retry)),
        ProviderKind::Gemini => Arc::new(gemini::GeminiClient::new(provider, timeout, retry)),
    }
}

/// Builds the (primary, fallback) pair from config. The primary is absent in
/// fallback-only mode.
pub fn build_clients(
    config: &Config,
) -> (Option<Arc<dyn CompletionClient>>, Arc<dyn CompletionClient>) {
    let retry = RetryPolicy {
        max_attempts: config.llm_max_attempts,
        base_backoff: config.llm_backoff,
    };
    let primary = config
        .primary
        .as_ref()
        .map(|p| build_client(p, config.llm_timeout, retry.clone()));
    let fallback = build_client(&config.fallback, config.llm_timeout, retry);
    (primary, fallback)
}

/// Pulls generated text out of a provider response body.
///
/// Hosted providers drift their response schema between versions, so this is
/// deliberately forgiving: try the known shapes in order and fall back to the
/// raw body rather than failing the evaluation over schema drift.
pub fn response_text(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };
    text_from_value(&value).unwrap_or_else(|| body.to_string())
}

fn text_from_value(value: &Value) -> Option<String> {
    // OpenAI-shape: choices[0].message.content or choices[0].text
    if let Some(choice) = value.get("choices").and_then(|c| c.get(0)) {
        if let Some(content) = choice
            .pointer("/message/content")
            .or_else(|| choice.get("text"))
            .and_then(Value::as_str)
        {
            return Some(content.to_string());
        }
    }

    // Gemini-shape: candidates[0].content.parts[*].text
    if let Some(parts) = value
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
    {
        let text: Vec<&str> = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect();
        if !text.is_empty() {
            return Some(text.join(""));
        }
    }

    // Single output field: string, or a list of {text} / plain strings.
    if let Some(output) = value.get("output") {
        match output {
            Value::String(s) => return Some(s.clone()),
            Value::Array(items) => {
                let joined: Vec<String> = items
                    .iter()
                    .map(|item| match item.get("text").and_then(Value::as_str) {
                        Some(t) => t.to_string(),
                        None => item.as_str().map(str::to_string).unwrap_or_else(|| item.to_string()),
                    })
                    .collect();
                if !joined.is_empty() {
                    return Some(joined.join(" "));
                }
            }
            _ => {}
        }
    }

    // Bare text field.
    value
        .get("text")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Digs a human-readable message out of an error body, if the provider sent
/// one in the usual `{"error": {"message": ...}}` envelope.
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}
