//! Groq adapter — OpenAI-shape chat completions endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::llm::{
    error_message, response_text, CompletionClient, GenerationParams, ProviderError, RetryPolicy,
};

pub struct GroqClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    retry: RetryPolicy,
}

impl GroqClient {
    pub fn new(config: &ProviderConfig, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to build HTTP client"),
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            retry,
        }
    }
}

#[async_trait]
impl CompletionClient for GroqClient {
    fn provider(&self) -> &'static str {
        "groq"
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request_body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
        });

        let mut last_error = String::new();

        for attempt in 1..=self.retry.max_attempts {
            if attempt > 1 {
                let delay = self.retry.backoff(attempt - 1);
                warn!(
                    "groq attempt {} failed ({last_error}), retrying after {}ms",
                    attempt - 1,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&request_body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };

            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 || status.is_server_error() {
                last_error = format!("status {status}: {}", error_message(&body));
                continue;
            }

            if !status.is_success() {
                return Err(ProviderError::Rejected {
                    provider: self.provider(),
                    status: status.as_u16(),
                    message: error_message(&body),
                });
            }

            debug!("groq call succeeded on attempt {attempt}");
            return Ok(response_text(&body));
        }

        Err(ProviderError::Unavailable {
            provider: self.provider(),
            attempts: self.retry.max_attempts,
            last_error,
        })
    }
}
