//! Retrieval context for evaluation prompts.
//!
//! The document index lives in a sidecar service; this module only queries
//! it. An unreachable index degrades the evaluation (empty context) rather
//! than aborting it; the orchestrator decides that, not this client.

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

/// A passage pulled from the index, paired with the query that found it.
/// Ephemeral: built into a prompt and discarded, never persisted.
#[derive(Debug, Clone)]
pub struct Passage {
    pub text: String,
    pub query: String,
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("retrieval index unreachable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Top-K passages for a query. "No results" is an empty Vec, not an error.
    async fn retrieve(&self, query: &str, topic: &str) -> Result<Vec<Passage>, RetrievalError>;
}

/// Queries the vector-index sidecar over HTTP.
pub struct HttpRetriever {
    http: reqwest::Client,
    base_url: String,
    top_k: u32,
}

impl HttpRetriever {
    pub fn new(base_url: &str, top_k: u32, timeout: std::time::Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to build HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
            top_k,
        }
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn retrieve(&self, query: &str, topic: &str) -> Result<Vec<Passage>, RetrievalError> {
        let url = format!("{}/query", self.base_url);
        let body = json!({
            "query": query,
            "topic": topic,
            "top_k": self.top_k,
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RetrievalError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalError::Unavailable(format!(
                "index returned status {status}"
            )));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| RetrievalError::Unavailable(e.to_string()))?;

        Ok(passages_from_value(&value, query))
    }
}

/// Accepts the index's response in any of its known shapes:
/// `{"documents": [...]}`, `{"passages": [...]}`, or a bare array; items are
/// plain strings or objects with a `text` field.
fn passages_from_value(value: &Value, query: &str) -> Vec<Passage> {
    let items = value
        .get("documents")
        .or_else(|| value.get("passages"))
        .or_else(|| value.get("results"))
        .unwrap_or(value);

    let Some(items) = items.as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(_) => item
                .get("text")
                .or_else(|| item.get("content"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .filter(|text| !text.trim().is_empty())
        .map(|text| Passage {
            text,
            query: query.to_string(),
        })
        .collect()
}
