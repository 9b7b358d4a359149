use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Which hosted model backend a completion client talks to.
///
/// The set is closed on purpose: provider selection happens exactly once at
/// startup, and the evaluation pipeline only ever sees `dyn CompletionClient`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Groq,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Groq => "groq",
            ProviderKind::Gemini => "gemini",
        }
    }
}

/// Connection settings for one model provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub retriever_url: String,
    pub retriever_top_k: u32,
    /// `None` means fallback-only mode: no restart on provider failure.
    pub primary: Option<ProviderConfig>,
    pub fallback: ProviderConfig,
    pub llm_timeout: Duration,
    pub llm_max_attempts: u32,
    pub llm_backoff: Duration,
    pub queue_workers: usize,
    pub queue_max_attempts: u32,
    pub queue_backoff: Duration,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let fallback_kind = parse_provider(
            &std::env::var("LLM_FALLBACK_PROVIDER").unwrap_or_else(|_| "gemini".to_string()),
        )?
        .context("LLM_FALLBACK_PROVIDER must name a provider, not 'none'")?;
        let primary_kind = parse_provider(
            &std::env::var("LLM_PRIMARY_PROVIDER").unwrap_or_else(|_| "groq".to_string()),
        )?;

        // A primary identical to the fallback is the same thing as having no
        // primary at all: there is nothing left to restart onto.
        let primary = match primary_kind {
            Some(kind) if kind != fallback_kind => Some(provider_config(kind)?),
            _ => None,
        };
        let fallback = provider_config(fallback_kind)?;

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            retriever_url: require_env("RETRIEVER_URL")?,
            retriever_top_k: env_parse("RETRIEVER_TOP_K", 4)?,
            primary,
            fallback,
            llm_timeout: Duration::from_secs(env_parse("LLM_TIMEOUT_SECS", 60u64)?),
            llm_max_attempts: env_parse("LLM_MAX_ATTEMPTS", 3)?,
            llm_backoff: Duration::from_millis(env_parse("LLM_BACKOFF_MS", 1000u64)?),
            queue_workers: env_parse("QUEUE_WORKERS", 4usize)?,
            queue_max_attempts: env_parse("QUEUE_MAX_ATTEMPTS", 3)?,
            queue_backoff: Duration::from_millis(env_parse("QUEUE_BACKOFF_MS", 60_000u64)?),
            port: env_parse("PORT", 8080u16)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// Parses a provider name; `"none"` is accepted and means "not configured".
fn parse_provider(name: &str) -> Result<Option<ProviderKind>> {
    match name.trim().to_lowercase().as_str() {
        "groq" => Ok(Some(ProviderKind::Groq)),
        "gemini" => Ok(Some(ProviderKind::Gemini)),
        "none" | "" => Ok(None),
        other => bail!("unknown LLM provider '{other}' (expected groq, gemini, or none)"),
    }
}

fn provider_config(kind: ProviderKind) -> Result<ProviderConfig> {
    let (key_var, url_var, model_var, default_url, default_model) = match kind {
        ProviderKind::Groq => (
            "GROQ_API_KEY",
            "GROQ_API_URL",
            "GROQ_MODEL",
            "https://api.groq.com/openai/v1",
            "llama-3.3-70b-versatile",
        ),
        ProviderKind::Gemini => (
            "GEMINI_API_KEY",
            "GEMINI_API_URL",
            "GEMINI_MODEL",
            "https://generativelanguage.googleapis.com/v1beta",
            "gemini-2.0-flash",
        ),
    };

    Ok(ProviderConfig {
        kind,
        api_key: require_env(key_var)?,
        base_url: std::env::var(url_var).unwrap_or_else(|_| default_url.to_string()),
        model: std::env::var(model_var).unwrap_or_else(|_| default_model.to_string()),
    })
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("'{key}' has an invalid value")),
        Err(_) => Ok(default),
    }
}
