mod config;
mod db;
mod documents;
mod errors;
mod evaluation;
mod llm;
mod metrics;
mod models;
mod queue;
mod retrieval;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::{create_pool, run_migrations};
use crate::evaluation::orchestrator::Orchestrator;
use crate::evaluation::repo::PgEvaluationStore;
use crate::llm::build_clients;
use crate::metrics::Metrics;
use crate::queue::{JobQueue, QueuePolicy};
use crate::retrieval::HttpRetriever;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Sift API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let pool = create_pool(&config.database_url).await?;
    run_migrations(&pool).await?;

    // Initialize S3 / MinIO
    let s3 = build_s3_client(&config).await;
    info!("S3 client initialized");

    // Model providers, selected once from config
    let (primary, fallback) = build_clients(&config);
    match &primary {
        Some(client) => info!(
            "LLM providers: primary {}, fallback {}",
            client.provider(),
            fallback.provider()
        ),
        None => info!("LLM providers: fallback-only mode ({})", fallback.provider()),
    }

    let retriever = Arc::new(HttpRetriever::new(
        &config.retriever_url,
        config.retriever_top_k,
        config.llm_timeout,
    ));
    let metrics = Arc::new(Metrics::new());

    // The evaluation pipeline behind the worker pool
    let store = Arc::new(PgEvaluationStore::new(pool.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        store,
        retriever,
        primary,
        fallback,
        Arc::clone(&metrics),
    ));
    let queue = JobQueue::start(
        orchestrator,
        QueuePolicy {
            workers: config.queue_workers,
            max_attempts: config.queue_max_attempts,
            base_backoff: config.queue_backoff,
        },
    );

    // Build app state
    let state = AppState {
        db: pool,
        s3,
        queue,
        metrics,
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "sift-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}
