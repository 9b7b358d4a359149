use std::sync::Arc;

use aws_sdk_s3::Client as S3Client;
use sqlx::PgPool;

use crate::config::Config;
use crate::metrics::Metrics;
use crate::queue::JobQueue;

/// Shared application state injected into all route handlers via Axum
/// extractors. The orchestrator itself is not here: it lives behind the
/// queue's worker pool, and handlers only ever talk to it by enqueuing ids.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub s3: S3Client,
    pub queue: JobQueue,
    pub metrics: Arc<Metrics>,
    pub config: Config,
}
