//! Durable store for evaluation jobs.
//!
//! Every status transition is guarded in SQL: `claim` only advances
//! non-terminal rows, and `complete`/`fail` only touch rows still in
//! `processing`. A stale or duplicate worker therefore cannot overwrite a
//! terminal result, whatever it believes the job's state to be.

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::models::evaluation::{EvaluationJobRow, EvaluationOutcome};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("evaluation job {0} not found")]
    NotFound(Uuid),

    /// Persistence layer unreachable. Escalated to the queue for redelivery,
    /// never swallowed.
    #[error("repository unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

#[async_trait]
pub trait EvaluationRepo: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<EvaluationJobRow, RepoError>;

    /// Moves the job into `processing` and returns it, or `None` when the
    /// job is already terminal (the duplicate-delivery no-op).
    async fn claim(&self, id: Uuid) -> Result<Option<EvaluationJobRow>, RepoError>;

    async fn complete(&self, id: Uuid, outcome: &EvaluationOutcome) -> Result<(), RepoError>;

    async fn fail(&self, id: Uuid, summary: &str) -> Result<(), RepoError>;
}

/// Read access to the extracted text of uploaded documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn content(&self, id: Uuid) -> Result<String, RepoError>;
}

pub struct PgEvaluationStore {
    pool: PgPool,
}

impl PgEvaluationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EvaluationRepo for PgEvaluationStore {
    async fn get(&self, id: Uuid) -> Result<EvaluationJobRow, RepoError> {
        sqlx::query_as::<_, EvaluationJobRow>("SELECT * FROM evaluation_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepoError::NotFound(id))
    }

    async fn claim(&self, id: Uuid) -> Result<Option<EvaluationJobRow>, RepoError> {
        // `processing` is claimable too: a queue-level redelivery after a
        // worker crash must be able to pick the job back up.
        let claimed = sqlx::query_as::<_, EvaluationJobRow>(
            r#"
            UPDATE evaluation_jobs
            SET status = 'processing', updated_at = now()
            WHERE id = $1 AND status IN ('queued', 'processing')
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match claimed {
            Some(job) => Ok(Some(job)),
            // Distinguish "terminal" from "missing".
            None => self.get(id).await.map(|_| None),
        }
    }

    async fn complete(&self, id: Uuid, outcome: &EvaluationOutcome) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE evaluation_jobs
            SET status = 'completed',
                cv_match_rate = $2,
                cv_feedback = $3,
                project_score = $4,
                project_feedback = $5,
                overall_summary = $6,
                failure_reason = NULL,
                updated_at = now()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(outcome.cv_match_rate)
        .bind(&outcome.cv_feedback)
        .bind(outcome.project_score)
        .bind(&outcome.project_feedback)
        .bind(&outcome.overall_summary)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!("job {id}: completion discarded, row no longer in 'processing'");
        }
        Ok(())
    }

    async fn fail(&self, id: Uuid, summary: &str) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE evaluation_jobs
            SET status = 'failed', failure_reason = $2, updated_at = now()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(summary)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!("job {id}: failure discarded, row no longer in 'processing'");
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PgEvaluationStore {
    async fn content(&self, id: Uuid) -> Result<String, RepoError> {
        sqlx::query_scalar::<_, String>("SELECT content_text FROM documents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepoError::NotFound(id))
    }
}
