//! Axum route handlers for creating and polling evaluation jobs.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::document::{DocumentKind, DocumentRow};
use crate::models::evaluation::{EvaluationJobRow, JobStatus};
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateEvaluationRequest {
    pub job_title: String,
    pub cv_id: Uuid,
    pub project_report_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CreateEvaluationResponse {
    pub id: Uuid,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct EvaluationResult {
    pub cv_match_rate: f64,
    pub cv_feedback: String,
    pub project_score: f64,
    pub project_feedback: String,
    pub overall_summary: String,
}

/// Poll response. `result` is present only on `completed`, `error` only on
/// `failed`; internal error kinds never appear here.
#[derive(Debug, Serialize)]
pub struct EvaluationStatusResponse {
    pub id: Uuid,
    pub job_title: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<EvaluationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EvaluationStatusResponse {
    fn from_row(job: EvaluationJobRow) -> Self {
        let result = match (
            job.job_status(),
            job.cv_match_rate,
            job.cv_feedback.clone(),
            job.project_score,
            job.project_feedback.clone(),
            job.overall_summary.clone(),
        ) {
            (
                JobStatus::Completed,
                Some(cv_match_rate),
                Some(cv_feedback),
                Some(project_score),
                Some(project_feedback),
                Some(overall_summary),
            ) => Some(EvaluationResult {
                cv_match_rate,
                cv_feedback,
                project_score,
                project_feedback,
                overall_summary,
            }),
            _ => None,
        };

        let error = match job.job_status() {
            JobStatus::Failed => job.failure_reason.clone(),
            _ => None,
        };

        Self {
            id: job.id,
            job_title: job.job_title,
            status: job.status,
            result,
            error,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/evaluations
///
/// Creates the job in `queued` and schedules it. Everything after the 202 is
/// asynchronous; callers poll the GET endpoint for the outcome.
pub async fn handle_create_evaluation(
    State(state): State<AppState>,
    Json(request): Json<CreateEvaluationRequest>,
) -> Result<(StatusCode, Json<CreateEvaluationResponse>), AppError> {
    if request.job_title.trim().is_empty() {
        return Err(AppError::Validation("job_title cannot be empty".to_string()));
    }

    expect_document(&state, request.cv_id, DocumentKind::Cv).await?;
    expect_document(&state, request.project_report_id, DocumentKind::ProjectReport).await?;

    let job = sqlx::query_as::<_, EvaluationJobRow>(
        r#"
        INSERT INTO evaluation_jobs (job_title, cv_id, project_report_id, status)
        VALUES ($1, $2, $3, 'queued')
        RETURNING *
        "#,
    )
    .bind(request.job_title.trim())
    .bind(request.cv_id)
    .bind(request.project_report_id)
    .fetch_one(&state.db)
    .await?;

    state
        .queue
        .enqueue(job.id)
        .map_err(|e| AppError::Queue(e.to_string()))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateEvaluationResponse {
            id: job.id,
            status: job.status,
            message: "Evaluation queued successfully".to_string(),
        }),
    ))
}

/// GET /api/v1/evaluations/:id
pub async fn handle_get_evaluation(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<EvaluationStatusResponse>, AppError> {
    let job = sqlx::query_as::<_, EvaluationJobRow>("SELECT * FROM evaluation_jobs WHERE id = $1")
        .bind(job_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Evaluation {job_id} not found")))?;

    Ok(Json(EvaluationStatusResponse::from_row(job)))
}

async fn expect_document(
    state: &AppState,
    id: Uuid,
    kind: DocumentKind,
) -> Result<DocumentRow, AppError> {
    let document = sqlx::query_as::<_, DocumentRow>("SELECT * FROM documents WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Document {id} not found")))?;

    if document.kind != kind.as_str() {
        return Err(AppError::Validation(format!(
            "Document {id} is a '{}', expected '{}'",
            document.kind,
            kind.as_str()
        )));
    }
    Ok(document)
}
