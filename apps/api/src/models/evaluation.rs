use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle of an evaluation job.
///
/// Transitions only ever follow `queued → processing → {completed | failed}`.
/// The two terminal states are never left again; the repository enforces this
/// with guarded UPDATEs and the orchestrator checks it on entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One evaluation request and, eventually, its result.
///
/// Result fields are populated only on `completed`; `failure_reason` only on
/// `failed`. The two are mutually exclusive.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EvaluationJobRow {
    pub id: Uuid,
    pub job_title: String,
    pub cv_id: Uuid,
    pub project_report_id: Uuid,
    pub status: String,
    pub cv_match_rate: Option<f64>,
    pub cv_feedback: Option<String>,
    pub project_score: Option<f64>,
    pub project_feedback: Option<String>,
    pub overall_summary: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EvaluationJobRow {
    /// Unknown status strings are treated as terminal so a corrupt row can
    /// never be picked up for processing.
    pub fn job_status(&self) -> JobStatus {
        JobStatus::parse(&self.status).unwrap_or(JobStatus::Failed)
    }
}

/// The full result of a successful three-stage evaluation, written back to
/// the job record in a single atomic update.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOutcome {
    pub cv_match_rate: f64,
    pub cv_feedback: String,
    pub project_score: f64,
    pub project_feedback: String,
    pub overall_summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_unknown_status_reads_as_terminal() {
        assert_eq!(JobStatus::parse("archived"), None);
    }
}
