use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// What role an uploaded document plays in an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Cv,
    ProjectReport,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Cv => "cv",
            DocumentKind::ProjectReport => "project_report",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cv" => Some(DocumentKind::Cv),
            "project_report" => Some(DocumentKind::ProjectReport),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DocumentRow {
    pub id: Uuid,
    pub kind: String,
    pub filename: String,
    pub object_key: String,
    /// Extracted at upload time so the pipeline never re-parses the PDF.
    pub content_text: String,
    pub uploaded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips() {
        assert_eq!(DocumentKind::parse("cv"), Some(DocumentKind::Cv));
        assert_eq!(
            DocumentKind::parse("project_report"),
            Some(DocumentKind::ProjectReport)
        );
        assert_eq!(DocumentKind::Cv.as_str(), "cv");
        assert_eq!(DocumentKind::parse("resume"), None);
    }
}
