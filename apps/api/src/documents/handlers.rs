//! Upload endpoint: stores the raw file in S3 and the extracted text in
//! PostgreSQL, so the pipeline never touches the original bytes again.

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::documents::extract::extract_text;
use crate::errors::AppError;
use crate::models::document::{DocumentKind, DocumentRow};
use crate::state::AppState;

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: Uuid,
    pub kind: String,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
}

/// POST /api/v1/uploads
///
/// Multipart form: `kind` (`cv` | `project_report`) and `file` (PDF or plain
/// text, 10 MB cap).
pub async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let mut kind: Option<DocumentKind> = None;
    let mut file: Option<(String, String, Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
    {
        match field.name().unwrap_or("") {
            "kind" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Unreadable 'kind' field: {e}")))?;
                kind = Some(DocumentKind::parse(&value).ok_or_else(|| {
                    AppError::Validation(format!(
                        "Unknown document kind '{value}' (expected cv or project_report)"
                    ))
                })?);
            }
            "file" => {
                let filename = field.file_name().unwrap_or("document").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Unreadable file field: {e}")))?;
                file = Some((filename, content_type, data));
            }
            _ => {
                let _ = field.bytes().await;
            }
        }
    }

    let kind = kind.ok_or_else(|| AppError::Validation("Missing 'kind' field".to_string()))?;
    let (filename, content_type, data) =
        file.ok_or_else(|| AppError::Validation("Missing 'file' field".to_string()))?;

    if !matches!(content_type.as_str(), "application/pdf" | "text/plain") {
        return Err(AppError::Validation(
            "Only PDF and plain-text files are allowed".to_string(),
        ));
    }
    if data.len() > MAX_UPLOAD_BYTES {
        return Err(AppError::Validation(
            "File size cannot exceed 10MB".to_string(),
        ));
    }

    let content_text = extract_text(&data, &content_type)
        .map_err(|e| AppError::Validation(e.to_string()))?;
    if content_text.is_empty() {
        return Err(AppError::Validation(
            "Document contains no extractable text".to_string(),
        ));
    }

    let object_key = format!("uploads/{}/{}-{}", kind.as_str(), Uuid::new_v4(), filename);
    state
        .s3
        .put_object()
        .bucket(&state.config.s3_bucket)
        .key(&object_key)
        .content_type(&content_type)
        .body(ByteStream::from(data.to_vec()))
        .send()
        .await
        .map_err(|e| AppError::Storage(e.to_string()))?;

    let row = sqlx::query_as::<_, DocumentRow>(
        r#"
        INSERT INTO documents (kind, filename, object_key, content_text)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(kind.as_str())
    .bind(&filename)
    .bind(&object_key)
    .bind(&content_text)
    .fetch_one(&state.db)
    .await?;

    info!(
        "stored {} '{}' ({} bytes, {} chars of text)",
        row.kind,
        row.filename,
        data.len(),
        content_text.len()
    );

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            id: row.id,
            kind: row.kind,
            filename: row.filename,
            uploaded_at: row.uploaded_at,
        }),
    ))
}
