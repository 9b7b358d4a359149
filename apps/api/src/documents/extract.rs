//! Text extraction from uploaded documents.
//!
//! Extraction happens once, at upload time; the evaluation pipeline only
//! ever reads the stored text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("could not read PDF text: {0}")]
    Pdf(String),

    #[error("file is not valid UTF-8 text")]
    NotText,
}

pub fn extract_text(data: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        "application/pdf" => pdf_extract::extract_text_from_mem(data)
            .map(|text| normalize(&text))
            .map_err(|e| ExtractError::Pdf(e.to_string())),
        _ => String::from_utf8(data.to_vec())
            .map(|text| normalize(&text))
            .map_err(|_| ExtractError::NotText),
    }
}

/// Collapses runs of blank lines and trims trailing space; PDF extraction in
/// particular leaves a lot of both.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}
