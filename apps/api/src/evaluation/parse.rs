//! Interpreting free-form model output into a score plus feedback.
//!
//! Models are asked for "Match Rate: <number>\nFeedback: <text>" but do not
//! reliably comply. The extractor takes the first number that plausibly fits
//! the expected range and treats the narrative after it as feedback.

/// A numeric score pulled out of model text, with the surrounding narrative.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredFeedback {
    pub score: f64,
    pub feedback: String,
}

/// Finds the first plausible score in `[min, max]` inside free-form text.
///
/// For a 0–1 range, a number written as a percentage ("85%") is normalized.
/// Returns `None` when no usable number exists; the caller decides whether
/// that fails the job.
pub fn extract_score(text: &str, min: f64, max: f64) -> Option<ScoredFeedback> {
    for token in number_tokens(text) {
        let Ok(value) = token.raw.parse::<f64>() else {
            continue;
        };

        let score = if value >= min && value <= max {
            Some(value)
        } else if min == 0.0 && max == 1.0 && token.percent && value > 1.0 && value <= 100.0 {
            Some(value / 100.0)
        } else {
            None
        };

        if let Some(score) = score {
            return Some(ScoredFeedback {
                score,
                feedback: feedback_after(text, token.end),
            });
        }
    }
    None
}

struct NumberToken {
    raw: String,
    /// Byte offset just past the number (and past a trailing '%', if any).
    end: usize,
    percent: bool,
}

/// Yields maximal digit/decimal-point runs with their byte spans.
fn number_tokens(text: &str) -> Vec<NumberToken> {
    let mut tokens = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            let mut raw = &text[start..i];
            // "4." parses in Rust but reads as a sentence-final number; trim it.
            raw = raw.trim_end_matches('.');
            let mut end = start + raw.len();
            let percent = bytes.get(end) == Some(&b'%');
            if percent {
                end += 1;
            }
            if !raw.is_empty() {
                tokens.push(NumberToken {
                    raw: raw.to_string(),
                    end,
                    percent,
                });
            }
        } else {
            i += 1;
        }
    }
    tokens
}

/// Narrative following the score: skip rating punctuation ("/5", "out of"),
/// labels, and whitespace up to the next letter. Falls back to the whole
/// text when nothing follows the number.
fn feedback_after(text: &str, from: usize) -> String {
    let rest = &text[from..];
    let narrative = match rest.find(|c: char| c.is_alphabetic()) {
        Some(pos) => &rest[pos..],
        None => "",
    };
    let narrative = narrative
        .strip_prefix("out of")
        .map(|r| r.trim_start_matches(|c: char| !c.is_alphabetic()))
        .unwrap_or(narrative);
    let narrative = narrative
        .strip_prefix("Feedback:")
        .or_else(|| narrative.strip_prefix("feedback:"))
        .unwrap_or(narrative)
        .trim();

    if narrative.is_empty() {
        text.trim().to_string()
    } else {
        narrative.to_string()
    }
}
