//! Acceptance scoring for OCR output.
//!
//! Native text bypasses this gate; it is the only check OCR text must pass
//! before it enters the knowledge base.

use serde::{Deserialize, Serialize};

use crate::document::is_arabic;

pub const MIN_TEXT_CHARS: usize = 100;
pub const MIN_CHAR_DENSITY: f64 = 0.3;
pub const MIN_WORDS: usize = 10;
/// Passing score.
pub const MIN_SCORE: u8 = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub is_valid: bool,
    pub score: u8,
    pub issues: Vec<String>,
}

/// Score `text` from 100 down; see the constants above for the thresholds.
///
/// Falling below the length floor always rejects, even when the score alone
/// would still reach [`MIN_SCORE`].
pub fn evaluate(text: &str) -> QualityReport {
    let mut score: i32 = 100;
    let mut issues = Vec::new();

    let trimmed_len = text.trim().chars().count();
    if trimmed_len < MIN_TEXT_CHARS {
        score -= 50;
        issues.push(format!(
            "Insufficient text content ({} chars, minimum {})",
            trimmed_len, MIN_TEXT_CHARS
        ));
    }

    let total = text.chars().count();
    let non_ws = text.chars().filter(|c| !c.is_whitespace()).count();
    let density = if total == 0 { 0.0 } else { non_ws as f64 / total as f64 };
    if density < MIN_CHAR_DENSITY {
        score -= 30;
        issues.push(format!(
            "Low character density ({:.2}, minimum {})",
            density, MIN_CHAR_DENSITY
        ));
    }

    let has_latin = text.chars().any(|c| c.is_ascii_alphabetic());
    let has_arabic = text.chars().any(is_arabic);
    if !has_latin && !has_arabic {
        score -= 20;
        issues.push("No recognizable language detected (English or Arabic)".to_string());
    }

    let words = text.split_whitespace().count();
    if words < MIN_WORDS {
        score -= 20;
        issues.push(format!("Low word count ({}, minimum {})", words, MIN_WORDS));
    }

    let score = score.clamp(0, 100) as u8;
    let is_valid = score >= MIN_SCORE && issues.len() < 3 && trimmed_len >= MIN_TEXT_CHARS;
    QualityReport {
        is_valid,
        score,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prose(chars: usize) -> String {
        let base = "The contractor shall mobilise equipment and complete the drainage works on schedule. ";
        base.chars().cycle().take(chars).collect()
    }

    #[test]
    fn test_dense_prose_scores_full() {
        let text = prose(500);
        let report = evaluate(&text);
        assert_eq!(report.score, 100);
        assert!(report.is_valid);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_99_chars_is_rejected() {
        let text = prose(99);
        assert_eq!(text.trim().chars().count(), 99);
        let report = evaluate(&text);
        assert!(report.score <= 50);
        assert!(!report.is_valid);
        assert_eq!(report.issues[0], "Insufficient text content (99 chars, minimum 100)");
    }

    #[test]
    fn test_arabic_text_is_recognized() {
        let text = "تلتزم الجهة المنفذة بتنفيذ أعمال الصرف الصحي وفق الجدول الزمني المعتمد من قبل الاستشاري المشرف على المشروع ";
        let report = evaluate(&text.repeat(2));
        assert_eq!(report.score, 100);
        assert!(report.is_valid);
    }

    #[test]
    fn test_garbage_collects_all_issues() {
        let report = evaluate("|| ## ..        \n\n\n      ~~        ");
        assert_eq!(report.score, 0);
        assert_eq!(report.issues.len(), 4);
        assert!(!report.is_valid);
        assert!(report.issues[1].starts_with("Low character density ("));
    }

    #[test]
    fn test_empty_text() {
        let report = evaluate("");
        assert_eq!(report.score, 0);
        assert!(!report.is_valid);
    }
}
