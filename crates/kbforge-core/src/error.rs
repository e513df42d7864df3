//! Error types for kbforge.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    /// Content exists but cannot be read or parsed.
    #[error("Corrupted file {}: {details}", path.display())]
    CorruptedFile { path: PathBuf, details: String },

    #[error("Unsupported format {detected:?} for {}", path.display())]
    UnsupportedFormat { path: PathBuf, detected: String },

    #[error("OCR engine unavailable: {0}")]
    OcrEngineUnavailable(String),

    #[error("OCR quality gate failed (score={score}%): {}", first_issue(issues))]
    OcrQualityGateFailed { score: u8, issues: Vec<String> },

    /// Traversal, symlink escape, disallowed extension, oversized file or null byte.
    #[error("Path validation failed for {path}: {reason}")]
    PathValidationFailed { path: String, reason: String },

    /// Payload rejected before a destructive write, or an unreadable store file.
    #[error("Store corruption: {0}")]
    StoreCorruption(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn first_issue(issues: &[String]) -> &str {
    issues.first().map(String::as_str).unwrap_or("no issues reported")
}

impl Error {
    /// Map an IO error on `path` to the most specific variant.
    pub fn from_io(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::FileNotFound(path.into()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.into()),
            _ => Self::Io(err),
        }
    }

    pub fn corrupted(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        Self::CorruptedFile {
            path: path.into(),
            details: details.into(),
        }
    }

    pub fn path_validation(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PathValidationFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
