//! Dedup ledger schema.

/// One row per processed file content. `file_hash` is the identity; `file_path`
/// only records where that content was last seen.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS processed_files (
    file_path TEXT PRIMARY KEY,
    file_hash TEXT UNIQUE,
    processed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_processed_files_hash ON processed_files(file_hash);
"#;
