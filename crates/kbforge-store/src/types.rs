//! Data types for knowledge-base entries, tables, ledger records and reports.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Segment title → text, in document order.
pub type Segments = IndexMap<String, String>;

/// Key of the manually curated sub-tree (glossaries, standards) kept across merges.
pub const CURATED_KEY: &str = "knowledge_base";

/// A table extracted from a document.
///
/// Every retained row has at least one non-empty cell and exactly `headers.len()` cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
}

impl TableData {
    /// Build a table from raw rows: cells are trimmed, blank rows dropped, the
    /// first remaining row becomes the header and every other row is padded or
    /// truncated to the header width. Returns `None` when nothing is left.
    pub fn from_rows<I, R, S>(raw: I) -> Option<Self>
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rows = raw.into_iter().filter_map(|row| {
            let cells: Vec<String> = row
                .into_iter()
                .map(|c| c.as_ref().trim().to_string())
                .collect();
            if cells.iter().any(|c| !c.is_empty()) {
                Some(cells)
            } else {
                None
            }
        });

        let headers = rows.next()?;
        let width = headers.len();
        let rows = rows
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            // Truncation can empty a row that only had content past the header width.
            .filter(|row| row.iter().any(|c| !c.is_empty()))
            .collect();

        Some(Self {
            headers,
            rows,
            caption: None,
            page_number: None,
        })
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page_number = Some(page);
        self
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn column_count(&self) -> usize {
        self.headers.len()
    }

    /// Render as a markdown table.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        if let Some(caption) = &self.caption {
            md.push_str(&format!("**{}**\n\n", caption));
        }
        md.push_str(&format!("| {} |\n", self.headers.join(" | ")));
        md.push_str(&format!("|{}|\n", vec![" --- "; self.headers.len()].join("|")));
        for row in &self.rows {
            md.push_str(&format!("| {} |\n", row.join(" | ")));
        }
        md
    }
}

/// How a document's content was obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    /// PDF text layer.
    #[default]
    Native,
    /// Rasterized pages run through the OCR engine.
    Ocr,
    /// DOCX paragraphs and tables.
    Docx,
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Ocr => write!(f, "ocr"),
            Self::Docx => write!(f, "docx"),
        }
    }
}

/// Per-document extraction statistics. Each path fills the fields it computes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionMetadata {
    pub extraction_method: ExtractionMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages_processed: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_pages: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paragraph_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<u8>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub quality_issues: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chars: Option<usize>,
}

/// One ingested file. Either a success record (`segments`) or a failure record (`error`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseEntry {
    pub file_path: String,
    /// Input folder category.
    #[serde(rename = "type")]
    pub category: String,
    /// Lowercased extension with the dot, e.g. `.pdf`.
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segments: Option<Segments>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<TableData>,
    #[serde(default)]
    pub metadata: ExtractionMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub processed_at: NaiveDateTime,
}

impl KnowledgeBaseEntry {
    pub fn success(
        file_path: impl Into<String>,
        category: impl Into<String>,
        format: impl Into<String>,
        segments: Segments,
        tables: Vec<TableData>,
        metadata: ExtractionMetadata,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            category: category.into(),
            format: format.into(),
            segments: Some(segments),
            tables,
            metadata,
            error: None,
            processed_at: chrono::Local::now().naive_local(),
        }
    }

    pub fn failure(
        file_path: impl Into<String>,
        category: impl Into<String>,
        format: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            category: category.into(),
            format: format.into(),
            segments: None,
            tables: Vec::new(),
            metadata: ExtractionMetadata::default(),
            error: Some(error.into()),
            processed_at: chrono::Local::now().naive_local(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.as_ref().map(IndexMap::len).unwrap_or(0)
    }
}

/// The aggregate store: per-file entries keyed by document id, plus the curated sub-tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    #[serde(rename = "knowledge_base", default, skip_serializing_if = "Option::is_none")]
    pub curated: Option<serde_json::Value>,
    #[serde(flatten)]
    pub entries: BTreeMap<String, KnowledgeBaseEntry>,
}

impl KnowledgeBase {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, id: impl Into<String>, entry: KnowledgeBaseEntry) {
        self.entries.insert(id.into(), entry);
    }

    pub fn get(&self, id: &str) -> Option<&KnowledgeBaseEntry> {
        self.entries.get(id)
    }

    /// `file_path` of every entry.
    pub fn file_paths(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|e| e.file_path.as_str())
    }

    pub fn error_count(&self) -> usize {
        self.entries.values().filter(|e| e.is_failure()).count()
    }
}

/// A row of the dedup ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateRecord {
    pub file_path: String,
    pub file_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<String>,
}

/// A snapshot file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub timestamp: NaiveDateTime,
    pub file_path: PathBuf,
    pub size_bytes: u64,
}

/// Severity shared by consistency, sync and health reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Warning,
    Error,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Cross-check of the dedup ledger against the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub status: HealthStatus,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub tracked_files: usize,
    pub kb_documents: usize,
}

/// Result of reconciling the ledger with the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub actions: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub backup: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_rows_padded_and_truncated() {
        let table = TableData::from_rows(vec![
            vec!["Item", "Qty", "Unit"],
            vec!["Cement", "10"],
            vec!["Steel", "5", "t", "extra"],
            vec!["", "  ", ""],
            vec!["", "", "", "overflow-only"],
        ])
        .unwrap();

        assert_eq!(table.headers, vec!["Item", "Qty", "Unit"]);
        assert_eq!(table.rows.len(), 2);
        for row in &table.rows {
            assert_eq!(row.len(), table.column_count());
            assert!(row.iter().any(|c| !c.is_empty()));
        }
        assert_eq!(table.rows[0], vec!["Cement", "10", ""]);
        assert_eq!(table.rows[1], vec!["Steel", "5", "t"]);
    }

    #[test]
    fn test_table_all_blank_is_none() {
        let rows: Vec<Vec<&str>> = vec![vec![" ", ""], vec![]];
        assert!(TableData::from_rows(rows).is_none());
    }

    #[test]
    fn test_table_markdown() {
        let table = TableData::from_rows(vec![vec!["A", "B"], vec!["1", "2"]])
            .unwrap()
            .with_caption("Costs");
        let md = table.to_markdown();
        assert!(md.starts_with("**Costs**"));
        assert!(md.contains("| A | B |"));
        assert!(md.contains("| 1 | 2 |"));
    }

    #[test]
    fn test_entry_serialization_shape() {
        let entry = KnowledgeBaseEntry::failure("/in/a.pdf", "reports", ".pdf", "File not found");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "reports");
        assert_eq!(json["error"], "File not found");
        assert!(json.get("segments").is_none());
        assert!(json.get("tables").is_none());
    }

    #[test]
    fn test_knowledge_base_keeps_curated_subtree() {
        let raw = r#"{
            "knowledge_base": {"glossary": {"BOQ": "Bill of quantities"}},
            "reports_a": {
                "file_path": "/in/a.pdf", "type": "reports", "format": ".pdf",
                "segments": {"Content": "text"},
                "processed_at": "2024-05-01T10:00:00.123456"
            }
        }"#;
        let kb: KnowledgeBase = serde_json::from_str(raw).unwrap();
        assert_eq!(kb.len(), 1);
        assert!(kb.curated.is_some());
        assert_eq!(kb.get("reports_a").unwrap().segment_count(), 1);

        let back = serde_json::to_value(&kb).unwrap();
        assert_eq!(back["knowledge_base"]["glossary"]["BOQ"], "Bill of quantities");
    }
}
