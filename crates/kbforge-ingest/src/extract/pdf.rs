//! Native PDF text layer: page access, scanned-document detection and
//! header-driven segmentation.

use std::path::{Path, PathBuf};

use lopdf::Document;
use tracing::{debug, info, warn};

use kbforge_core::{Error, Result};
use kbforge_store::{ExtractionMetadata, ExtractionMethod, TableData};

use super::tables;
use super::ExtractionPayload;
use crate::segment::{is_pdf_header, SectionAccumulator};

/// A first page with less trimmed text than this is treated as a scan.
pub const SCANNED_TEXT_THRESHOLD: usize = 50;
/// Section a document starts in before its first header.
pub const DEFAULT_SECTION: &str = "Content";

/// An opened PDF with its page numbers (1-based, in order).
pub struct PdfDocument {
    path: PathBuf,
    doc: Document,
    pages: Vec<u32>,
    #[cfg(feature = "pdf-extract")]
    bytes: Vec<u8>,
    #[cfg(feature = "pdf-extract")]
    fallback: once_cell::unsync::OnceCell<Option<Vec<String>>>,
}

impl PdfDocument {
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| Error::from_io(e, path))?;
        let doc = Document::load_mem(&bytes).map_err(|e| {
            tracing::error!("Failed to open PDF file {}: {}", path.display(), e);
            Error::corrupted(path, format!("Could not open PDF file: {}", e))
        })?;
        let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
        if pages.is_empty() {
            return Err(Error::corrupted(path, "PDF has no pages"));
        }
        Ok(Self {
            path: path.to_path_buf(),
            doc,
            pages,
            #[cfg(feature = "pdf-extract")]
            bytes,
            #[cfg(feature = "pdf-extract")]
            fallback: once_cell::unsync::OnceCell::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page_numbers(&self) -> &[u32] {
        &self.pages
    }

    /// Text layer of one page.
    pub fn page_text(&self, page: u32) -> Result<String> {
        let text = self
            .doc
            .extract_text(&[page])
            .map_err(|e| Error::corrupted(&self.path, format!("page {}: {}", page, e)))?;
        #[cfg(feature = "pdf-extract")]
        if text.trim().is_empty() {
            if let Some(alt) = self.fallback_text(page) {
                return Ok(alt);
            }
        }
        Ok(text)
    }

    #[cfg(feature = "pdf-extract")]
    fn fallback_text(&self, page: u32) -> Option<String> {
        let pages = self.fallback.get_or_init(|| {
            match pdf_extract::extract_text_from_mem_by_pages(&self.bytes) {
                Ok(pages) => Some(pages),
                Err(e) => {
                    debug!("pdf-extract could not read {}: {}", self.path.display(), e);
                    None
                }
            }
        });
        let index = self.pages.iter().position(|p| *p == page)?;
        pages
            .as_ref()?
            .get(index)
            .filter(|t| !t.trim().is_empty())
            .cloned()
    }

    /// True when the first page carries too little text to be a digital document.
    pub fn looks_scanned(&self) -> Result<bool> {
        let first = self.pages[0];
        let text = self.page_text(first).map_err(|e| {
            tracing::error!("Could not read first page of {}: {}", self.path.display(), e);
            Error::corrupted(&self.path, "Could not read PDF content")
        })?;
        Ok(text.trim().chars().count() < SCANNED_TEXT_THRESHOLD)
    }
}

/// Walk every page, splitting lines into sections at detected headers.
pub fn extract_native(pdf: &PdfDocument, max_section_chars: usize) -> Result<ExtractionPayload> {
    let name = pdf
        .path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let total = pdf.page_count();
    info!("Processing {} ({} pages)...", name, total);

    let mut acc = SectionAccumulator::new(DEFAULT_SECTION);
    let mut failed_pages = Vec::new();
    let mut processed = 0usize;
    let progress_interval = (total / 10).max(1);

    for (i, &page) in pdf.page_numbers().iter().enumerate() {
        let text = match pdf.page_text(page) {
            Ok(text) => text,
            Err(e) => {
                warn!("Could not load page {} in {}: {}", page, name, e);
                failed_pages.push(page as usize);
                continue;
            }
        };
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if is_pdf_header(line) {
                acc.start_section(line, Some(page));
            } else {
                acc.push_line(line, Some(page));
            }
        }
        processed += 1;
        if (i + 1) % progress_interval == 0 {
            debug!("Processed {}/{} pages", i + 1, total);
        }
    }

    if !failed_pages.is_empty() {
        warn!("Failed to extract {} pages: {:?}", failed_pages.len(), failed_pages);
    }
    if processed == 0 {
        tracing::error!("No pages successfully extracted from {}", name);
        return Err(Error::corrupted(pdf.path(), "No pages could be extracted"));
    }
    info!("Successfully extracted {}/{} pages", processed, total);

    let section_count = acc.section_count();
    let segments = acc.finish(max_section_chars);
    let total_chars = segments.iter().map(|s| s.text.chars().count()).sum();
    Ok(ExtractionPayload {
        segments,
        tables: Vec::new(),
        metadata: ExtractionMetadata {
            extraction_method: ExtractionMethod::Native,
            page_count: Some(total),
            pages_processed: Some(processed),
            failed_pages,
            section_count: Some(section_count),
            total_chars: Some(total_chars),
            ..Default::default()
        },
    })
}

/// Tables found in the text layer of the first `page_limit` pages.
pub fn detect_native_tables(pdf: &PdfDocument, page_limit: usize) -> Vec<TableData> {
    let mut found = Vec::new();
    for &page in pdf.page_numbers().iter().take(page_limit) {
        match pdf.page_text(page) {
            Ok(text) => {
                if let Some(table) = tables::detect_table(&text, page) {
                    debug!(
                        "Found table on page {}: {} rows, {} cols",
                        page,
                        table.rows.len() + 1,
                        table.column_count()
                    );
                    found.push(table);
                }
            }
            Err(e) => warn!("Error extracting tables from page {}: {}", page, e),
        }
    }
    found
}


#[cfg(test)]
mod tests {
    use super::fixtures::make_pdf;
    use super::*;
    use tempfile::TempDir;

    fn write_pdf(dir: &TempDir, name: &str, pages: &[&[&str]]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, make_pdf(pages)).unwrap();
        path
    }

    #[test]
    fn test_native_sections_by_header() {
        let dir = TempDir::new().unwrap();
        let path = write_pdf(
            &dir,
            "proposal.pdf",
            &[
                &[
                    "Ring Road Rehabilitation Proposal for the Municipality",
                    "EXECUTIVE SUMMARY",
                    "The works cover twelve kilometres of carriageway.",
                ],
                &["1. Scope of services", "Design review and site supervision."],
            ],
        );
        let pdf = PdfDocument::open(&path).unwrap();
        assert_eq!(pdf.page_count(), 2);
        assert!(!pdf.looks_scanned().unwrap());

        let payload = extract_native(&pdf, 50_000).unwrap();
        let titles: Vec<_> = payload.segments.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Content", "EXECUTIVE SUMMARY", "1. Scope of services"]);
        assert!(payload.segments[1].text.contains("twelve kilometres"));
        assert_eq!(payload.segments[2].page_start, Some(2));
        assert_eq!(payload.metadata.pages_processed, Some(2));
        assert_eq!(payload.metadata.section_count, Some(3));
        assert!(payload.metadata.failed_pages.is_empty());
    }

    #[test]
    fn test_sparse_first_page_is_scanned() {
        let dir = TempDir::new().unwrap();
        let path = write_pdf(&dir, "scan.pdf", &[&["p. 1"]]);
        let pdf = PdfDocument::open(&path).unwrap();
        assert!(pdf.looks_scanned().unwrap());
    }

    #[test]
    fn test_garbage_file_is_corrupted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"this is not a pdf").unwrap();
        match PdfDocument::open(&path) {
            Err(Error::CorruptedFile { details, .. }) => {
                assert!(details.starts_with("Could not open PDF file"))
            }
            other => panic!("expected corrupted file, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            PdfDocument::open(&dir.path().join("gone.pdf")),
            Err(Error::FileNotFound(_))
        ));
    }

    #[test]
    fn test_native_table_detection() {
        let dir = TempDir::new().unwrap();
        let path = write_pdf(
            &dir,
            "boq.pdf",
            &[&[
                "BILL OF QUANTITIES FOR DRAINAGE",
                "Item    Unit    Qty",
                "Excavation    m3    120",
                "Concrete    m3    40",
                "Rebar    t    3",
            ]],
        );
        let pdf = PdfDocument::open(&path).unwrap();
        let found = detect_native_tables(&pdf, 10);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].headers, vec!["Item", "Unit", "Qty"]);
        assert_eq!(found[0].page_number, Some(1));
    }
}
