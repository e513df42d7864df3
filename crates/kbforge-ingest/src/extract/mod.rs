//! Text extraction from PDF and DOCX files.
//!
//! Digital PDFs are read from their text layer; PDFs whose first page has
//! almost no text are rasterized and OCR'd. DOCX files are read straight from
//! the archive. Every path yields an [`ExtractionPayload`] or a typed error.

pub mod docx;
pub mod ocr;
pub mod pdf;
pub mod tables;

use std::path::Path;

use tracing::{info, warn};

use kbforge_core::config::{MAX_PAGES_FOR_TABLE_EXTRACTION, MAX_SECTION_CHARS};
use kbforge_core::{Error, KbConfig, OcrCapability, Result};
use kbforge_store::{ExtractionMetadata, Segments, TableData};

use crate::file::FileType;
use crate::segment::Segment;
pub use ocr::{OcrEngine, OcrPipeline, PageRasterizer, PdftoppmRasterizer, TesseractEngine};

/// Everything extracted from one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionPayload {
    /// Titled segments in document order.
    pub segments: Vec<Segment>,
    pub tables: Vec<TableData>,
    pub metadata: ExtractionMetadata,
}

impl ExtractionPayload {
    /// Segments keyed by title in document order, as stored in the knowledge base.
    pub fn segment_map(&self) -> Segments {
        self.segments
            .iter()
            .map(|s| (s.title.clone(), s.text.clone()))
            .collect()
    }
}

/// Dispatches files to the PDF, OCR and DOCX readers.
#[derive(Debug)]
pub struct TextExtractor {
    ocr: Option<OcrPipeline>,
    max_section_chars: usize,
    table_page_limit: usize,
}

impl TextExtractor {
    /// Extractor using the discovered engine, if any, with default languages.
    pub fn new(capability: &OcrCapability) -> Self {
        Self::build(OcrPipeline::from_capability(capability, None))
    }

    /// Extractor honouring the configured OCR language override.
    pub fn from_config(config: &KbConfig, capability: &OcrCapability) -> Self {
        Self::build(OcrPipeline::from_capability(
            capability,
            config.ocr_languages.as_deref(),
        ))
    }

    /// Extractor that records scanned PDFs as failures.
    pub fn without_ocr() -> Self {
        Self::build(None)
    }

    /// Use `pipeline` for scanned PDFs and OCR table detection.
    pub fn with_ocr(mut self, pipeline: OcrPipeline) -> Self {
        self.ocr = Some(pipeline);
        self
    }

    fn build(ocr: Option<OcrPipeline>) -> Self {
        Self {
            ocr,
            max_section_chars: MAX_SECTION_CHARS,
            table_page_limit: MAX_PAGES_FOR_TABLE_EXTRACTION,
        }
    }

    pub fn ocr_available(&self) -> bool {
        self.ocr.is_some()
    }

    pub fn extract(&self, path: &Path, file_type: FileType) -> Result<ExtractionPayload> {
        match file_type {
            FileType::Pdf => self.extract_pdf(path),
            FileType::Docx => docx::extract_docx(path, self.max_section_chars),
        }
    }

    fn extract_pdf(&self, path: &Path) -> Result<ExtractionPayload> {
        let doc = pdf::PdfDocument::open(path)?;
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();

        let mut payload = if doc.looks_scanned()? {
            info!("{} appears to be scanned. Using OCR.", name);
            match &self.ocr {
                Some(ocr) => ocr.ocr_pdf(path, doc.page_count())?,
                None => {
                    warn!("OCR disabled, cannot process scanned PDF: {}", name);
                    return Err(Error::OcrEngineUnavailable(
                        "OCR not available - cannot extract text from scanned PDF".to_string(),
                    ));
                }
            }
        } else {
            pdf::extract_native(&doc, self.max_section_chars)?
        };

        payload.tables = pdf::detect_native_tables(&doc, self.table_page_limit);
        if payload.tables.is_empty() {
            if let Some(ocr) = &self.ocr {
                info!("Falling back to OCR-based table detection for {}...", name);
                payload.tables = ocr.detect_tables(path, doc.page_count(), self.table_page_limit);
            }
        }
        info!("Extracted {} tables from {}", payload.tables.len(), name);
        payload.metadata.table_count = Some(payload.tables.len());
        Ok(payload)
    }

    /// OCR a table image into a table; `None` when no text was read.
    pub fn extract_table_from_image(&self, image: &Path) -> Result<Option<TableData>> {
        match &self.ocr {
            Some(ocr) => ocr.extract_table_from_image(image),
            None => Err(Error::OcrEngineUnavailable("OCR not available".to_string())),
        }
    }
}
