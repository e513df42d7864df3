//! kbforge ingest: file validation, PDF/DOCX/OCR extraction, segmentation,
//! chunking and the batch ingestion driver.

pub mod chunking;
pub mod document;
pub mod extract;
pub mod file;
pub mod ingest;
pub mod quality;
pub mod segment;

pub use chunking::Chunker;
pub use document::{DocumentType, IndexedChunk, Language, ParsedDocument, SectionType};
pub use extract::{ExtractionPayload, OcrPipeline, TextExtractor};
pub use file::{validate_path, FileType};
pub use ingest::{document_from_entry, Ingester, ProcessingMode, RunReport};
pub use segment::Segmenter;
