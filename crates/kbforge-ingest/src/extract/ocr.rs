//! OCR for scanned PDFs: page rasterization plus the external OCR engine.
//!
//! Both sides sit behind traits so the pipeline can be driven by mocks in
//! tests. Pages are rendered into a [`TempDir`] that is removed when the
//! call returns, whatever the outcome.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;
use tracing::{debug, info, warn};

use kbforge_core::capabilities::is_executable_file;
use kbforge_core::config::MAX_OCR_CHARS;
use kbforge_core::{Error, OcrCapability, Result};
use kbforge_store::{ExtractionMetadata, ExtractionMethod, TableData};

use super::tables;
use super::ExtractionPayload;
use crate::quality;
use crate::segment::{Segment, OCR_SEGMENT_TITLE};

/// Page segmentation modes tried per page: uniform block, automatic, automatic with OSD.
pub const PSM_MODES: [u8; 3] = [6, 3, 1];
/// PSM used for table scanning.
pub const TABLE_PSM: u8 = 6;
/// Rendered pages this small in either dimension are skipped.
const MIN_PAGE_DIMENSION: u32 = 10;
/// Total OCR output below this many trimmed chars is rejected before scoring.
const MIN_OCR_CHARS: usize = 10;
/// Rasterization resolution.
pub const DEFAULT_RENDER_DPI: u32 = 200;

pub const PDFTOPPM_PATH_ENV: &str = "PDFTOPPM_PATH";

/// Recognizes text in an image file.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image: &Path, psm: u8) -> Result<String>;
}

/// Renders one PDF page (1-based) to an image inside `out_dir`.
pub trait PageRasterizer: Send + Sync {
    fn render_page(&self, pdf: &Path, page: u32, out_dir: &Path) -> Result<PathBuf>;
}

/// The `tesseract` command-line engine.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: PathBuf,
    languages: String,
}

impl TesseractEngine {
    pub fn new(binary: impl Into<PathBuf>, languages: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            languages: languages.into(),
        }
    }

    /// Engine for a discovered capability. `languages` overrides the
    /// capability's own language choice.
    pub fn from_capability(capability: &OcrCapability, languages: Option<&str>) -> Option<Self> {
        if !capability.available {
            return None;
        }
        let binary = capability.binary.clone()?;
        let languages = languages
            .map(String::from)
            .unwrap_or_else(|| capability.language_arg());
        Some(Self::new(binary, languages))
    }
}

impl OcrEngine for TesseractEngine {
    fn recognize(&self, image: &Path, psm: u8) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg(image)
            .arg("stdout")
            .args(["-l", &self.languages, "--oem", "3", "--psm"])
            .arg(psm.to_string())
            .output()
            .map_err(|e| {
                Error::OcrEngineUnavailable(format!("{}: {}", self.binary.display(), e))
            })?;
        if !output.status.success() {
            return Err(Error::Internal(format!(
                "tesseract exited with {} on {}: {}",
                output.status,
                image.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Page rendering through poppler's `pdftoppm`.
#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    binary: PathBuf,
    dpi: u32,
}

impl PdftoppmRasterizer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            dpi: DEFAULT_RENDER_DPI,
        }
    }

    /// `PDFTOPPM_PATH`, else `pdftoppm` on `PATH`.
    pub fn discover() -> Option<Self> {
        let env_override = std::env::var_os(PDFTOPPM_PATH_ENV).map(PathBuf::from);
        let name = if cfg!(windows) { "pdftoppm.exe" } else { "pdftoppm" };
        let on_path = std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).map(|p| p.join(name)).collect::<Vec<_>>())
            .unwrap_or_default();
        let found = env_override
            .into_iter()
            .chain(on_path)
            .find(|p| is_executable_file(p));
        match found {
            Some(binary) => {
                debug!("Rasterizer found at {}", binary.display());
                Some(Self::new(binary))
            }
            None => {
                warn!("pdftoppm not found, scanned PDFs cannot be rasterized");
                None
            }
        }
    }
}

impl PageRasterizer for PdftoppmRasterizer {
    fn render_page(&self, pdf: &Path, page: u32, out_dir: &Path) -> Result<PathBuf> {
        let stem = out_dir.join(format!("page-{}", page));
        let page_arg = page.to_string();
        let output = Command::new(&self.binary)
            .args(["-f", &page_arg, "-l", &page_arg, "-r"])
            .arg(self.dpi.to_string())
            .args(["-png", "-singlefile"])
            .arg(pdf)
            .arg(&stem)
            .output()
            .map_err(|e| {
                Error::OcrEngineUnavailable(format!("{}: {}", self.binary.display(), e))
            })?;
        if !output.status.success() {
            return Err(Error::Internal(format!(
                "pdftoppm failed on page {}: {}",
                page,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let image = stem.with_extension("png");
        if !image.is_file() {
            return Err(Error::Internal(format!("pdftoppm produced no image for page {}", page)));
        }
        Ok(image)
    }
}

/// An engine paired with a rasterizer. Calls run one engine process at a time.
pub struct OcrPipeline {
    engine: Box<dyn OcrEngine>,
    rasterizer: Box<dyn PageRasterizer>,
}

impl std::fmt::Debug for OcrPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcrPipeline").finish_non_exhaustive()
    }
}

impl OcrPipeline {
    pub fn new(engine: impl OcrEngine + 'static, rasterizer: impl PageRasterizer + 'static) -> Self {
        Self {
            engine: Box::new(engine),
            rasterizer: Box::new(rasterizer),
        }
    }

    /// Tesseract plus pdftoppm, when both are present.
    pub fn from_capability(capability: &OcrCapability, languages: Option<&str>) -> Option<Self> {
        let engine = TesseractEngine::from_capability(capability, languages)?;
        let rasterizer = PdftoppmRasterizer::discover()?;
        Some(Self::new(engine, rasterizer))
    }

    /// OCR one image with every mode in [`PSM_MODES`]; the longest trimmed
    /// output wins. Length stands in for engine confidence.
    pub fn best_text(&self, image: &Path, page: u32) -> String {
        let mut best = String::new();
        for (attempt, psm) in PSM_MODES.iter().enumerate() {
            match self.engine.recognize(image, *psm) {
                Ok(text) => {
                    if attempt > 0 {
                        debug!("OCR retry {} for page {} with PSM {}", attempt + 1, page, psm);
                    }
                    if text.trim().chars().count() > best.trim().chars().count() {
                        best = text;
                    }
                }
                Err(e) => warn!("OCR attempt {} failed for page {}: {}", attempt + 1, page, e),
            }
        }
        best
    }

    /// Render a page and check it is big enough to be worth reading.
    fn render_checked(&self, pdf: &Path, page: u32, dir: &Path) -> Result<Option<PathBuf>> {
        let image = self.rasterizer.render_page(pdf, page, dir)?;
        let (width, height) = image::image_dimensions(&image).map_err(|e| {
            Error::Internal(format!("page {} did not render to a readable image: {}", page, e))
        })?;
        if width <= MIN_PAGE_DIMENSION || height <= MIN_PAGE_DIMENSION {
            warn!("Page {} has suspiciously small dimensions: {}x{}", page, width, height);
            return Ok(None);
        }
        Ok(Some(image))
    }

    /// Text of a scanned PDF with `page_count` pages, gated on quality.
    pub fn ocr_pdf(&self, pdf: &Path, page_count: usize) -> Result<ExtractionPayload> {
        let name = pdf.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        info!("Running OCR on {}...", name);
        let scratch = TempDir::new()?;

        let mut text = String::new();
        let mut failed_pages = Vec::new();
        let mut pages_with_text = 0;
        for page in 1..=page_count as u32 {
            match self.render_checked(pdf, page, scratch.path()) {
                Ok(Some(image)) => {
                    let page_text = self.best_text(&image, page);
                    if !page_text.trim().is_empty() {
                        pages_with_text += 1;
                    }
                    text.push_str(&format!("\n\n--- Page {} ---\n\n", page));
                    text.push_str(&page_text);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("OCR failed on page {}: {}", page, e);
                    failed_pages.push(page as usize);
                }
            }
        }

        let trimmed = text.trim().chars().count();
        if trimmed < MIN_OCR_CHARS {
            warn!("OCR produced minimal output for {}", name);
            return Err(Error::OcrQualityGateFailed {
                score: 0,
                issues: vec![format!(
                    "OCR produced insufficient text content ({} chars, minimum {})",
                    trimmed, MIN_OCR_CHARS
                )],
            });
        }

        let report = quality::evaluate(&text);
        if !report.is_valid {
            tracing::error!(
                "OCR quality gate FAILED for {} - quality_score={}%, issues={}",
                name,
                report.score,
                report.issues.len()
            );
            return Err(Error::OcrQualityGateFailed {
                score: report.score,
                issues: report.issues,
            });
        }

        let total_chars = text.chars().count();
        let kept: String = text.chars().take(MAX_OCR_CHARS).collect();
        info!("OCR extraction completed with quality score {}% for {}", report.score, name);
        Ok(ExtractionPayload {
            segments: vec![Segment {
                title: OCR_SEGMENT_TITLE.to_string(),
                text: kept,
                page_start: Some(1),
                page_end: Some(page_count as u32),
            }],
            tables: Vec::new(),
            metadata: ExtractionMetadata {
                extraction_method: ExtractionMethod::Ocr,
                page_count: Some(page_count),
                pages_processed: Some(pages_with_text),
                failed_pages,
                quality_score: Some(report.score),
                quality_issues: report.issues,
                total_chars: Some(total_chars),
                ..Default::default()
            },
        })
    }

    /// Table scan of the first `page_limit` pages with a single PSM pass.
    /// Failures are logged and yield no tables.
    pub fn detect_tables(&self, pdf: &Path, page_count: usize, page_limit: usize) -> Vec<TableData> {
        let scratch = match TempDir::new() {
            Ok(dir) => dir,
            Err(e) => {
                tracing::error!("OCR table detection failed for {}: {}", pdf.display(), e);
                return Vec::new();
            }
        };

        let mut found = Vec::new();
        for page in 1..=page_count.min(page_limit) as u32 {
            let text = self
                .render_checked(pdf, page, scratch.path())
                .and_then(|image| match image {
                    Some(image) => self.engine.recognize(&image, TABLE_PSM),
                    None => Ok(String::new()),
                });
            match text {
                Ok(text) if !text.trim().is_empty() => {
                    if let Some(table) = tables::detect_table(&text, page) {
                        found.push(table.with_caption("ocr_fallback"));
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("OCR failed on page {}: {}", page, e),
            }
        }
        info!("Found {} tables via OCR fallback", found.len());
        found
    }

    /// OCR an image of a table; lines split on tabs, first line as header.
    pub fn extract_table_from_image(&self, image: &Path) -> Result<Option<TableData>> {
        if !image.is_file() {
            return Err(Error::FileNotFound(image.to_path_buf()));
        }
        let text = self.engine.recognize(image, PSM_MODES[0])?;
        Ok(tables::table_from_image_text(&text))
    }
}
