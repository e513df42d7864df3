//! Batch driver: input folders → validation → dedup → extraction → knowledge base.
//!
//! Files are processed one at a time. A failure in one file becomes a failure
//! entry and never stops the batch; only store and ledger faults abort a run.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::document::{DocumentType, ParsedDocument};
use crate::extract::{ExtractionPayload, TextExtractor};
use crate::file::{list_documents, validate_path, FileType};
use crate::segment::{Segment, Segmenter};
use kbforge_core::{InputFolder, KbConfig, Result};
use kbforge_store::knowledge::sanitize_entry;
use kbforge_store::{
    hash_file, merge, short_hash, DuplicateTracker, KnowledgeBase, KnowledgeBaseEntry,
    KnowledgeStore,
};

/// Which files a run looks at and whether the ledger may skip them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingMode {
    /// Skip files whose content hash is already recorded.
    Incremental,
    /// Process everything; hashes are still recorded.
    ForceReprocess,
    /// Only the listed files, with duplicate checks.
    Selective(Vec<PathBuf>),
}

impl ProcessingMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::ForceReprocess => "full-reprocess",
            Self::Selective(_) => "selective",
        }
    }
}

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub mode: String,
    /// Candidate files considered.
    pub found: usize,
    /// Skipped as already processed.
    pub skipped: usize,
    /// Extracted successfully.
    pub processed: usize,
    /// Recorded as failure entries.
    pub errors: usize,
    /// Entries in the store after the merge.
    pub total_entries: usize,
}

/// Runs ingestion batches against one data directory.
pub struct Ingester<'a> {
    config: &'a KbConfig,
    tracker: &'a DuplicateTracker,
    extractor: &'a TextExtractor,
    store: KnowledgeStore,
    segmenter: Segmenter,
}

impl<'a> Ingester<'a> {
    pub fn new(config: &'a KbConfig, tracker: &'a DuplicateTracker, extractor: &'a TextExtractor) -> Self {
        Self {
            config,
            tracker,
            extractor,
            store: KnowledgeStore::from_paths(&config.data_paths),
            segmenter: Segmenter::default(),
        }
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    /// Process the input folders, merge into the stored knowledge base and save it.
    pub fn run(&self, mode: &ProcessingMode) -> Result<RunReport> {
        let existing = self.store.load()?;
        info!("Loaded existing knowledge base with {} documents", existing.len());

        let (fresh, mut report) = self.process_against(&existing, mode)?;
        let preserved = existing
            .entries
            .keys()
            .filter(|id| !fresh.entries.contains_key(*id))
            .count();
        if preserved > 0 {
            info!("Preserved {} existing documents during {} processing", preserved, mode);
        }

        let merged = merge(&existing, fresh);
        self.store.save(&merged)?;
        report.total_entries = merged.len();
        info!("Total documents in knowledge base: {}", report.total_entries);
        Ok(report)
    }

    /// Process the input folders into a fresh knowledge base without writing the store.
    pub fn process(&self, mode: &ProcessingMode) -> Result<(KnowledgeBase, RunReport)> {
        let existing = self.store.load()?;
        self.process_against(&existing, mode)
    }

    /// Ids already held in `existing` by other files are never reused.
    fn process_against(
        &self,
        existing: &KnowledgeBase,
        mode: &ProcessingMode,
    ) -> Result<(KnowledgeBase, RunReport)> {
        let mut kb = KnowledgeBase::default();
        let mut report = RunReport {
            mode: mode.to_string(),
            ..Default::default()
        };
        let selected = match mode {
            ProcessingMode::Selective(files) => Some(Selection::new(files)),
            _ => None,
        };
        let mut ids = IdAllocator::new(existing);

        for folder in &self.config.folders {
            info!("Processing {} folder...", folder.category);
            if !folder.path.is_dir() {
                error!("Folder not found: {}", folder.path.display());
                continue;
            }
            let files = list_documents(&folder.path)?;
            for (idx, path) in files.iter().enumerate() {
                if let Some(selection) = &selected {
                    if !selection.contains(path) {
                        continue;
                    }
                }
                report.found += 1;
                let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
                info!("[{}/{}] Processing: {}", idx + 1, files.len(), name);

                match self.process_file(folder, path, mode, &mut ids)? {
                    FileOutcome::Skipped => report.skipped += 1,
                    FileOutcome::Stored(id, entry) => {
                        if entry.is_failure() {
                            report.errors += 1;
                        } else {
                            report.processed += 1;
                        }
                        kb.insert(id, entry);
                    }
                }
            }
        }

        info!(
            "Processing Summary: found={} skipped={} processed={} errors={}",
            report.found, report.skipped, report.processed, report.errors
        );
        Ok((kb, report))
    }

    fn process_file(
        &self,
        folder: &InputFolder,
        path: &Path,
        mode: &ProcessingMode,
        ids: &mut IdAllocator<'_>,
    ) -> Result<FileOutcome> {
        let path_str = path.display().to_string();
        let file_type = FileType::from_path(path)?;
        let format = file_type.format();
        let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
        let base_id = format!("{}_{}", folder.category, stem);

        let resolved = match validate_path(path, &folder.path, self.config.max_file_size) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("  [ERROR] {}", e);
                let entry = KnowledgeBaseEntry::failure(&path_str, &folder.category, format, e.to_string());
                return Ok(FileOutcome::Stored(ids.assign(&base_id, &path_str, None), entry));
            }
        };

        let hash = match hash_file(&resolved) {
            Ok(hash) => hash,
            Err(e) => {
                warn!("  [ERROR] Could not hash {}: {}", path_str, e);
                let entry = KnowledgeBaseEntry::failure(&path_str, &folder.category, format, e.to_string());
                return Ok(FileOutcome::Stored(ids.assign(&base_id, &path_str, None), entry));
            }
        };

        if *mode != ProcessingMode::ForceReprocess && self.tracker.is_duplicate(&path_str, &hash) {
            warn!("  Skipping previously processed file (hash: {}...)", short_hash(&hash));
            return Ok(FileOutcome::Skipped);
        }

        let doc_id = ids.assign(&base_id, &path_str, Some(short_hash(&hash)));

        let entry = match self.extractor.extract(&resolved, file_type) {
            Ok(payload) => {
                let mut entry = KnowledgeBaseEntry::success(
                    &path_str,
                    &folder.category,
                    format,
                    payload.segment_map(),
                    payload.tables,
                    payload.metadata,
                );
                sanitize_entry(&mut entry);
                info!("  [OK] Successfully processed ({} segments)", entry.segment_count());
                entry
            }
            Err(e) => {
                error!("  [ERROR] Error processing {}: {}", path_str, e);
                KnowledgeBaseEntry::failure(&path_str, &folder.category, format, e.to_string())
            }
        };

        if let Err(e) = self.tracker.record_processed(&path_str, &hash) {
            error!("  Could not record {} in the duplicate tracker: {}", path_str, e);
        }
        Ok(FileOutcome::Stored(doc_id, entry))
    }

    /// Extract and segment one file for chunking, bypassing the ledger.
    pub fn parse_file(&self, path: &Path, document_id: &str) -> Result<ParsedDocument> {
        let file_type = FileType::from_path(path)?;
        let payload = self.extractor.extract(path, file_type)?;
        let filename = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        Ok(self
            .segmenter
            .segment(&payload, document_id, &filename, document_type(file_type)))
    }
}

enum FileOutcome {
    Skipped,
    Stored(String, KnowledgeBaseEntry),
}

/// Hands out `{category}_{stem}` document ids.
///
/// A file keeps the id it was stored under before. An id held by a different
/// file, in the store or earlier in this run, is never handed out again; the
/// newcomer gets `{base}_{short hash}` instead, or `{base}_{n}` when the file
/// could not be hashed.
struct IdAllocator<'e> {
    existing: &'e KnowledgeBase,
    /// id → file path, for ids handed out in this run.
    claimed: HashMap<String, String>,
}

impl<'e> IdAllocator<'e> {
    fn new(existing: &'e KnowledgeBase) -> Self {
        Self {
            existing,
            claimed: HashMap::new(),
        }
    }

    fn is_free_for(&self, id: &str, path: &str) -> bool {
        self.claimed.get(id).map_or(true, |p| p == path)
            && self.existing.get(id).map_or(true, |e| e.file_path == path)
    }

    /// Id this file was stored under before, if it is still its own.
    fn previous(&self, base: &str, path: &str) -> Option<String> {
        let prefix = format!("{}_", base);
        self.existing
            .entries
            .iter()
            .filter(|(_, e)| e.file_path == path)
            .map(|(id, _)| id)
            .find(|id| {
                id.as_str() == base
                    || id
                        .strip_prefix(&prefix)
                        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric()))
            })
            .filter(|id| self.is_free_for(id, path))
            .cloned()
    }

    fn assign(&mut self, base: &str, path: &str, hash: Option<&str>) -> String {
        let id = match self.previous(base, path) {
            Some(id) => id,
            None if self.is_free_for(base, path) => base.to_string(),
            None => {
                let unique = match hash.map(|h| format!("{}_{}", base, h)) {
                    Some(id) if self.is_free_for(&id, path) => id,
                    _ => (2..)
                        .map(|n| format!("{}_{}", base, n))
                        .find(|id| self.is_free_for(id, path))
                        .unwrap_or_else(|| base.to_string()),
                };
                warn!("  Document id {} belongs to another file, storing as {}", base, unique);
                unique
            }
        };
        self.claimed.insert(id.clone(), path.to_string());
        id
    }
}

fn document_type(file_type: FileType) -> DocumentType {
    match file_type {
        FileType::Pdf => DocumentType::Pdf,
        FileType::Docx => DocumentType::Docx,
    }
}

/// Rebuild a [`ParsedDocument`] from a stored entry so it can be chunked.
/// Failure entries have nothing to chunk.
pub fn document_from_entry(document_id: &str, entry: &KnowledgeBaseEntry) -> Option<ParsedDocument> {
    let segments = entry.segments.as_ref()?;
    let file_type = FileType::from_extension(entry.format.trim_start_matches('.'))?;
    let payload = ExtractionPayload {
        segments: segments
            .iter()
            .map(|(title, text)| Segment {
                title: title.clone(),
                text: text.clone(),
                page_start: None,
                page_end: None,
            })
            .collect(),
        tables: entry.tables.clone(),
        metadata: entry.metadata.clone(),
    };
    let filename = Path::new(&entry.file_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| entry.file_path.clone());
    debug!("Rebuilding {} from {} stored segments", document_id, segments.len());
    Some(Segmenter::default().segment(&payload, document_id, &filename, document_type(file_type)))
}

/// Files named on the command line, matched by path or resolved path.
struct Selection {
    raw: HashSet<PathBuf>,
    resolved: HashSet<PathBuf>,
}

impl Selection {
    fn new(files: &[PathBuf]) -> Self {
        Self {
            raw: files.iter().cloned().collect(),
            resolved: files.iter().filter_map(|f| f.canonicalize().ok()).collect(),
        }
    }

    fn contains(&self, path: &Path) -> bool {
        self.raw.contains(path)
            || path
                .canonicalize()
                .map(|p| self.resolved.contains(&p))
                .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::docx::fixtures::{make_docx, para, styled, table};
    use crate::extract::pdf::fixtures::make_pdf;
    use kbforge_core::Error;
    use tempfile::TempDir;

    struct Env {
        _dir: TempDir,
        config: KbConfig,
        tracker: DuplicateTracker,
        extractor: TextExtractor,
    }

    fn env() -> Env {
        let dir = TempDir::new().unwrap();
        let config = KbConfig::from_env(dir.path()).unwrap();
        for folder in &config.folders {
            std::fs::create_dir_all(&folder.path).unwrap();
        }
        let tracker = DuplicateTracker::open(&config.data_paths.tracker_db).unwrap();
        Env {
            _dir: dir,
            config,
            tracker,
            extractor: TextExtractor::without_ocr(),
        }
    }

    fn proposal_docx() -> Vec<u8> {
        let body = [
            styled("Heading1", "Executive Summary"),
            para("We propose to design the northern bypass in two phases."),
            table(&[&["Phase", "Months"], &["Design", "6"], &["Tender", "3"]]),
        ]
        .concat();
        make_docx(&body)
    }

    #[test]
    fn test_incremental_run_then_skip() {
        let env = env();
        let proposals = &env.config.folders[0].path;
        std::fs::write(proposals.join("bypass.docx"), proposal_docx()).unwrap();

        let ingester = Ingester::new(&env.config, &env.tracker, &env.extractor);
        let report = ingester.run(&ProcessingMode::Incremental).unwrap();
        assert_eq!((report.found, report.processed, report.errors), (1, 1, 0));
        assert_eq!(report.total_entries, 1);

        let kb = ingester.store().load().unwrap();
        let entry = kb.get("proposals_bypass").unwrap();
        assert_eq!(entry.format, ".docx");
        assert_eq!(entry.category, "proposals");
        assert_eq!(entry.tables.len(), 1);
        assert!(entry.segments.as_ref().unwrap().contains_key("Executive Summary"));

        let again = ingester.run(&ProcessingMode::Incremental).unwrap();
        assert_eq!((again.found, again.skipped, again.processed), (1, 1, 0));
        // The skipped file's entry is carried forward by the merge.
        assert_eq!(again.total_entries, 1);
    }

    #[test]
    fn test_force_reprocess_ignores_ledger() {
        let env = env();
        std::fs::write(env.config.folders[0].path.join("bypass.docx"), proposal_docx()).unwrap();
        let ingester = Ingester::new(&env.config, &env.tracker, &env.extractor);
        ingester.run(&ProcessingMode::Incremental).unwrap();

        let report = ingester.run(&ProcessingMode::ForceReprocess).unwrap();
        assert_eq!((report.skipped, report.processed), (0, 1));
        assert_eq!(report.mode, "full-reprocess");
        assert_eq!(env.tracker.count().unwrap(), 1);
    }

    #[test]
    fn test_failures_are_entries_and_tracked() {
        let env = env();
        let reports = &env.config.folders[1].path;
        std::fs::write(reports.join("scan.pdf"), make_pdf(&[&["7"]])).unwrap();
        std::fs::write(reports.join("broken.docx"), b"not a zip").unwrap();

        let ingester = Ingester::new(&env.config, &env.tracker, &env.extractor);
        let report = ingester.run(&ProcessingMode::Incremental).unwrap();
        assert_eq!((report.found, report.processed, report.errors), (2, 0, 2));

        let kb = ingester.store().load().unwrap();
        let scan = kb.get("reports_scan").unwrap();
        assert!(scan.error.as_deref().unwrap().contains("OCR"));
        assert!(kb.get("reports_broken").unwrap().is_failure());
        assert_eq!(env.tracker.count().unwrap(), 2);
    }

    #[test]
    fn test_oversized_file_is_not_tracked() {
        let mut env = env();
        env.config.max_file_size = 16;
        std::fs::write(env.config.folders[0].path.join("big.docx"), proposal_docx()).unwrap();

        let ingester = Ingester::new(&env.config, &env.tracker, &env.extractor);
        let (kb, report) = ingester.process(&ProcessingMode::Incremental).unwrap();
        assert_eq!(report.errors, 1);
        assert!(kb.get("proposals_big").unwrap().error.as_deref().unwrap().contains("file too large"));
        assert_eq!(env.tracker.count().unwrap(), 0);
    }

    #[test]
    fn test_selective_mode() {
        let env = env();
        let proposals = &env.config.folders[0].path;
        std::fs::write(proposals.join("a.docx"), proposal_docx()).unwrap();
        let b = [para("Second proposal for the harbour access road works.")].concat();
        std::fs::write(proposals.join("b.docx"), make_docx(&b)).unwrap();

        let ingester = Ingester::new(&env.config, &env.tracker, &env.extractor);
        let mode = ProcessingMode::Selective(vec![proposals.join("b.docx")]);
        let (kb, report) = ingester.process(&mode).unwrap();
        assert_eq!(report.found, 1);
        assert!(kb.get("proposals_b").is_some());
        assert!(kb.get("proposals_a").is_none());
    }

    #[test]
    fn test_same_stem_in_one_folder_is_disambiguated() {
        let env = env();
        let proposals = &env.config.folders[0].path;
        std::fs::write(proposals.join("plan.docx"), proposal_docx()).unwrap();
        std::fs::write(proposals.join("plan.pdf"), make_pdf(&[&["3"]])).unwrap();

        let ingester = Ingester::new(&env.config, &env.tracker, &env.extractor);
        let (kb, _) = ingester.process(&ProcessingMode::Incremental).unwrap();
        assert_eq!(kb.len(), 2);
        assert!(kb.get("proposals_plan").is_some());
        assert!(kb.entries.keys().any(|k| k.starts_with("proposals_plan_") && k.len() == "proposals_plan_".len() + 8));
    }

    #[test]
    fn test_changed_file_keeps_its_id_across_runs() {
        let env = env();
        let proposals = &env.config.folders[0].path;
        let docx = proposals.join("plan.docx");
        let pdf = proposals.join("plan.pdf");
        std::fs::write(&docx, proposal_docx()).unwrap();
        std::fs::write(&pdf, make_pdf(&[&["3"]])).unwrap();

        let ingester = Ingester::new(&env.config, &env.tracker, &env.extractor);
        ingester.run(&ProcessingMode::Incremental).unwrap();
        let first = ingester.store().load().unwrap();
        let pdf_id = first
            .entries
            .iter()
            .find(|(_, e)| e.file_path == pdf.to_string_lossy())
            .map(|(id, _)| id.clone())
            .unwrap();
        assert_ne!(pdf_id, "proposals_plan");

        // Only the pdf changes; the docx is skipped and claims nothing this run.
        std::fs::write(&pdf, make_pdf(&[&["4"]])).unwrap();
        let report = ingester.run(&ProcessingMode::Incremental).unwrap();
        assert_eq!((report.skipped, report.errors), (1, 1));
        assert_eq!(report.total_entries, 2);

        let kb = ingester.store().load().unwrap();
        assert_eq!(kb.get("proposals_plan").unwrap().file_path, docx.to_string_lossy());
        assert_eq!(kb.get(&pdf_id).unwrap().file_path, pdf.to_string_lossy());
    }

    #[test]
    fn test_id_held_by_another_file_is_not_reused() {
        let env = env();
        let ingester = Ingester::new(&env.config, &env.tracker, &env.extractor);
        let mut existing = KnowledgeBase::default();
        existing.insert(
            "proposals_plan",
            KnowledgeBaseEntry::failure("/elsewhere/plan.docx", "proposals", ".docx", "gone"),
        );
        ingester.store().save(&existing).unwrap();

        let pdf = env.config.folders[0].path.join("plan.pdf");
        std::fs::write(&pdf, make_pdf(&[&["3"]])).unwrap();
        let (kb, _) = ingester.process(&ProcessingMode::Incremental).unwrap();
        let (id, _) = kb.entries.iter().next().unwrap();
        assert!(id.starts_with("proposals_plan_"));
        assert_eq!(id.len(), "proposals_plan_".len() + 8);
    }

    #[test]
    fn test_document_from_entry_chunks() {
        let env = env();
        std::fs::write(env.config.folders[0].path.join("bypass.docx"), proposal_docx()).unwrap();
        let ingester = Ingester::new(&env.config, &env.tracker, &env.extractor);
        ingester.run(&ProcessingMode::Incremental).unwrap();

        let kb = ingester.store().load().unwrap();
        let doc = document_from_entry("proposals_bypass", kb.get("proposals_bypass").unwrap()).unwrap();
        assert_eq!(doc.metadata.document_type, DocumentType::Docx);
        assert_eq!(doc.all_tables().count(), 1);
        let chunks = crate::chunking::Chunker::default().chunk(&doc);
        assert!(!chunks.is_empty());

        let failed = KnowledgeBaseEntry::failure("x.pdf", "reports", ".pdf", "boom");
        assert!(document_from_entry("reports_x", &failed).is_none());
    }

    #[test]
    fn test_parse_file_segments() {
        let env = env();
        let path = env.config.folders[0].path.join("bypass.docx");
        std::fs::write(&path, proposal_docx()).unwrap();
        let ingester = Ingester::new(&env.config, &env.tracker, &env.extractor);
        let doc = ingester.parse_file(&path, "proposals_bypass").unwrap();
        assert_eq!(doc.sections[0].title, "Executive Summary");

        assert!(matches!(
            ingester.parse_file(&path.with_extension("txt"), "x"),
            Err(Error::UnsupportedFormat { .. })
        ));
    }
}
