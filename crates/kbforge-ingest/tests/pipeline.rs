//! End-to-end: folders on disk → knowledge base file → snapshot/rollback → chunks.

use std::io::Write;
use std::path::Path;

use kbforge_core::{InputFolder, KbConfig};
use kbforge_ingest::{document_from_entry, Chunker, Ingester, ProcessingMode, TextExtractor};
use kbforge_store::{validate_consistency, DuplicateTracker, HealthStatus};
use tempfile::TempDir;

const NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

fn paragraph(style: Option<&str>, text: &str) -> String {
    let props = style
        .map(|s| format!("<w:pPr><w:pStyle w:val=\"{}\"/></w:pPr>", s))
        .unwrap_or_default();
    format!("<w:p>{}<w:r><w:t>{}</w:t></w:r></w:p>", props, text)
}

fn write_docx(path: &Path, paragraphs: &[String]) {
    let document = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><w:document xmlns:w=\"{NS}\"><w:body>{}</w:body></w:document>",
        paragraphs.concat()
    );
    let styles = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><w:styles xmlns:w=\"{NS}\">\
         <w:style w:type=\"paragraph\" w:styleId=\"Heading1\"><w:name w:val=\"heading 1\"/></w:style>\
         </w:styles>"
    );
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    zip.start_file("word/document.xml", options).unwrap();
    zip.write_all(document.as_bytes()).unwrap();
    zip.start_file("word/styles.xml", options).unwrap();
    zip.write_all(styles.as_bytes()).unwrap();
    std::fs::write(path, zip.finish().unwrap().into_inner()).unwrap();
}

fn setup() -> (TempDir, KbConfig) {
    let dir = TempDir::new().unwrap();
    let proposals = dir.path().join("in/proposals");
    let reports = dir.path().join("in/reports");
    std::fs::create_dir_all(&proposals).unwrap();
    std::fs::create_dir_all(&reports).unwrap();

    write_docx(
        &proposals.join("ring_road.docx"),
        &[
            paragraph(Some("Heading1"), "Scope of Work"),
            paragraph(None, "Topographic survey and geotechnical investigation of the ring road corridor."),
            paragraph(Some("Heading1"), "Methodology"),
            paragraph(None, "The design follows the national highway manual. Traffic counts are taken over seven days."),
        ],
    );
    write_docx(
        &reports.join("annual.docx"),
        &[paragraph(None, "Annual maintenance report covering culverts, signage and pavement repairs.")],
    );
    std::fs::write(reports.join("damaged.pdf"), b"%PDF-1.4 truncated").unwrap();

    let config = KbConfig::from_env(dir.path().join("data"))
        .unwrap()
        .with_folders(vec![
            InputFolder::new("proposals", proposals),
            InputFolder::new("reports", reports),
        ]);
    (dir, config)
}

#[test]
fn ingest_snapshot_rollback_and_chunk() {
    let (_dir, config) = setup();
    let tracker = DuplicateTracker::open(&config.data_paths.tracker_db).unwrap();
    let extractor = TextExtractor::without_ocr();
    let ingester = Ingester::new(&config, &tracker, &extractor);

    let report = ingester.run(&ProcessingMode::Incremental).unwrap();
    assert_eq!(report.found, 3);
    assert_eq!(report.processed, 2);
    assert_eq!(report.errors, 1);
    assert_eq!(report.total_entries, 3);

    let store = ingester.store();
    let kb = store.load().unwrap();
    let damaged = kb.get("reports_damaged").unwrap();
    assert!(damaged.error.as_deref().unwrap().starts_with("Corrupted file"));
    assert_eq!(validate_consistency(&tracker, &kb).status, HealthStatus::Healthy);

    let snapshot = store.snapshot(&kb).unwrap();
    assert_eq!(store.list_snapshots().unwrap().len(), 1);

    // A second run skips everything and keeps the stored entries.
    let again = ingester.run(&ProcessingMode::Incremental).unwrap();
    assert_eq!((again.skipped, again.processed, again.total_entries), (3, 0, 3));

    std::fs::write(store.path(), b"{\"broken\": ").unwrap();
    assert!(store.load().is_err());
    assert!(store.rollback(&snapshot));
    assert_eq!(store.load().unwrap().len(), 3);

    let entry = kb.get("proposals_ring_road").unwrap();
    let doc = document_from_entry("proposals_ring_road", entry).unwrap();
    let titles: Vec<_> = doc.sections.iter().map(|s| s.title.as_str()).collect();
    assert!(titles.contains(&"Scope of Work"));
    assert!(titles.contains(&"Methodology"));

    let chunks = Chunker::new(100, 20).chunk(&doc);
    assert!(chunks.len() >= 2);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_id, format!("proposals_ring_road_chunk_{:04}", i));
        assert_eq!(&doc.raw_text[chunk.start_char..chunk.end_char].trim(), &chunk.content.as_str());
    }
}

#[test]
fn selective_run_merges_into_existing_store() {
    let (_dir, config) = setup();
    let tracker = DuplicateTracker::open(&config.data_paths.tracker_db).unwrap();
    let extractor = TextExtractor::without_ocr();
    let ingester = Ingester::new(&config, &tracker, &extractor);
    ingester.run(&ProcessingMode::Incremental).unwrap();

    let annual = config.folders[1].path.join("annual.docx");
    write_docx(&annual, &[paragraph(None, "Revised annual report with updated culvert inventory figures.")]);

    let report = ingester
        .run(&ProcessingMode::Selective(vec![annual.clone()]))
        .unwrap();
    assert_eq!((report.found, report.processed, report.skipped), (1, 1, 0));
    assert_eq!(report.total_entries, 3);

    let kb = ingester.store().load().unwrap();
    let text: String = kb.get("reports_annual").unwrap().segments.as_ref().unwrap().values().cloned().collect();
    assert!(text.contains("Revised annual report"));
    assert!(kb.get("proposals_ring_road").is_some());
}
