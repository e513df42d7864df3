//! DOCX reading: body paragraphs with their styles, and top-level tables.
//!
//! Only what segmentation needs is parsed out of `word/document.xml`;
//! style ids are resolved to display names through `word/styles.xml`.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, warn};

use kbforge_core::{Error, Result};
use kbforge_store::{ExtractionMetadata, ExtractionMethod, TableData};

use super::tables::is_figure_caption;
use super::ExtractionPayload;
use crate::segment::{is_heading_style, matches_header_pattern, SectionAccumulator};

/// Section paragraphs fall into before the first header.
pub const DEFAULT_SECTION: &str = "Introduction";
/// Decompressed size cap per archive entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const DOCUMENT_XML: &str = "word/document.xml";
const STYLES_XML: &str = "word/styles.xml";

/// A body-level paragraph.
#[derive(Debug, Clone, PartialEq)]
pub struct Paragraph {
    pub text: String,
    /// Resolved style name, `Normal` when unstyled.
    pub style: String,
}

/// Parsed body of a DOCX file.
#[derive(Debug, Default)]
pub struct DocxBody {
    pub paragraphs: Vec<Paragraph>,
    /// Raw rows of each top-level table, cells already joined.
    pub tables: Vec<Vec<Vec<String>>>,
}

/// Read and segment a DOCX file.
pub fn extract_docx(path: &Path, max_section_chars: usize) -> Result<ExtractionPayload> {
    let bytes = std::fs::read(path).map_err(|e| Error::from_io(e, path))?;
    let body = read_body(&bytes).map_err(|details| {
        tracing::error!("Failed to open DOCX file {}: {}", path.display(), details);
        Error::corrupted(path, format!("Could not open DOCX file: {}", details))
    })?;
    if body.paragraphs.is_empty() {
        return Err(Error::corrupted(path, "DOCX file contains no paragraphs"));
    }

    let mut tables = Vec::new();
    for (index, raw) in body.tables.iter().enumerate() {
        let Some(table) = TableData::from_rows(raw) else {
            continue;
        };
        if table.column_count() == 1 && is_figure_caption(&table.headers[0]) {
            debug!("Skipping figure caption table {}: {}", index, table.headers[0]);
            continue;
        }
        tables.push(table);
    }

    let mut acc = SectionAccumulator::new(DEFAULT_SECTION);
    for para in &body.paragraphs {
        let text = para.text.trim();
        if text.is_empty() {
            continue;
        }
        if is_heading_style(&para.style) || matches_header_pattern(text) {
            acc.start_section(text, None);
        } else {
            acc.push_line(text, None);
        }
    }

    let section_count = acc.section_count();
    let segments = acc.finish(max_section_chars);
    let total_chars = segments.iter().map(|s| s.text.chars().count()).sum();
    Ok(ExtractionPayload {
        metadata: ExtractionMetadata {
            extraction_method: ExtractionMethod::Docx,
            paragraph_count: Some(body.paragraphs.len()),
            table_count: Some(tables.len()),
            section_count: Some(section_count),
            total_chars: Some(total_chars),
            ..Default::default()
        },
        segments,
        tables,
    })
}

/// Parse the archive. Errors are returned as plain text for the caller to wrap.
pub fn read_body(bytes: &[u8]) -> std::result::Result<DocxBody, String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let document = read_entry(&mut archive, DOCUMENT_XML)?
        .ok_or_else(|| format!("{} not found", DOCUMENT_XML))?;
    let styles = match read_entry(&mut archive, STYLES_XML)? {
        Some(xml) => parse_styles(&xml).unwrap_or_else(|e| {
            warn!("Ignoring unreadable {}: {}", STYLES_XML, e);
            HashMap::new()
        }),
        None => HashMap::new(),
    };
    parse_document(&document, &styles)
}

fn read_entry(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> std::result::Result<Option<Vec<u8>>, String> {
    let entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.to_string()),
    };
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(format!("{} exceeds size limit ({} bytes)", name, MAX_XML_ENTRY_BYTES));
    }
    Ok(Some(out))
}

fn attr(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Style id to display name, from `w:style/@w:styleId` and `w:name/@w:val`.
fn parse_styles(xml: &[u8]) -> std::result::Result<HashMap<String, String>, String> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut styles = HashMap::new();
    let mut current: Option<String> = None;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"style" => {
                current = attr(&e, b"styleId");
            }
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"name" => {
                if let (Some(id), Some(name)) = (current.as_ref(), attr(&e, b"val")) {
                    styles.insert(id.clone(), name);
                }
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"style" => current = None,
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(styles)
}

#[derive(Default)]
struct OpenParagraph {
    text: String,
    style_id: Option<String>,
}

/// Walk `word/document.xml` tracking paragraph and table nesting. Text in
/// nested tables or text boxes is left out, as it is in the body view.
fn parse_document(
    xml: &[u8],
    styles: &HashMap<String, String>,
) -> std::result::Result<DocxBody, String> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut body = DocxBody::default();

    let mut p_depth = 0usize;
    let mut tbl_depth = 0usize;
    let mut in_text = false;
    let mut para = OpenParagraph::default();
    let mut table: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => {
                    p_depth += 1;
                    if p_depth == 1 {
                        para = OpenParagraph::default();
                    }
                }
                b"t" if p_depth == 1 => in_text = true,
                b"pStyle" if p_depth == 1 => para.style_id = attr(&e, b"val"),
                b"tbl" => {
                    tbl_depth += 1;
                    if tbl_depth == 1 {
                        table.clear();
                    }
                }
                b"tr" if tbl_depth == 1 => row.clear(),
                b"tc" if tbl_depth == 1 => cell.clear(),
                _ => {}
            },
            Ok(Event::Empty(e)) if p_depth == 1 => match e.local_name().as_ref() {
                b"pStyle" => para.style_id = attr(&e, b"val"),
                b"tab" => para.text.push('\t'),
                b"br" | b"cr" => para.text.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"p" => {
                if tbl_depth == 0 {
                    body.paragraphs.push(Paragraph {
                        text: String::new(),
                        style: "Normal".to_string(),
                    });
                } else if tbl_depth == 1 {
                    cell.push(String::new());
                }
            }
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| e.to_string())?;
                para.text.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    p_depth = p_depth.saturating_sub(1);
                    if p_depth == 0 {
                        let done = std::mem::take(&mut para);
                        if tbl_depth == 0 {
                            let style = done
                                .style_id
                                .map(|id| styles.get(&id).cloned().unwrap_or(id))
                                .unwrap_or_else(|| "Normal".to_string());
                            body.paragraphs.push(Paragraph {
                                text: done.text,
                                style,
                            });
                        } else if tbl_depth == 1 {
                            cell.push(done.text);
                        }
                    }
                }
                b"tc" if tbl_depth == 1 => row.push(cell.join("\n")),
                b"tr" if tbl_depth == 1 => table.push(std::mem::take(&mut row)),
                b"tbl" => {
                    if tbl_depth == 1 {
                        body.tables.push(std::mem::take(&mut table));
                    }
                    tbl_depth = tbl_depth.saturating_sub(1);
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(body)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::Write;

    pub fn para(text: &str) -> String {
        format!("<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>", text)
    }

    pub fn styled(style_id: &str, text: &str) -> String {
        format!(
            "<w:p><w:pPr><w:pStyle w:val=\"{}\"/></w:pPr><w:r><w:t>{}</w:t></w:r></w:p>",
            style_id, text
        )
    }

    pub fn table(rows: &[&[&str]]) -> String {
        let rows: String = rows
            .iter()
            .map(|cells| {
                let cells: String = cells
                    .iter()
                    .map(|c| format!("<w:tc>{}</w:tc>", para(c)))
                    .collect();
                format!("<w:tr>{}</w:tr>", cells)
            })
            .collect();
        format!("<w:tbl>{}</w:tbl>", rows)
    }

    /// A DOCX archive whose body is `body_xml`; `Heading1`, `Heading2` and `Title` are defined.
    pub fn make_docx(body_xml: &str) -> Vec<u8> {
        let document = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
             <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
             <w:body>{}<w:sectPr/></w:body></w:document>",
            body_xml
        );
        let styles = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <w:styles xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
             <w:style w:type=\"paragraph\" w:styleId=\"Normal\"><w:name w:val=\"Normal\"/></w:style>\
             <w:style w:type=\"paragraph\" w:styleId=\"Heading1\"><w:name w:val=\"heading 1\"/></w:style>\
             <w:style w:type=\"paragraph\" w:styleId=\"Heading2\"><w:name w:val=\"heading 2\"/></w:style>\
             <w:style w:type=\"paragraph\" w:styleId=\"Title\"><w:name w:val=\"Title\"/></w:style>\
             </w:styles>";

        let buf = std::io::Cursor::new(Vec::new());
        let mut zip = zip::ZipWriter::new(buf);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("word/document.xml", options).unwrap();
        zip.write_all(document.as_bytes()).unwrap();
        zip.start_file("word/styles.xml", options).unwrap();
        zip.write_all(styles.as_bytes()).unwrap();
        zip.finish().unwrap().into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use tempfile::TempDir;

    fn write_docx(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, make_docx(body)).unwrap();
        path
    }

    #[test]
    fn test_styles_and_patterns_start_sections() {
        let dir = TempDir::new().unwrap();
        let body = [
            para("Prepared for the Ministry of Works."),
            styled("Heading1", "Project Background"),
            para("The corridor carries 40,000 vehicles a day."),
            para("SCOPE OF WORK"),
            para("Topographic survey &amp; geotechnical investigation."),
            para("   "),
            styled("Heading2", "Project Background"),
            para("Traffic grows 4% a year."),
        ]
        .concat();
        let path = write_docx(&dir, "proposal.docx", &body);

        let payload = extract_docx(&path, 50_000).unwrap();
        let titles: Vec<_> = payload.segments.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Introduction", "Project Background", "SCOPE OF WORK"]);
        assert_eq!(payload.segments[0].text, "Prepared for the Ministry of Works.");
        assert_eq!(
            payload.segments[1].text,
            "The corridor carries 40,000 vehicles a day.\nTraffic grows 4% a year."
        );
        assert_eq!(payload.segments[2].text, "Topographic survey & geotechnical investigation.");
        assert_eq!(payload.metadata.paragraph_count, Some(8));
        assert_eq!(payload.metadata.section_count, Some(3));
        assert_eq!(payload.metadata.extraction_method, ExtractionMethod::Docx);
    }

    #[test]
    fn test_tables_and_figure_captions() {
        let dir = TempDir::new().unwrap();
        let body = [
            para("Staffing"),
            table(&[&["Role", "Name"], &["", ""], &["Team Leader", "R. Haddad"]]),
            table(&[&["Figure 2: Site location"]]),
            table(&[&["Notes"], &["Single column but not a figure"]]),
        ]
        .concat();
        let path = write_docx(&dir, "team.docx", &body);

        let payload = extract_docx(&path, 50_000).unwrap();
        assert_eq!(payload.tables.len(), 2);
        assert_eq!(payload.tables[0].headers, vec!["Role", "Name"]);
        assert_eq!(payload.tables[0].rows, vec![vec!["Team Leader", "R. Haddad"]]);
        assert_eq!(payload.tables[1].headers, vec!["Notes"]);
        assert_eq!(payload.metadata.table_count, Some(2));
        // Cell paragraphs are not body paragraphs.
        assert_eq!(payload.metadata.paragraph_count, Some(1));
    }

    #[test]
    fn test_tabs_and_unresolved_styles() {
        let styles = HashMap::new();
        let xml = b"<w:document xmlns:w=\"x\"><w:body>\
            <w:p><w:pPr><w:pStyle w:val=\"Custom\"/></w:pPr><w:r><w:t>a</w:t><w:tab/><w:t>b</w:t></w:r></w:p>\
            </w:body></w:document>";
        let body = parse_document(xml, &styles).unwrap();
        assert_eq!(body.paragraphs[0].text, "a\tb");
        assert_eq!(body.paragraphs[0].style, "Custom");
    }

    #[test]
    fn test_empty_body_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = write_docx(&dir, "empty.docx", "");
        assert!(matches!(extract_docx(&path, 50_000), Err(Error::CorruptedFile { .. })));
    }

    #[test]
    fn test_not_a_zip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fake.docx");
        std::fs::write(&path, b"plain text pretending").unwrap();
        let err = extract_docx(&path, 50_000).unwrap_err();
        assert!(err.to_string().contains("Could not open DOCX file"));
    }
}
