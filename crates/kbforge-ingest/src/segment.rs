//! Section segmentation: header heuristics shared by the PDF and DOCX paths,
//! and assembly of a [`ParsedDocument`] from an extraction payload.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::document::*;
use crate::extract::ExtractionPayload;
use kbforge_store::TableData;

/// Header titles are cut to this many characters.
pub const MAX_TITLE_CHARS: usize = 100;
/// Appended to a section cut at the size cap.
pub const TRUNCATION_MARKER: &str = "\n\n... [Content truncated - file too large]";
/// Segment title used for whole-document OCR text.
pub const OCR_SEGMENT_TITLE: &str = "OCR_Extracted_Content";

// Compiled regex patterns (compiled once, reused).
static KEYWORD_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:EXECUTIVE SUMMARY|INTRODUCTION|SCOPE OF WORK|TECHNICAL PROPOSAL|FINANCIAL PROPOSAL|DELIVERABLES|TIMELINE|CONCLUSION|PROJECT OVERVIEW|METHODOLOGY)$",
    )
    .unwrap()
});
static DIVISION_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:SECTION \d+|CHAPTER \d+|PART \d+)$").unwrap());
static NUMBERED_TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\s+[A-Z][^.]{5,50}$").unwrap());
static ARABIC_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:مقدمة|المقدمة|الملخص التنفيذي|نطاق العمل|المنهجية|الخاتمة|المخرجات|الجدول الزمني|العرض الفني|العرض المالي)\s*:?$",
    )
    .unwrap()
});
static SECTION_KEYWORD_PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:SECTION|CHAPTER|PART|INTRODUCTION|CONCLUSION|ABSTRACT|REFERENCES|EXECUTIVE SUMMARY|SCOPE OF WORK|TECHNICAL PROPOSAL|FINANCIAL PROPOSAL|DELIVERABLES|TIMELINE|PROJECT OVERVIEW|METHODOLOGY|مقدمة|المقدمة|الملخص التنفيذي|نطاق العمل|المنهجية|الخاتمة|المخرجات|الجدول الزمني)\b",
    )
    .unwrap()
});
static NUMBERED_PREFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.\s+\w+").unwrap());

/// Heading paragraph styles, matched as case-insensitive substrings of the style name.
const HEADING_STYLES: &[&str] = &[
    "heading 1", "heading 2", "heading 3", "heading 4", "heading 5", "heading 6", "title",
    "subtitle",
];

/// Whole-line header patterns used for DOCX paragraphs and OCR text.
pub fn matches_header_pattern(text: &str) -> bool {
    let text = text.trim();
    KEYWORD_LINE_RE.is_match(text)
        || DIVISION_LINE_RE.is_match(text)
        || NUMBERED_TITLE_RE.is_match(text)
        || ARABIC_HEADER_RE.is_match(text)
}

pub fn is_heading_style(style_name: &str) -> bool {
    let lower = style_name.to_lowercase();
    HEADING_STYLES.iter().any(|h| lower.contains(h))
}

/// Header test for a trimmed line of PDF text: an all-caps title, a section
/// keyword at the start of the line, or a numbered heading.
pub fn is_pdf_header(line: &str) -> bool {
    let len = line.chars().count();
    (is_all_caps(line) && (10..=100).contains(&len) && line.split_whitespace().count() >= 2)
        || SECTION_KEYWORD_PREFIX_RE.is_match(line)
        || NUMBERED_PREFIX_RE.is_match(line)
}

/// At least one cased letter and no lowercase ones.
fn is_all_caps(line: &str) -> bool {
    line.chars().any(char::is_uppercase) && !line.chars().any(char::is_lowercase)
}

/// A titled block of extracted text, in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub title: String,
    pub text: String,
    pub page_start: Option<u32>,
    pub page_end: Option<u32>,
}

#[derive(Debug)]
struct OpenSection {
    title: String,
    lines: Vec<String>,
    page_start: Option<u32>,
    page_end: Option<u32>,
}

/// Collects lines under the most recent header. A header seen twice reopens
/// its earlier section rather than creating a second one.
#[derive(Debug)]
pub struct SectionAccumulator {
    sections: Vec<OpenSection>,
    index: HashMap<String, usize>,
    current: usize,
}

impl SectionAccumulator {
    pub fn new(default_title: &str) -> Self {
        let mut acc = Self {
            sections: Vec::new(),
            index: HashMap::new(),
            current: 0,
        };
        acc.start_section(default_title, None);
        acc
    }

    pub fn start_section(&mut self, header: &str, page: Option<u32>) {
        let title: String = header.trim().chars().take(MAX_TITLE_CHARS).collect();
        self.current = match self.index.get(&title) {
            Some(&i) => i,
            None => {
                self.sections.push(OpenSection {
                    title: title.clone(),
                    lines: Vec::new(),
                    page_start: page,
                    page_end: page,
                });
                self.index.insert(title, self.sections.len() - 1);
                self.sections.len() - 1
            }
        };
    }

    pub fn push_line(&mut self, line: &str, page: Option<u32>) {
        let section = &mut self.sections[self.current];
        section.lines.push(line.to_string());
        if let Some(p) = page {
            section.page_start = Some(section.page_start.map_or(p, |s| s.min(p)));
            section.page_end = Some(section.page_end.map_or(p, |e| e.max(p)));
        }
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Join each section's lines and cap its length at `max_chars`.
    pub fn finish(self, max_chars: usize) -> Vec<Segment> {
        self.sections
            .into_iter()
            .map(|s| Segment {
                title: s.title,
                text: truncate_section(s.lines.join("\n"), max_chars),
                page_start: s.page_start,
                page_end: s.page_end,
            })
            .collect()
    }
}

fn truncate_section(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text,
    }
}

/// Split free text into sections using the PDF header rules.
pub fn split_by_headers(text: &str, default_title: &str, max_chars: usize) -> Vec<Segment> {
    let mut acc = SectionAccumulator::new(default_title);
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if is_pdf_header(line) {
            acc.start_section(line, None);
        } else {
            acc.push_line(line, None);
        }
    }
    acc.finish(max_chars)
}

/// Turns extraction payloads into [`ParsedDocument`]s.
#[derive(Debug, Clone)]
pub struct Segmenter {
    max_section_chars: usize,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new(kbforge_core::config::MAX_SECTION_CHARS)
    }
}

impl Segmenter {
    pub fn new(max_section_chars: usize) -> Self {
        Self { max_section_chars }
    }

    pub fn segment(
        &self,
        payload: &ExtractionPayload,
        document_id: &str,
        filename: &str,
        document_type: DocumentType,
    ) -> ParsedDocument {
        let mut sections: Vec<DocumentSection> = Vec::new();
        for seg in &payload.segments {
            // OCR text arrives as one block; give it structure where headers are visible.
            let parts = if seg.title == OCR_SEGMENT_TITLE {
                split_by_headers(&seg.text, "Content", self.max_section_chars)
            } else {
                vec![seg.clone()]
            };
            for part in parts {
                let content = part.text.trim();
                if content.is_empty() {
                    continue;
                }
                sections.push(DocumentSection {
                    section_type: SectionType::from_title(&part.title),
                    title: part.title.clone(),
                    content: content.to_string(),
                    tables: Vec::new(),
                    page_start: part.page_start,
                    page_end: part.page_end,
                });
            }
        }

        attach_tables(&mut sections, &payload.tables);

        let raw_text = sections
            .iter()
            .map(|s| format!("{}\n\n{}", s.title, s.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        let markdown = render_markdown(filename, &sections);

        ParsedDocument {
            metadata: DocumentMetadata {
                document_id: document_id.to_string(),
                filename: filename.to_string(),
                document_type,
                language: Language::detect(&raw_text),
                total_pages: payload.metadata.page_count,
                created_at: chrono::Local::now().naive_local(),
            },
            sections,
            raw_text,
            markdown: Some(markdown),
        }
    }
}

/// Place each table in the section covering its page, else the first
/// cost/BOQ section, else the last section.
fn attach_tables(sections: &mut Vec<DocumentSection>, tables: &[TableData]) {
    for table in tables {
        let by_page = table.page_number.and_then(|p| {
            sections.iter().position(|s| match (s.page_start, s.page_end) {
                (Some(start), Some(end)) => (start..=end).contains(&p),
                _ => false,
            })
        });
        let by_type = || {
            sections
                .iter()
                .position(|s| matches!(s.section_type, SectionType::Boq | SectionType::CostEstimate))
        };
        match by_page.or_else(by_type).or(sections.len().checked_sub(1)) {
            Some(i) => sections[i].tables.push(table.clone()),
            None => sections.push(DocumentSection {
                section_type: SectionType::Other,
                title: "Tables".to_string(),
                content: String::new(),
                tables: vec![table.clone()],
                page_start: table.page_number,
                page_end: table.page_number,
            }),
        }
    }
}

fn render_markdown(filename: &str, sections: &[DocumentSection]) -> String {
    let mut md = format!("# {}\n\n", filename);
    for section in sections {
        md.push_str(&format!("## {}\n\n", section.title));
        if !section.content.is_empty() {
            md.push_str(&section.content);
            md.push_str("\n\n");
        }
        for table in &section.tables {
            md.push_str(&table.to_markdown());
            md.push('\n');
        }
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbforge_store::ExtractionMetadata;

    #[test]
    fn test_pdf_header_rules() {
        assert!(is_pdf_header("PROJECT BACKGROUND AND CONTEXT"));
        assert!(is_pdf_header("Introduction to the works"));
        assert!(is_pdf_header("3. Site conditions"));
        assert!(is_pdf_header("نطاق العمل"));
        // Too short for the all-caps rule, no keyword.
        assert!(!is_pdf_header("NOTE A"));
        // Single word.
        assert!(!is_pdf_header("CONFIDENTIALITY"));
        assert!(!is_pdf_header("The contractor shall provide all labour."));
        assert!(!is_pdf_header("Introductory remarks"));
    }

    #[test]
    fn test_docx_header_patterns() {
        assert!(matches_header_pattern("Executive Summary"));
        assert!(matches_header_pattern("SECTION 4"));
        assert!(matches_header_pattern("2. Project Overview"));
        assert!(matches_header_pattern("الجدول الزمني"));
        assert!(!matches_header_pattern("2. Works shall start."));
        assert!(!matches_header_pattern("Executive Summary of findings"));

        assert!(is_heading_style("Heading 2"));
        assert!(is_heading_style("heading 1 char"));
        assert!(is_heading_style("Subtitle"));
        assert!(!is_heading_style("Normal"));
    }

    #[test]
    fn test_accumulator_merges_repeated_headers() {
        let mut acc = SectionAccumulator::new("Content");
        acc.push_line("preface", Some(1));
        acc.start_section("SCOPE OF WORK", Some(1));
        acc.push_line("earthworks", Some(2));
        acc.start_section("TIMELINE", Some(3));
        acc.push_line("six months", Some(3));
        acc.start_section("SCOPE OF WORK", Some(4));
        acc.push_line("drainage", Some(4));

        let segs = acc.finish(50_000);
        assert_eq!(segs.len(), 3);
        assert_eq!(segs[1].title, "SCOPE OF WORK");
        assert_eq!(segs[1].text, "earthworks\ndrainage");
        assert_eq!((segs[1].page_start, segs[1].page_end), (Some(1), Some(4)));
    }

    #[test]
    fn test_long_section_is_truncated_with_marker() {
        let mut acc = SectionAccumulator::new("Content");
        acc.push_line(&"x".repeat(120), None);
        let segs = acc.finish(100);
        assert_eq!(segs[0].text.len(), 100 + TRUNCATION_MARKER.len());
        assert!(segs[0].text.ends_with("[Content truncated - file too large]"));
    }

    #[test]
    fn test_long_header_is_cut() {
        let mut acc = SectionAccumulator::new("Content");
        acc.start_section(&"H".repeat(150), None);
        let segs = acc.finish(100);
        assert_eq!(segs[1].title.chars().count(), MAX_TITLE_CHARS);
    }

    #[test]
    fn test_segmenter_builds_document() {
        let table = TableData::from_rows(vec![vec!["Item", "Cost"], vec!["Survey", "1200"]]).unwrap();
        let payload = ExtractionPayload {
            segments: vec![
                Segment {
                    title: "Introduction".into(),
                    text: String::new(),
                    page_start: None,
                    page_end: None,
                },
                Segment {
                    title: "Scope of Work".into(),
                    text: "Design and supervision of the ring road.".into(),
                    page_start: None,
                    page_end: None,
                },
                Segment {
                    title: "Cost Estimate".into(),
                    text: "Summary of fees.".into(),
                    page_start: None,
                    page_end: None,
                },
            ],
            tables: vec![table],
            metadata: ExtractionMetadata::default(),
        };

        let doc = Segmenter::default().segment(&payload, "proposals_ring", "ring.docx", DocumentType::Docx);
        assert_eq!(doc.sections.len(), 2);
        assert_eq!(doc.sections[0].section_type, SectionType::ScopeOfWork);
        assert_eq!(doc.sections[1].tables.len(), 1);
        assert!(doc.raw_text.starts_with("Scope of Work\n\nDesign"));
        assert_eq!(doc.metadata.language, Language::English);
        let md = doc.markdown.unwrap();
        assert!(md.contains("## Cost Estimate"));
        assert!(md.contains("| Survey | 1200 |"));
    }

    #[test]
    fn test_ocr_block_is_split_on_headers() {
        let payload = ExtractionPayload {
            segments: vec![Segment {
                title: OCR_SEGMENT_TITLE.into(),
                text: "cover page\n\n--- Page 2 ---\n\nMETHODOLOGY AND APPROACH\nsurvey first".into(),
                page_start: None,
                page_end: None,
            }],
            tables: Vec::new(),
            metadata: ExtractionMetadata::default(),
        };
        let doc = Segmenter::default().segment(&payload, "reports_scan", "scan.pdf", DocumentType::Pdf);
        let titles: Vec<_> = doc.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Content", "METHODOLOGY AND APPROACH"]);
        assert_eq!(doc.sections[1].section_type, SectionType::Methodology);
    }
}
