//! Structured document model produced by segmentation and consumed by chunking.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use kbforge_store::TableData;

/// Best-effort classification of a section from its title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    ExecutiveSummary,
    Introduction,
    ScopeOfWork,
    Methodology,
    TechnicalApproach,
    Timeline,
    TeamComposition,
    Deliverables,
    CostEstimate,
    Boq,
    TermsAndConditions,
    Appendix,
    References,
    Conclusions,
    Recommendations,
    Other,
}

/// Title keywords per section type, English and Arabic. Checked in order; the
/// first hit wins.
const SECTION_KEYWORDS: &[(SectionType, &[&str])] = &[
    (SectionType::ExecutiveSummary, &["executive summary", "summary", "abstract", "ملخص"]),
    (SectionType::Introduction, &["introduction", "background", "مقدمة"]),
    (SectionType::ScopeOfWork, &["scope", "scope of work", "نطاق العمل"]),
    (SectionType::Methodology, &["methodology", "approach", "method", "المنهجية"]),
    (SectionType::TechnicalApproach, &["technical", "technical approach", "النهج الفني"]),
    (SectionType::Timeline, &["timeline", "schedule", "الجدول الزمني"]),
    (SectionType::TeamComposition, &["team", "personnel", "staff", "فريق العمل"]),
    (SectionType::Deliverables, &["deliverables", "outputs", "المخرجات"]),
    (SectionType::CostEstimate, &["cost", "budget", "pricing", "التكلفة"]),
    (SectionType::Boq, &["boq", "bill of quantities", "جدول الكميات"]),
    (SectionType::TermsAndConditions, &["terms", "conditions", "الشروط"]),
    (SectionType::Appendix, &["appendix", "annex", "الملحق"]),
    (SectionType::References, &["references", "bibliography", "المراجع"]),
    (SectionType::Conclusions, &["conclusion", "الخلاصة", "الخاتمة"]),
    (SectionType::Recommendations, &["recommendation", "التوصيات"]),
];

impl SectionType {
    pub fn from_title(title: &str) -> Self {
        let lower = title.to_lowercase();
        SECTION_KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
            .map(|(ty, _)| *ty)
            .unwrap_or(Self::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExecutiveSummary => "executive_summary",
            Self::Introduction => "introduction",
            Self::ScopeOfWork => "scope_of_work",
            Self::Methodology => "methodology",
            Self::TechnicalApproach => "technical_approach",
            Self::Timeline => "timeline",
            Self::TeamComposition => "team_composition",
            Self::Deliverables => "deliverables",
            Self::CostEstimate => "cost_estimate",
            Self::Boq => "boq",
            Self::TermsAndConditions => "terms_and_conditions",
            Self::Appendix => "appendix",
            Self::References => "references",
            Self::Conclusions => "conclusions",
            Self::Recommendations => "recommendations",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for SectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dominant script of a text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "ar")]
    Arabic,
    #[serde(rename = "en")]
    English,
    #[serde(rename = "mixed")]
    Mixed,
}

impl Language {
    /// Classify by counting Arabic-script and Latin word runs.
    pub fn detect(text: &str) -> Self {
        let (mut arabic, mut latin) = (0usize, 0usize);
        let mut prev = Script::None;
        for c in text.chars() {
            let script = Script::of(c);
            if script != prev {
                match script {
                    Script::Arabic => arabic += 1,
                    Script::Latin => latin += 1,
                    Script::None => {}
                }
            }
            prev = script;
        }

        let total = arabic + latin;
        if total == 0 {
            return Self::English;
        }
        let arabic_ratio = arabic as f64 / total as f64;
        let latin_ratio = latin as f64 / total as f64;
        if arabic_ratio > 0.7 {
            Self::Arabic
        } else if latin_ratio > 0.7 {
            Self::English
        } else if arabic_ratio > 0.2 && latin_ratio > 0.2 {
            Self::Mixed
        } else if arabic_ratio > latin_ratio {
            Self::Arabic
        } else {
            Self::English
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Arabic => "ar",
            Self::English => "en",
            Self::Mixed => "mixed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Arabic,
    Latin,
    None,
}

impl Script {
    fn of(c: char) -> Self {
        if is_arabic(c) || matches!(c, '\u{0750}'..='\u{077F}' | '\u{08A0}'..='\u{08FF}') {
            Self::Arabic
        } else if c.is_ascii_alphabetic() {
            Self::Latin
        } else {
            Self::None
        }
    }
}

/// Arabic block, U+0600..=U+06FF.
pub fn is_arabic(c: char) -> bool {
    ('\u{0600}'..='\u{06FF}').contains(&c)
}

/// Source format of a parsed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Pdf,
    Docx,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub document_id: String,
    pub filename: String,
    pub document_type: DocumentType,
    pub language: Language,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<usize>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSection {
    pub section_type: SectionType,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<TableData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_start: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_end: Option<u32>,
}

/// A document after extraction and segmentation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub metadata: DocumentMetadata,
    pub sections: Vec<DocumentSection>,
    pub raw_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
}

impl ParsedDocument {
    pub fn document_id(&self) -> &str {
        &self.metadata.document_id
    }

    pub fn all_tables(&self) -> impl Iterator<Item = &TableData> {
        self.sections.iter().flat_map(|s| s.tables.iter())
    }
}

/// Per-chunk context carried to the indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub section_type: String,
    pub section_title: String,
    pub chunk_index: usize,
    pub language: String,
}

/// A retrieval unit handed to the external indexer.
///
/// Offsets are code-point positions within the document's section layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub start_char: usize,
    pub end_char: usize,
}
