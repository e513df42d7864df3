//! Retrieval chunking of parsed documents.
//!
//! Each section is laid out as `title\n\ncontent` and split into windows of at
//! most `chunk_size` characters. Cuts prefer sentence endings, then
//! whitespace, then a hard cut. All positions are in chars (code points), so
//! Arabic and Latin text are measured the same way.

use kbforge_core::ChunkingConfig;

use crate::document::{ChunkMetadata, IndexedChunk, Language, ParsedDocument};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;
/// Smaller requested sizes are raised to this.
pub const MIN_CHUNK_SIZE: usize = 100;

/// Checked in this order; a later ending wins only if it sits further right.
const SENTENCE_ENDINGS: &[&str] = &[".", "!", "?", "。", "！", "？", "\n\n"];
/// Separator between sections in the document layout.
const SECTION_SEPARATOR: &str = "\n\n";
/// Section type recorded for text chunked without section structure.
const PLAIN_SECTION_TYPE: &str = "content";

/// Splits documents into [`IndexedChunk`]s.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

impl Chunker {
    /// `chunk_size` is floored at [`MIN_CHUNK_SIZE`]; `overlap` is capped at half of it.
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(MIN_CHUNK_SIZE);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size / 2),
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_size, config.overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Chunk every section. Offsets index into the document layout, where
    /// sections appear as `title\n\ncontent` separated by blank lines (the
    /// document's `raw_text` as built by the segmenter).
    pub fn chunk(&self, document: &ParsedDocument) -> Vec<IndexedChunk> {
        let document_id = document.document_id();
        let language = document.metadata.language;
        let mut out = Vec::new();
        let mut offset = 0usize;

        for (i, section) in document.sections.iter().enumerate() {
            if i > 0 {
                offset += SECTION_SEPARATOR.chars().count();
            }
            let text = format!("{}\n\n{}", section.title, section.content);
            let chars: Vec<char> = text.chars().collect();
            self.emit(
                &chars,
                offset,
                document_id,
                section.section_type.as_str(),
                &section.title,
                language,
                &mut out,
            );
            offset += chars.len();
        }

        if out.is_empty() && !document.raw_text.is_empty() {
            let chars: Vec<char> = document.raw_text.chars().collect();
            self.emit(&chars, 0, document_id, PLAIN_SECTION_TYPE, "", language, &mut out);
        }
        out
    }

    /// Join chunk contents with spaces and chunk the result again as plain
    /// text, optionally with new parameters.
    pub fn rechunk(
        &self,
        chunks: &[IndexedChunk],
        chunk_size: Option<usize>,
        overlap: Option<usize>,
    ) -> Vec<IndexedChunk> {
        let size = chunk_size.unwrap_or(self.chunk_size);
        let chunker = Chunker::new(size, overlap.unwrap_or(self.overlap));

        let Some(first) = chunks.first() else {
            return Vec::new();
        };
        let language = match first.metadata.language.as_str() {
            "ar" => Language::Arabic,
            "mixed" => Language::Mixed,
            _ => Language::English,
        };
        let combined = chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let chars: Vec<char> = combined.chars().collect();

        let mut out = Vec::new();
        chunker.emit(&chars, 0, &first.document_id, PLAIN_SECTION_TYPE, "", language, &mut out);
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &self,
        chars: &[char],
        base: usize,
        document_id: &str,
        section_type: &str,
        section_title: &str,
        language: Language,
        out: &mut Vec<IndexedChunk>,
    ) {
        for (chunk_index, (start, end)) in self.split_spans(chars).into_iter().enumerate() {
            let window = &chars[start..end];
            let lead = window.iter().take_while(|c| c.is_whitespace()).count();
            let trail = window.iter().rev().take_while(|c| c.is_whitespace()).count();
            let content: String = window[lead..window.len() - trail].iter().collect();
            let start_char = base + start + lead;

            out.push(IndexedChunk {
                chunk_id: format!("{}_chunk_{:04}", document_id, out.len()),
                document_id: document_id.to_string(),
                metadata: ChunkMetadata {
                    section_type: section_type.to_string(),
                    section_title: section_title.to_string(),
                    chunk_index,
                    language: language.code().to_string(),
                },
                start_char,
                end_char: start_char + content.chars().count(),
                content,
            });
        }
    }

    /// Window boundaries over `chars`. Blank windows are dropped.
    pub fn split_spans(&self, chars: &[char]) -> Vec<(usize, usize)> {
        let len = chars.len();
        let mut spans = Vec::new();
        if len <= self.chunk_size {
            spans.push((0, len));
        } else {
            let mut start = 0usize;
            while start < len {
                let end = start + self.chunk_size;
                if end >= len {
                    spans.push((start, len));
                    break;
                }

                let best = sentence_break(chars, start, end);
                let cut = if best > start {
                    best
                } else {
                    word_break(chars, start, end)
                };
                spans.push((start, cut));

                let next = cut.saturating_sub(self.overlap);
                start = if next == 0 || next <= start {
                    end - self.overlap
                } else {
                    next
                };
            }
        }
        spans.retain(|&(s, e)| chars[s..e].iter().any(|c| !c.is_whitespace()));
        spans
    }
}

/// Last start of `needle` lying fully inside `chars[start..end]`.
fn rfind(chars: &[char], needle: &[char], start: usize, end: usize) -> Option<usize> {
    if needle.is_empty() || end < start + needle.len() {
        return None;
    }
    (start..=end - needle.len())
        .rev()
        .find(|&i| chars[i..i + needle.len()] == *needle)
}

fn sentence_break(chars: &[char], start: usize, end: usize) -> usize {
    let mut best = start;
    for ending in SENTENCE_ENDINGS {
        let needle: Vec<char> = ending.chars().collect();
        if let Some(pos) = rfind(chars, &needle, start, end) {
            if pos > best {
                best = pos + needle.len();
            }
        }
    }
    best
}

fn word_break(chars: &[char], start: usize, end: usize) -> usize {
    let window = &chars[start..end];
    if let Some(pos) = window.iter().rposition(|&c| c == ' ') {
        if pos > 0 {
            return start + pos + 1;
        }
    }
    if let Some(pos) = window.iter().rposition(|c| c.is_whitespace()) {
        if pos > 0 {
            return start + pos + 1;
        }
    }
    end
}
