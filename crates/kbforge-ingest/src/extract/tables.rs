//! Table recovery from plain text lines.
//!
//! Page text (native or OCR) has no cell structure, so tables are guessed
//! from column separators: a tab, a run of two or more spaces, or pipes.

use once_cell::sync::Lazy;
use regex::Regex;

use kbforge_store::TableData;

static MULTI_SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

/// Candidate tables need more rows than this.
const MIN_TABLE_ROWS: usize = 2;
/// Distinct row widths tolerated in one table.
const MAX_DISTINCT_WIDTHS: usize = 2;

/// Caption keywords marking a single-column DOCX table as a figure holder.
const FIGURE_KEYWORDS: &[&str] = &["figure", "fig.", "صورة", "شكل"];

/// Split one line into cells, or `None` if it has fewer than two.
pub fn split_cells(line: &str) -> Option<Vec<String>> {
    let raw: Vec<&str> = if line.contains('\t') {
        line.split('\t').collect()
    } else if line.contains("  ") {
        MULTI_SPACE_RE.split(line).collect()
    } else if line.matches('|').count() > 1 {
        line.split('|').collect()
    } else {
        return None;
    };

    let cells: Vec<String> = raw
        .into_iter()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect();
    (cells.len() > 1).then_some(cells)
}

/// Look for one table in a page of text.
///
/// All multi-cell lines on the page form the candidate; it is accepted when it
/// has more than two rows and at most two distinct widths.
pub fn detect_table(text: &str, page: u32) -> Option<TableData> {
    let rows: Vec<Vec<String>> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(split_cells)
        .collect();
    if rows.len() <= MIN_TABLE_ROWS {
        return None;
    }

    let mut widths: Vec<usize> = rows.iter().map(Vec::len).collect();
    widths.sort_unstable();
    widths.dedup();
    if widths.len() > MAX_DISTINCT_WIDTHS {
        return None;
    }

    TableData::from_rows(rows).map(|t| t.with_page(page))
}

/// Table from the text of an OCR'd table image: lines split on tabs, the
/// first non-blank line as header. `None` when the text is blank.
pub fn table_from_image_text(text: &str) -> Option<TableData> {
    TableData::from_rows(text.lines().map(|l| l.split('\t')))
}

/// True when a table's first cell reads like a figure caption.
pub fn is_figure_caption(cell: &str) -> bool {
    let lower = cell.to_lowercase();
    FIGURE_KEYWORDS.iter().any(|k| lower.contains(k))
}
